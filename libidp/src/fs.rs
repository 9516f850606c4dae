//! Файлы boot-модулей / Boot module files
//!
//! Только чтение. Каталоги выводятся из путей модулей.
//! Read only. Directories are implied by module paths.

use crate::abi::{nr, DirEntry, FileStat};
use crate::{check, raw, Error, Result};

/// Прочитать начало файла в `buf`; вернуть число байт.
/// Read the start of a file into `buf`; returns the byte count.
pub fn read(path: &str, buf: &mut [u8]) -> Result<usize> {
    let ret = unsafe {
        raw::syscall4(
            nr::FILE_READ,
            path.as_ptr() as u64,
            path.len() as u64,
            buf.as_mut_ptr() as u64,
            buf.len() as u64,
        )
    };
    check(ret).map(|n| n as usize)
}

pub fn stat(path: &str) -> Result<FileStat> {
    let mut out = FileStat::default();
    let ret = unsafe {
        raw::syscall3(
            nr::STAT,
            path.as_ptr() as u64,
            path.len() as u64,
            &mut out as *mut FileStat as u64,
        )
    };
    check(ret).map(|_| out)
}

/// Элемент каталога номер `index`; `None` после последнего.
/// Directory entry number `index`; `None` past the last one.
pub fn read_dir(path: &str, index: u64) -> Result<Option<DirEntry>> {
    let mut out = DirEntry::default();
    let ret = unsafe {
        raw::syscall4(
            nr::READ_DIR,
            path.as_ptr() as u64,
            path.len() as u64,
            index,
            &mut out as *mut DirEntry as u64,
        )
    };
    match check(ret) {
        Ok(_) => Ok(Some(out)),
        Err(Error::Empty) => Ok(None),
        Err(err) => Err(err),
    }
}
