//! Память процесса / Process memory

use crate::abi::{nr, FbInfo, SBRK_FAILED};
use crate::{check, raw, Error, Result};

/// Сдвинуть program break, вернуть старое значение.
/// Move the program break, returning the old value.
pub fn sbrk(delta: i64) -> Result<u64> {
    let ret = unsafe { raw::syscall1(nr::SBRK, delta as u64) };
    if ret == SBRK_FAILED {
        Err(Error::NoMemory)
    } else {
        Ok(ret)
    }
}

/// Общая память с задачей `target`: (наш адрес, их адрес).
/// Memory shared with task `target`: (our address, their address).
pub fn share_mem(target: u64, size: u64) -> Result<(u64, u64)> {
    let mut remote = 0u64;
    let ret = unsafe {
        raw::syscall3(nr::SHARE_MEM, target, size, &mut remote as *mut u64 as u64)
    };
    check(ret).map(|local| (local, remote))
}

/// Убрать отображение, не освобождая страницы.
/// Drop a mapping without freeing its pages.
pub fn unmap(addr: u64, size: u64) -> Result<()> {
    check(unsafe { raw::syscall2(nr::UNMAP, addr, size) }).map(|_| ())
}

pub fn framebuffer() -> Result<FbInfo> {
    let mut info = FbInfo::default();
    let ret = unsafe { raw::syscall1(nr::GET_FB_INFO, &mut info as *mut FbInfo as u64) };
    check(ret).map(|_| info)
}
