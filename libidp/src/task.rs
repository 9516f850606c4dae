//! Задачи / Tasks

use crate::abi::{nr, ArgSlice, MAX_ARGS};
use crate::{check, raw, Error, Result};

/// Запустить программу из boot-модуля, вернуть pid.
/// Start a program from a boot module, returning its pid.
pub fn exec(path: &str, argv: &[&str]) -> Result<u64> {
    if argv.len() > MAX_ARGS {
        return Err(Error::InvalidArg);
    }
    let mut slices = [ArgSlice::default(); MAX_ARGS];
    for (slot, arg) in slices.iter_mut().zip(argv) {
        *slot = ArgSlice { ptr: arg.as_ptr() as u64, len: arg.len() as u64 };
    }
    let ret = unsafe {
        raw::syscall4(
            nr::EXEC,
            path.as_ptr() as u64,
            path.len() as u64,
            slices.as_ptr() as u64,
            argv.len() as u64,
        )
    };
    check(ret)
}

pub fn exit(code: i32) -> ! {
    unsafe { raw::syscall1(nr::EXIT, code as u64) };
    // exit не возвращается / exit never returns
    loop {
        core::hint::spin_loop();
    }
}

pub fn getpid() -> u64 {
    unsafe { raw::syscall0(nr::GETPID) }
}

/// Вывести строку в отладочную консоль ядра.
/// Write a string to the kernel debug console.
pub fn write(s: &str) -> Result<u64> {
    check(unsafe { raw::syscall2(nr::WRITE, s.as_ptr() as u64, s.len() as u64) })
}
