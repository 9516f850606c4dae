//! libidp — OpenIDP userspace library
//!
//! ABI, общий для ядра и userspace, + тонкие обёртки над syscall'ами.
//! ABI shared by the kernel and userspace + thin syscall wrappers.
//!
//! Использование / Usage:
//!   use libidp::ipc;
//!   ipc::send(wm_pid, MSG_DRAW, [x, y, 0])?;

#![no_std]

pub mod abi;

// Обёртки собираются только под цель ядра.
// Wrappers only build for the kernel's target.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod raw;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod fs;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod ipc;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod mem;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod task;

use abi::status;

/// Ошибки syscall / Syscall errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    NotFound,
    Full,
    Empty,
    NoMemory,
    InvalidArg,
    Malformed,
    NoPermission,
    Unknown(i64),
}

impl Error {
    /// Декодировать отрицательный статус из `rax`.
    /// Decode a negative status returned in `rax`.
    pub const fn from_status(code: i64) -> Self {
        match code {
            status::NOT_FOUND         => Error::NotFound,
            status::FULL              => Error::Full,
            status::EMPTY             => Error::Empty,
            status::NO_MEMORY         => Error::NoMemory,
            status::INVALID_ARGUMENT  => Error::InvalidArg,
            status::MALFORMED         => Error::Malformed,
            status::PERMISSION_DENIED => Error::NoPermission,
            other                     => Error::Unknown(other),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Перевести «сырое» значение `rax` в `Result`.
/// Turn a raw `rax` value into a `Result`.
pub fn check(ret: u64) -> Result<u64> {
    let signed = ret as i64;
    if signed < 0 {
        Err(Error::from_status(signed))
    } else {
        Ok(ret)
    }
}
