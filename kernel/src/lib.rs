//! OpenIDP Kernel — ядро процессов и адресных пространств
//! OpenIDP Kernel — process and address-space core
//!
//! Библиотека не зависит от железа там, где это возможно: планировщик,
//! адресные пространства, почтовые ящики и загрузчик ELF собираются и
//! тестируются на хосте. Всё, что трогает CPU напрямую, живёт под
//! `target_os = "none"`.
//!
//! The library stays hardware-independent where it can: the scheduler,
//! address spaces, mailboxes and the ELF loader build and test on the host.
//! Everything that touches the CPU directly lives under `target_os = "none"`.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

// Подключить стандартный alloc крейт (Box, Vec, VecDeque, ...)
// Connect standard alloc crate (Box, Vec, VecDeque, ...)
extern crate alloc;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod loader;
pub mod mm;
pub mod sched;
pub mod syscall;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
