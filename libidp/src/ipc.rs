//! IPC — Inter-Process Communication API
//!
//! Обёртки над ipc_* syscall'ами.
//! Wrappers over ipc_* syscalls.

use crate::abi::{nr, Message};
use crate::{check, raw, Error, Result};

/// Отправить сообщение задаче `dest`. Не блокирует.
/// Send a message to task `dest`. Never blocks.
pub fn send(dest: u64, kind: u64, data: [u64; 3]) -> Result<()> {
    let ret = unsafe { raw::syscall5(nr::IPC_SEND, dest, kind, data[0], data[1], data[2]) };
    check(ret).map(|_| ())
}

/// Повторять `send`, пока ящик получателя полон.
/// Retry `send` while the receiver's mailbox is full.
pub fn send_with_backoff(dest: u64, kind: u64, data: [u64; 3]) -> Result<()> {
    loop {
        match send(dest, kind, data) {
            Err(Error::Full) => core::hint::spin_loop(),
            other => return other,
        }
    }
}

/// Забрать одно сообщение, если оно есть.
/// Take one message if there is one.
pub fn recv() -> Result<Message> {
    let mut msg = Message::default();
    let ret = unsafe { raw::syscall1(nr::IPC_RECV, &mut msg as *mut Message as u64) };
    check(ret).map(|_| msg)
}

/// Ждать сообщения (busy-poll с `pause`).
/// Wait for a message (busy-poll with `pause`).
pub fn recv_blocking() -> Message {
    loop {
        if let Ok(msg) = recv() {
            return msg;
        }
        core::hint::spin_loop();
    }
}
