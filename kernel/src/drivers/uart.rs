//! COM1 (0x3F8), опрос без прерываний / polled, no IRQ
//!
//! Сюда пишут `kprint!` и логгер. В QEMU: `-serial stdio`.
//! `kprint!` and the logger write here. Under QEMU: `-serial stdio`.

use core::fmt;
use spin::Mutex;

use crate::arch::x86_64::port::{inb, outb};

/// Регистры 16550 относительно базы / 16550 registers relative to the base
mod reg {
    pub const DATA: u16 = 0; // THR/RBR, при DLAB=1 младший байт делителя
    pub const IER:  u16 = 1; // при DLAB=1 старший байт делителя
    pub const FCR:  u16 = 2;
    pub const LCR:  u16 = 3;
    pub const MCR:  u16 = 4;
    pub const LSR:  u16 = 5;
}

const COM1: u16 = 0x3F8;
const LCR_DLAB: u8 = 0x80;
const LCR_8N1: u8 = 0x03;
const LSR_THR_EMPTY: u8 = 0x20;
/// 115200 / divisor
const DIVISOR: u16 = 1;

/// Инициализировать COM1 на 115200 baud, 8N1, без прерываний.
/// Initialize COM1 at 115200 baud, 8N1, polled.
pub fn init() {
    let [lo, hi] = DIVISOR.to_le_bytes();
    unsafe {
        outb(COM1 + reg::IER, 0x00);
        outb(COM1 + reg::LCR, LCR_DLAB);
        outb(COM1 + reg::DATA, lo);
        outb(COM1 + reg::IER, hi);
        outb(COM1 + reg::LCR, LCR_8N1);
        outb(COM1 + reg::FCR, 0xC7); // FIFO on, cleared, 14-byte threshold
        outb(COM1 + reg::MCR, 0x03); // DTR + RTS
    }
}

fn transmit_ready() -> bool {
    unsafe { inb(COM1 + reg::LSR) & LSR_THR_EMPTY != 0 }
}

fn send_byte(byte: u8) {
    while !transmit_ready() {
        core::hint::spin_loop();
    }
    unsafe { outb(COM1 + reg::DATA, byte) };
}

struct UartWriter;

impl fmt::Write for UartWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                send_byte(b'\r');
            }
            send_byte(byte);
        }
        Ok(())
    }
}

static UART_LOCK: Mutex<UartWriter> = Mutex::new(UartWriter);

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    crate::arch::without_interrupts(|| {
        UART_LOCK.lock().write_fmt(args).ok();
    });
}

/// Принудительно освободить замок (только из panic handler).
/// Forcefully release the lock (panic handler only).
///
/// # Safety
/// Only sound when the holder can never run again.
pub unsafe fn force_unlock() {
    if UART_LOCK.is_locked() {
        unsafe { UART_LOCK.force_unlock() };
    }
}
