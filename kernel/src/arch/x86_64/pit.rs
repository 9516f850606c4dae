//! Programmable Interval Timer (8253/8254), канал 0 / channel 0
//!
//! Режим 2 (rate generator) → IRQ0 → вектор 0x20 → планировщик.
//! Mode 2 (rate generator) → IRQ0 → vector 0x20 → scheduler.

/// Входная частота PIT / PIT input clock
pub const BASE_FREQUENCY: u32 = 1_193_182;

/// Делитель для частоты `hz`, зажатый в 16 бит.
/// Divisor for a rate of `hz`, clamped to 16 bits.
pub fn divisor(hz: u32) -> u16 {
    (BASE_FREQUENCY / hz.max(1)).clamp(1, u16::MAX as u32) as u16
}

#[cfg(target_os = "none")]
pub fn init(hz: u32) {
    use super::port::outb;

    const CHANNEL0: u16 = 0x40;
    const COMMAND:  u16 = 0x43;

    let div = divisor(hz);
    unsafe {
        // channel 0, lobyte/hibyte, mode 2, binary
        outb(COMMAND, 0x34);
        outb(CHANNEL0, (div & 0xFF) as u8);
        outb(CHANNEL0, (div >> 8) as u8);
    }
    log::info!("pit: {} Hz (divisor {})", hz, div);
}
