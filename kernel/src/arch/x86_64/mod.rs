//! x86_64 platform
//!
//! `trap` и селекторы `gdt` собираются везде; всё остальное трогает железо
//! и существует только под `target_os = "none"`.
//! `trap` and the `gdt` selectors build everywhere; everything else touches
//! hardware and only exists under `target_os = "none"`.

pub mod gdt;
pub mod pit;
pub mod trap;

#[cfg(target_os = "none")]
pub mod cpu;
#[cfg(target_os = "none")]
pub mod idt;
#[cfg(target_os = "none")]
pub mod port;

/// x86_64 init sequence. Прерывания остаются выключенными.
/// x86_64 init sequence. Interrupts stay disabled.
#[cfg(target_os = "none")]
pub fn init(timer_hz: u32) {
    gdt::init();       // Global Descriptor Table + TSS
    idt::init();       // Interrupt Descriptor Table + PIC
    pit::init(timer_hz);
}
