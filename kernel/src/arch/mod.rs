//! HAL — Hardware Abstraction Layer
//!
//! Ядро знает о CPU только через трейт `Cpu` и несколько свободных функций.
//! На хосте (тесты) они ничего не делают.
//! The core sees the CPU only through the `Cpu` trait and a few free
//! functions. On the host (tests) they do nothing.

pub mod x86_64;

use crate::mm::{PhysAddr, VirtAddr};

/// Регистры CPU, которые трогает планировщик.
/// CPU registers the scheduler touches.
pub trait Cpu {
    /// Текущий корень таблиц (CR3) / Active page table root (CR3)
    fn active_root(&self) -> PhysAddr;
    fn load_root(&mut self, root: PhysAddr);
    /// Стек ядра для следующего перехода ring 3 → ring 0 (TSS.rsp0).
    /// Kernel stack for the next ring 3 → ring 0 transition (TSS.rsp0).
    fn set_kernel_stack(&mut self, stack_top: u64);
}

/// Сбросить одну запись TLB / Invalidate one TLB entry
#[inline]
pub fn flush_page(va: VirtAddr) {
    #[cfg(target_os = "none")]
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.0, options(nostack, preserves_flags));
    }
    #[cfg(not(target_os = "none"))]
    let _ = va;
}

/// Выполнить `f` с выключенными прерываниями, затем восстановить IF.
/// Run `f` with interrupts disabled, then restore IF.
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(target_os = "none")]
    {
        let rflags: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}; cli", out(reg) rflags, options(nomem));
        }
        let result = f();
        if rflags & x86_64::trap::RFLAGS_IF != 0 {
            unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
        }
        result
    }
    #[cfg(not(target_os = "none"))]
    f()
}

/// Окно ожидания: `sti; hlt; cli`. Прерывание, пришедшее между проверкой
/// и `hlt`, не теряется: `sti` откладывает доставку на одну инструкцию.
/// Wait window: `sti; hlt; cli`. An interrupt arriving between the check
/// and `hlt` is not lost: `sti` delays delivery by one instruction.
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_os = "none")]
    unsafe {
        core::arch::asm!("sti; hlt; cli", options(nomem, nostack));
    }
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}
