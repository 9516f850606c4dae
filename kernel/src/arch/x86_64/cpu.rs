//! Реальный CPU: CR3 + TSS.rsp0 / The real CPU: CR3 + TSS.rsp0

use core::arch::asm;

use super::gdt;
use crate::arch::Cpu;
use crate::mm::PhysAddr;

const CR3_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

pub fn read_cr3() -> PhysAddr {
    let cr3: u64;
    unsafe { asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags)) };
    PhysAddr(cr3 & CR3_ADDR_MASK)
}

pub fn read_cr2() -> u64 {
    let cr2: u64;
    unsafe { asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags)) };
    cr2
}

/// Единственный CPU (SMP нет) / The only CPU (no SMP)
pub struct X86Cpu;

impl Cpu for X86Cpu {
    fn active_root(&self) -> PhysAddr {
        read_cr3()
    }

    fn load_root(&mut self, root: PhysAddr) {
        unsafe { asm!("mov cr3, {}", in(reg) root.0, options(nostack, preserves_flags)) };
    }

    fn set_kernel_stack(&mut self, stack_top: u64) {
        gdt::set_kernel_stack(stack_top);
    }
}
