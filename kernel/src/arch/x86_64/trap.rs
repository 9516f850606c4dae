//! Trap frame — сохранённое состояние CPU на стеке ядра задачи
//! Trap frame — saved CPU state on a task's kernel stack
//!
//! Раскладка (от младших адресов к старшим) / Layout (low → high):
//!
//!   r15 r14 r13 r12 r11 r10 r9 r8 rbp rdi rsi rdx rcx rbx rax   ← stubs push
//!   rip cs rflags rsp ss                                         ← CPU pushes
//!
//! Начальный кадр строится один раз (`install`) и потребляется
//! `trap_return`: pop 15 GPR + `iretq`.
//! An initial frame is written once (`install`) and consumed by
//! `trap_return`: pop 15 GPRs + `iretq`.

use core::mem::{align_of, size_of};

use static_assertions::const_assert_eq;

use super::gdt::{KERNEL_CODE, KERNEL_DATA, USER_CODE, USER_DATA};

/// Interrupt enable flag
pub const RFLAGS_IF: u64 = 1 << 9;
/// IF | reserved bit 1
pub const RFLAGS_DEFAULT: u64 = 0x202;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r15:    u64,
    pub r14:    u64,
    pub r13:    u64,
    pub r12:    u64,
    pub r11:    u64,
    pub r10:    u64,
    pub r9:     u64,
    pub r8:     u64,
    pub rbp:    u64,
    pub rdi:    u64,
    pub rsi:    u64,
    pub rdx:    u64,
    pub rcx:    u64,
    pub rbx:    u64,
    pub rax:    u64,
    // ── iretq ──
    pub rip:    u64,
    pub cs:     u64,
    pub rflags: u64,
    pub rsp:    u64,
    pub ss:     u64,
}

const_assert_eq!(size_of::<TrapFrame>(), 160);
const_assert_eq!(align_of::<TrapFrame>(), 8);

impl TrapFrame {
    pub const SIZE: u64 = size_of::<TrapFrame>() as u64;

    /// Первый вход в kernel-задачу / First entry into a kernel task
    pub fn kernel(entry: u64, stack_top: u64) -> Self {
        Self {
            ss:     KERNEL_DATA as u64,
            rsp:    stack_top,
            rflags: RFLAGS_DEFAULT,
            cs:     KERNEL_CODE as u64,
            rip:    entry,
            ..Self::default()
        }
    }

    /// Первый вход в пользовательский процесс (ring 3).
    /// First entry into a user process (ring 3).
    pub fn user(entry: u64, user_sp: u64) -> Self {
        Self {
            ss:     USER_DATA as u64,
            rsp:    user_sp,
            rflags: RFLAGS_DEFAULT,
            cs:     USER_CODE as u64,
            rip:    entry,
            ..Self::default()
        }
    }

    /// argc → rdi, argv → rsi (SysV)
    pub fn with_args(mut self, argc: u64, argv: u64) -> Self {
        self.rdi = argc;
        self.rsi = argv;
        self
    }

    /// Пришло ли прерывание из ring 3 / Whether the trap came from ring 3
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Записать кадр под `stack_top`, вернуть сохраняемый указатель стека.
    /// Write the frame just below `stack_top`, return the saved stack pointer.
    ///
    /// # Safety
    /// `[stack_top - SIZE, stack_top)` must be writable memory owned by the
    /// caller, and `stack_top` must be 8-byte aligned.
    pub unsafe fn install(self, stack_top: u64) -> u64 {
        debug_assert_eq!(stack_top % 8, 0);
        let sp = stack_top - Self::SIZE;
        unsafe { core::ptr::write(sp as *mut TrapFrame, self) };
        sp
    }

    /// # Safety
    /// `sp` must point at a live frame that nothing else references.
    pub unsafe fn at<'a>(sp: u64) -> &'a mut TrapFrame {
        unsafe { &mut *(sp as *mut TrapFrame) }
    }
}

// ── trap_return ──────────────────────────────────────────────────────────────
//
// `__trap_restore` — общий хвост для заглушек прерываний: rsp уже указывает
// на кадр. `__trap_return(sp)` сначала переключает стек.
// `__trap_restore` is the shared tail of the interrupt stubs: rsp already
// points at a frame. `__trap_return(sp)` switches stacks first.

#[cfg(target_os = "none")]
core::arch::global_asm!(
    ".global __trap_return",
    ".global __trap_restore",
    "__trap_return:",
    "    mov rsp, rdi",
    "__trap_restore:",
    "    pop r15",
    "    pop r14",
    "    pop r13",
    "    pop r12",
    "    pop r11",
    "    pop r10",
    "    pop r9",
    "    pop r8",
    "    pop rbp",
    "    pop rdi",
    "    pop rsi",
    "    pop rdx",
    "    pop rcx",
    "    pop rbx",
    "    pop rax",
    "    iretq",
);

#[cfg(target_os = "none")]
extern "C" {
    fn __trap_return(sp: u64) -> !;
}

/// Восстановить кадр по `sp` и уйти в задачу. Не возвращается.
/// Restore the frame at `sp` and enter the task. Never returns.
///
/// # Safety
/// `sp` must come from `install` or from a trap entry, and the matching
/// address space and TSS.rsp0 must already be loaded.
#[cfg(target_os = "none")]
pub unsafe fn trap_return(sp: u64) -> ! {
    unsafe { __trap_return(sp) }
}
