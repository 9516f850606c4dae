//! Сырые `int 0x80` / Raw `int 0x80` gates

use core::arch::asm;

#[inline(always)]
pub unsafe fn syscall1(nr: u64, a0: u64) -> u64 {
    let ret: u64;
    unsafe {
        asm!("int 0x80", inlateout("rax") nr => ret, in("rdi") a0, options(nostack));
    }
    ret
}

#[inline(always)]
pub unsafe fn syscall0(nr: u64) -> u64 {
    unsafe { syscall1(nr, 0) }
}

#[inline(always)]
pub unsafe fn syscall2(nr: u64, a0: u64, a1: u64) -> u64 {
    let ret: u64;
    unsafe {
        asm!("int 0x80", inlateout("rax") nr => ret, in("rdi") a0, in("rsi") a1,
             options(nostack));
    }
    ret
}

#[inline(always)]
pub unsafe fn syscall3(nr: u64, a0: u64, a1: u64, a2: u64) -> u64 {
    let ret: u64;
    unsafe {
        asm!("int 0x80", inlateout("rax") nr => ret, in("rdi") a0, in("rsi") a1,
             in("rdx") a2, options(nostack));
    }
    ret
}

#[inline(always)]
pub unsafe fn syscall4(nr: u64, a0: u64, a1: u64, a2: u64, a3: u64) -> u64 {
    let ret: u64;
    unsafe {
        asm!("int 0x80", inlateout("rax") nr => ret, in("rdi") a0, in("rsi") a1,
             in("rdx") a2, in("rcx") a3, options(nostack));
    }
    ret
}

#[inline(always)]
pub unsafe fn syscall5(nr: u64, a0: u64, a1: u64, a2: u64, a3: u64, a4: u64) -> u64 {
    let ret: u64;
    unsafe {
        asm!("int 0x80", inlateout("rax") nr => ret, in("rdi") a0, in("rsi") a1,
             in("rdx") a2, in("rcx") a3, in("r8") a4, options(nostack));
    }
    ret
}
