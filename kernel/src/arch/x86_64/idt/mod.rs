//! Interrupt Descriptor Table (IDT)
//!
//!   0x00..0x15  исключения CPU / CPU exceptions (#DF на IST1 / #DF on IST1)
//!   0x20        таймер / timer: тик планировщика / scheduler tick
//!   0x27        spurious IRQ7
//!   0x80        syscall gate (DPL 3)
//!
//! Все входы являются interrupt gates, IF сброшен на всё время обработки.
//! Every entry is an interrupt gate: IF stays clear while handling.
//!
//! Таймер и syscall сохраняют ровно `TrapFrame` и получают его адрес;
//! возвращённый указатель стека уходит в `__trap_restore`.
//! Timer and syscall save exactly a `TrapFrame` and receive its address;
//! the returned stack pointer goes to `__trap_restore`.

use core::arch::{asm, global_asm};
use core::ptr::{addr_of, addr_of_mut};

use super::cpu::read_cr2;
use super::gdt::KERNEL_CODE;
use super::port::outb;
use super::trap::trap_return;

// ── Дескриптор / Descriptor (16 байт / 16 bytes) ─────────────────────────────

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low:  u16, // биты 0–15 обработчика  / handler bits 0–15
    selector:    u16, // сегмент кода / code segment (KERNEL_CODE)
    ist:         u8,  // индекс IST / IST index, 0 = нет / none
    type_attr:   u8,  // тип + атрибуты / type + attributes
    offset_mid:  u16, // биты 16–31 обработчика / handler bits 16–31
    offset_high: u32, // биты 32–63 обработчика / handler bits 32–63
    reserved:    u32,
}

/// Present | ring 0 | Interrupt Gate
const GATE_KERNEL: u8 = 0x8E;
/// Present | ring 3 | Interrupt Gate (`int 0x80` из userspace / from userspace)
const GATE_USER:   u8 = 0xEE;

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0, selector: 0, ist: 0,
            type_attr: 0, offset_mid: 0,
            offset_high: 0, reserved: 0,
        }
    }

    fn new(handler: u64, ist: u8, type_attr: u8) -> Self {
        Self {
            offset_low:  (handler & 0xFFFF) as u16,
            selector:    KERNEL_CODE,
            ist,
            type_attr,
            offset_mid:  ((handler >> 16) & 0xFFFF) as u16,
            offset_high: (handler >> 32) as u32,
            reserved:    0,
        }
    }
}

#[repr(C, packed)]
struct IdtDescriptor {
    size:   u16,
    offset: u64,
}

const IDT_SIZE: usize = 256;
static mut IDT: [IdtEntry; IDT_SIZE] = [IdtEntry::missing(); IDT_SIZE];

pub const TIMER_VECTOR:    u8 = 0x20;
pub const SPURIOUS_VECTOR: u8 = 0x27;
pub use libidp::abi::SYSCALL_VECTOR;

// ── Кадр исключения / Exception frame ─────────────────────────────────────────

/// Регистры, номер вектора, код ошибки, затем кадр CPU.
/// Registers, vector number, error code, then the CPU frame.
#[repr(C)]
pub struct ExceptionFrame {
    pub gprs:   [u64; 15],
    pub vector: u64,
    pub error:  u64,
    pub rip:    u64,
    pub cs:     u64,
    pub rflags: u64,
    pub rsp:    u64,
    pub ss:     u64,
}

// ── Заглушки / Stubs ─────────────────────────────────────────────────────────

global_asm!(
    ".macro SAVE_GPRS",
    "    push rax",
    "    push rbx",
    "    push rcx",
    "    push rdx",
    "    push rsi",
    "    push rdi",
    "    push rbp",
    "    push r8",
    "    push r9",
    "    push r10",
    "    push r11",
    "    push r12",
    "    push r13",
    "    push r14",
    "    push r15",
    ".endm",

    ".macro EXCEPTION vec, has_error",
    "isr_exception_\\vec:",
    ".if \\has_error == 0",
    "    push 0",
    ".endif",
    "    push \\vec",
    "    jmp exception_common",
    ".endm",

    ".section .text",
    "isr_timer:",
    "    SAVE_GPRS",
    "    mov rdi, rsp",
    "    call {timer}",
    "    mov rsp, rax",
    "    jmp __trap_restore",

    "isr_syscall:",
    "    SAVE_GPRS",
    "    mov rdi, rsp",
    "    call {syscall}",
    "    mov rsp, rax",
    "    jmp __trap_restore",

    "isr_spurious:",
    "    iretq",

    "exception_common:",
    "    SAVE_GPRS",
    "    mov rdi, rsp",
    "    call {exception}",
    "    ud2",

    "EXCEPTION 0, 0",
    "EXCEPTION 1, 0",
    "EXCEPTION 2, 0",
    "EXCEPTION 3, 0",
    "EXCEPTION 4, 0",
    "EXCEPTION 5, 0",
    "EXCEPTION 6, 0",
    "EXCEPTION 7, 0",
    "EXCEPTION 8, 1",
    "EXCEPTION 9, 0",
    "EXCEPTION 10, 1",
    "EXCEPTION 11, 1",
    "EXCEPTION 12, 1",
    "EXCEPTION 13, 1",
    "EXCEPTION 14, 1",
    "EXCEPTION 15, 0",
    "EXCEPTION 16, 0",
    "EXCEPTION 17, 1",
    "EXCEPTION 18, 0",
    "EXCEPTION 19, 0",
    "EXCEPTION 20, 0",
    "EXCEPTION 21, 1",

    ".pushsection .rodata",
    ".balign 8",
    ".global IDP_INTERRUPT_STUBS",
    "IDP_INTERRUPT_STUBS:",
    "    .quad isr_timer, isr_syscall, isr_spurious",
    "    .quad isr_exception_0, isr_exception_1, isr_exception_2, isr_exception_3",
    "    .quad isr_exception_4, isr_exception_5, isr_exception_6, isr_exception_7",
    "    .quad isr_exception_8, isr_exception_9, isr_exception_10, isr_exception_11",
    "    .quad isr_exception_12, isr_exception_13, isr_exception_14, isr_exception_15",
    "    .quad isr_exception_16, isr_exception_17, isr_exception_18, isr_exception_19",
    "    .quad isr_exception_20, isr_exception_21",
    ".popsection",

    timer     = sym handle_timer,
    syscall   = sym handle_syscall,
    exception = sym handle_exception,
);

const EXCEPTION_COUNT: usize = 22;

#[repr(C)]
struct Stubs {
    timer:      u64,
    syscall:    u64,
    spurious:   u64,
    exceptions: [u64; EXCEPTION_COUNT],
}

extern "C" {
    static IDP_INTERRUPT_STUBS: Stubs;
}

// ── Обработчики / Handlers ───────────────────────────────────────────────────

extern "C" fn handle_timer(sp: u64) -> u64 {
    unsafe { timer_eoi() };
    crate::kernel::timer_interrupt(sp)
}

extern "C" fn handle_syscall(sp: u64) -> u64 {
    crate::kernel::syscall_interrupt(sp)
}

const EXCEPTION_NAMES: [&str; EXCEPTION_COUNT] = [
    "Division Error", "Debug", "NMI", "Breakpoint", "Overflow", "Bound Range",
    "Invalid Opcode", "Device Not Available", "Double Fault", "Coprocessor Overrun",
    "Invalid TSS", "Segment Not Present", "Stack-Segment Fault",
    "General Protection Fault", "Page Fault", "Reserved", "x87 Floating Point",
    "Alignment Check", "Machine Check", "SIMD Floating Point", "Virtualization",
    "Control Protection",
];

/// Исключение из ring 3 убивает процесс, из ring 0 паникует.
/// An exception from ring 3 kills the process; from ring 0 it panics.
extern "C" fn handle_exception(frame: &ExceptionFrame) -> ! {
    let name = EXCEPTION_NAMES.get(frame.vector as usize).copied().unwrap_or("Unknown");
    let cr2 = if frame.vector == 14 { read_cr2() } else { 0 };

    if frame.cs & 3 == 3 {
        log::warn!(
            "{} (error={:#x}) in user mode at RIP={:#x} addr={:#x}, killing task",
            name, frame.error, frame.rip, cr2
        );
        let sp = crate::kernel::exit_interrupt();
        unsafe { trap_return(sp) }
    }

    panic!(
        "{} (error={:#x}) at RIP={:#x} RSP={:#x} addr={:#x}",
        name, frame.error, frame.rip, frame.rsp, cr2
    );
}

// ── PIC (8259) ────────────────────────────────────────────────────────────────

const PIC1_CMD:  u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD:  u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const EOI:       u8  = 0x20;
const ICW1_INIT: u8  = 0x10;
const ICW1_ICW4: u8  = 0x01;
const ICW4_8086: u8  = 0x01;

/// ICW1..ICW4 и маски: IRQ 0..15 на 0x20..0x2F, открыт только IRQ0.
/// ICW1..ICW4 then masks: IRQ 0..15 at 0x20..0x2F, only IRQ0 unmasked.
const PIC_SETUP: [(u16, u8); 10] = [
    (PIC1_CMD,  ICW1_INIT | ICW1_ICW4),
    (PIC2_CMD,  ICW1_INIT | ICW1_ICW4),
    (PIC1_DATA, TIMER_VECTOR),
    (PIC2_DATA, TIMER_VECTOR + 8),
    (PIC1_DATA, 0x04),
    (PIC2_DATA, 0x02),
    (PIC1_DATA, ICW4_8086),
    (PIC2_DATA, ICW4_8086),
    (PIC1_DATA, 0b1111_1110),
    (PIC2_DATA, 0b1111_1111),
];

/// EOI для таймера (IRQ0 на ведущем PIC) / EOI for the timer (IRQ0, master PIC)
unsafe fn timer_eoi() {
    unsafe { outb(PIC1_CMD, EOI) };
}

unsafe fn pic_init() {
    for (port, value) in PIC_SETUP {
        unsafe { outb(port, value) };
    }
}

// ── Инициализация / Initialization ───────────────────────────────────────────

/// Заполнить IDT, ремаппировать PIC, загрузить IDTR. Прерывания остаются
/// выключенными до первого `wait_for_interrupt`.
/// Fill the IDT, remap the PIC, load IDTR. Interrupts stay off until the
/// first `wait_for_interrupt`.
pub fn init() {
    unsafe {
        let stubs = &*addr_of!(IDP_INTERRUPT_STUBS);
        let idt = &mut *addr_of_mut!(IDT);

        for (vector, &handler) in stubs.exceptions.iter().enumerate() {
            // #DF на отдельном стеке IST1 / #DF on its own IST1 stack
            let ist = if vector == 8 { 1 } else { 0 };
            idt[vector] = IdtEntry::new(handler, ist, GATE_KERNEL);
        }
        idt[TIMER_VECTOR as usize]    = IdtEntry::new(stubs.timer, 0, GATE_KERNEL);
        idt[SPURIOUS_VECTOR as usize] = IdtEntry::new(stubs.spurious, 0, GATE_KERNEL);
        idt[SYSCALL_VECTOR as usize]  = IdtEntry::new(stubs.syscall, 0, GATE_USER);

        pic_init();

        let descriptor = IdtDescriptor {
            size:   (core::mem::size_of::<[IdtEntry; IDT_SIZE]>() - 1) as u16,
            offset: addr_of!(IDT) as u64,
        };
        asm!("lidt [{desc}]", desc = in(reg) &descriptor, options(readonly, nostack, preserves_flags));
    }
    log::debug!("idt: loaded, syscall gate at {:#x}", SYSCALL_VECTOR);
}
