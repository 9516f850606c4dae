//! Global Descriptor Table (GDT) + TSS
//!
//!  Индекс / Index  Дескриптор / Descriptor
//!  ───────────────────────────────────────
//!  0               null
//!  1               код ядра / kernel code   (ring 0, long mode)
//!  2               данные ядра / kernel data (ring 0)
//!  3               код пользователя / user code (ring 3, long mode)
//!  4               данные пользователя / user data (ring 3)
//!  5..6            TSS (16 байт / 16 bytes)
//!
//! Дескрипторы кодируются как `u64`, кодирование проверяется на хосте.
//! Descriptors are encoded as `u64`; the encoding is checked on the host.

// ── Селекторы / Selectors ─────────────────────────────────────────────────────
pub const KERNEL_CODE: u16 = 0x08;
pub const KERNEL_DATA: u16 = 0x10;
pub const USER_CODE:   u16 = 0x1B;
pub const USER_DATA:   u16 = 0x23;
pub const TSS_SEL:     u16 = 0x28;

// ── Биты дескриптора / Descriptor bits ────────────────────────────────────────
const ACCESSED:   u64 = 1 << 40;
const WRITABLE:   u64 = 1 << 41;
const EXECUTABLE: u64 = 1 << 43;
const SEGMENT:    u64 = 1 << 44;
const DPL_RING3:  u64 = 3 << 45;
const PRESENT:    u64 = 1 << 47;
const LONG_MODE:  u64 = 1 << 53;
/// Тип системного дескриптора: доступный 64-битный TSS
/// System descriptor type: available 64-bit TSS
const TSS_AVAILABLE: u64 = 0x9 << 40;

const DATA: u64 = ACCESSED | WRITABLE | SEGMENT | PRESENT;
const CODE: u64 = DATA | EXECUTABLE | LONG_MODE;

/// Дескрипторы сегментов по индексам 0..=4 / Segment descriptors at 0..=4
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
const SEGMENTS: [u64; 5] = [0, CODE, DATA, CODE | DPL_RING3, DATA | DPL_RING3];

/// 16-байтный дескриптор TSS (две записи GDT).
/// The 16-byte TSS descriptor (two GDT slots).
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
const fn tss_descriptor(base: u64, limit: u64) -> [u64; 2] {
    let low = (limit & 0xFFFF)
        | ((base & 0xFF_FFFF) << 16)
        | TSS_AVAILABLE
        | PRESENT
        | (((limit >> 16) & 0xF) << 48)
        | (((base >> 24) & 0xFF) << 56);
    [low, base >> 32]
}

#[cfg(target_os = "none")]
pub use hw::{init, set_kernel_stack};

#[cfg(target_os = "none")]
mod hw {
    use core::mem::size_of;
    use core::ptr::{addr_of, addr_of_mut};

    use super::{tss_descriptor, KERNEL_CODE, KERNEL_DATA, SEGMENTS, TSS_SEL};

    #[repr(C, packed)]
    struct Tss {
        reserved0:  u32,
        /// rsp0..rsp2; rsp0 меняется при каждом переключении / rsp0 changes on every switch
        rsp:        [u64; 3],
        reserved1:  u64,
        ist:        [u64; 7],
        reserved2:  u64,
        reserved3:  u16,
        iomap_base: u16,
    }

    #[repr(C, packed)]
    struct Pointer {
        limit: u16,
        base:  u64,
    }

    const STACK_SIZE: usize = 16 * 1024;

    #[repr(C, align(16))]
    struct Stack([u8; STACK_SIZE]);

    /// rsp0 до первого переключения / rsp0 until the first switch
    static mut BOOT_RSP0: Stack = Stack([0; STACK_SIZE]);
    /// IST1: #DF
    static mut DOUBLE_FAULT_STACK: Stack = Stack([0; STACK_SIZE]);

    static mut TSS: Tss = Tss {
        reserved0:  0,
        rsp:        [0; 3],
        reserved1:  0,
        ist:        [0; 7],
        reserved2:  0,
        reserved3:  0,
        iomap_base: size_of::<Tss>() as u16,
    };
    static mut GDT: [u64; 7] = [0; 7];

    fn top(stack: *const Stack) -> u64 {
        stack as u64 + STACK_SIZE as u64
    }

    pub fn init() {
        unsafe {
            let tss = addr_of_mut!(TSS);
            (*tss).rsp = [top(addr_of!(BOOT_RSP0)), 0, 0];
            let mut ist = [0u64; 7];
            ist[0] = top(addr_of!(DOUBLE_FAULT_STACK));
            (*tss).ist = ist;

            let gdt = &mut *addr_of_mut!(GDT);
            gdt[..5].copy_from_slice(&SEGMENTS);
            gdt[5..].copy_from_slice(&tss_descriptor(tss as u64, (size_of::<Tss>() - 1) as u64));

            let pointer = Pointer {
                limit: (size_of::<[u64; 7]>() - 1) as u16,
                base:  gdt.as_ptr() as u64,
            };
            core::arch::asm!(
                "lgdt [{ptr}]",
                "mov ds, {data:x}",
                "mov es, {data:x}",
                "mov fs, {data:x}",
                "mov gs, {data:x}",
                "mov ss, {data:x}",
                // CS только через дальний возврат / CS only via a far return
                "push {code}",
                "lea {tmp}, [rip + 2f]",
                "push {tmp}",
                "retfq",
                "2:",
                "ltr {tss:x}",
                ptr  = in(reg) &pointer,
                data = in(reg) KERNEL_DATA as u32,
                code = in(reg) KERNEL_CODE as u64,
                tss  = in(reg) TSS_SEL,
                tmp  = out(reg) _,
            );
        }
        log::debug!("gdt: loaded, tss at {:#x}", addr_of!(TSS) as u64);
    }

    /// rsp0 следующей задачи / The next task's rsp0
    pub fn set_kernel_stack(stack_top: u64) {
        unsafe {
            let tss = addr_of_mut!(TSS);
            let mut rsp = (*tss).rsp;
            rsp[0] = stack_top;
            (*tss).rsp = rsp;
        }
    }
}
