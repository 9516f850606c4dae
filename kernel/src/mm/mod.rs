//! Memory Management subsystem
//!
//! Три уровня / Three layers:
//!   pmm  — Physical Memory Manager (поставщик кадров / frame supplier)
//!   vmm  — Virtual Memory Manager (4-уровневые таблицы / 4-level tables)
//!   heap — Kernel Heap (глобальный аллокатор / global allocator)

pub mod heap;
pub mod pmm;
pub mod vmm;

use core::sync::atomic::{AtomicU64, Ordering};

pub use crate::config::PAGE_SIZE;

/// Физический адрес / Physical address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// Виртуальный адрес / Virtual address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self { Self(addr) }
    pub const fn as_u64(self) -> u64   { self.0 }
    pub const fn is_page_aligned(self) -> bool { self.0 % PAGE_SIZE as u64 == 0 }
}

impl VirtAddr {
    pub const fn new(addr: u64) -> Self { Self(addr) }
    pub const fn as_u64(self) -> u64   { self.0 }

    pub const fn page_base(self) -> Self { Self(align_down(self.0)) }
    pub const fn page_offset(self) -> u64 { self.0 % PAGE_SIZE as u64 }

    pub const fn offset(self, bytes: u64) -> Self { Self(self.0 + bytes) }

    pub fn as_mut_ptr<T>(self) -> *mut T { self.0 as *mut T }
}

pub const fn align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

pub const fn align_up(addr: u64) -> u64 {
    align_down(addr + PAGE_SIZE as u64 - 1)
}

// ── HHDM (higher-half direct map) ───────────────────────────────────────────
//
// Limine отображает всю физическую память по смещению HHDM.
// На хосте смещение 0: «физический» адрес — это указатель хоста.
// Limine maps all physical memory at the HHDM offset.
// On the host the offset is 0: a "physical" address is a host pointer.

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Вызывается один раз при загрузке / Called once during boot
pub fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Relaxed);
}

pub fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Relaxed)
}

pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr(phys.0 + hhdm_offset())
}

/// Только для адресов внутри HHDM / Only for addresses inside the HHDM
pub fn virt_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr(virt.0 - hhdm_offset())
}

/// Обнулить кадр через HHDM / Zero a frame through the HHDM
///
/// # Safety
/// `frame` must be a frame the caller owns and nothing else references.
pub unsafe fn zero_frame(frame: PhysAddr) {
    let ptr = phys_to_virt(frame).as_mut_ptr::<u8>();
    unsafe { core::ptr::write_bytes(ptr, 0, PAGE_SIZE) };
}

/// Внешний поставщик физических кадров (4 KiB).
/// External supplier of physical page frames (4 KiB).
///
/// Должен быть безопасен при выключенных прерываниях.
/// Must be safe to call with interrupts suppressed.
pub trait FrameSupplier {
    fn alloc_frame(&mut self) -> Option<PhysAddr>;
    fn free_frame(&mut self, frame: PhysAddr);
    /// Сколько кадров сейчас выдано / Frames currently handed out
    fn used_frames(&self) -> usize;
}
