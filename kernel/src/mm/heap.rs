//! Kernel Heap
//!
//! `linked_list_allocator::Heap` за `spin::Mutex`. Регион (8 MiB) вырезается
//! из карты памяти до запуска PMM.
//! `linked_list_allocator::Heap` behind a `spin::Mutex`. The region (8 MiB) is
//! carved from the memory map before the PMM starts.
//!
//! Все вызовы идут при выключенных прерываниях: обработчик таймера
//! не должен застать замок занятым.
//! Every call runs with interrupts suppressed: the timer handler must never
//! find the lock taken.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use linked_list_allocator::Heap;
use spin::Mutex;

use crate::arch;

pub struct KernelHeap {
    inner: Mutex<Heap>,
}

impl KernelHeap {
    pub const fn new() -> Self {
        Self { inner: Mutex::new(Heap::empty()) }
    }

    /// # Safety
    /// `[start, start + size)` must be unused, writable memory that lives
    /// forever. Call once.
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        arch::without_interrupts(|| unsafe { self.inner.lock().init(start, size) });
        log::info!("heap: {} KiB at {:p}", size / 1024, start);
    }

    pub fn free_bytes(&self) -> usize {
        arch::without_interrupts(|| self.inner.lock().free())
    }
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        arch::without_interrupts(|| {
            self.inner
                .lock()
                .allocate_first_fit(layout)
                .map_or(ptr::null_mut(), |p| p.as_ptr())
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            arch::without_interrupts(|| unsafe { self.inner.lock().deallocate(ptr, layout) });
        }
    }
}

/// Глобальный аллокатор ядра (только на железе).
/// The kernel's global allocator (bare metal only).
#[cfg_attr(target_os = "none", global_allocator)]
pub static HEAP: KernelHeap = KernelHeap::new();
