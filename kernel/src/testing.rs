//! Тестовые подставки для хоста / Host test doubles

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use crate::arch::Cpu;
use crate::mm::{FrameSupplier, PhysAddr, PAGE_SIZE};

#[repr(C, align(4096))]
struct HostPage([u8; PAGE_SIZE]);

/// Кадры из кучи хоста. HHDM на хосте = 0, так что адрес кадра — это
/// указатель. Повторное освобождение паникует.
/// Frames from the host heap. The host HHDM is 0, so a frame address is a
/// pointer. Freeing twice panics.
#[derive(Debug, Default)]
pub struct HostFrames {
    live:  BTreeSet<u64>,
    limit: Option<usize>,
}

impl HostFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Не выдавать больше `limit` живых кадров / Hand out at most `limit` live frames
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn is_live(&self, frame: PhysAddr) -> bool {
        self.live.contains(&frame.0)
    }
}

impl FrameSupplier for HostFrames {
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        if self.limit.is_some_and(|limit| self.live.len() >= limit) {
            return None;
        }
        let ptr = unsafe { alloc_zeroed(Layout::new::<HostPage>()) };
        if ptr.is_null() {
            return None;
        }
        self.live.insert(ptr as u64);
        Some(PhysAddr(ptr as u64))
    }

    fn free_frame(&mut self, frame: PhysAddr) {
        assert!(self.live.remove(&frame.0), "double free of frame {:#x}", frame.0);
        unsafe { dealloc(frame.0 as *mut u8, Layout::new::<HostPage>()) };
    }

    fn used_frames(&self) -> usize {
        self.live.len()
    }
}

impl Drop for HostFrames {
    fn drop(&mut self) {
        for &frame in &self.live {
            unsafe { dealloc(frame as *mut u8, Layout::new::<HostPage>()) };
        }
    }
}

/// CPU, который только записывает / A CPU that only records
#[derive(Debug, Default)]
pub struct RecordingCpu {
    pub root:          PhysAddr,
    pub loads:         Vec<PhysAddr>,
    pub kernel_stacks: Vec<u64>,
}

impl Cpu for RecordingCpu {
    fn active_root(&self) -> PhysAddr {
        self.root
    }

    fn load_root(&mut self, root: PhysAddr) {
        self.root = root;
        self.loads.push(root);
    }

    fn set_kernel_stack(&mut self, stack_top: u64) {
        self.kernel_stacks.push(stack_top);
    }
}

// ── ELF builder ──────────────────────────────────────────────────────────────

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

pub struct Segment<'a> {
    pub vaddr: u64,
    pub data:  &'a [u8],
    pub memsz: u64,
    pub flags: u32,
}

/// Минимальный ELF64 x86_64 ET_EXEC с PT_LOAD сегментами.
/// A minimal ELF64 x86_64 ET_EXEC with PT_LOAD segments.
pub fn elf_image(entry: u64, segments: &[Segment<'_>]) -> Vec<u8> {
    const EHDR: usize = 64;
    const PHDR: usize = 56;

    let mut out = Vec::new();
    out.extend_from_slice(b"\x7FELF");
    out.extend_from_slice(&[2, 1, 1, 0]); // 64-bit, LE, version, SysV
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&(EHDR as u64).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR as u16).to_le_bytes());
    out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0; 6]); // shentsize, shnum, shstrndx
    assert_eq!(out.len(), EHDR);

    let mut offset = (EHDR + PHDR * segments.len()) as u64;
    for seg in segments {
        out.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        out.extend_from_slice(&seg.flags.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&seg.vaddr.to_le_bytes());
        out.extend_from_slice(&seg.vaddr.to_le_bytes());
        out.extend_from_slice(&(seg.data.len() as u64).to_le_bytes());
        out.extend_from_slice(&seg.memsz.to_le_bytes());
        out.extend_from_slice(&(PAGE_SIZE as u64).to_le_bytes());
        offset += seg.data.len() as u64;
    }
    for seg in segments {
        out.extend_from_slice(seg.data);
    }
    out
}

/// Одна страница кода по 0x40_0000 / One page of code at 0x40_0000
pub fn tiny_elf() -> Vec<u8> {
    elf_image(
        0x40_0010,
        &[Segment { vaddr: 0x40_0000, data: &[0x90; 32], memsz: 32, flags: PF_R | PF_X }],
    )
}
