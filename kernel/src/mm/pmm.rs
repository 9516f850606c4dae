//! Physical Memory Manager
//!
//! Получает карту памяти от Limine и раздаёт кадры по 4 KiB.
//! Gets the memory map from Limine and hands out 4 KiB frames.
//!
//! Алгоритм / Algorithm:
//!   - bump-указатель по usable-регионам (никогда не откатывается)
//!     bump pointer over usable regions (never moves back)
//!   - освобождённые кадры — в интрузивный список через HHDM
//!     freed frames go onto an intrusive list threaded through the HHDM
//!   - кадр, который bump не выдавал, или повтор последнего освобождения: паника
//!     a frame the bump never handed out, or a repeat of the last free: panic

use super::{align_down, align_up, phys_to_virt, FrameSupplier, PhysAddr, PAGE_SIZE};

/// Сколько регионов карты памяти мы запоминаем.
/// How many memory map regions we keep.
pub const MAX_REGIONS: usize = 32;

/// Конец списка / End of list
const NIL: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u64,
    pub end:  u64,
}

impl Region {
    const EMPTY: Region = Region { base: 0, end: 0 };

    pub fn frames(&self) -> usize {
        ((self.end - self.base) / PAGE_SIZE as u64) as usize
    }
}

pub struct PhysFrames {
    regions:   [Region; MAX_REGIONS],
    count:     usize,
    /// Текущий регион и позиция в нём / Current region and position in it
    cursor:    usize,
    next:      u64,
    free_head: u64,
    used:      usize,
}

impl PhysFrames {
    pub const fn new() -> Self {
        Self {
            regions:   [Region::EMPTY; MAX_REGIONS],
            count:     0,
            cursor:    0,
            next:      0,
            free_head: NIL,
            used:      0,
        }
    }

    /// Добавить usable-регион. Края выравниваются внутрь.
    /// Add a usable region. Edges are aligned inwards.
    pub fn add_region(&mut self, base: u64, len: u64) {
        let start = align_up(base);
        let end = align_down(base.saturating_add(len));
        if end <= start {
            return;
        }
        if self.count == MAX_REGIONS {
            log::warn!("pmm: region table full, dropping {:#x}..{:#x}", start, end);
            return;
        }
        self.regions[self.count] = Region { base: start, end };
        if self.count == 0 {
            self.next = start;
        }
        self.count += 1;
    }

    /// Отрезать непрерывный кусок до первой выдачи кадра (для кучи).
    /// Carve a contiguous chunk before the first frame goes out (for the heap).
    pub fn take_contiguous(&mut self, bytes: usize) -> Option<PhysAddr> {
        if self.used != 0 || self.cursor != 0 || self.free_head != NIL {
            return None;
        }
        let bytes = align_up(bytes as u64);
        let region = self.regions[..self.count]
            .iter_mut()
            .find(|r| r.end - r.base >= bytes)?;
        let base = region.base;
        region.base += bytes;
        self.next = self.regions[0].base;
        Some(PhysAddr(base))
    }

    pub fn total_frames(&self) -> usize {
        self.regions[..self.count].iter().map(Region::frames).sum()
    }

    /// Выдавал ли bump этот кадр: регион пройден целиком или кадр ниже
    /// `next` в текущем регионе.
    /// Whether the bump pointer ever handed out this frame: its region is
    /// exhausted, or the frame lies below `next` in the current region.
    fn handed_out(&self, frame: u64) -> bool {
        self.regions[..self.count]
            .iter()
            .position(|r| (r.base..r.end).contains(&frame))
            .is_some_and(|i| i < self.cursor || (i == self.cursor && frame < self.next))
    }

    fn bump(&mut self) -> Option<PhysAddr> {
        while self.cursor < self.count {
            let region = self.regions[self.cursor];
            let frame = self.next.max(region.base);
            if frame + PAGE_SIZE as u64 <= region.end {
                self.next = frame + PAGE_SIZE as u64;
                return Some(PhysAddr(frame));
            }
            self.cursor += 1;
            if self.cursor < self.count {
                self.next = self.regions[self.cursor].base;
            }
        }
        None
    }
}

impl Default for PhysFrames {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSupplier for PhysFrames {
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        let frame = if self.free_head != NIL {
            let frame = PhysAddr(self.free_head);
            self.free_head = unsafe { phys_to_virt(frame).as_mut_ptr::<u64>().read() };
            frame
        } else {
            self.bump()?
        };
        self.used += 1;
        Some(frame)
    }

    fn free_frame(&mut self, frame: PhysAddr) {
        assert!(frame.is_page_aligned(), "pmm: freeing unaligned frame {:#x}", frame.0);
        assert!(self.used > 0, "pmm: free with nothing allocated");
        assert!(self.handed_out(frame.0), "pmm: freeing frame {:#x} that was never allocated", frame.0);
        assert!(frame.0 != self.free_head, "pmm: double free of frame {:#x}", frame.0);
        unsafe { phys_to_virt(frame).as_mut_ptr::<u64>().write(self.free_head) };
        self.free_head = frame.0;
        self.used -= 1;
    }

    fn used_frames(&self) -> usize {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    #[repr(C, align(4096))]
    struct Page([u8; PAGE_SIZE]);

    fn arena(pages: usize) -> Box<[Page]> {
        (0..pages).map(|_| Page([0; PAGE_SIZE])).collect()
    }

    #[test]
    fn bump_then_reuse_freed() {
        let mem = arena(4);
        let base = mem.as_ptr() as u64;
        let mut pmm = PhysFrames::new();
        pmm.add_region(base, 4 * PAGE_SIZE as u64);

        let a = pmm.alloc_frame().unwrap();
        let b = pmm.alloc_frame().unwrap();
        assert_eq!(a.0, base);
        assert_eq!(b.0, base + PAGE_SIZE as u64);
        assert_eq!(pmm.used_frames(), 2);

        pmm.free_frame(a);
        assert_eq!(pmm.used_frames(), 1);
        assert_eq!(pmm.alloc_frame(), Some(a));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn freeing_twice_panics() {
        let mem = arena(4);
        let mut pmm = PhysFrames::new();
        pmm.add_region(mem.as_ptr() as u64, 4 * PAGE_SIZE as u64);
        let a = pmm.alloc_frame().unwrap();
        let _b = pmm.alloc_frame().unwrap();
        pmm.free_frame(a);
        pmm.free_frame(a);
    }

    #[test]
    #[should_panic(expected = "never allocated")]
    fn freeing_a_frame_above_the_bump_panics() {
        let mem = arena(4);
        let base = mem.as_ptr() as u64;
        let mut pmm = PhysFrames::new();
        pmm.add_region(base, 4 * PAGE_SIZE as u64);
        pmm.alloc_frame().unwrap();
        pmm.free_frame(PhysAddr(base + 2 * PAGE_SIZE as u64));
    }

    #[test]
    #[should_panic(expected = "never allocated")]
    fn freeing_outside_every_region_panics() {
        let mut pmm = PhysFrames::new();
        pmm.add_region(0x10_0000, 0x4000);
        pmm.add_region(0x20_0000, 0x4000);
        let _ = pmm.take_contiguous(0x1000).unwrap();
        // кадр кучи ушёл из регионов / the heap frame left the regions
        pmm.used = 1;
        pmm.free_frame(PhysAddr(0x10_0000));
    }

    #[test]
    fn frames_of_exhausted_regions_can_be_freed() {
        let first = arena(1);
        let second = arena(2);
        let mut pmm = PhysFrames::new();
        pmm.add_region(first.as_ptr() as u64, PAGE_SIZE as u64);
        pmm.add_region(second.as_ptr() as u64, 2 * PAGE_SIZE as u64);
        let a = pmm.alloc_frame().unwrap();
        let b = pmm.alloc_frame().unwrap();
        pmm.free_frame(a);
        pmm.free_frame(b);
        assert_eq!(pmm.used_frames(), 0);
    }

    #[test]
    fn walks_regions_and_runs_dry() {
        let first = arena(1);
        let second = arena(2);
        let mut pmm = PhysFrames::new();
        pmm.add_region(first.as_ptr() as u64, PAGE_SIZE as u64);
        pmm.add_region(second.as_ptr() as u64, 2 * PAGE_SIZE as u64);
        assert_eq!(pmm.total_frames(), 3);

        let got: Vec<_> = core::iter::from_fn(|| pmm.alloc_frame()).collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[1].0, second.as_ptr() as u64);
        assert_eq!(pmm.alloc_frame(), None);
    }

    #[test]
    fn unaligned_edges_shrink_inwards() {
        let mut pmm = PhysFrames::new();
        pmm.add_region(0x1001, 0x3000);
        assert_eq!(pmm.total_frames(), 2);
        pmm.add_region(0x10_0800, 0x800);
        assert_eq!(pmm.total_frames(), 2);
    }

    #[test]
    fn heap_chunk_comes_first() {
        let mut pmm = PhysFrames::new();
        pmm.add_region(0x10_0000, 0x1000);
        pmm.add_region(0x20_0000, 0x10_0000);
        let heap = pmm.take_contiguous(0x8000).unwrap();
        assert_eq!(heap, PhysAddr(0x20_0000));
        assert_eq!(pmm.total_frames(), 1 + 0xF8);
    }
}
