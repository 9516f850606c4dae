//! Память процесса: куча (sbrk), общая память, снятие отображений
//! Process memory: heap (sbrk), shared memory, unmapping
//!
//! Куча растёт вверх от конца образа и не может дойти до низа стека.
//! Общая память выделяется у вызывающего; цель получает те же кадры с
//! битом BORROWED и никогда их не освобождает. Куча вызывающего не
//! сжимается обратно через отданную память.
//! The heap grows up from the end of the image and never reaches the stack
//! bottom. Shared memory is owned by the caller; the target receives the same
//! frames marked BORROWED and never frees them. The caller's heap never
//! shrinks back over memory it has shared.

use super::task::TaskKind;
use super::{Pid, Scheduler};
use crate::mm::vmm::{is_user_range, AddressSpace, PageFlags};
use crate::mm::{align_down, align_up, FrameSupplier, VirtAddr, PAGE_SIZE};
use crate::{Error, Result};

const HEAP_FLAGS: PageFlags = PageFlags::USER
    .union(PageFlags::WRITABLE)
    .union(PageFlags::NO_EXECUTE);

/// Что делать с кадрами при снятии отображения.
/// What happens to frames when a mapping goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Кадр остаётся у владельца / The frame stays with its owner
    Keep,
    /// Кадр возвращается поставщику (кроме BORROWED)
    /// The frame goes back to the supplier (unless BORROWED)
    Release,
}

fn pages(start: u64, end: u64) -> impl Iterator<Item = VirtAddr> {
    (start..end).step_by(PAGE_SIZE).map(VirtAddr)
}

/// Отменить частично выполненное отображение [start, end).
/// Undo a partially completed mapping of [start, end).
fn rollback<F: FrameSupplier>(frames: &mut F, space: &mut AddressSpace, start: u64, end: u64) {
    for va in pages(start, end) {
        space.unmap_and_free(frames, va);
    }
}

impl Scheduler {
    fn stack_floor(&self) -> u64 {
        self.layout().stack_top - self.layout().stack_size
    }

    /// Сдвинуть границу кучи текущего процесса на `delta`. Возвращает
    /// старую границу.
    /// Move the current process's break by `delta`. Returns the old break.
    pub fn sbrk<F: FrameSupplier>(&mut self, frames: &mut F, delta: i64) -> Result<u64> {
        let floor = self.stack_floor();
        let task = self.current_mut();
        if task.kind != TaskKind::User {
            return Err(Error::InvalidArgument);
        }
        let old = task.program_break;
        let new = old.checked_add_signed(delta).ok_or(Error::InvalidArgument)?;
        let heap_floor = task.heap_floor();
        let Some(space) = task.space.as_mut() else {
            return Err(Error::InvalidArgument);
        };

        if new > old {
            if new > floor {
                log::warn!("sched: sbrk of {} by {:#x} would hit the stack", task.pid, delta);
                return Err(Error::ResourceExhausted);
            }
            // Выше align_up(break) куча ничего не отображает.
            // Nothing is mapped above align_up(break).
            let start = align_up(old);
            for va in pages(start, align_up(new)) {
                if let Err(err) = space.map_fresh(frames, va, HEAP_FLAGS) {
                    rollback(frames, space, start, va.0);
                    log::warn!("sched: sbrk of {} failed: {}", task.pid, err);
                    return Err(err);
                }
            }
        } else if new < old {
            // Кадры, отданные другому процессу, не освобождаются.
            // Frames lent to another process are never freed here.
            if new < heap_floor {
                return Err(Error::InvalidArgument);
            }
            for va in pages(align_up(new), align_up(old)) {
                space.unmap_and_free(frames, va);
            }
        }

        task.program_break = new;
        log::trace!("sched: {} break {:#x} -> {:#x}", task.pid, old, new);
        Ok(old)
    }

    /// Разделить `size` байт с процессом `target`. Возвращает адреса
    /// (у себя, у цели); обе границы кучи сдвигаются.
    /// Share `size` bytes with process `target`. Returns the addresses
    /// (local, remote); both breaks advance.
    pub fn share_mem<F: FrameSupplier>(
        &mut self,
        frames: &mut F,
        target: Pid,
        size: u64,
    ) -> Result<(u64, u64)> {
        if size == 0 {
            return Err(Error::InvalidArgument);
        }
        let size = size.checked_add(PAGE_SIZE as u64 - 1).map(align_down).ok_or(Error::InvalidArgument)?;
        let floor = self.stack_floor();
        let their_slot = self.find_slot(target).ok_or(Error::NotFound)?;
        if their_slot == self.current {
            return Err(Error::InvalidArgument);
        }

        let (me, them) = self.pair_mut(self.current, their_slot);
        if me.kind != TaskKind::User || them.kind != TaskKind::User {
            return Err(Error::InvalidArgument);
        }
        let local = align_up(me.program_break);
        let remote = align_up(them.program_break);
        for base in [local, remote] {
            if base.checked_add(size).map_or(true, |end| end > floor) {
                return Err(Error::InvalidArgument);
            }
        }
        let (Some(my_space), Some(their_space)) = (me.space.as_mut(), them.space.as_mut()) else {
            return Err(Error::InvalidArgument);
        };

        let mut done = 0;
        while done < size {
            let mine = VirtAddr(local + done);
            let theirs = VirtAddr(remote + done);
            let shared = my_space.map_fresh(frames, mine, HEAP_FLAGS).and_then(|frame| {
                their_space.map(frames, theirs, frame, HEAP_FLAGS | PageFlags::BORROWED)
            });
            if let Err(err) = shared {
                my_space.unmap_and_free(frames, mine);
                for off in (0..done).step_by(PAGE_SIZE) {
                    their_space.unmap(VirtAddr(remote + off));
                }
                rollback(frames, my_space, local, local + done);
                log::warn!("sched: share_mem {} -> {} failed: {}", me.pid, them.pid, err);
                return Err(err);
            }
            done += PAGE_SIZE as u64;
        }

        me.program_break = local + size;
        me.shared_end = local + size;
        them.program_break = remote + size;
        log::debug!(
            "sched: {} shares {:#x} bytes with {} ({:#x} -> {:#x})",
            me.pid, size, them.pid, local, remote
        );
        Ok((local, remote))
    }

    /// Снять отображения `[va, va + size)` текущего процесса.
    /// Возвращает число снятых страниц.
    /// Unmap `[va, va + size)` in the current process.
    /// Returns the number of pages removed.
    pub fn unmap_range<F: FrameSupplier>(
        &mut self,
        frames: &mut F,
        va: u64,
        size: u64,
        backing: Backing,
    ) -> Result<usize> {
        if !is_user_range(va, size) {
            return Err(Error::InvalidArgument);
        }
        let space = self.current_mut().space.as_mut().ok_or(Error::InvalidArgument)?;
        let mut removed = 0;
        for page in pages(align_down(va), align_up(va + size)) {
            let gone = match backing {
                Backing::Keep    => space.unmap(page),
                Backing::Release => space.unmap_and_free(frames, page),
            };
            removed += usize::from(gone.is_some());
        }
        Ok(removed)
    }
}
