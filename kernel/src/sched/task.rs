//! Запись задачи / Task record

use alloc::alloc::{alloc_zeroed, Layout};
use alloc::boxed::Box;
use core::fmt;

use crate::ipc::Mailbox;
use crate::mm::vmm::AddressSpace;
use crate::mm::{PhysAddr, PAGE_SIZE};
use crate::{Error, Result};

/// Идентификатор задачи. Монотонный, не переиспользуется.
/// Task identifier. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

impl Pid {
    /// Корневая задача — поток ядра с момента загрузки.
    /// The root task — the kernel's own flow since boot.
    pub const ROOT: Pid = Pid(0);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Индекс в арене задач / Index into the task arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Root,
    Kernel,
    User,
}

#[repr(C, align(4096))]
struct StackPage([u8; PAGE_SIZE]);

/// Стек ядра задачи, выровнен по странице.
/// A task's kernel stack, page aligned.
pub struct KernelStack {
    pages: Box<[StackPage]>,
}

impl KernelStack {
    pub fn new(size: usize) -> Result<Self> {
        let count = size.div_ceil(PAGE_SIZE).max(1);
        let layout = Layout::array::<StackPage>(count).map_err(|_| Error::InvalidArgument)?;
        let ptr = unsafe { alloc_zeroed(layout) }.cast::<StackPage>();
        if ptr.is_null() {
            log::warn!("sched: no heap for a {} byte kernel stack", count * PAGE_SIZE);
            return Err(Error::ResourceExhausted);
        }
        let slice = core::ptr::slice_from_raw_parts_mut(ptr, count);
        Ok(Self { pages: unsafe { Box::from_raw(slice) } })
    }

    pub fn size(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    pub fn top(&self) -> u64 {
        self.pages.as_ptr() as u64 + self.size() as u64
    }
}

impl fmt::Debug for KernelStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelStack")
            .field("top", &format_args!("{:#x}", self.top()))
            .field("size", &self.size())
            .finish()
    }
}

#[derive(Debug)]
pub struct Task {
    pub(crate) pid:              Pid,
    pub(crate) kind:             TaskKind,
    /// Действителен, только пока задача не текущая.
    /// Only valid while the task is not current.
    pub(crate) saved_sp:         u64,
    /// `None` — корень ядра / `None` — the kernel root
    pub(crate) space:            Option<AddressSpace>,
    pub(crate) kernel_stack:     Option<KernelStack>,
    pub(crate) kernel_stack_top: u64,
    pub(crate) next:             SlotId,
    pub(crate) heap_start:       u64,
    pub(crate) program_break:    u64,
    /// Конец последней отданной общей памяти: ниже куча не сжимается.
    /// End of the latest region shared out: the heap never shrinks below it.
    pub(crate) shared_end:       u64,
    pub(crate) framebuffer:      bool,
    pub(crate) mailbox:          Mailbox,
}

impl Task {
    pub(crate) fn root() -> Self {
        Self {
            pid:              Pid::ROOT,
            kind:             TaskKind::Root,
            saved_sp:         0,
            space:            None,
            kernel_stack:     None,
            kernel_stack_top: 0,
            next:             SlotId(0),
            heap_start:       0,
            program_break:    0,
            shared_end:       0,
            framebuffer:      false,
            mailbox:          Mailbox::new(),
        }
    }

    pub(crate) fn new(kind: TaskKind, saved_sp: u64, space: AddressSpace, stack: KernelStack) -> Self {
        Self {
            kind,
            saved_sp,
            kernel_stack_top: stack.top(),
            space: Some(space),
            kernel_stack: Some(stack),
            ..Self::root()
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn saved_stack_pointer(&self) -> u64 {
        self.saved_sp
    }

    /// Физический корень таблиц; 0 — общий корень ядра.
    /// Physical table root; 0 means the shared kernel root.
    pub fn root_table(&self) -> PhysAddr {
        self.space.as_ref().map_or(PhysAddr(0), AddressSpace::root)
    }

    pub fn space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }

    pub fn kernel_stack_top(&self) -> u64 {
        self.kernel_stack_top
    }

    pub fn heap_start(&self) -> u64 {
        self.heap_start
    }

    pub fn program_break(&self) -> u64 {
        self.program_break
    }

    /// Нижняя граница сжатия кучи / Lowest break a shrink may reach
    pub fn heap_floor(&self) -> u64 {
        self.heap_start.max(self.shared_end)
    }

    pub fn has_framebuffer(&self) -> bool {
        self.framebuffer
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}
