//! Создание задач / Task creation
//!
//! Kernel-задача: 4 KiB стек, кадр ring 0, своя копия таблиц ядра.
//! Процесс: ELF + стек 16 MiB + 4 страницы стека ядра (+ framebuffer).
//! Любая ошибка разрушает недостроенное пространство; ядро продолжает работу.
//!
//! Kernel task: 4 KiB stack, ring 0 frame, its own copy of the kernel tables.
//! Process: ELF + 16 MiB stack + 4-page kernel stack (+ framebuffer).
//! Any failure destroys the half-built space; the kernel keeps running.

use libidp::abi::{FbInfo, MAX_ARGS};

use super::task::{KernelStack, Pid, Task, TaskKind};
use super::Scheduler;
use crate::arch::x86_64::trap::TrapFrame;
use crate::config::{KERNEL_TASK_STACK_SIZE, PAGE_SIZE, PROCESS_KERNEL_STACK_SIZE};
use crate::loader::{ImageLoader, LoadedImage};
use crate::mm::vmm::{AddressSpace, PageFlags};
use crate::mm::{align_down, align_up, FrameSupplier, PhysAddr, VirtAddr};
use crate::{Error, Result};

/// Сколько байт argv (строки + указатели) помещается на стек.
/// How many argv bytes (strings + pointers) fit on the stack.
pub const ARGV_LIMIT: usize = PAGE_SIZE;

/// Физический framebuffer от загрузчика.
/// The physical framebuffer handed over by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framebuffer {
    pub phys:   PhysAddr,
    pub width:  u64,
    pub height: u64,
    pub pitch:  u64,
    pub bpp:    u64,
}

impl Framebuffer {
    pub fn size(&self) -> u64 {
        self.pitch * self.height
    }

    /// Где процесс видит framebuffer, если он отображён по `base`.
    /// Where a process sees the framebuffer mapped at `base`.
    pub fn user_address(&self, base: u64) -> u64 {
        base + (self.phys.0 - align_down(self.phys.0))
    }

    pub fn info(&self, base: u64) -> FbInfo {
        FbInfo {
            addr:   self.user_address(base),
            width:  self.width,
            height: self.height,
            pitch:  self.pitch,
            bpp:    self.bpp,
        }
    }
}

const STACK_FLAGS: PageFlags = PageFlags::USER
    .union(PageFlags::WRITABLE)
    .union(PageFlags::NO_EXECUTE);

const FRAMEBUFFER_FLAGS: PageFlags = PageFlags::USER
    .union(PageFlags::WRITABLE)
    .union(PageFlags::CACHE_DISABLE)
    .union(PageFlags::WRITE_THROUGH)
    .union(PageFlags::NO_EXECUTE)
    .union(PageFlags::BORROWED);

/// Разложить argv на стеке: строки (с NUL), затем массив указателей с
/// завершающим нулём. Возвращает rsp (выровнен на 16), он же argv.
/// Lay argv out on the stack: strings (NUL terminated), then a
/// null-terminated pointer array. Returns rsp (16-aligned), which is also argv.
fn push_args(space: &mut AddressSpace, stack_top: u64, argv: &[&[u8]]) -> Result<u64> {
    if argv.len() > MAX_ARGS {
        return Err(Error::InvalidArgument);
    }
    let strings: usize = argv.iter().map(|a| a.len() + 1).sum();
    if strings + (argv.len() + 1) * 8 + 16 > ARGV_LIMIT {
        return Err(Error::InvalidArgument);
    }

    let mut sp = stack_top;
    let mut pointers = [0u64; MAX_ARGS + 1];
    for (slot, arg) in pointers.iter_mut().zip(argv) {
        sp -= arg.len() as u64 + 1;
        space.write_bytes(VirtAddr(sp), arg)?;
        space.write_bytes(VirtAddr(sp + arg.len() as u64), &[0])?;
        *slot = sp;
    }

    let table = (argv.len() + 1) * 8;
    sp = (sp - table as u64) & !0xF;
    for (i, ptr) in pointers[..=argv.len()].iter().enumerate() {
        space.write_bytes(VirtAddr(sp + i as u64 * 8), &ptr.to_le_bytes())?;
    }
    Ok(sp)
}

impl Scheduler {
    /// Создать задачу ядра с точкой входа `entry` (ring 0).
    /// Create a kernel task entering at `entry` (ring 0).
    pub fn spawn_kernel_task<F: FrameSupplier>(&mut self, frames: &mut F, entry: u64) -> Result<Pid> {
        self.reserve()?;
        let stack = KernelStack::new(KERNEL_TASK_STACK_SIZE)?;
        let top = stack.top();
        let sp = unsafe { TrapFrame::kernel(entry, top).install(top) };
        let space = AddressSpace::new_process(frames, self.master())?;

        let pid = self.link(Task::new(TaskKind::Kernel, sp, space, stack));
        log::info!("sched: kernel task {} created, entry {:#x}", pid, entry);
        Ok(pid)
    }

    /// Создать пользовательский процесс из образа `image`.
    /// Create a user process from `image`.
    pub fn spawn_user_process<F: FrameSupplier, L: ImageLoader>(
        &mut self,
        frames: &mut F,
        loader: &L,
        image: &[u8],
        argv: &[&[u8]],
        framebuffer: Option<&Framebuffer>,
    ) -> Result<Pid> {
        self.reserve()?;
        let mut space = AddressSpace::new_process(frames, self.master())?;

        let built = self.build_process(frames, loader, &mut space, image, argv, framebuffer);
        let (loaded, sp, stack) = match built {
            Ok(parts) => parts,
            Err(err) => {
                space.destroy(frames);
                log::warn!("sched: process creation failed: {}", err);
                return Err(err);
            }
        };

        let mut task = Task::new(TaskKind::User, sp, space, stack);
        task.heap_start = loaded.program_break.0;
        task.program_break = loaded.program_break.0;
        task.framebuffer = framebuffer.is_some();

        let pid = self.link(task);
        log::info!(
            "sched: process {} created, entry {:#x}, break {:#x}",
            pid, loaded.entry.0, loaded.program_break.0
        );
        Ok(pid)
    }

    fn build_process<F: FrameSupplier, L: ImageLoader>(
        &self,
        frames: &mut F,
        loader: &L,
        space: &mut AddressSpace,
        image: &[u8],
        argv: &[&[u8]],
        framebuffer: Option<&Framebuffer>,
    ) -> Result<(LoadedImage, u64, KernelStack)> {
        let layout = *self.layout();
        let loaded = loader.load(frames, space, image)?;
        if loaded.program_break.0 > layout.stack_top - layout.stack_size {
            return Err(Error::Malformed);
        }

        // Стек сверху вниз, по странице / The stack top-down, page by page
        let pages = layout.stack_size / PAGE_SIZE as u64;
        for i in 1..=pages {
            let va = VirtAddr(layout.stack_top - i * PAGE_SIZE as u64);
            space.map_fresh(frames, va, STACK_FLAGS)?;
        }
        let user_sp = push_args(space, layout.stack_top, argv)?;

        if let Some(fb) = framebuffer {
            let phys = align_down(fb.phys.0);
            let span = align_up(fb.phys.0 - phys + fb.size());
            for offset in (0..span).step_by(PAGE_SIZE) {
                let va = VirtAddr(layout.framebuffer_base + offset);
                space.map(frames, va, PhysAddr(phys + offset), FRAMEBUFFER_FLAGS)?;
            }
        }

        let stack = KernelStack::new(PROCESS_KERNEL_STACK_SIZE)?;
        let frame = TrapFrame::user(loaded.entry.0, user_sp).with_args(argv.len() as u64, user_sp);
        let sp = unsafe { frame.install(stack.top()) };
        Ok((loaded, sp, stack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserLayout;
    use crate::loader::ElfLoader;
    use crate::testing::{tiny_elf, HostFrames, RecordingCpu};

    const STACK_PAGES: u64 = 4;

    fn setup() -> (HostFrames, RecordingCpu, Scheduler) {
        let mut frames = HostFrames::new();
        let master = AddressSpace::new(&mut frames).unwrap();
        let cpu = RecordingCpu { root: master.root(), ..RecordingCpu::default() };
        let layout = UserLayout { stack_size: STACK_PAGES * PAGE_SIZE as u64, ..UserLayout::default() };
        (frames, cpu, Scheduler::with_layout(master, layout))
    }

    fn read_u64(space: &AddressSpace, va: u64) -> u64 {
        let mut word = [0u8; 8];
        space.read_bytes(VirtAddr(va), &mut word).unwrap();
        u64::from_le_bytes(word)
    }

    #[test]
    fn user_process_gets_frame_stack_and_args() {
        let (mut frames, _cpu, mut sched) = setup();
        let argv: [&[u8]; 2] = [b"init", b"-v"];
        let pid = sched
            .spawn_user_process(&mut frames, &ElfLoader, &tiny_elf(), &argv, None)
            .unwrap();

        let task = sched.task(pid).unwrap();
        assert_eq!(task.kind(), TaskKind::User);
        assert_eq!(task.program_break(), 0x40_1000);
        assert_eq!(task.heap_start(), 0x40_1000);
        assert!(!task.has_framebuffer());

        let frame = unsafe { *TrapFrame::at(task.saved_stack_pointer()) };
        assert_eq!(task.saved_stack_pointer(), task.kernel_stack_top() - 160);
        assert!(frame.from_user());
        assert_eq!(frame.rip, 0x40_0010);
        assert_eq!(frame.rdi, 2);
        assert_eq!(frame.rsp % 16, 0);
        assert_eq!(frame.rsi, frame.rsp);

        let space = task.space().unwrap();
        let first = read_u64(space, frame.rsi);
        let second = read_u64(space, frame.rsi + 8);
        assert_eq!(read_u64(space, frame.rsi + 16), 0);
        let mut text = [0u8; 5];
        space.read_bytes(VirtAddr(first), &mut text).unwrap();
        assert_eq!(&text, b"init\0");
        space.read_bytes(VirtAddr(second), &mut text[..3]).unwrap();
        assert_eq!(&text[..3], b"-v\0");
    }

    #[test]
    fn user_stack_is_mapped_top_down() {
        let (mut frames, _cpu, mut sched) = setup();
        let pid = sched.spawn_user_process(&mut frames, &ElfLoader, &tiny_elf(), &[], None).unwrap();
        let layout = *sched.layout();
        let space = sched.task(pid).unwrap().space().unwrap();
        for i in 1..=STACK_PAGES {
            let va = VirtAddr(layout.stack_top - i * PAGE_SIZE as u64);
            let flags = space.flags(va).unwrap();
            assert!(flags.contains(STACK_FLAGS));
        }
        let below = VirtAddr(layout.stack_top - (STACK_PAGES + 1) * PAGE_SIZE as u64);
        assert_eq!(space.lookup(below), None);
        assert_eq!(space.lookup(VirtAddr(layout.stack_top)), None);
    }

    #[test]
    fn framebuffer_is_borrowed_and_survives_teardown() {
        let (mut frames, mut cpu, mut sched) = setup();
        let fb_frame = frames.alloc_frame().unwrap();
        let fb = Framebuffer { phys: fb_frame, width: 16, height: 16, pitch: 64, bpp: 32 };
        let pid = sched
            .spawn_user_process(&mut frames, &ElfLoader, &tiny_elf(), &[], Some(&fb))
            .unwrap();

        let base = sched.layout().framebuffer_base;
        {
            let task = sched.task(pid).unwrap();
            assert!(task.has_framebuffer());
            let space = task.space().unwrap();
            assert_eq!(space.lookup(VirtAddr(base)), Some(fb_frame));
            let flags = space.flags(VirtAddr(base)).unwrap();
            assert!(flags.contains(FRAMEBUFFER_FLAGS));
        }
        assert_eq!(fb.info(base).addr, base);

        sched.schedule(&mut frames, &mut cpu, 0);
        sched.exit_current(&mut cpu);
        sched.schedule(&mut frames, &mut cpu, 0);
        assert!(frames.is_live(fb_frame));
        assert_eq!(frames.used_frames(), 2); // master + framebuffer
    }

    #[test]
    fn malformed_image_leaves_no_frames_behind() {
        let (mut frames, _cpu, mut sched) = setup();
        let before = frames.used_frames();
        let mut image = tiny_elf();
        image[18] = 0x28; // EM_ARM
        let err = sched.spawn_user_process(&mut frames, &ElfLoader, &image, &[], None);
        assert_eq!(err, Err(Error::Malformed));
        assert_eq!(frames.used_frames(), before);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn frame_exhaustion_aborts_creation_cleanly() {
        let (mut frames, _cpu, mut sched) = setup();
        let before = frames.used_frames();
        frames.set_limit(Some(before + 6));
        let err = sched.spawn_user_process(&mut frames, &ElfLoader, &tiny_elf(), &[], None);
        assert_eq!(err, Err(Error::ResourceExhausted));
        assert_eq!(frames.used_frames(), before);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn too_many_args_are_rejected() {
        let (mut frames, _cpu, mut sched) = setup();
        let many: [&[u8]; MAX_ARGS + 1] = [b"x"; MAX_ARGS + 1];
        let err = sched.spawn_user_process(&mut frames, &ElfLoader, &tiny_elf(), &many, None);
        assert_eq!(err, Err(Error::InvalidArgument));
    }

    #[test]
    fn user_process_exit_returns_every_frame() {
        let (mut frames, mut cpu, mut sched) = setup();
        let before = frames.used_frames();
        sched.spawn_user_process(&mut frames, &ElfLoader, &tiny_elf(), &[b"a"], None).unwrap();
        sched.schedule(&mut frames, &mut cpu, 0);
        sched.exit_current(&mut cpu);
        sched.schedule(&mut frames, &mut cpu, 0);
        assert_eq!(frames.used_frames(), before);
    }
}
