//! Объект ядра: планировщик + кадры + CPU + файлы
//! The kernel object: scheduler + frames + CPU + files
//!
//! На железе живёт в одном `spin::Mutex` и достижим только из трёх мест:
//! тик таймера, шлюз syscall, выход задачи. Все три работают с
//! выключенными прерываниями.
//! On hardware it lives behind one `spin::Mutex` and is reached from three
//! places only: the timer tick, the syscall gate and task exit. All three
//! run with interrupts off.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use libidp::abi::{status, ArgSlice, FbInfo, FileStat, Message, MAX_ARGS, SBRK_FAILED};

use crate::arch::Cpu;
use crate::loader::{ElfLoader, FileSource};
use crate::mm::vmm::{is_user_range, AddressSpace, PageFlags};
use crate::mm::{align_down, FrameSupplier, VirtAddr, PAGE_SIZE};
use crate::sched::{Backing, Framebuffer, Pid, Scheduler, TaskKind};
use crate::syscall::Syscall;
use crate::{Error, Result};

/// Самая длинная строка `write` / Longest `write` payload
pub const WRITE_LIMIT: u64 = 16 * 1024;
/// Самый длинный путь / Longest path
pub const PATH_LIMIT: u64 = 256;

/// Итог syscall / Syscall outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Значение для `rax` / Value for `rax`
    Return(u64),
    /// Текущая задача завершается / The current task terminates
    Exit(i64),
}

fn status_of(err: Error) -> u64 {
    err.status() as u64
}

fn reply(result: Result<u64>) -> Outcome {
    Outcome::Return(result.unwrap_or_else(status_of))
}

pub struct Kernel<F: FrameSupplier, C: Cpu> {
    sched:       Scheduler,
    frames:      F,
    cpu:         C,
    files:       Box<dyn FileSource + Send>,
    loader:      ElfLoader,
    framebuffer: Option<Framebuffer>,
}

impl<F: FrameSupplier, C: Cpu> Kernel<F, C> {
    pub fn new(
        sched: Scheduler,
        frames: F,
        cpu: C,
        files: Box<dyn FileSource + Send>,
        framebuffer: Option<Framebuffer>,
    ) -> Self {
        Self { sched, frames, cpu, files, loader: ElfLoader, framebuffer }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn frames(&self) -> &F {
        &self.frames
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    /// Запустить `path` из источника файлов. Framebuffer получает только
    /// процесс, запущенный с `with_framebuffer`.
    /// Start `path` from the file source. Only a process started
    /// `with_framebuffer` gets the framebuffer.
    pub fn exec(&mut self, path: &str, argv: &[&[u8]], with_framebuffer: bool) -> Result<Pid> {
        let Some(image) = self.files.open(path) else {
            log::warn!("exec: {} not found", path);
            return Err(Error::NotFound);
        };
        let fb = self.framebuffer.as_ref().filter(|_| with_framebuffer);
        let pid = self.sched.spawn_user_process(&mut self.frames, &self.loader, image, argv, fb)?;
        log::info!("exec: {} is pid {}", path, pid);
        Ok(pid)
    }

    /// Тик таймера / Timer tick
    pub fn tick(&mut self, interrupted_sp: u64) -> u64 {
        self.sched.schedule(&mut self.frames, &mut self.cpu, interrupted_sp)
    }

    /// Снять текущую задачу; sp преемника / Drop the current task; successor's sp
    pub fn exit_current(&mut self) -> u64 {
        self.sched.exit_current(&mut self.cpu)
    }

    // ── Память процесса / User memory ───────────────────────────────────────

    fn user_space(&self) -> Result<&AddressSpace> {
        self.sched.current().space().ok_or(Error::InvalidArgument)
    }

    fn check_user(&self, va: u64, len: u64, need: PageFlags) -> Result<()> {
        check_user(&self.sched, va, len, need)
    }

    fn read_user(&self, va: u64, buf: &mut [u8]) -> Result<()> {
        self.check_user(va, buf.len() as u64, PageFlags::USER)?;
        self.user_space()?.read_bytes(VirtAddr(va), buf)
    }

    fn read_user_vec(&self, va: u64, len: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len as usize).map_err(|_| Error::ResourceExhausted)?;
        buf.resize(len as usize, 0);
        self.read_user(va, &mut buf)?;
        Ok(buf)
    }

    fn write_user(&mut self, va: u64, data: &[u8]) -> Result<()> {
        write_user(&mut self.sched, va, data)
    }

    fn read_path(&self, path: u64, path_len: u64) -> Result<String> {
        if path_len == 0 || path_len > PATH_LIMIT {
            return Err(Error::InvalidArgument);
        }
        let raw = self.read_user_vec(path, path_len)?;
        String::from_utf8(raw).map_err(|_| Error::InvalidArgument)
    }

    // ── Syscall ─────────────────────────────────────────────────────────────

    /// Выполнить запрос текущей задачи / Execute a request of the current task
    pub fn syscall(&mut self, call: Syscall) -> Outcome {
        let pid = self.sched.current_pid();
        log::trace!("syscall: {} {:?}", pid, call);
        match call {
            Syscall::Write { buf, len } => reply(self.sys_write(buf, len)),
            Syscall::Exit { code } => {
                if self.sched.current().kind() == TaskKind::Root {
                    log::warn!("syscall: the root task cannot exit");
                    return Outcome::Return(status_of(Error::PermissionDenied));
                }
                log::info!("syscall: {} exits with {}", pid, code);
                Outcome::Exit(code)
            }
            Syscall::Exec { path, path_len, argv, argc } => {
                reply(self.sys_exec(path, path_len, argv, argc).map(|pid| pid.0))
            }
            Syscall::IpcSend { dest, kind, data } => {
                reply(self.sched.send(dest, kind, data).map(|()| status::OK as u64))
            }
            Syscall::IpcRecv { out } => reply(self.sys_recv(out)),
            Syscall::Sbrk { delta } => {
                Outcome::Return(self.sched.sbrk(&mut self.frames, delta).unwrap_or(SBRK_FAILED))
            }
            Syscall::ShareMem { target, size, out } => {
                reply(self.sys_share_mem(target, size, out))
            }
            Syscall::Unmap { addr, size } => reply(
                self.sched
                    .unmap_range(&mut self.frames, addr, size, Backing::Keep)
                    .map(|_| status::OK as u64),
            ),
            Syscall::GetFbInfo { out } => reply(self.sys_fb_info(out)),
            Syscall::GetPid => Outcome::Return(pid.0),
            Syscall::FileRead { path, path_len, buf, max } => {
                reply(self.sys_file_read(path, path_len, buf, max))
            }
            Syscall::Stat { path, path_len, out } => reply(self.sys_stat(path, path_len, out)),
            Syscall::ReadDir { path, path_len, index, out } => {
                reply(self.sys_read_dir(path, path_len, index, out))
            }
            Syscall::Unknown(nr) => {
                log::warn!("syscall: {} called unknown number {}", pid, nr);
                Outcome::Return(status_of(Error::InvalidArgument))
            }
        }
    }

    fn sys_write(&self, buf: u64, len: u64) -> Result<u64> {
        if len > WRITE_LIMIT {
            return Err(Error::InvalidArgument);
        }
        let bytes = self.read_user_vec(buf, len)?;
        let text = String::from_utf8_lossy(&bytes);
        log::info!(target: "console", "{}", text.trim_end_matches('\n'));
        Ok(len)
    }

    fn sys_exec(&mut self, path: u64, path_len: u64, argv: u64, argc: u64) -> Result<Pid> {
        if argc > MAX_ARGS as u64 {
            return Err(Error::InvalidArgument);
        }
        let path = self.read_path(path, path_len)?;

        let mut args: Vec<Vec<u8>> = Vec::new();
        for i in 0..argc {
            let mut raw = [0u8; ArgSlice::SIZE];
            self.read_user(argv + i * ArgSlice::SIZE as u64, &mut raw)?;
            let slice = ArgSlice::from_bytes(raw);
            if slice.len > PAGE_SIZE as u64 {
                return Err(Error::InvalidArgument);
            }
            args.push(self.read_user_vec(slice.ptr, slice.len)?);
        }
        let argv: Vec<&[u8]> = args.iter().map(Vec::as_slice).collect();
        self.exec(&path, &argv, false)
    }

    fn sys_recv(&mut self, out: u64) -> Result<u64> {
        // Буфер проверяется до извлечения, чтобы сообщение не потерялось.
        // The buffer is checked before popping so no message gets lost.
        self.check_user(out, Message::SIZE as u64, PageFlags::USER | PageFlags::WRITABLE)?;
        let msg = self.sched.recv()?;
        self.write_user(out, &msg.to_bytes())?;
        Ok(status::OK as u64)
    }

    fn sys_share_mem(&mut self, target: Pid, size: u64, out: u64) -> Result<u64> {
        self.check_user(out, 8, PageFlags::USER | PageFlags::WRITABLE)?;
        let (local, remote) = self.sched.share_mem(&mut self.frames, target, size)?;
        self.write_user(out, &remote.to_le_bytes())?;
        Ok(local)
    }

    fn sys_file_read(&mut self, path: u64, path_len: u64, buf: u64, max: u64) -> Result<u64> {
        let path = self.read_path(path, path_len)?;
        let data = self.files.open(&path).ok_or(Error::NotFound)?;
        let len = data.len().min(usize::try_from(max).unwrap_or(usize::MAX));
        // Копия идёт прямо из модуля / The copy goes straight from the module
        write_user(&mut self.sched, buf, &data[..len])?;
        Ok(len as u64)
    }

    fn sys_stat(&mut self, path: u64, path_len: u64, out: u64) -> Result<u64> {
        self.check_user(out, FileStat::SIZE as u64, PageFlags::USER | PageFlags::WRITABLE)?;
        let path = self.read_path(path, path_len)?;
        let stat = self.files.stat(&path).ok_or(Error::NotFound)?;
        self.write_user(out, &stat.to_bytes())?;
        Ok(status::OK as u64)
    }

    /// Конец каталога: `Empty` / Past the last entry: `Empty`
    fn sys_read_dir(&mut self, path: u64, path_len: u64, index: u64, out: u64) -> Result<u64> {
        let path = self.read_path(path, path_len)?;
        let entries = self.files.list(&path).ok_or(Error::NotFound)?;
        let entry = usize::try_from(index)
            .ok()
            .and_then(|i| entries.get(i))
            .ok_or(Error::Empty)?;
        self.write_user(out, &entry.to_bytes())?;
        Ok(status::OK as u64)
    }

    fn sys_fb_info(&mut self, out: u64) -> Result<u64> {
        let fb = match self.framebuffer {
            Some(fb) if self.sched.current().has_framebuffer() => fb,
            _ => return Err(Error::PermissionDenied),
        };
        let info: FbInfo = fb.info(self.sched.layout().framebuffer_base);
        self.write_user(out, &info.to_bytes())?;
        Ok(status::OK as u64)
    }
}

/// Проверить, что каждая страница `[va, va + len)` текущей задачи
/// отображена с `need`. Пустой диапазон всегда годен.
/// Check that every page of `[va, va + len)` in the current task is mapped
/// with `need`. An empty range always passes.
fn check_user(sched: &Scheduler, va: u64, len: u64, need: PageFlags) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    if !is_user_range(va, len) {
        return Err(Error::InvalidArgument);
    }
    let space = sched.current().space().ok_or(Error::InvalidArgument)?;
    let mut page = align_down(va);
    while page < va + len {
        match space.flags(VirtAddr(page)) {
            Some(flags) if flags.contains(need) => {}
            _ => return Err(Error::InvalidArgument),
        }
        page += PAGE_SIZE as u64;
    }
    Ok(())
}

fn write_user(sched: &mut Scheduler, va: u64, data: &[u8]) -> Result<()> {
    check_user(sched, va, data.len() as u64, PageFlags::USER | PageFlags::WRITABLE)?;
    let space = sched.current_mut().space.as_mut().ok_or(Error::InvalidArgument)?;
    space.write_bytes(VirtAddr(va), data)
}

// ── Глобальный экземпляр (только железо) / Global instance (hardware only) ──

#[cfg(target_os = "none")]
mod global {
    use spin::Mutex;

    use super::{Kernel, Outcome};
    use crate::arch::x86_64::cpu::X86Cpu;
    use crate::arch::x86_64::trap::{trap_return, TrapFrame};
    use crate::mm::pmm::PhysFrames;
    use crate::syscall::Syscall;

    pub type BootKernel = Kernel<PhysFrames, X86Cpu>;

    static KERNEL: Mutex<Option<BootKernel>> = Mutex::new(None);

    /// Установить ядро и выполнить `f` над ним под замком.
    /// Install the kernel and run `f` on it under the lock.
    pub fn install<R>(kernel: BootKernel, f: impl FnOnce(&mut BootKernel) -> R) -> R {
        crate::arch::without_interrupts(|| {
            let mut guard = KERNEL.lock();
            f(guard.insert(kernel))
        })
    }

    /// Из обработчика IRQ0. Занятый замок или отсутствие ядра: тот же sp.
    /// From the IRQ0 handler. Lock busy or no kernel yet: the same sp.
    pub fn timer_interrupt(sp: u64) -> u64 {
        match KERNEL.try_lock() {
            Some(mut guard) => match guard.as_mut() {
                Some(kernel) => kernel.tick(sp),
                None => sp,
            },
            None => sp,
        }
    }

    /// Из шлюза `int 0x80`. Возвращает sp, по которому продолжить.
    /// From the `int 0x80` gate. Returns the sp to resume on.
    pub fn syscall_interrupt(sp: u64) -> u64 {
        let mut guard = KERNEL.lock();
        let Some(kernel) = guard.as_mut() else {
            return sp;
        };
        // Кадр лежит на стеке ядра текущей задачи.
        // The frame sits on the current task's kernel stack.
        let frame = unsafe { TrapFrame::at(sp) };
        match kernel.syscall(Syscall::decode(frame)) {
            Outcome::Return(value) => {
                frame.rax = value;
                sp
            }
            Outcome::Exit(_) => {
                let next = kernel.exit_current();
                drop(guard);
                unsafe { trap_return(next) }
            }
        }
    }

    /// Исключение в ring 3: снять задачу. sp преемника.
    /// A ring 3 fault: drop the task. The successor's sp.
    pub fn exit_interrupt() -> u64 {
        let mut guard = KERNEL.lock();
        match guard.as_mut() {
            Some(kernel) => kernel.exit_current(),
            None => panic!("user fault before the kernel was installed"),
        }
    }

    /// Завершить текущую задачу ядра. Не возвращается.
    /// Terminate the current kernel task. Never returns.
    pub fn task_exit() -> ! {
        let next = crate::arch::without_interrupts(exit_interrupt);
        unsafe { trap_return(next) }
    }
}

#[cfg(target_os = "none")]
pub use global::{exit_interrupt, install, syscall_interrupt, task_exit, timer_interrupt, BootKernel};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserLayout;
    use crate::mm::PhysAddr;
    use crate::loader::{BootModule, BootModules};
    use crate::testing::{elf_image, tiny_elf, HostFrames, RecordingCpu, Segment, PF_R, PF_W, PF_X};
    use libidp::abi::{DirEntry, STAT_DIR};

    const DATA: u64 = 0x40_1000;
    const PAGE: u64 = PAGE_SIZE as u64;

    /// Код + одна страница данных по 0x40_1000.
    /// Code plus one data page at 0x40_1000.
    fn app() -> Vec<u8> {
        elf_image(
            0x40_0000,
            &[
                Segment { vaddr: 0x40_0000, data: &[0x90; 16], memsz: 16, flags: PF_R | PF_X },
                Segment { vaddr: DATA, data: b"/bin/app", memsz: PAGE, flags: PF_R | PF_W },
            ],
        )
    }

    type TestKernel = Kernel<HostFrames, RecordingCpu>;

    fn boot(framebuffer: Option<Framebuffer>) -> TestKernel {
        let mut frames = HostFrames::new();
        let master = AddressSpace::new(&mut frames).unwrap();
        let cpu = RecordingCpu { root: master.root(), ..RecordingCpu::default() };
        let layout = UserLayout { stack_size: 2 * PAGE, ..UserLayout::default() };
        let sched = Scheduler::with_layout(master, layout);

        let mut files = BootModules::new();
        files.push(BootModule { path: "/bin/app", data: app().leak() });
        files.push(BootModule { path: "/bin/tiny", data: tiny_elf().leak() });
        files.push(BootModule { path: "/bin/bad", data: vec![0u8; 64].leak() });
        files.push(BootModule { path: "/etc/motd", data: b"hello" });
        Kernel::new(sched, frames, cpu, Box::new(files), framebuffer)
    }

    /// Запустить /bin/app и сделать его текущим / Start /bin/app and make it current
    fn running(kernel: &mut TestKernel, with_fb: bool) -> Pid {
        let pid = kernel.exec("/bin/app", &[], with_fb).unwrap();
        while kernel.scheduler().current_pid() != pid {
            kernel.tick(0);
        }
        pid
    }

    fn read(kernel: &TestKernel, va: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        kernel.read_user(va, &mut buf).unwrap();
        buf
    }

    fn ret(value: i64) -> Outcome {
        Outcome::Return(value as u64)
    }

    #[test]
    fn exec_missing_and_malformed() {
        let mut kernel = boot(None);
        assert_eq!(kernel.exec("/bin/none", &[], false), Err(Error::NotFound));
        assert_eq!(kernel.exec("/bin/bad", &[], false), Err(Error::Malformed));
        assert_eq!(kernel.scheduler().len(), 1);
        assert_eq!(kernel.frames().used_frames(), 1);
    }

    #[test]
    fn getpid_and_unknown() {
        let mut kernel = boot(None);
        let pid = running(&mut kernel, false);
        assert_eq!(kernel.syscall(Syscall::GetPid), Outcome::Return(pid.0));
        assert_eq!(kernel.syscall(Syscall::Unknown(99)), ret(status::INVALID_ARGUMENT));
    }

    #[test]
    fn write_reads_user_memory() {
        let mut kernel = boot(None);
        running(&mut kernel, false);
        assert_eq!(kernel.syscall(Syscall::Write { buf: DATA, len: 8 }), Outcome::Return(8));
        let unmapped = Syscall::Write { buf: 0x50_0000, len: 4 };
        assert_eq!(kernel.syscall(unmapped), ret(status::INVALID_ARGUMENT));
        let kernel_half = Syscall::Write { buf: 0xFFFF_8000_0000_0000, len: 4 };
        assert_eq!(kernel.syscall(kernel_half), ret(status::INVALID_ARGUMENT));
    }

    #[test]
    fn exec_syscall_copies_path_and_args() {
        let mut kernel = boot(None);
        running(&mut kernel, false);
        // argv: одна ArgSlice на "app" внутри пути / one ArgSlice pointing at "app" in the path
        let slice = [(DATA + 5).to_le_bytes(), 3u64.to_le_bytes()].concat();
        kernel.write_user(DATA + 0x100, &slice).unwrap();

        let call = Syscall::Exec { path: DATA, path_len: 8, argv: DATA + 0x100, argc: 1 };
        let Outcome::Return(child) = kernel.syscall(call) else {
            panic!("exec must return");
        };
        let child = Pid(child);
        assert_eq!(kernel.scheduler().len(), 3);
        let task = kernel.scheduler().task(child).unwrap();
        assert!(!task.has_framebuffer());

        let frame = unsafe { *crate::arch::x86_64::trap::TrapFrame::at(task.saved_stack_pointer()) };
        assert_eq!(frame.rdi, 1);
        let mut word = [0u8; 8];
        task.space().unwrap().read_bytes(VirtAddr(frame.rsi), &mut word).unwrap();
        let mut text = [0u8; 4];
        task.space().unwrap().read_bytes(VirtAddr(u64::from_le_bytes(word)), &mut text).unwrap();
        assert_eq!(&text, b"app\0");
    }

    #[test]
    fn zero_length_write_needs_no_mapping() {
        let mut kernel = boot(None);
        running(&mut kernel, false);
        assert_eq!(kernel.syscall(Syscall::Write { buf: 0x50_0123, len: 0 }), ret(0));
        assert_eq!(kernel.syscall(Syscall::Write { buf: 0x50_0000, len: 1 }), ret(status::INVALID_ARGUMENT));
    }

    #[test]
    fn file_read_copies_at_most_max_bytes() {
        let mut kernel = boot(None);
        running(&mut kernel, false);
        // путь "/bin/app" уже лежит по DATA / the path "/bin/app" already sits at DATA
        let call = Syscall::FileRead { path: DATA, path_len: 8, buf: DATA + 64, max: 4 };
        assert_eq!(kernel.syscall(call), ret(4));
        assert_eq!(read(&kernel, DATA + 64, 5), b"\x7FELF\0");

        let whole = app().len() as u64;
        let call = Syscall::FileRead { path: DATA, path_len: 8, buf: DATA + 64, max: PAGE - 64 };
        assert_eq!(kernel.syscall(call), Outcome::Return(whole));
        assert_eq!(read(&kernel, DATA + 64, whole as usize), app());

        kernel.write_user(DATA + 0x800, b"/etc/none").unwrap();
        let call = Syscall::FileRead { path: DATA + 0x800, path_len: 9, buf: DATA + 64, max: 4 };
        assert_eq!(kernel.syscall(call), ret(status::NOT_FOUND));
        // буфер в коде только для чтения / the buffer in code is read only
        let call = Syscall::FileRead { path: DATA, path_len: 8, buf: 0x40_0000, max: 4 };
        assert_eq!(kernel.syscall(call), ret(status::INVALID_ARGUMENT));
    }

    #[test]
    fn stat_and_read_dir_over_boot_modules() {
        let mut kernel = boot(None);
        running(&mut kernel, false);
        kernel.write_user(DATA + 0x800, b"/etc/motd").unwrap();
        let call = Syscall::Stat { path: DATA + 0x800, path_len: 9, out: DATA + 0x900 };
        assert_eq!(kernel.syscall(call), ret(0));
        let expected = FileStat { size: 5, flags: 0 }.to_bytes();
        assert_eq!(read(&kernel, DATA + 0x900, FileStat::SIZE), expected);

        // "/etc" — каталог / "/etc" is a directory
        let call = Syscall::Stat { path: DATA + 0x800, path_len: 4, out: DATA + 0x900 };
        assert_eq!(kernel.syscall(call), ret(0));
        let expected = FileStat { size: 0, flags: STAT_DIR }.to_bytes();
        assert_eq!(read(&kernel, DATA + 0x900, FileStat::SIZE), expected);

        kernel.write_user(DATA + 0xA00, b"/bin").unwrap();
        let list = |index| Syscall::ReadDir { path: DATA + 0xA00, path_len: 4, index, out: DATA + 0xB00 };
        assert_eq!(kernel.syscall(list(1)), ret(0));
        let tiny = DirEntry::new(b"tiny", tiny_elf().len() as u64, false);
        assert_eq!(read(&kernel, DATA + 0xB00, DirEntry::SIZE), tiny.to_bytes());
        assert_eq!(kernel.syscall(list(3)), ret(status::EMPTY));
        assert_eq!(kernel.syscall(list(u64::MAX)), ret(status::EMPTY));

        let missing = Syscall::ReadDir { path: DATA + 0x800, path_len: 9, index: 0, out: DATA + 0xB00 };
        assert_eq!(kernel.syscall(missing), ret(status::NOT_FOUND));
    }

    #[test]
    fn exec_syscall_reports_missing_file() {
        let mut kernel = boot(None);
        running(&mut kernel, false);
        kernel.write_user(DATA, b"/bin/zzz").unwrap();
        let call = Syscall::Exec { path: DATA, path_len: 8, argv: 0, argc: 0 };
        assert_eq!(kernel.syscall(call), ret(status::NOT_FOUND));
        let call = Syscall::Exec { path: DATA, path_len: 8, argv: 0, argc: 17 };
        assert_eq!(kernel.syscall(call), ret(status::INVALID_ARGUMENT));
    }

    #[test]
    fn ipc_round_trip_through_user_buffer() {
        let mut kernel = boot(None);
        let me = running(&mut kernel, false);
        let send = Syscall::IpcSend { dest: me, kind: 5, data: [1, 2, 3] };
        assert_eq!(kernel.syscall(send), ret(0));
        let lost = Syscall::IpcSend { dest: Pid(77), kind: 5, data: [0; 3] };
        assert_eq!(kernel.syscall(lost), ret(status::NOT_FOUND));

        assert_eq!(kernel.syscall(Syscall::IpcRecv { out: DATA + 64 }), ret(0));
        let raw = read(&kernel, DATA + 64, Message::SIZE);
        assert_eq!(raw, Message::new(me.0, 5, [1, 2, 3]).to_bytes());
        assert_eq!(kernel.syscall(Syscall::IpcRecv { out: DATA + 64 }), ret(status::EMPTY));
    }

    #[test]
    fn recv_into_read_only_page_keeps_the_message() {
        let mut kernel = boot(None);
        let me = running(&mut kernel, false);
        kernel.syscall(Syscall::IpcSend { dest: me, kind: 1, data: [9; 3] });
        // 0x40_0000 — код, только чтение / code, read only
        assert_eq!(kernel.syscall(Syscall::IpcRecv { out: 0x40_0000 }), ret(status::INVALID_ARGUMENT));
        assert_eq!(kernel.scheduler().current().mailbox().len(), 1);
    }

    #[test]
    fn ipc_send_reports_full_mailbox() {
        let mut kernel = boot(None);
        let me = running(&mut kernel, false);
        for _ in 0..16 {
            kernel.syscall(Syscall::IpcSend { dest: me, kind: 0, data: [0; 3] });
        }
        let call = Syscall::IpcSend { dest: me, kind: 0, data: [0; 3] };
        assert_eq!(kernel.syscall(call), ret(status::FULL));
    }

    #[test]
    fn sbrk_returns_old_break_or_sentinel() {
        let mut kernel = boot(None);
        running(&mut kernel, false);
        let brk = DATA + PAGE;
        assert_eq!(kernel.syscall(Syscall::Sbrk { delta: 0 }), Outcome::Return(brk));
        assert_eq!(kernel.syscall(Syscall::Sbrk { delta: 64 }), Outcome::Return(brk));
        assert_eq!(kernel.syscall(Syscall::Sbrk { delta: -4096 }), Outcome::Return(SBRK_FAILED));
        assert_eq!(kernel.syscall(Syscall::Sbrk { delta: i64::MAX }), Outcome::Return(SBRK_FAILED));
    }

    #[test]
    fn share_mem_writes_remote_address() {
        let mut kernel = boot(None);
        let server = kernel.exec("/bin/tiny", &[], false).unwrap();
        running(&mut kernel, false);

        let call = Syscall::ShareMem { target: server, size: PAGE, out: DATA + 32 };
        let Outcome::Return(local) = kernel.syscall(call) else {
            panic!("share_mem must return");
        };
        assert_eq!(local, DATA + PAGE);
        let remote = u64::from_le_bytes(read(&kernel, DATA + 32, 8).try_into().unwrap());
        assert_eq!(remote, 0x40_1000);

        let bad = Syscall::ShareMem { target: Pid(50), size: PAGE, out: DATA + 32 };
        assert_eq!(kernel.syscall(bad), ret(status::NOT_FOUND));
        let bad = Syscall::ShareMem { target: server, size: 0, out: DATA + 32 };
        assert_eq!(kernel.syscall(bad), ret(status::INVALID_ARGUMENT));
    }

    #[test]
    fn unmap_keeps_frames() {
        let mut kernel = boot(None);
        running(&mut kernel, false);
        let used = kernel.frames().used_frames();
        assert_eq!(kernel.syscall(Syscall::Unmap { addr: DATA, size: PAGE }), ret(0));
        assert_eq!(kernel.frames().used_frames(), used);
        assert_eq!(kernel.syscall(Syscall::Write { buf: DATA, len: 1 }), ret(status::INVALID_ARGUMENT));
    }

    #[test]
    fn fb_info_needs_a_granted_framebuffer() {
        let mut frames_for_fb = HostFrames::new();
        let phys = frames_for_fb.alloc_frame().unwrap();
        let fb = Framebuffer { phys: PhysAddr(phys.0 + 0x80), width: 8, height: 4, pitch: 32, bpp: 32 };

        let mut kernel = boot(Some(fb));
        running(&mut kernel, false);
        let call = Syscall::GetFbInfo { out: DATA };
        assert_eq!(kernel.syscall(call), ret(status::PERMISSION_DENIED));

        running(&mut kernel, true);
        assert_eq!(kernel.syscall(call), ret(0));
        let raw = read(&kernel, DATA, FbInfo::SIZE);
        let base = kernel.scheduler().layout().framebuffer_base;
        let expect = FbInfo { addr: base + 0x80, width: 8, height: 4, pitch: 32, bpp: 32 };
        assert_eq!(raw, expect.to_bytes());
    }

    #[test]
    fn exit_outcome_and_reclaim() {
        let mut kernel = boot(None);
        let before = kernel.frames().used_frames();
        running(&mut kernel, false);
        assert_eq!(kernel.syscall(Syscall::Exit { code: 3 }), Outcome::Exit(3));
        kernel.exit_current();
        assert_eq!(kernel.scheduler().current_pid(), Pid::ROOT);
        assert_eq!(kernel.cpu().root, kernel.scheduler().master().root());
        kernel.tick(0);
        assert_eq!(kernel.frames().used_frames(), before);
    }

    #[test]
    fn root_cannot_exit() {
        let mut kernel = boot(None);
        let call = Syscall::Exit { code: 0 };
        assert_eq!(kernel.syscall(call), ret(status::PERMISSION_DENIED));
    }
}
