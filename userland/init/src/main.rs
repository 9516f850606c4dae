//! OpenIDP Init — первый userspace процесс / first userspace process
//!
//! Проверяет основные syscall'ы и запускает свою копию как потомка.
//! Exercises the core syscalls and starts a copy of itself as a child.

#![no_std]
#![no_main]

use core::fmt::{self, Write};
use core::panic::PanicInfo;

use libidp::{fs, ipc, mem, task};

const CHILD_ARG: &str = "child";
const SELF_PATH: &str = "/bin/init.elf";
const MSG_HELLO: u64 = 1;

/// Строка на стеке для `task::write` / A stack string for `task::write`
struct Line {
    buf: [u8; 128],
    len: usize,
}

impl Line {
    fn new() -> Self {
        Self { buf: [0; 128], len: 0 }
    }

    fn flush(&mut self) {
        if let Ok(text) = core::str::from_utf8(&self.buf[..self.len]) {
            let _ = task::write(text);
        }
        self.len = 0;
    }
}

impl Write for Line {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

macro_rules! say {
    ($($arg:tt)*) => {{
        let mut line = Line::new();
        let _ = write!(line, $($arg)*);
        line.flush();
    }};
}

/// argv[0] как байты (до NUL) / argv[0] as bytes (up to NUL)
///
/// # Safety
/// `argv` must be the pointer array the kernel placed on the stack.
unsafe fn first_arg<'a>(argc: u64, argv: *const *const u8) -> &'a [u8] {
    if argc == 0 || argv.is_null() {
        return &[];
    }
    let ptr = unsafe { *argv };
    let mut len = 0;
    while unsafe { *ptr.add(len) } != 0 {
        len += 1;
    }
    unsafe { core::slice::from_raw_parts(ptr, len) }
}

#[no_mangle]
pub extern "C" fn _start(argc: u64, argv: *const *const u8) -> ! {
    let pid = task::getpid();
    let is_child = unsafe { first_arg(argc, argv) } == CHILD_ARG.as_bytes();
    say!("init[{}]: up, argc={}", pid, argc);

    // Почтовый ящик: письмо самому себе / Mailbox: a letter to ourselves
    if ipc::send_with_backoff(pid, MSG_HELLO, [pid, 0xC0FFEE, 0]).is_ok() {
        let msg = ipc::recv_blocking();
        say!("init[{}]: mail from {} kind {} data {:#x}", pid, msg.sender, msg.kind, msg.data[1]);
    }

    // Куча / Heap
    match mem::sbrk(8192) {
        Ok(old) => {
            let cell = old as *mut u64;
            unsafe { cell.write_volatile(0x1DB) };
            say!("init[{}]: heap at {:#x}, wrote {:#x}", pid, old, unsafe { cell.read_volatile() });
        }
        Err(err) => say!("init[{}]: sbrk failed: {:?}", pid, err),
    }

    match mem::framebuffer() {
        Ok(fb) => say!("init[{}]: framebuffer {}x{} at {:#x}", pid, fb.width, fb.height, fb.addr),
        Err(err) => say!("init[{}]: no framebuffer ({:?})", pid, err),
    }

    if is_child {
        task::exit(0);
    }

    // Boot-модули как файлы / Boot modules as files
    if let Ok(stat) = fs::stat(SELF_PATH) {
        let mut magic = [0u8; 4];
        let read = fs::read(SELF_PATH, &mut magic).unwrap_or(0);
        say!("init[{}]: {} is {} bytes, starts {:02x?}", pid, SELF_PATH, stat.size, &magic[..read]);
    }
    let mut index = 0;
    while let Ok(Some(entry)) = fs::read_dir("/", index) {
        let name = core::str::from_utf8(entry.name()).unwrap_or("?");
        say!("init[{}]: /{}{}", pid, name, if entry.is_dir != 0 { "/" } else { "" });
        index += 1;
    }

    match task::exec(SELF_PATH, &[CHILD_ARG]) {
        Ok(child) => say!("init[{}]: started child {}", pid, child),
        Err(err) => say!("init[{}]: exec failed: {:?}", pid, err),
    }

    // Init не завершается / Init never exits
    loop {
        if let Ok(msg) = ipc::recv() {
            say!("init[{}]: late mail from {}", pid, msg.sender);
        }
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(_: &PanicInfo) -> ! {
    task::exit(-1)
}
