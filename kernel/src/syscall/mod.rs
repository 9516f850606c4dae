//! Syscall — декодирование `int 0x80`
//! Syscall: `int 0x80` decoding
//!
//! Номер в `rax`, аргументы в `rdi, rsi, rdx, rcx, r8`, результат в `rax`.
//! Number in `rax`, arguments in `rdi, rsi, rdx, rcx, r8`, result in `rax`.
//!
//!   0  write(buf, len)                    — вывод в консоль / console output
//!   1  exit(code)                         — завершиться / terminate
//!   2  exec(path, path_len, argv, argc)   — новый процесс / new process
//!   3  ipc_send(dest, type, d1, d2, d3)   — в ящик / into a mailbox
//!   4  ipc_recv(out)                      — из своего ящика / from own mailbox
//!   5  sbrk(delta)                        — граница кучи / heap break
//!   6  share_mem(target, size, out)       — общие страницы / shared pages
//!   7  unmap(addr, size)                  — снять отображение / drop mappings
//!   8  get_fb_info(out)                   — описание framebuffer'а
//!   9  getpid()
//!  10  file_read(path, path_len, buf, max) — начало файла / start of a file
//!  11  stat(path, path_len, out)          — размер и тип / size and kind
//!  12  read_dir(path, path_len, i, out)   — i-й элемент каталога / i-th entry
//!
//! Исполняет запросы `kernel::Kernel::syscall`.
//! `kernel::Kernel::syscall` executes the requests.

use libidp::abi::nr;

use crate::arch::x86_64::trap::TrapFrame;
use crate::sched::Pid;

/// Разобранный запрос / A decoded request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Write     { buf: u64, len: u64 },
    Exit      { code: i64 },
    Exec      { path: u64, path_len: u64, argv: u64, argc: u64 },
    IpcSend   { dest: Pid, kind: u64, data: [u64; 3] },
    IpcRecv   { out: u64 },
    Sbrk      { delta: i64 },
    ShareMem  { target: Pid, size: u64, out: u64 },
    Unmap     { addr: u64, size: u64 },
    GetFbInfo { out: u64 },
    GetPid,
    FileRead  { path: u64, path_len: u64, buf: u64, max: u64 },
    Stat      { path: u64, path_len: u64, out: u64 },
    ReadDir   { path: u64, path_len: u64, index: u64, out: u64 },
    Unknown(u64),
}

impl Syscall {
    /// Прочитать запрос из регистров кадра.
    /// Read a request out of the frame's registers.
    pub fn decode(frame: &TrapFrame) -> Self {
        let (a0, a1, a2, a3, a4) = (frame.rdi, frame.rsi, frame.rdx, frame.rcx, frame.r8);
        match frame.rax {
            nr::WRITE       => Syscall::Write { buf: a0, len: a1 },
            nr::EXIT        => Syscall::Exit { code: a0 as i64 },
            nr::EXEC        => Syscall::Exec { path: a0, path_len: a1, argv: a2, argc: a3 },
            nr::IPC_SEND    => Syscall::IpcSend { dest: Pid(a0), kind: a1, data: [a2, a3, a4] },
            nr::IPC_RECV    => Syscall::IpcRecv { out: a0 },
            nr::SBRK        => Syscall::Sbrk { delta: a0 as i64 },
            nr::SHARE_MEM   => Syscall::ShareMem { target: Pid(a0), size: a1, out: a2 },
            nr::UNMAP       => Syscall::Unmap { addr: a0, size: a1 },
            nr::GET_FB_INFO => Syscall::GetFbInfo { out: a0 },
            nr::GETPID      => Syscall::GetPid,
            nr::FILE_READ   => Syscall::FileRead { path: a0, path_len: a1, buf: a2, max: a3 },
            nr::STAT        => Syscall::Stat { path: a0, path_len: a1, out: a2 },
            nr::READ_DIR    => Syscall::ReadDir { path: a0, path_len: a1, index: a2, out: a3 },
            other           => Syscall::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rax: u64, args: [u64; 5]) -> TrapFrame {
        TrapFrame {
            rax,
            rdi: args[0],
            rsi: args[1],
            rdx: args[2],
            rcx: args[3],
            r8:  args[4],
            ..TrapFrame::default()
        }
    }

    #[test]
    fn ipc_send_takes_five_registers() {
        let call = Syscall::decode(&frame(nr::IPC_SEND, [4, 9, 1, 2, 3]));
        assert_eq!(call, Syscall::IpcSend { dest: Pid(4), kind: 9, data: [1, 2, 3] });
    }

    #[test]
    fn signed_arguments_are_reinterpreted() {
        let call = Syscall::decode(&frame(nr::SBRK, [(-4096i64) as u64, 0, 0, 0, 0]));
        assert_eq!(call, Syscall::Sbrk { delta: -4096 });
        let call = Syscall::decode(&frame(nr::EXIT, [u64::MAX, 0, 0, 0, 0]));
        assert_eq!(call, Syscall::Exit { code: -1 });
    }

    #[test]
    fn exec_and_share_mem_layouts() {
        let call = Syscall::decode(&frame(nr::EXEC, [0x1000, 12, 0x2000, 3, 0]));
        assert_eq!(call, Syscall::Exec { path: 0x1000, path_len: 12, argv: 0x2000, argc: 3 });
        let call = Syscall::decode(&frame(nr::SHARE_MEM, [2, 8192, 0x3000, 0, 0]));
        assert_eq!(call, Syscall::ShareMem { target: Pid(2), size: 8192, out: 0x3000 });
    }

    #[test]
    fn file_calls_take_path_and_length_first() {
        let call = Syscall::decode(&frame(nr::FILE_READ, [0x1000, 8, 0x2000, 512, 0]));
        assert_eq!(call, Syscall::FileRead { path: 0x1000, path_len: 8, buf: 0x2000, max: 512 });
        let call = Syscall::decode(&frame(nr::READ_DIR, [0x1000, 4, 2, 0x3000, 0]));
        assert_eq!(call, Syscall::ReadDir { path: 0x1000, path_len: 4, index: 2, out: 0x3000 });
    }

    #[test]
    fn unknown_number_is_kept() {
        assert_eq!(Syscall::decode(&frame(77, [0; 5])), Syscall::Unknown(77));
        assert_eq!(Syscall::decode(&frame(nr::GETPID, [5; 5])), Syscall::GetPid);
    }
}
