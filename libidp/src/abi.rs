//! Kernel ↔ userspace ABI
//!
//! Вектор `int 0x80`, номер в `rax`, аргументы в `rdi, rsi, rdx, rcx, r8`.
//! Vector `int 0x80`, number in `rax`, arguments in `rdi, rsi, rdx, rcx, r8`.

/// Вектор прерывания для syscall / Interrupt vector for syscalls
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Номера syscall / Syscall numbers
pub mod nr {
    pub const WRITE:       u64 = 0;
    pub const EXIT:        u64 = 1;
    pub const EXEC:        u64 = 2;
    pub const IPC_SEND:    u64 = 3;
    pub const IPC_RECV:    u64 = 4;
    pub const SBRK:        u64 = 5;
    pub const SHARE_MEM:   u64 = 6;
    pub const UNMAP:       u64 = 7;
    pub const GET_FB_INFO: u64 = 8;
    pub const GETPID:      u64 = 9;
    pub const FILE_READ:   u64 = 10;
    pub const STAT:        u64 = 11;
    pub const READ_DIR:    u64 = 12;
}

/// Отрицательные коды возврата / Negative return codes
pub mod status {
    pub const OK:                i64 = 0;
    pub const NOT_FOUND:         i64 = -1;
    pub const FULL:              i64 = -2;
    pub const EMPTY:             i64 = -3;
    pub const NO_MEMORY:         i64 = -4;
    pub const INVALID_ARGUMENT:  i64 = -5;
    pub const MALFORMED:         i64 = -6;
    pub const PERMISSION_DENIED: i64 = -7;
}

/// Возврат `sbrk` при ошибке / `sbrk` failure sentinel
pub const SBRK_FAILED: u64 = u64::MAX;

/// Сообщение почтового ящика. Отправителя всегда ставит ядро.
/// Mailbox message. The sender is always stamped by the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Message {
    pub sender: u64,
    pub kind:   u64,
    pub data:   [u64; 3],
}

impl Message {
    pub const SIZE: usize = core::mem::size_of::<Message>();

    pub const fn new(sender: u64, kind: u64, data: [u64; 3]) -> Self {
        Self { sender, kind, data }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        words_to_bytes(&[self.sender, self.kind, self.data[0], self.data[1], self.data[2]], &mut out);
        out
    }
}

/// Описание framebuffer'а в адресах процесса.
/// Framebuffer description in process addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct FbInfo {
    pub addr:   u64,
    pub width:  u64,
    pub height: u64,
    pub pitch:  u64,
    pub bpp:    u64,
}

impl FbInfo {
    pub const SIZE: usize = core::mem::size_of::<FbInfo>();

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        words_to_bytes(&[self.addr, self.width, self.height, self.pitch, self.bpp], &mut out);
        out
    }
}

fn words_to_bytes<const N: usize>(words: &[u64], out: &mut [u8; N]) {
    for (chunk, word) in out.chunks_exact_mut(8).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

/// Флаг каталога в `FileStat::flags` / Directory bit in `FileStat::flags`
pub const STAT_DIR: u64 = 1;

/// Ответ `stat` / `stat` reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct FileStat {
    pub size:  u64,
    pub flags: u64,
}

impl FileStat {
    pub const SIZE: usize = core::mem::size_of::<FileStat>();

    pub fn is_dir(&self) -> bool {
        self.flags & STAT_DIR != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        words_to_bytes(&[self.size, self.flags], &mut out);
        out
    }
}

/// Длина имени в `DirEntry`, включая NUL / Name length in `DirEntry`, NUL included
pub const DIR_NAME_LEN: usize = 64;

/// Элемент каталога для `read_dir` / A `read_dir` directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DirEntry {
    /// Имя, дополненное нулями / NUL-padded name
    pub name:   [u8; DIR_NAME_LEN],
    pub size:   u64,
    pub is_dir: u64,
}

impl DirEntry {
    pub const SIZE: usize = core::mem::size_of::<DirEntry>();

    /// Имя обрезается до `DIR_NAME_LEN - 1` байт.
    /// The name is cut to `DIR_NAME_LEN - 1` bytes.
    pub fn new(name: &[u8], size: u64, is_dir: bool) -> Self {
        let mut padded = [0u8; DIR_NAME_LEN];
        let len = name.len().min(DIR_NAME_LEN - 1);
        padded[..len].copy_from_slice(&name[..len]);
        Self { name: padded, size, is_dir: u64::from(is_dir) }
    }

    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(DIR_NAME_LEN);
        &self.name[..len]
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..DIR_NAME_LEN].copy_from_slice(&self.name);
        out[DIR_NAME_LEN..DIR_NAME_LEN + 8].copy_from_slice(&self.size.to_le_bytes());
        out[DIR_NAME_LEN + 8..].copy_from_slice(&self.is_dir.to_le_bytes());
        out
    }
}

impl Default for DirEntry {
    fn default() -> Self {
        Self::new(&[], 0, false)
    }
}

/// Элемент argv для `exec` / One `exec` argv element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ArgSlice {
    pub ptr: u64,
    pub len: u64,
}

impl ArgSlice {
    pub const SIZE: usize = core::mem::size_of::<ArgSlice>();

    pub fn from_bytes(raw: [u8; Self::SIZE]) -> Self {
        let mut ptr = [0u8; 8];
        let mut len = [0u8; 8];
        ptr.copy_from_slice(&raw[..8]);
        len.copy_from_slice(&raw[8..]);
        Self { ptr: u64::from_le_bytes(ptr), len: u64::from_le_bytes(len) }
    }
}

/// Максимум аргументов `exec` / Maximum `exec` arguments
pub const MAX_ARGS: usize = 16;
