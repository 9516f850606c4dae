//! Ошибки ядра / Kernel errors
//!
//! Нарушения инвариантов (кольцо задач, двойное освобождение) сюда не
//! попадают — это `panic!`.
//! Invariant violations (task ring, double free) never show up here:
//! they are `panic!`.

use core::fmt;

use libidp::abi::status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Нет кадров или памяти кучи / Out of frames or heap memory
    ResourceExhausted,
    /// Нет задачи с таким pid / No task with that pid
    NotFound,
    /// Почтовый ящик полон / Mailbox is full
    Full,
    /// Почтовый ящик пуст / Mailbox is empty
    Empty,
    /// Испорченный образ (ELF) / Broken image (ELF)
    Malformed,
    InvalidArgument,
    PermissionDenied,
}

impl Error {
    /// Код для `rax` / Status code for `rax`
    pub const fn status(self) -> i64 {
        match self {
            Error::NotFound          => status::NOT_FOUND,
            Error::Full              => status::FULL,
            Error::Empty             => status::EMPTY,
            Error::ResourceExhausted => status::NO_MEMORY,
            Error::InvalidArgument   => status::INVALID_ARGUMENT,
            Error::Malformed         => status::MALFORMED,
            Error::PermissionDenied  => status::PERMISSION_DENIED,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Error::ResourceExhausted => "out of physical frames or heap memory",
            Error::NotFound          => "no such task",
            Error::Full              => "mailbox full",
            Error::Empty             => "mailbox empty",
            Error::Malformed         => "malformed executable image",
            Error::InvalidArgument   => "invalid argument",
            Error::PermissionDenied  => "permission denied",
        };
        f.write_str(text)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
