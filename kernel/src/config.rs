//! Конфигурация ядра / Kernel configuration
//!
//! Константы раскладки памяти + разбор командной строки Limine.
//! Memory layout constants + Limine command line parsing.
//!
//! Командная строка / Command line:
//!   log=<off|error|warn|info|debug|trace>  init=<path>  hz=<n>  fb=<0|1>

use log::LevelFilter;

pub const PAGE_SIZE: usize = 4096;

/// Записей в таблице любого уровня / Entries in a table of any level
pub const TABLE_ENTRIES: usize = 512;

/// Нижние 256 записей PML4 — пользовательские.
/// The lower 256 PML4 entries belong to user space.
pub const USER_HALF_ENTRIES: usize = TABLE_ENTRIES / 2;

/// Стек kernel-задачи / Kernel task stack
pub const KERNEL_TASK_STACK_SIZE: usize = PAGE_SIZE;

/// Стек ядра пользовательского процесса (4 страницы).
/// Kernel stack of a user process (4 pages).
pub const PROCESS_KERNEL_STACK_SIZE: usize = 4 * PAGE_SIZE;

pub const USER_STACK_TOP:  u64 = 0x0000_0007_0000_0000;
pub const USER_STACK_SIZE: u64 = 16 * 1024 * 1024;

/// Куда отображается framebuffer привилегированного процесса.
/// Where a privileged process sees the framebuffer.
pub const FRAMEBUFFER_USER_BASE: u64 = 0x0000_7E00_0000_0000;

/// Ёмкость почтового ящика / Mailbox capacity
pub const MAILBOX_CAPACITY: usize = 16;

/// Куча ядра вырезается из карты памяти до PMM.
/// The kernel heap is carved from the memory map before the PMM.
pub const KERNEL_HEAP_SIZE: usize = 8 * 1024 * 1024;

pub const DEFAULT_TIMER_HZ: u32 = 200;
pub const DEFAULT_INIT_PATH: &str = "/bin/init.elf";

/// Фиксированная раскладка адресов пользовательского процесса.
/// Fixed user virtual layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserLayout {
    pub stack_top:        u64,
    pub stack_size:       u64,
    pub framebuffer_base: u64,
}

impl Default for UserLayout {
    fn default() -> Self {
        Self {
            stack_top:        USER_STACK_TOP,
            stack_size:       USER_STACK_SIZE,
            framebuffer_base: FRAMEBUFFER_USER_BASE,
        }
    }
}

/// Параметры загрузки / Boot parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig<'a> {
    pub log_level:        LevelFilter,
    pub init:             &'a str,
    pub timer_hz:         u32,
    pub init_framebuffer: bool,
}

impl Default for BootConfig<'_> {
    fn default() -> Self {
        Self {
            log_level:        LevelFilter::Info,
            init:             DEFAULT_INIT_PATH,
            timer_hz:         DEFAULT_TIMER_HZ,
            init_framebuffer: true,
        }
    }
}

impl<'a> BootConfig<'a> {
    pub fn parse(cmdline: &'a str) -> Self {
        let mut cfg = Self::default();
        for word in cmdline.split_whitespace() {
            let Some((key, value)) = word.split_once('=') else {
                log::warn!("cmdline: ignoring '{}'", word);
                continue;
            };
            match key {
                "log" => match value.parse() {
                    Ok(level) => cfg.log_level = level,
                    Err(_)    => log::warn!("cmdline: bad log level '{}'", value),
                },
                "init" if !value.is_empty() => cfg.init = value,
                "hz" => match value.parse::<u32>() {
                    Ok(hz) if (19..=10_000).contains(&hz) => cfg.timer_hz = hz,
                    _ => log::warn!("cmdline: bad timer frequency '{}'", value),
                },
                "fb" => match value {
                    "0" => cfg.init_framebuffer = false,
                    "1" => cfg.init_framebuffer = true,
                    _   => log::warn!("cmdline: bad fb flag '{}'", value),
                },
                _ => log::warn!("cmdline: unknown key '{}'", key),
            }
        }
        cfg
    }
}
