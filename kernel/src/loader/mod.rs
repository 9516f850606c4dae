//! Загрузка исполняемых образов / Executable image loading
//!
//! Два шва / Two seams:
//!   `ImageLoader` — раскладывает образ в адресное пространство
//!                   lays an image out in an address space
//!   `FileSource`  — находит байты образа по пути
//!                   finds image bytes by path

pub mod elf;

use alloc::format;
use alloc::vec::Vec;

use libidp::abi::{DirEntry, FileStat, STAT_DIR};

use crate::mm::vmm::AddressSpace;
use crate::mm::{FrameSupplier, VirtAddr};
use crate::Result;

pub use elf::ElfLoader;

/// Результат загрузки / Load result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub entry:         VirtAddr,
    /// Выровненный конец последнего сегмента / Page-aligned end of the last segment
    pub program_break: VirtAddr,
}

pub trait ImageLoader {
    /// Отобразить сегменты `image` в `space`. При ошибке частично
    /// отображённые страницы остаются в `space`; их освобождает вызывающий.
    /// Map the segments of `image` into `space`. On error, partially mapped
    /// pages stay in `space` for the caller to free.
    fn load<F: FrameSupplier>(
        &self,
        frames: &mut F,
        space: &mut AddressSpace,
        image: &[u8],
    ) -> Result<LoadedImage>;
}

pub trait FileSource {
    fn open(&self, path: &str) -> Option<&[u8]>;

    /// Размер и тип; `None`, если пути нет.
    /// Size and kind; `None` if the path does not exist.
    fn stat(&self, path: &str) -> Option<FileStat>;

    /// Непосредственные потомки каталога `dir`; `None`, если это не каталог.
    /// Immediate children of `dir`; `None` if it is not a directory.
    fn list(&self, dir: &str) -> Option<Vec<DirEntry>>;
}

/// Модуль Limine / A Limine boot module
#[derive(Debug, Clone, Copy)]
pub struct BootModule {
    pub path: &'static str,
    pub data: &'static [u8],
}

/// Файлы — это модули загрузчика. Путь сравнивается без префикса
/// ресурса (`boot():`).
/// Files are bootloader modules. Paths compare without the resource
/// prefix (`boot():`).
#[derive(Debug, Default)]
pub struct BootModules {
    modules: Vec<BootModule>,
}

impl BootModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, module: BootModule) {
        log::info!("module: {} ({} bytes)", module.path, module.data.len());
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn strip_resource(path: &str) -> &str {
    path.split_once("):").map_or(path, |(_, rest)| rest)
}

impl FileSource for BootModules {
    fn open(&self, path: &str) -> Option<&[u8]> {
        let wanted = strip_resource(path);
        self.modules
            .iter()
            .find(|m| strip_resource(m.path) == wanted)
            .map(|m| m.data)
    }

    fn stat(&self, path: &str) -> Option<FileStat> {
        if let Some(data) = self.open(path) {
            return Some(FileStat { size: data.len() as u64, flags: 0 });
        }
        self.list(path).map(|_| FileStat { size: 0, flags: STAT_DIR })
    }

    fn list(&self, dir: &str) -> Option<Vec<DirEntry>> {
        let prefix = format!("{}/", strip_resource(dir).trim_end_matches('/'));
        let mut entries: Vec<DirEntry> = Vec::new();
        for module in &self.modules {
            let Some(rest) = strip_resource(module.path).strip_prefix(prefix.as_str()) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((name, _)) => DirEntry::new(name.as_bytes(), 0, true),
                None => DirEntry::new(rest.as_bytes(), module.data.len() as u64, false),
            };
            if !entry.name().is_empty() && !entries.iter().any(|e| e.name() == entry.name()) {
                entries.push(entry);
            }
        }
        (!entries.is_empty()).then_some(entries)
    }
}
