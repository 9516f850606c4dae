//! ELF64 загрузчик (x86_64, ET_EXEC, без релокаций)
//! ELF64 loader (x86_64, ET_EXEC, no relocation)
//!
//! Каждый PT_LOAD отображается по своему p_vaddr постранично в свежие
//! обнулённые кадры; хвост BSS остаётся нулём.
//! Each PT_LOAD is mapped at its p_vaddr page by page into fresh zeroed
//! frames; the BSS tail stays zero.

use super::{ImageLoader, LoadedImage};
use crate::mm::vmm::{is_user_range, AddressSpace, PageFlags};
use crate::mm::{align_down, align_up, FrameSupplier, VirtAddr, PAGE_SIZE};
use crate::{Error, Result};

const EHDR_SIZE:  usize = 64;
const PHDR_SIZE:  usize = 56;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC:    u16 = 2;
const EM_X86_64:  u16 = 62;
const PT_LOAD:    u32 = 1;
const PF_X:       u32 = 1;
const PF_W:       u32 = 2;

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&b[at..at + 4]);
    u32::from_le_bytes(w)
}

fn le_u64(b: &[u8], at: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(w)
}

/// Разобранный PT_LOAD / A parsed PT_LOAD
#[derive(Debug, Clone, Copy)]
struct Segment {
    flags:  u32,
    offset: usize,
    vaddr:  u64,
    filesz: usize,
    memsz:  u64,
}

impl Segment {
    fn runs(&self, va: u64) -> bool {
        self.flags & PF_X != 0 && va >= self.vaddr && va - self.vaddr < self.memsz
    }

    fn page_flags(&self) -> PageFlags {
        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if self.flags & PF_W != 0 {
            flags |= PageFlags::WRITABLE;
        }
        if self.flags & PF_X == 0 {
            flags |= PageFlags::NO_EXECUTE;
        }
        flags
    }
}

struct Header {
    entry: u64,
    phoff: usize,
    phnum: usize,
}

fn parse_header(image: &[u8]) -> Result<Header> {
    if image.len() < EHDR_SIZE || &image[0..4] != b"\x7FELF" {
        return Err(Error::Malformed);
    }
    if image[4] != ELFCLASS64 || image[5] != ELFDATA2LSB {
        return Err(Error::Malformed);
    }
    if le_u16(image, 16) != ET_EXEC || le_u16(image, 18) != EM_X86_64 {
        return Err(Error::Malformed);
    }
    if le_u16(image, 54) as usize != PHDR_SIZE {
        return Err(Error::Malformed);
    }
    let phoff = usize::try_from(le_u64(image, 32)).map_err(|_| Error::Malformed)?;
    let phnum = le_u16(image, 56) as usize;
    let table_end = phnum
        .checked_mul(PHDR_SIZE)
        .and_then(|len| len.checked_add(phoff))
        .ok_or(Error::Malformed)?;
    if table_end > image.len() {
        return Err(Error::Malformed);
    }
    let entry = le_u64(image, 24);
    if !is_user_range(entry, 1) {
        return Err(Error::Malformed);
    }
    Ok(Header { entry, phoff, phnum })
}

fn parse_segment(image: &[u8], at: usize) -> Result<Option<Segment>> {
    if le_u32(image, at) != PT_LOAD {
        return Ok(None);
    }
    let seg = Segment {
        flags:  le_u32(image, at + 4),
        offset: usize::try_from(le_u64(image, at + 8)).map_err(|_| Error::Malformed)?,
        vaddr:  le_u64(image, at + 16),
        filesz: usize::try_from(le_u64(image, at + 32)).map_err(|_| Error::Malformed)?,
        memsz:  le_u64(image, at + 40),
    };
    let file_end = seg.offset.checked_add(seg.filesz).ok_or(Error::Malformed)?;
    if file_end > image.len() || seg.filesz as u64 > seg.memsz {
        return Err(Error::Malformed);
    }
    if !is_user_range(seg.vaddr, seg.memsz) {
        return Err(Error::Malformed);
    }
    Ok(Some(seg))
}

/// Загрузчик ELF без состояния / Stateless ELF loader
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfLoader;

impl ImageLoader for ElfLoader {
    fn load<F: FrameSupplier>(
        &self,
        frames: &mut F,
        space: &mut AddressSpace,
        image: &[u8],
    ) -> Result<LoadedImage> {
        let header = parse_header(image)?;
        let mut highest = None::<u64>;
        let mut entry_runs = false;

        for i in 0..header.phnum {
            let Some(seg) = parse_segment(image, header.phoff + i * PHDR_SIZE)? else {
                continue;
            };
            entry_runs |= seg.runs(header.entry);
            let flags = seg.page_flags();
            let end = seg.vaddr + seg.memsz;

            let mut page = align_down(seg.vaddr);
            while page < end {
                let va = VirtAddr(page);
                match space.flags(va) {
                    // Страница общая с предыдущим сегментом: права объединяются.
                    // Page shared with a previous segment: permissions merge.
                    Some(old) => {
                        let Some(frame) = space.lookup(va) else {
                            return Err(Error::Malformed);
                        };
                        let mut merged = (old | flags) - PageFlags::NO_EXECUTE;
                        if old.contains(PageFlags::NO_EXECUTE) && flags.contains(PageFlags::NO_EXECUTE) {
                            merged |= PageFlags::NO_EXECUTE;
                        }
                        space.map(frames, va, frame, merged)?;
                    }
                    None => {
                        space.map_fresh(frames, va, flags)?;
                    }
                }
                page += PAGE_SIZE as u64;
            }

            let bytes = &image[seg.offset..seg.offset + seg.filesz];
            space.write_bytes(VirtAddr(seg.vaddr), bytes)?;
            highest = Some(highest.map_or(end, |h| h.max(end)));
        }

        let Some(highest) = highest else {
            return Err(Error::Malformed);
        };
        // Вход обязан лежать в исполняемом сегменте / The entry must be in an executable segment
        if !entry_runs {
            log::warn!("elf: entry {:#x} is outside every executable segment", header.entry);
            return Err(Error::Malformed);
        }
        let loaded = LoadedImage {
            entry:         VirtAddr(header.entry),
            program_break: VirtAddr(align_up(highest)),
        };
        log::debug!(
            "elf: entry {:#x}, break {:#x}",
            loaded.entry.0,
            loaded.program_break.0
        );
        Ok(loaded)
    }
}
