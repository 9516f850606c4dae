//! Virtual Memory Manager
//!
//! Управляет адресными пространствами задач.
//! Manages per-task virtual address spaces.
//!
//! Структура: PML4 → PDPT → PD → PT → физический адрес
//! Structure:  PML4 → PDPT → PD → PT → physical address
//!
//! Верхняя половина PML4 (записи 256–511) копируется из мастер-таблицы ядра
//! *по значению* при создании процесса. Последующие изменения в мастере в
//! уже созданные процессы не попадают.
//! The upper half of the PML4 (entries 256–511) is copied from the kernel
//! master *by value* when a process is created. Later changes to the master
//! do not reach processes that already exist.

use core::ops::Range;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use super::{phys_to_virt, zero_frame, FrameSupplier, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::arch::{self, Cpu};
use crate::config::{TABLE_ENTRIES, USER_HALF_ENTRIES};
use crate::{Error, Result};

bitflags! {
    /// Флаги страницы / Page flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const HUGE          = 1 << 7;
        /// Программный бит: кадр не принадлежит этому пространству
        /// (framebuffer, принятая общая память).
        /// Software bit: the frame is not owned by this space
        /// (framebuffer, received shared memory).
        const BORROWED      = 1 << 9;
        const NO_EXECUTE    = 1 << 63;
    }
}

/// Флаги промежуточных таблиц / Flags of intermediate tables
const TABLE_FLAGS: PageFlags = PageFlags::PRESENT
    .union(PageFlags::WRITABLE)
    .union(PageFlags::USER);

const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Конец пользовательской (нижней) половины / End of the user (lower) half
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Лежит ли `[addr, addr + len)` целиком в нижней половине.
/// Whether `[addr, addr + len)` lies entirely in the lower half.
pub fn is_user_range(addr: u64, len: u64) -> bool {
    match addr.checked_add(len) {
        Some(end) => end <= USER_SPACE_END,
        None      => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u64);

impl Entry {
    pub const fn empty() -> Self { Self(0) }

    pub fn new(addr: PhysAddr, flags: PageFlags) -> Self {
        Self((addr.0 & ADDR_MASK) | flags.bits())
    }

    pub const fn raw(self) -> u64 { self.0 }

    pub fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    pub fn addr(self) -> PhysAddr {
        PhysAddr(self.0 & ADDR_MASK)
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_retain(self.0 & !ADDR_MASK)
    }
}

/// Таблица любого уровня — 512 записей, ровно одна страница.
/// A table of any level: 512 entries, exactly one page.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [Entry; TABLE_ENTRIES],
}

const_assert_eq!(core::mem::size_of::<PageTable>(), PAGE_SIZE);

/// Уровень иерархии / Hierarchy level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Top,
    DirectoryPointer,
    Directory,
    Table,
}

impl Level {
    const fn shift(self) -> u64 {
        match self {
            Level::Top              => 39,
            Level::DirectoryPointer => 30,
            Level::Directory        => 21,
            Level::Table            => 12,
        }
    }

    pub const fn index(self, va: VirtAddr) -> usize {
        ((va.0 >> self.shift()) & 0x1FF) as usize
    }

    pub const fn next(self) -> Option<Level> {
        match self {
            Level::Top              => Some(Level::DirectoryPointer),
            Level::DirectoryPointer => Some(Level::Directory),
            Level::Directory        => Some(Level::Table),
            Level::Table            => None,
        }
    }

    /// Записи, которые принадлежат пользователю на этом уровне.
    /// Entries owned by user space at this level.
    const fn user_entries(self) -> Range<usize> {
        match self {
            Level::Top => 0..USER_HALF_ENTRIES,
            _          => 0..TABLE_ENTRIES,
        }
    }
}

/// # Safety
/// `frame` must hold a page table reachable through the HHDM, and the caller
/// must not hold another reference to the same table.
unsafe fn table_mut<'a>(frame: PhysAddr) -> &'a mut PageTable {
    unsafe { &mut *phys_to_virt(frame).as_mut_ptr::<PageTable>() }
}

/// Адресное пространство: владеет корневой таблицей и всеми
/// промежуточными таблицами своей нижней половины.
/// An address space: owns its root table and every intermediate table in
/// its lower half.
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    root: PhysAddr,
}

impl AddressSpace {
    /// Пустая корневая таблица / Empty root table
    pub fn new<F: FrameSupplier>(frames: &mut F) -> Result<Self> {
        let root = frames.alloc_frame().ok_or(Error::ResourceExhausted)?;
        unsafe { zero_frame(root) };
        Ok(Self { root })
    }

    /// Новое пространство процесса: копия верхней половины мастера.
    /// New process space: copy of the master's upper half.
    pub fn new_process<F: FrameSupplier>(frames: &mut F, master: &AddressSpace) -> Result<Self> {
        let space = Self::new(frames)?;
        let (src, dst) = unsafe { (table_mut(master.root), table_mut(space.root)) };
        dst.entries[USER_HALF_ENTRIES..].copy_from_slice(&src.entries[USER_HALF_ENTRIES..]);
        Ok(space)
    }

    /// Мастер ядра из таблиц загрузчика: все присутствующие записи PML4.
    /// Kernel master from the bootloader's tables: every present PML4 entry.
    ///
    /// # Safety
    /// `boot_root` must be the physical address of a live PML4.
    pub unsafe fn clone_boot<F: FrameSupplier>(frames: &mut F, boot_root: PhysAddr) -> Result<Self> {
        let space = Self::new(frames)?;
        let (src, dst) = unsafe { (table_mut(boot_root), table_mut(space.root)) };
        for (to, from) in dst.entries.iter_mut().zip(src.entries.iter()) {
            if from.is_present() {
                *to = *from;
            }
        }
        Ok(space)
    }

    pub fn root(&self) -> PhysAddr {
        self.root
    }

    /// Запись PML4 (для проверок) / A PML4 entry (for inspection)
    pub fn top_entry(&self, index: usize) -> Entry {
        unsafe { table_mut(self.root) }.entries[index]
    }

    /// Лист для `va`, строя недостающие таблицы.
    /// Leaf for `va`, building missing tables on the way.
    fn leaf_or_create<F: FrameSupplier>(&mut self, frames: &mut F, va: VirtAddr) -> Result<&mut Entry> {
        let mut table = unsafe { table_mut(self.root) };
        let mut level = Level::Top;
        while let Some(child) = level.next() {
            let entry = &mut table.entries[level.index(va)];
            if !entry.is_present() {
                let frame = frames.alloc_frame().ok_or(Error::ResourceExhausted)?;
                unsafe { zero_frame(frame) };
                *entry = Entry::new(frame, TABLE_FLAGS);
            } else if entry.flags().contains(PageFlags::HUGE) {
                return Err(Error::InvalidArgument);
            }
            table = unsafe { table_mut(entry.addr()) };
            level = child;
        }
        Ok(&mut table.entries[Level::Table.index(va)])
    }

    /// Лист для `va` без выделения; `None`, если таблицы нет.
    /// Leaf for `va` without allocating; `None` if a table is missing.
    fn leaf_mut(&mut self, va: VirtAddr) -> Option<&mut Entry> {
        let mut table = unsafe { table_mut(self.root) };
        let mut level = Level::Top;
        while let Some(child) = level.next() {
            let entry = table.entries[level.index(va)];
            if !entry.is_present() || entry.flags().contains(PageFlags::HUGE) {
                return None;
            }
            table = unsafe { table_mut(entry.addr()) };
            level = child;
        }
        Some(&mut table.entries[Level::Table.index(va)])
    }

    fn leaf(&self, va: VirtAddr) -> Option<Entry> {
        let mut table: &PageTable = unsafe { table_mut(self.root) };
        let mut level = Level::Top;
        while let Some(child) = level.next() {
            let entry = table.entries[level.index(va)];
            if !entry.is_present() || entry.flags().contains(PageFlags::HUGE) {
                return None;
            }
            table = unsafe { table_mut(entry.addr()) };
            level = child;
        }
        Some(table.entries[Level::Table.index(va)])
    }

    /// Отобразить страницу `va` → `pa`. Повторный вызов перезаписывает.
    /// Map page `va` → `pa`. Mapping again overwrites.
    pub fn map<F: FrameSupplier>(
        &mut self,
        frames: &mut F,
        va: VirtAddr,
        pa: PhysAddr,
        flags: PageFlags,
    ) -> Result<()> {
        let leaf = self.leaf_or_create(frames, va)?;
        *leaf = Entry::new(pa, flags | PageFlags::PRESENT);
        arch::flush_page(va);
        Ok(())
    }

    /// Выделить обнулённый кадр и отобразить его в `va`.
    /// Allocate a zeroed frame and map it at `va`.
    pub fn map_fresh<F: FrameSupplier>(
        &mut self,
        frames: &mut F,
        va: VirtAddr,
        flags: PageFlags,
    ) -> Result<PhysAddr> {
        let frame = frames.alloc_frame().ok_or(Error::ResourceExhausted)?;
        unsafe { zero_frame(frame) };
        if let Err(err) = self.map(frames, va, frame, flags) {
            frames.free_frame(frame);
            return Err(err);
        }
        Ok(frame)
    }

    /// Снять отображение, кадр не трогать. Возвращает бывший кадр.
    /// Drop the mapping, keep the frame. Returns the former frame.
    pub fn unmap(&mut self, va: VirtAddr) -> Option<PhysAddr> {
        let leaf = self.leaf_mut(va)?;
        if !leaf.is_present() {
            return None;
        }
        let frame = leaf.addr();
        *leaf = Entry::empty();
        arch::flush_page(va);
        Some(frame)
    }

    /// Снять отображение и вернуть кадр поставщику (кроме заимствованных).
    /// Drop the mapping and return the frame to the supplier (unless borrowed).
    pub fn unmap_and_free<F: FrameSupplier>(&mut self, frames: &mut F, va: VirtAddr) -> Option<PhysAddr> {
        let borrowed = self.flags(va)?.contains(PageFlags::BORROWED);
        let frame = self.unmap(va)?;
        if !borrowed {
            frames.free_frame(frame);
        }
        Some(frame)
    }

    /// Трансляция без выделения / Translate without allocating
    pub fn lookup(&self, va: VirtAddr) -> Option<PhysAddr> {
        let leaf = self.leaf(va)?;
        leaf.is_present().then(|| PhysAddr(leaf.addr().0 + va.page_offset()))
    }

    pub fn flags(&self, va: VirtAddr) -> Option<PageFlags> {
        let leaf = self.leaf(va)?;
        leaf.is_present().then(|| leaf.flags())
    }

    /// Загрузить это пространство в CR3. Только при выключенных прерываниях.
    /// Load this space into CR3. Only with interrupts suppressed.
    pub fn switch<C: Cpu>(&self, cpu: &mut C) {
        cpu.load_root(self.root);
    }

    /// Освободить всю нижнюю половину: листовые кадры и таблицы.
    /// Верхняя половина не читается и не пишется.
    /// Free the whole lower half: leaf frames and tables.
    /// The upper half is never read or written.
    pub fn destroy_user_half<F: FrameSupplier>(&mut self, frames: &mut F) {
        release(frames, self.root, Level::Top);
    }

    /// Разрушить пространство целиком (нижняя половина + корень).
    /// Destroy the space entirely (lower half + root).
    pub fn destroy<F: FrameSupplier>(mut self, frames: &mut F) {
        self.destroy_user_half(frames);
        frames.free_frame(self.root);
    }

    /// Прочитать память пространства через HHDM.
    /// Read the space's memory through the HHDM.
    pub fn read_bytes(&self, va: VirtAddr, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let at = va.offset(done as u64);
            let pa = self.lookup(at).ok_or(Error::InvalidArgument)?;
            let chunk = (PAGE_SIZE - at.page_offset() as usize).min(buf.len() - done);
            let src = phys_to_virt(pa).as_mut_ptr::<u8>();
            unsafe { core::ptr::copy_nonoverlapping(src, buf[done..].as_mut_ptr(), chunk) };
            done += chunk;
        }
        Ok(())
    }

    /// Записать в память пространства через HHDM.
    /// Write into the space's memory through the HHDM.
    pub fn write_bytes(&mut self, va: VirtAddr, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let at = va.offset(done as u64);
            let pa = self.lookup(at).ok_or(Error::InvalidArgument)?;
            let chunk = (PAGE_SIZE - at.page_offset() as usize).min(data.len() - done);
            let dst = phys_to_virt(pa).as_mut_ptr::<u8>();
            unsafe { core::ptr::copy_nonoverlapping(data[done..].as_ptr(), dst, chunk) };
            done += chunk;
        }
        Ok(())
    }
}

/// Рекурсивный спуск по пользовательской части `table`.
/// Recursive descent over the user part of `table`.
fn release<F: FrameSupplier>(frames: &mut F, table: PhysAddr, level: Level) {
    let table = unsafe { table_mut(table) };
    for entry in &mut table.entries[level.user_entries()] {
        if !entry.is_present() {
            continue;
        }
        match level.next() {
            Some(child) => {
                release(frames, entry.addr(), child);
                frames.free_frame(entry.addr());
            }
            None if entry.flags().contains(PageFlags::BORROWED) => {}
            None => frames.free_frame(entry.addr()),
        }
        *entry = Entry::empty();
    }
}
