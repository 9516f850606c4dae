//! Scheduler — круговой round-robin
//! Scheduler — circular round-robin
//!
//! Все живые задачи образуют кольцо. Один вызов `schedule` на тик таймера:
//!   1. освободить зомби / reclaim zombies
//!   2. сохранить sp текущей / save the current task's sp
//!   3. current = current.next (строгий FIFO, без приоритетов / no priorities)
//!   4. TSS.rsp0 + CR3 новой задачи / TSS.rsp0 + CR3 of the new task
//!   5. вернуть её sp / return its sp
//!
//! Кольцо — арена `Vec<Option<Task>>` со ссылками-индексами. Задача с pid 0
//! (корневая) существует всегда, поэтому кольцо никогда не пусто.
//! The ring is a `Vec<Option<Task>>` arena with index links. The root task
//! (pid 0) always exists, so the ring is never empty.
//!
//! Новая задача встаёт сразу после якоря, и якорь переходит на неё:
//! порядок обхода совпадает с порядком создания.
//! A new task is linked right after the anchor, and the anchor moves onto
//! it: rotation order matches creation order.

mod memory;
mod process;
pub mod task;

#[cfg(test)]
mod tests_prop;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

pub use memory::Backing;
pub use process::Framebuffer;
pub use task::{KernelStack, Pid, Task, TaskKind};

use task::SlotId;

use crate::arch::Cpu;
use crate::config::UserLayout;
use crate::ipc::Message;
use crate::mm::vmm::AddressSpace;
use crate::mm::FrameSupplier;
use crate::{Error, Result};

pub struct Scheduler {
    slots:      Vec<Option<Task>>,
    free_slots: Vec<SlotId>,
    current:    SlotId,
    anchor:     SlotId,
    live:       usize,
    next_pid:   u64,
    zombies:    VecDeque<Task>,
    master:     AddressSpace,
    layout:     UserLayout,
}

impl Scheduler {
    /// Кольцо из одной корневой задачи. `master` — таблицы ядра.
    /// A ring holding only the root task. `master` is the kernel's tables.
    pub fn new(master: AddressSpace) -> Self {
        Self::with_layout(master, UserLayout::default())
    }

    pub fn with_layout(master: AddressSpace, layout: UserLayout) -> Self {
        let mut slots = Vec::new();
        slots.push(Some(task::Task::root()));
        log::info!("sched: root task 0 created");
        Self {
            slots,
            free_slots: Vec::new(),
            current:    SlotId(0),
            anchor:     SlotId(0),
            live:       1,
            next_pid:   1,
            zombies:    VecDeque::new(),
            master,
            layout,
        }
    }

    pub fn master(&self) -> &AddressSpace {
        &self.master
    }

    pub fn layout(&self) -> &UserLayout {
        &self.layout
    }

    /// Задач в кольце / Tasks in the ring
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Зомби, ждущие освобождения / Zombies awaiting reclamation
    pub fn pending_reclaim(&self) -> usize {
        self.zombies.len()
    }

    pub fn current(&self) -> &Task {
        self.slot(self.current)
    }

    pub(crate) fn current_mut(&mut self) -> &mut Task {
        self.slot_mut(self.current)
    }

    pub fn current_pid(&self) -> Pid {
        self.current().pid
    }

    /// Обход кольца, начиная с текущей задачи.
    /// Walk the ring starting at the current task.
    pub fn ring(&self) -> Ring<'_> {
        Ring { sched: self, at: self.current, left: self.live }
    }

    /// Линейный поиск по кольцу / Linear ring scan
    pub fn task(&self, pid: Pid) -> Option<&Task> {
        self.ring().find(|t| t.pid == pid)
    }

    pub fn task_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        let id = self.find_slot(pid)?;
        Some(self.slot_mut(id))
    }

    pub(crate) fn find_slot(&self, pid: Pid) -> Option<SlotId> {
        let mut at = self.current;
        for _ in 0..self.live {
            let task = self.slot(at);
            if task.pid == pid {
                return Some(at);
            }
            at = task.next;
        }
        None
    }

    fn slot(&self, id: SlotId) -> &Task {
        match self.slots.get(id.0) {
            Some(Some(task)) => task,
            _ => {
                log::error!("sched: ring link to empty slot {}", id.0);
                panic!("sched: ring corrupt (slot {})", id.0);
            }
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut Task {
        match self.slots.get_mut(id.0) {
            Some(Some(task)) => task,
            _ => {
                log::error!("sched: ring link to empty slot {}", id.0);
                panic!("sched: ring corrupt (slot {})", id.0);
            }
        }
    }

    /// Две разные задачи сразу / Two distinct tasks at once
    pub(crate) fn pair_mut(&mut self, a: SlotId, b: SlotId) -> (&mut Task, &mut Task) {
        assert_ne!(a, b, "sched: pair_mut on one slot");
        let (lo, hi) = if a.0 < b.0 { (a.0, b.0) } else { (b.0, a.0) };
        let (left, right) = self.slots.split_at_mut(hi);
        let (Some(low), Some(high)) = (left[lo].as_mut(), right[0].as_mut()) else {
            panic!("sched: ring corrupt (slots {} and {})", lo, hi);
        };
        if a.0 < b.0 { (low, high) } else { (high, low) }
    }

    // ── Вставка / Insertion ──────────────────────────────────────────────────

    /// Зарезервировать всё, что понадобится `link` и выходу задачи, чтобы
    /// после выделения кадров вставка уже не могла провалиться.
    /// Reserve everything `link` and the task's later exit will need, so the
    /// insertion cannot fail once frames are allocated.
    pub(crate) fn reserve(&mut self) -> Result<()> {
        let reserved = if self.free_slots.is_empty() { self.slots.try_reserve(1) } else { Ok(()) };
        reserved
            .and_then(|()| self.free_slots.try_reserve(self.slots.len() + 1 - self.free_slots.len()))
            .and_then(|()| self.zombies.try_reserve(self.live + 1))
            .map_err(|_| {
                log::warn!("sched: no heap for another task record");
                Error::ResourceExhausted
            })
    }

    /// Связать задачу после якоря; присвоить pid. Требует `reserve`.
    /// Link a task after the anchor and assign its pid. Requires `reserve`.
    pub(crate) fn link(&mut self, mut task: Task) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        task.pid = pid;
        task.next = self.slot(self.anchor).next;

        let id = match self.free_slots.pop() {
            Some(id) => {
                self.slots[id.0] = Some(task);
                id
            }
            None => {
                self.slots.push(Some(task));
                SlotId(self.slots.len() - 1)
            }
        };
        self.slot_mut(self.anchor).next = id;
        self.anchor = id;
        self.live += 1;
        pid
    }

    // ── Планирование / Scheduling ────────────────────────────────────────────

    /// Тик таймера: вернуть sp следующей задачи. Только при выключенных
    /// прерываниях.
    /// Timer tick: return the next task's sp. Interrupts must be off.
    pub fn schedule<F: FrameSupplier, C: Cpu>(
        &mut self,
        frames: &mut F,
        cpu: &mut C,
        interrupted_sp: u64,
    ) -> u64 {
        self.reclaim(frames, cpu);

        let leaving = self.current;
        self.slot_mut(leaving).saved_sp = interrupted_sp;
        self.current = self.slot(leaving).next;

        let next = self.slot(self.current);
        cpu.set_kernel_stack(next.kernel_stack_top);
        if let Some(space) = &next.space {
            if space.root() != cpu.active_root() {
                space.switch(cpu);
            }
        }
        log::trace!("sched: switch to {}", next.pid);
        next.saved_sp
    }

    /// Освободить всех зомби: стек, нижнюю половину, корень, запись.
    /// Reclaim every zombie: stack, lower half, root, record.
    pub fn reclaim<F: FrameSupplier, C: Cpu>(&mut self, frames: &mut F, cpu: &mut C) {
        while let Some(zombie) = self.zombies.pop_front() {
            let Task { pid, space, kernel_stack, .. } = zombie;
            if let Some(space) = space {
                if space.root() == cpu.active_root() {
                    self.master.switch(cpu);
                }
                space.destroy(frames);
            }
            drop(kernel_stack);
            log::debug!("sched: reclaimed task {}", pid);
        }
    }

    /// Убрать текущую задачу из кольца и перейти к следующей. Возвращает
    /// sp преемника для `trap_return`. Ресурсы освободит следующий `schedule`.
    /// Unlink the current task and move to its successor. Returns the
    /// successor's sp for `trap_return`. The next `schedule` frees resources.
    pub fn exit_current<C: Cpu>(&mut self, cpu: &mut C) -> u64 {
        let exiting = self.current;
        if self.slot(exiting).kind == TaskKind::Root {
            log::error!("sched: the root task tried to exit");
            panic!("sched: the root task cannot be unlinked");
        }
        let successor = self.slot(exiting).next;
        if successor == exiting {
            log::error!("sched: the last task tried to exit");
            panic!("sched: cannot unlink the last task");
        }

        let pred = self.predecessor(exiting);
        self.slot_mut(pred).next = successor;
        if self.anchor == exiting {
            self.anchor = pred;
        }

        let Some(task) = self.slots[exiting.0].take() else {
            panic!("sched: ring corrupt (slot {})", exiting.0);
        };
        self.free_slots.push(exiting);
        self.live -= 1;
        log::info!("sched: task {} exited", task.pid);
        self.zombies.push_back(task);

        self.current = successor;
        let next = self.slot(successor);
        cpu.set_kernel_stack(next.kernel_stack_top);
        // Пространство зомби больше не должно быть активным.
        // The zombie's space must no longer be active.
        let root = next.space.as_ref().unwrap_or(&self.master).root();
        if root != cpu.active_root() {
            cpu.load_root(root);
        }
        next.saved_sp
    }

    fn predecessor(&self, id: SlotId) -> SlotId {
        let mut at = self.slot(id).next;
        for _ in 0..self.live {
            let next = self.slot(at).next;
            if next == id {
                return at;
            }
            at = next;
        }
        log::error!("sched: slot {} is not reachable from its own ring", id.0);
        panic!("sched: ring corrupt (no predecessor for slot {})", id.0);
    }

    // ── IPC ──────────────────────────────────────────────────────────────────

    /// Положить сообщение в ящик `dest`. Отправитель — всегда текущая задача.
    /// Queue a message for `dest`. The sender is always the current task.
    pub fn send(&mut self, dest: Pid, kind: u64, data: [u64; 3]) -> Result<()> {
        let sender = self.current_pid();
        let task = self.task_mut(dest).ok_or(Error::NotFound)?;
        task.mailbox.push(Message::new(sender.0, kind, data))
    }

    /// Забрать старейшее сообщение текущей задачи.
    /// Take the current task's oldest message.
    pub fn recv(&mut self) -> Result<Message> {
        self.current_mut().mailbox.pop()
    }
}

/// Итератор по кольцу / Ring iterator
pub struct Ring<'a> {
    sched: &'a Scheduler,
    at:    SlotId,
    left:  usize,
}

impl<'a> Iterator for Ring<'a> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<&'a Task> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        let task = self.sched.slot(self.at);
        self.at = task.next;
        Some(task)
    }
}
