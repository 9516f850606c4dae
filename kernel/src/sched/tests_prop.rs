//! Свойства кольца на случайных последовательностях операций
//! Ring properties over random operation sequences
//!
//!   - кольцо не пусто, текущая задача в кольце / the ring is never empty and holds current
//!   - длина кольца = число живых / ring length equals the live count
//!   - pid уникальны и растут / pids are unique and increasing
//!   - после выхода всех кадры возвращаются / frames come back once everything exits
//!   - ящики FIFO, `Full` ровно на 16, `NotFound` ровно для чужих pid
//!     mailboxes are FIFO, `Full` exactly at 16, `NotFound` exactly for absent pids

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use super::{Pid, Scheduler, TaskKind};
use crate::config::{UserLayout, MAILBOX_CAPACITY};
use crate::ipc::Message;
use crate::loader::ElfLoader;
use crate::mm::vmm::AddressSpace;
use crate::mm::{FrameSupplier, PAGE_SIZE};
use crate::testing::{tiny_elf, HostFrames, RecordingCpu};
use crate::Error;

#[derive(Debug, Clone, Copy)]
enum Op {
    SpawnKernel,
    SpawnUser,
    Schedule,
    Exit,
    Send(u64),
    Recv,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::SpawnKernel),
        2 => Just(Op::SpawnUser),
        4 => Just(Op::Schedule),
        2 => Just(Op::Exit),
        3 => (0u64..8).prop_map(Op::Send),
        2 => Just(Op::Recv),
    ]
}

/// Ожидаемое содержимое ящиков / Expected mailbox contents
#[derive(Default)]
struct Mail {
    boxes: BTreeMap<Pid, VecDeque<Message>>,
    seq:   u64,
}

struct World {
    frames: HostFrames,
    cpu:    RecordingCpu,
    sched:  Scheduler,
    mail:   Mail,
}

fn setup() -> World {
    let mut frames = HostFrames::new();
    let master = AddressSpace::new(&mut frames).unwrap();
    let cpu = RecordingCpu { root: master.root(), ..RecordingCpu::default() };
    let layout = UserLayout { stack_size: PAGE_SIZE as u64, ..UserLayout::default() };
    World { frames, cpu, sched: Scheduler::with_layout(master, layout), mail: Mail::default() }
}

fn apply(op: Op, w: &mut World) -> Result<(), TestCaseError> {
    let World { frames, cpu, sched, mail } = w;
    match op {
        Op::SpawnKernel => {
            sched.spawn_kernel_task(frames, 0xFFFF_FFFF_8000_0000).unwrap();
        }
        Op::SpawnUser => {
            sched.spawn_user_process(frames, &ElfLoader, &tiny_elf(), &[b"p"], None).unwrap();
        }
        Op::Schedule => {
            sched.schedule(frames, cpu, 0);
        }
        Op::Exit => {
            // Корень не выходит никогда / The root never exits
            if sched.current().kind() != TaskKind::Root {
                mail.boxes.remove(&sched.current_pid());
                sched.exit_current(cpu);
            }
        }
        Op::Send(dest) => {
            let dest = Pid(dest);
            let queued = sched.task(dest).map(|t| t.mailbox().len());
            mail.seq += 1;
            let data = [mail.seq, dest.0, 0];
            let result = sched.send(dest, 1, data);
            match queued {
                None => prop_assert_eq!(result, Err(Error::NotFound)),
                Some(MAILBOX_CAPACITY) => prop_assert_eq!(result, Err(Error::Full)),
                Some(_) => {
                    prop_assert_eq!(result, Ok(()));
                    let msg = Message::new(sched.current_pid().0, 1, data);
                    mail.boxes.entry(dest).or_default().push_back(msg);
                }
            }
        }
        Op::Recv => {
            let expected = mail
                .boxes
                .get_mut(&sched.current_pid())
                .and_then(VecDeque::pop_front)
                .ok_or(Error::Empty);
            prop_assert_eq!(sched.recv(), expected);
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn ring_stays_consistent(ops in proptest::collection::vec(arb_op(), 1..64)) {
        let mut w = setup();
        for op in ops {
            apply(op, &mut w)?;

            let ring: Vec<Pid> = w.sched.ring().map(|t| t.pid()).collect();
            prop_assert!(!ring.is_empty());
            prop_assert_eq!(ring.len(), w.sched.len());
            prop_assert_eq!(ring[0], w.sched.current_pid());
            prop_assert!(ring.contains(&Pid::ROOT));

            let mut sorted = ring.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), ring.len());

            for task in w.sched.ring() {
                let expected = w.mail.boxes.get(&task.pid()).map_or(0, VecDeque::len);
                prop_assert_eq!(task.mailbox().len(), expected);
            }
        }
    }

    #[test]
    fn everything_exits_back_to_baseline(ops in proptest::collection::vec(arb_op(), 1..48)) {
        let mut w = setup();
        let baseline = w.frames.used_frames();
        for op in ops {
            apply(op, &mut w)?;
        }
        let World { frames, cpu, sched, .. } = &mut w;
        while sched.len() > 1 {
            if sched.current_pid() == Pid::ROOT {
                sched.schedule(frames, cpu, 0);
            }
            sched.exit_current(cpu);
        }
        sched.schedule(frames, cpu, 0);
        prop_assert_eq!(sched.pending_reclaim(), 0);
        prop_assert_eq!(frames.used_frames(), baseline);
        prop_assert_eq!(cpu.root, sched.master().root());
    }

    #[test]
    fn rotation_visits_every_task_once(spawns in 0usize..12) {
        let World { mut frames, mut cpu, mut sched, .. } = setup();
        for _ in 0..spawns {
            sched.spawn_kernel_task(&mut frames, 0xFFFF_FFFF_8000_0000).unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..sched.len() {
            sched.schedule(&mut frames, &mut cpu, 0);
            seen.push(sched.current_pid().0);
        }
        let mut expected: Vec<u64> = (1..=spawns as u64).collect();
        expected.push(0);
        prop_assert_eq!(seen, expected);
    }
}
