//! IPC — почтовый ящик задачи
//! IPC — per-task mailbox
//!
//! Кольцевой буфер на `MAILBOX_CAPACITY` сообщений, строгий FIFO.
//! Переполнение — `Full`, без блокировки и без буферизации сверх ёмкости.
//! A ring buffer of `MAILBOX_CAPACITY` messages, strict FIFO.
//! Overflow is `Full`: no blocking, no buffering beyond capacity.

pub use libidp::abi::Message;

use crate::config::MAILBOX_CAPACITY;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Mailbox {
    slots: [Message; MAILBOX_CAPACITY],
    head:  usize,
    tail:  usize,
    count: usize,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            slots: [Message::new(0, 0, [0; 3]); MAILBOX_CAPACITY],
            head:  0,
            tail:  0,
            count: 0,
        }
    }

    pub fn push(&mut self, msg: Message) -> Result<()> {
        if self.count == MAILBOX_CAPACITY {
            return Err(Error::Full);
        }
        self.slots[self.tail] = msg;
        self.tail = (self.tail + 1) % MAILBOX_CAPACITY;
        self.count += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Message> {
        if self.count == 0 {
            return Err(Error::Empty);
        }
        let msg = self.slots[self.head];
        self.head = (self.head + 1) % MAILBOX_CAPACITY;
        self.count -= 1;
        Ok(msg)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == MAILBOX_CAPACITY
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(i: u64) -> Message {
        Message::new(7, i, [i, i * 2, i * 3])
    }

    #[test]
    fn capacity_is_exactly_sixteen() {
        let mut mb = Mailbox::new();
        for i in 0..16 {
            mb.push(msg(i)).unwrap();
        }
        assert!(mb.is_full());
        assert_eq!(mb.push(msg(16)), Err(Error::Full));
        assert_eq!(mb.len(), 16);
    }

    #[test]
    fn drain_is_fifo_and_frees_space() {
        let mut mb = Mailbox::new();
        for i in 0..16 {
            mb.push(msg(i)).unwrap();
        }
        for i in 0..16 {
            assert_eq!(mb.pop(), Ok(msg(i)));
        }
        assert_eq!(mb.pop(), Err(Error::Empty));
        mb.push(msg(99)).unwrap();
        assert_eq!(mb.pop(), Ok(msg(99)));
    }

    #[test]
    fn wraps_around() {
        let mut mb = Mailbox::new();
        for round in 0..5u64 {
            for i in 0..10 {
                mb.push(msg(round * 100 + i)).unwrap();
            }
            for i in 0..10 {
                assert_eq!(mb.pop().unwrap().kind, round * 100 + i);
            }
        }
        assert!(mb.is_empty());
    }
}
