use crate::messages::Message;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A message whose validity could not be decided yet.
#[derive(Debug)]
pub struct Parked {
    pub msg: Message,
    pub attempts: u32,
    next_retry: Instant,
}

/// Messages waiting for the state to catch up with them.
///
/// Retries back off linearly and stop at a ceiling, so a message that can
/// never become decidable is eventually dropped. At most `capacity`
/// messages wait at once; parking past that evicts the oldest.
#[derive(Debug)]
pub struct Holding {
    parked: VecDeque<Parked>,
    max_retries: u32,
    backoff: Duration,
    capacity: usize,
}

impl Holding {
    pub fn new(max_retries: u32, backoff: Duration, capacity: usize) -> Self {
        Holding {
            parked: VecDeque::new(),
            max_retries,
            backoff,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    /// Parks a fresh message. Returns the oldest parked message when it had
    /// to make room.
    pub fn park(&mut self, msg: Message, now: Instant) -> Option<Message> {
        let evicted = self.make_room();
        self.parked.push_back(Parked {
            msg,
            attempts: 0,
            next_retry: now + self.backoff,
        });
        evicted
    }

    fn make_room(&mut self) -> Option<Message> {
        if self.parked.len() < self.capacity {
            return None;
        }
        self.parked.pop_front().map(|p| p.msg)
    }

    /// Parks a retried message again. Returns `None` when it was re-queued,
    /// or the message back once its retry budget is spent.
    pub fn repark(&mut self, mut parked: Parked, now: Instant) -> Option<Message> {
        parked.attempts += 1;
        if parked.attempts >= self.max_retries {
            return Some(parked.msg);
        }
        if self.parked.len() >= self.capacity {
            return Some(parked.msg);
        }
        parked.next_retry = now + self.backoff * parked.attempts;
        self.parked.push_back(parked);
        None
    }

    /// Removes the messages due for a retry at `now`, or all of them with `force`.
    pub fn take_due(&mut self, now: Instant, force: bool) -> Vec<Parked> {
        let (due, waiting): (Vec<Parked>, Vec<Parked>) = self
            .parked
            .drain(..)
            .partition(|p| force || p.next_retry <= now);
        self.parked = waiting.into();
        due
    }
}
