//! The per-session bounded send queue.
//!
//! A fixed-capacity FIFO with head-drop overflow: O(1) enqueue, O(1)
//! drop-head, O(1) length. The dispatcher pushes without ever blocking; the
//! session's sender task waits on `pop` when the queue is empty.
//!
//! Single-consumer: each session runs at most one sender task, so one
//! `Notify` permit is enough to hand off a pushed item.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::message::Outbound;

#[derive(Debug)]
pub struct SendQueue {
    capacity: usize,
    items: Mutex<VecDeque<Outbound>>,
    ready: Notify,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Non-blocking enqueue. When the queue is at capacity the head is
    /// discarded to admit the new tail; returns true in that case.
    pub fn push_drop_oldest(&self, out: Outbound) -> bool {
        let dropped = {
            let mut items = self.items.lock().unwrap();
            let dropped = if items.len() == self.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(out);
            dropped
        };
        self.ready.notify_one();
        dropped
    }

    /// Remove the head, waiting while the queue is empty.
    pub async fn pop(&self) -> Outbound {
        loop {
            // Register interest before checking, so a push between the check
            // and the await cannot be missed.
            let notified = self.ready.notified();
            if let Some(out) = self.items.lock().unwrap().pop_front() {
                return out;
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<Outbound> {
        self.items.lock().unwrap().pop_front()
    }
}
