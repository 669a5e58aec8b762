use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::Message;

/// Queue assertion options.
///
/// Durable queues participate in `get_state`/`recover`; auto-delete queues
/// are removed when their last consumer cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
        }
    }
}

impl QueueOptions {
    /// Options for a private subscription queue.
    pub fn temporary() -> Self {
        Self {
            durable: false,
            auto_delete: true,
        }
    }
}

/// A message handed to a consumer but not yet acknowledged.
#[derive(Debug)]
pub(crate) struct UnackedMessage {
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub message: Message,
}

/// One FIFO queue: pending messages at the tail, unacked deliveries tracked
/// separately so they can be returned to the head on cancel or snapshot.
#[derive(Debug)]
pub(crate) struct QueueState {
    pub name: String,
    pub options: QueueOptions,
    pub pending: VecDeque<Message>,
    pub unacked: Vec<UnackedMessage>,
}

impl QueueState {
    pub fn new(name: String, options: QueueOptions) -> Self {
        Self {
            name,
            options,
            pending: VecDeque::new(),
            unacked: Vec::new(),
        }
    }

    pub fn queue_message(&mut self, message: Message) {
        self.pending.push_back(message);
    }

    /// Pending plus in-flight messages.
    pub fn message_count(&self) -> usize {
        self.pending.len() + self.unacked.len()
    }

    /// Head of the queue: the oldest in-flight message, else the first
    /// pending one.
    pub fn peek(&self) -> Option<&Message> {
        self.unacked
            .first()
            .map(|u| &u.message)
            .or_else(|| self.pending.front())
    }

    /// Drop all pending messages. In-flight deliveries are untouched.
    pub fn purge(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn ack(&mut self, delivery_tag: u64) -> bool {
        if let Some(idx) = self
            .unacked
            .iter()
            .position(|u| u.delivery_tag == delivery_tag)
        {
            self.unacked.remove(idx);
            true
        } else {
            false
        }
    }

    pub fn nack(&mut self, delivery_tag: u64, requeue: bool) -> bool {
        if let Some(idx) = self
            .unacked
            .iter()
            .position(|u| u.delivery_tag == delivery_tag)
        {
            let mut unacked = self.unacked.remove(idx);
            if requeue {
                unacked.message.fields.redelivered = true;
                self.pending.push_front(unacked.message);
            }
            true
        } else {
            false
        }
    }

    /// Acknowledge every in-flight delivery for a consumer.
    pub fn ack_all_for(&mut self, consumer_tag: &str) {
        self.unacked.retain(|u| u.consumer_tag != consumer_tag);
    }

    /// Return a consumer's in-flight messages to the head of the queue,
    /// oldest first, marked redelivered.
    pub fn requeue_for(&mut self, consumer_tag: &str) {
        let mut requeued = Vec::new();
        self.unacked.retain_mut(|u| {
            if u.consumer_tag == consumer_tag {
                let mut message = std::mem::replace(&mut u.message, placeholder());
                message.fields.redelivered = true;
                requeued.push(message);
                false
            } else {
                true
            }
        });
        for message in requeued.into_iter().rev() {
            self.pending.push_front(message);
        }
    }

    pub fn unacked_count_for(&self, consumer_tag: &str) -> usize {
        self.unacked
            .iter()
            .filter(|u| u.consumer_tag == consumer_tag)
            .count()
    }

    /// Persistent messages in delivery order: in-flight first (marked
    /// redelivered), then pending.
    pub fn snapshot_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.message_count());
        for unacked in &self.unacked {
            let mut message = unacked.message.clone();
            message.fields.redelivered = true;
            if message.properties.persistent {
                messages.push(message);
            }
        }
        messages.extend(
            self.pending
                .iter()
                .filter(|m| m.properties.persistent)
                .cloned(),
        );
        messages
    }
}

fn placeholder() -> Message {
    Message::new("", "", Default::default(), Default::default())
}
