use std::sync::{Arc, Mutex};

use crate::core::Message;

/// Callback invoked for each delivery.
///
/// Handlers run with no broker lock held, so they are free to publish, ack,
/// or cancel on the same broker.
pub type ConsumerHandler = Box<dyn FnMut(Delivery) + Send>;

/// One delivered message together with the coordinates needed to settle it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub queue: String,
    pub consumer_tag: String,
    pub delivery_tag: u64,
    /// Already settled at delivery; `ack` is a no-op.
    pub no_ack: bool,
}

/// Consumer registration options.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Stable tag; generated when not provided.
    pub consumer_tag: Option<String>,
    pub no_ack: bool,
    /// Upper bound on outstanding unacked deliveries.
    pub prefetch: usize,
    /// Higher-priority consumers are offered messages first.
    pub priority: i32,
    /// Reject other consumers on the same queue.
    pub exclusive: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            consumer_tag: None,
            no_ack: false,
            prefetch: 1,
            priority: 0,
            exclusive: false,
        }
    }
}

impl SubscribeOptions {
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            consumer_tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A registered consumer. The handler sits behind its own lock so it can be
/// invoked while the broker state lock is released.
pub(crate) struct ConsumerEntry {
    pub tag: String,
    pub queue: String,
    pub no_ack: bool,
    pub prefetch: usize,
    pub priority: i32,
    pub exclusive: bool,
    pub handler: Arc<Mutex<ConsumerHandler>>,
}

impl std::fmt::Debug for ConsumerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerEntry")
            .field("tag", &self.tag)
            .field("queue", &self.queue)
            .field("no_ack", &self.no_ack)
            .field("prefetch", &self.prefetch)
            .field("priority", &self.priority)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}
