//! In-process topic broker, one instance per element.
//!
//! The broker is a cloneable handle over shared state. Publishing only
//! enqueues; delivery happens in a drain loop that runs until no consumer
//! can accept another message. The loop is re-entrancy guarded: a publish
//! issued from inside a consumer handler enqueues and is delivered when the
//! running loop comes back around, which keeps one logical worker per broker
//! and gives the cascade semantics the activity state machine depends on.

mod consumer;
mod events;
mod queue;
mod snapshot;
mod topic;

pub use consumer::{ConsumerHandler, Delivery, SubscribeOptions};
pub use events::{EventApi, EventFuture};
pub use queue::QueueOptions;
pub use snapshot::{BindingSnapshot, BrokerSnapshot, ExchangeKind, ExchangeSnapshot, QueueSnapshot};
pub use topic::pattern_matches;

use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::core::{Content, Error, Message, Publish, Result};
use consumer::ConsumerEntry;
use queue::{QueueState, UnackedMessage};

#[derive(Debug)]
struct Binding {
    queue: String,
    pattern: String,
}

#[derive(Debug)]
struct Exchange {
    name: String,
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

impl Exchange {
    fn route<'a>(&'a self, routing_key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.bindings.iter().filter_map(move |b| {
            let matched = match self.kind {
                ExchangeKind::Topic => topic::pattern_matches(&b.pattern, routing_key),
                ExchangeKind::Direct => b.pattern == routing_key,
            };
            matched.then_some(b.queue.as_str())
        })
    }
}

struct BrokerState {
    exchanges: Vec<Exchange>,
    queues: Vec<QueueState>,
    consumers: Vec<ConsumerEntry>,
    next_delivery_tag: u64,
    processing: bool,
    returned: Vec<Message>,
}

impl BrokerState {
    fn queue_mut(&mut self, name: &str) -> Option<&mut QueueState> {
        self.queues.iter_mut().find(|q| q.name == name)
    }

    fn queue(&self, name: &str) -> Option<&QueueState> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Pick the next deliverable (consumer, message) pair, queues in
    /// assertion order, consumers by descending priority.
    fn select_delivery(&mut self) -> Option<(Arc<Mutex<ConsumerHandler>>, Delivery)> {
        for queue_idx in 0..self.queues.len() {
            if self.queues[queue_idx].pending.is_empty() {
                continue;
            }
            let queue_name = self.queues[queue_idx].name.clone();

            let mut candidates: Vec<usize> = self
                .consumers
                .iter()
                .enumerate()
                .filter(|(_, c)| c.queue == queue_name)
                .map(|(i, _)| i)
                .collect();
            candidates.sort_by_key(|&i| std::cmp::Reverse(self.consumers[i].priority));

            for consumer_idx in candidates {
                let (tag, no_ack, prefetch, handler) = {
                    let c = &self.consumers[consumer_idx];
                    (c.tag.clone(), c.no_ack, c.prefetch, Arc::clone(&c.handler))
                };
                let queue = &mut self.queues[queue_idx];
                if !no_ack && queue.unacked_count_for(&tag) >= prefetch {
                    continue;
                }
                let mut message = queue.pending.pop_front().expect("pending checked above");
                message.fields.consumer_tag = Some(tag.clone());
                self.next_delivery_tag += 1;
                let delivery_tag = self.next_delivery_tag;
                if !no_ack {
                    queue.unacked.push(UnackedMessage {
                        delivery_tag,
                        consumer_tag: tag.clone(),
                        message: message.clone(),
                    });
                }
                trace!(queue = %queue_name, consumer = %tag, routing_key = %message.routing_key(), "deliver");
                return Some((
                    handler,
                    Delivery {
                        message,
                        queue: queue_name,
                        consumer_tag: tag,
                        delivery_tag,
                        no_ack,
                    },
                ));
            }
        }
        None
    }

    /// Remove a consumer, returning its unacked messages to the queue head.
    fn remove_consumer(&mut self, tag: &str, requeue: bool) -> bool {
        let Some(idx) = self.consumers.iter().position(|c| c.tag == tag) else {
            return false;
        };
        let consumer = self.consumers.remove(idx);
        let auto_delete = match self.queue_mut(&consumer.queue) {
            Some(queue) => {
                if requeue {
                    queue.requeue_for(tag);
                } else {
                    queue.ack_all_for(tag);
                }
                queue.options.auto_delete
            }
            None => false,
        };
        let orphaned =
            auto_delete && !self.consumers.iter().any(|c| c.queue == consumer.queue);
        if orphaned {
            self.queues.retain(|q| q.name != consumer.queue);
            for exchange in &mut self.exchanges {
                exchange.bindings.retain(|b| b.queue != consumer.queue);
            }
        }
        true
    }
}

/// Cloneable handle to one element's broker.
#[derive(Clone)]
pub struct Broker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                exchanges: Vec::new(),
                queues: Vec::new(),
                consumers: Vec::new(),
                next_delivery_tag: 0,
                processing: false,
                returned: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Idempotently declare an exchange.
    pub fn assert_exchange(&self, name: impl Into<String>, kind: ExchangeKind) {
        let name = name.into();
        let mut state = self.lock();
        if !state.exchanges.iter().any(|e| e.name == name) {
            state.exchanges.push(Exchange {
                name,
                kind,
                bindings: Vec::new(),
            });
        }
    }

    /// Idempotently declare a queue.
    pub fn assert_queue(&self, name: impl Into<String>, options: QueueOptions) {
        let name = name.into();
        let mut state = self.lock();
        if state.queue(&name).is_none() {
            state.queues.push(QueueState::new(name, options));
        }
    }

    /// Bind a queue to an exchange under a pattern. Idempotent.
    pub fn bind_queue(
        &self,
        queue: impl Into<String>,
        exchange: &str,
        pattern: impl Into<String>,
    ) -> Result<()> {
        let queue = queue.into();
        let pattern = pattern.into();
        let mut state = self.lock();
        if state.queue(&queue).is_none() {
            return Err(Error::QueueNotFound(queue));
        }
        let Some(ex) = state.exchanges.iter_mut().find(|e| e.name == exchange) else {
            return Err(Error::ExchangeNotFound(exchange.to_string()));
        };
        if !ex
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern == pattern)
        {
            ex.bindings.push(Binding { queue, pattern });
        }
        Ok(())
    }

    /// Publish a message; a copy lands on every queue whose binding matches.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: impl Into<String>,
        content: Content,
        publish: Publish,
    ) -> Result<()> {
        let routing_key = routing_key.into();
        let mandatory = publish.mandatory;
        let message = Message::new(exchange, routing_key.clone(), content, publish.into_properties());
        {
            let mut state = self.lock();
            let Some(ex) = state.exchanges.iter().find(|e| e.name == exchange) else {
                return Err(Error::ExchangeNotFound(exchange.to_string()));
            };
            let targets: Vec<String> = ex.route(&routing_key).map(str::to_string).collect();
            if targets.is_empty() {
                if mandatory {
                    warn!(exchange, routing_key = %routing_key, "mandatory message routed to no queue");
                    state.returned.push(message);
                }
                return Ok(());
            }
            trace!(exchange, routing_key = %routing_key, queues = targets.len(), "publish");
            for target in targets {
                if let Some(queue) = state.queue_mut(&target) {
                    queue.queue_message(message.clone());
                }
            }
        }
        self.try_process();
        Ok(())
    }

    /// Attach a consumer to an existing queue.
    ///
    /// A consumer re-registered under an existing tag replaces the previous
    /// registration, keeping the one-consumer-per-tag invariant.
    pub fn consume(
        &self,
        queue: &str,
        options: SubscribeOptions,
        handler: impl FnMut(Delivery) + Send + 'static,
    ) -> Result<String> {
        let tag = options
            .consumer_tag
            .clone()
            .unwrap_or_else(|| format!("ct-{}", Uuid::new_v4().simple()));
        {
            let mut state = self.lock();
            if state.queue(queue).is_none() {
                return Err(Error::QueueNotFound(queue.to_string()));
            }
            let occupied = state
                .consumers
                .iter()
                .any(|c| c.queue == queue && c.tag != tag && (c.exclusive || options.exclusive));
            if occupied {
                return Err(Error::ExclusiveConsumer(queue.to_string()));
            }
            state.remove_consumer(&tag, true);
            state.consumers.push(ConsumerEntry {
                tag: tag.clone(),
                queue: queue.to_string(),
                no_ack: options.no_ack,
                prefetch: options.prefetch,
                priority: options.priority,
                exclusive: options.exclusive,
                handler: Arc::new(Mutex::new(Box::new(handler))),
            });
            debug!(queue, consumer = %tag, "consume");
        }
        self.try_process();
        Ok(tag)
    }

    /// Create a private temporary queue bound to `exchange` under `pattern`
    /// and consume it.
    pub fn subscribe_tmp(
        &self,
        exchange: &str,
        pattern: impl Into<String>,
        options: SubscribeOptions,
        handler: impl FnMut(Delivery) + Send + 'static,
    ) -> Result<String> {
        let queue = format!("tmp-q-{}", Uuid::new_v4().simple());
        self.assert_queue(&queue, QueueOptions::temporary());
        self.bind_queue(&queue, exchange, pattern)?;
        self.consume(&queue, options, handler)
    }

    /// Cancel a consumer, returning its unacked messages to the queue head
    /// marked redelivered. Auto-delete queues left without consumers are
    /// removed.
    pub fn cancel(&self, consumer_tag: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            state.remove_consumer(consumer_tag, true)
        };
        if removed {
            debug!(consumer = %consumer_tag, "cancel");
            self.try_process();
        }
        removed
    }

    pub fn ack(&self, queue: &str, delivery_tag: u64) {
        {
            let mut state = self.lock();
            if let Some(q) = state.queue_mut(queue) {
                q.ack(delivery_tag);
            }
        }
        self.try_process();
    }

    pub fn nack(&self, queue: &str, delivery_tag: u64, requeue: bool) {
        {
            let mut state = self.lock();
            if let Some(q) = state.queue_mut(queue) {
                q.nack(delivery_tag, requeue);
            }
        }
        self.try_process();
    }

    /// Acknowledge every outstanding delivery a consumer holds on a queue.
    pub fn ack_all(&self, queue: &str, consumer_tag: &str) {
        {
            let mut state = self.lock();
            if let Some(q) = state.queue_mut(queue) {
                q.ack_all_for(consumer_tag);
            }
        }
        self.try_process();
    }

    /// Enqueue a message directly on a queue, bypassing exchange routing.
    ///
    /// Used by inbound funnels that forward another element's message as-is.
    pub fn send_to_queue(&self, queue: &str, mut message: Message) -> Result<()> {
        {
            let mut state = self.lock();
            let Some(q) = state.queue_mut(queue) else {
                return Err(Error::QueueNotFound(queue.to_string()));
            };
            message.fields.consumer_tag = None;
            q.queue_message(message);
        }
        self.try_process();
        Ok(())
    }

    /// Pop the queue head without a consumer; the message counts as acked.
    pub fn get(&self, queue: &str) -> Option<Message> {
        let message = {
            let mut state = self.lock();
            state.queue_mut(queue).and_then(|q| q.pending.pop_front())
        };
        self.try_process();
        message
    }

    /// Drop all pending messages on a queue.
    pub fn purge(&self, queue: &str) -> usize {
        let purged = {
            let mut state = self.lock();
            state.queue_mut(queue).map_or(0, |q| q.purge())
        };
        if purged > 0 {
            debug!(queue, purged, "purge");
        }
        purged
    }

    pub fn message_count(&self, queue: &str) -> usize {
        self.lock().queue(queue).map_or(0, |q| q.message_count())
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock()
            .consumers
            .iter()
            .filter(|c| c.queue == queue)
            .count()
    }

    pub fn peek(&self, queue: &str) -> Option<Message> {
        self.lock().queue(queue).and_then(|q| q.peek().cloned())
    }

    /// Messages published as mandatory that routed to no queue.
    pub fn take_returned(&self) -> Vec<Message> {
        std::mem::take(&mut self.lock().returned)
    }

    /// Snapshot exchanges, bindings, and undelivered messages.
    ///
    /// With `durable_only`, transient queues and their bindings are left out;
    /// transient messages are always left out.
    pub fn get_state(&self, durable_only: bool) -> BrokerSnapshot {
        let state = self.lock();
        let included =
            |name: &str| -> bool { state.queue(name).is_some_and(|q| q.options.durable || !durable_only) };
        BrokerSnapshot {
            exchanges: state
                .exchanges
                .iter()
                .map(|e| ExchangeSnapshot {
                    name: e.name.clone(),
                    kind: e.kind,
                    bindings: e
                        .bindings
                        .iter()
                        .filter(|b| included(&b.queue))
                        .map(|b| BindingSnapshot {
                            queue: b.queue.clone(),
                            pattern: b.pattern.clone(),
                        })
                        .collect(),
                })
                .collect(),
            queues: state
                .queues
                .iter()
                .filter(|q| q.options.durable || !durable_only)
                .map(|q| QueueSnapshot {
                    name: q.name.clone(),
                    options: q.options,
                    messages: q.snapshot_messages(),
                })
                .collect(),
        }
    }

    /// Restore queues, bindings, and undelivered messages from a snapshot.
    ///
    /// Consumers are not restored; the owning element re-registers them on
    /// resume under their original tags.
    pub fn recover(&self, snapshot: &BrokerSnapshot) {
        let mut state = self.lock();
        for ex in &snapshot.exchanges {
            if !state.exchanges.iter().any(|e| e.name == ex.name) {
                state.exchanges.push(Exchange {
                    name: ex.name.clone(),
                    kind: ex.kind,
                    bindings: Vec::new(),
                });
            }
        }
        for qs in &snapshot.queues {
            match state.queue_mut(&qs.name) {
                Some(queue) => {
                    queue.pending = qs.messages.iter().cloned().collect();
                    queue.unacked.clear();
                }
                None => {
                    let mut queue = QueueState::new(qs.name.clone(), qs.options);
                    queue.pending = qs.messages.iter().cloned().collect();
                    state.queues.push(queue);
                }
            }
        }
        for ex in &snapshot.exchanges {
            let Some(target) = state.exchanges.iter().position(|e| e.name == ex.name) else {
                continue;
            };
            for binding in &ex.bindings {
                let exists = state.exchanges[target]
                    .bindings
                    .iter()
                    .any(|b| b.queue == binding.queue && b.pattern == binding.pattern);
                let queue_known = state.queue(&binding.queue).is_some();
                if !exists && queue_known {
                    state.exchanges[target].bindings.push(Binding {
                        queue: binding.queue.clone(),
                        pattern: binding.pattern.clone(),
                    });
                }
            }
        }
    }

    /// Drain deliverable messages, invoking handlers with no state lock held.
    ///
    /// Re-entrant calls return immediately; the already-running loop picks up
    /// whatever they enqueued.
    fn try_process(&self) {
        {
            let mut state = self.lock();
            if state.processing {
                return;
            }
            state.processing = true;
        }
        loop {
            let next = {
                let mut state = self.lock();
                match state.select_delivery() {
                    Some(next) => next,
                    None => {
                        state.processing = false;
                        return;
                    }
                }
            };
            let (handler, delivery) = next;
            let mut handler = handler.lock().unwrap_or_else(|e| e.into_inner());
            (handler)(delivery);
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Broker")
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .field("consumers", &state.consumers.len())
            .finish()
    }
}
