//! Event façade: a thin helper API over an element's `event` exchange.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};

use tokio::sync::oneshot;
use uuid::Uuid;

use super::{Broker, SubscribeOptions};
use crate::core::{ActivityError, Content, Message, Publish, Result};

const EVENT_EXCHANGE: &str = "event";

/// Helpers (`on`, `once`, `wait_for`, `emit_fatal`, `publish_event`) layered
/// over an element broker to expose an event API to callers.
#[derive(Clone)]
pub struct EventApi {
    broker: Broker,
}

impl EventApi {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    /// Subscribe a handler to every event matching `pattern`.
    pub fn on(
        &self,
        pattern: &str,
        mut handler: impl FnMut(Message) + Send + 'static,
    ) -> Result<String> {
        self.broker.subscribe_tmp(
            EVENT_EXCHANGE,
            pattern,
            SubscribeOptions::default().no_ack(),
            move |delivery| handler(delivery.message),
        )
    }

    /// Subscribe a handler that fires for the first matching event only.
    pub fn once(
        &self,
        pattern: &str,
        handler: impl FnOnce(Message) + Send + 'static,
    ) -> Result<String> {
        let tag = format!("once-{}", Uuid::new_v4().simple());
        let broker = self.broker.clone();
        let slot = Arc::new(Mutex::new(Some(handler)));
        let own_tag = tag.clone();
        self.broker.subscribe_tmp(
            EVENT_EXCHANGE,
            pattern,
            SubscribeOptions::tagged(tag).no_ack(),
            move |delivery| {
                if let Some(handler) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                    handler(delivery.message);
                }
                broker.cancel(&own_tag);
            },
        )
    }

    /// Future resolving with the first event matching `pattern`.
    ///
    /// Resolves with `Err` if a fatal `error` event fires first.
    pub fn wait_for(&self, pattern: &str) -> EventFuture {
        self.wait_for_where(pattern, |_| true)
    }

    /// Like [`wait_for`](Self::wait_for) with an extra message filter.
    pub fn wait_for_where(
        &self,
        pattern: &str,
        filter: impl Fn(&Message) -> bool + Send + 'static,
    ) -> EventFuture {
        let (tx, rx) = oneshot::channel();
        let sender = Arc::new(Mutex::new(Some(tx)));
        let match_tag = format!("wait-{}", Uuid::new_v4().simple());
        let error_tag = format!("wait-err-{}", Uuid::new_v4().simple());

        let resolve = {
            let broker = self.broker.clone();
            let sender = Arc::clone(&sender);
            let match_tag = match_tag.clone();
            let error_tag = error_tag.clone();
            move |outcome: std::result::Result<Message, ActivityError>| {
                if let Some(tx) = sender.lock().unwrap_or_else(|e| e.into_inner()).take() {
                    let _ = tx.send(outcome);
                }
                broker.cancel(&match_tag);
                broker.cancel(&error_tag);
            }
        };

        let on_match = {
            let resolve = resolve.clone();
            move |delivery: super::Delivery| {
                if filter(&delivery.message) {
                    resolve(Ok(delivery.message));
                }
            }
        };
        let on_error = move |delivery: super::Delivery| {
            let error = delivery
                .message
                .content
                .error
                .clone()
                .unwrap_or_else(|| ActivityError::new("fatal error event"));
            resolve(Err(error));
        };

        let subscribed = self
            .broker
            .subscribe_tmp(
                EVENT_EXCHANGE,
                pattern,
                SubscribeOptions::tagged(match_tag).no_ack(),
                on_match,
            )
            .and_then(|_| {
                self.broker.subscribe_tmp(
                    EVENT_EXCHANGE,
                    "error",
                    SubscribeOptions::tagged(error_tag).no_ack(),
                    on_error,
                )
            });
        if let Err(err) = subscribed {
            if let Some(tx) = sender.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(Err(ActivityError::wrap("event subscription failed", err)));
            }
        }
        EventFuture { rx }
    }

    /// Publish an event on the element's `event` exchange.
    pub fn publish_event(
        &self,
        routing_key: &str,
        content: Content,
        publish: Publish,
    ) -> Result<()> {
        self.broker
            .publish(EVENT_EXCHANGE, routing_key, content, publish)
    }

    /// Publish a fatal error event.
    ///
    /// Fatal errors are mandatory: with no consumer bound the broker records
    /// the message as returned instead of dropping it.
    pub fn emit_fatal(&self, error: ActivityError, mut content: Content) -> Result<()> {
        content.error = Some(error);
        self.broker.publish(
            EVENT_EXCHANGE,
            "error",
            content,
            Publish::transient().mandatory().with_type("error"),
        )
    }
}

/// Future returned by [`EventApi::wait_for`].
pub struct EventFuture {
    rx: oneshot::Receiver<std::result::Result<Message, ActivityError>>,
}

impl Future for EventFuture {
    type Output = std::result::Result<Message, ActivityError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err(ActivityError::new("event subscription dropped")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ExchangeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event_broker() -> Broker {
        let broker = Broker::new();
        broker.assert_exchange("event", ExchangeKind::Topic);
        broker
    }

    #[test]
    fn on_sees_every_matching_event() {
        let broker = event_broker();
        let events = EventApi::new(broker.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let count_in = Arc::clone(&count);
        events
            .on("activity.#", move |_| {
                count_in.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        events
            .publish_event("activity.enter", Content::default(), Publish::default())
            .unwrap();
        events
            .publish_event("activity.leave", Content::default(), Publish::default())
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_fires_a_single_time() {
        let broker = event_broker();
        let events = EventApi::new(broker.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let count_in = Arc::clone(&count);
        events
            .once("activity.enter", move |_| {
                count_in.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        for _ in 0..2 {
            events
                .publish_event("activity.enter", Content::default(), Publish::default())
                .unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_for_resolves_with_matching_event() {
        let broker = event_broker();
        let events = EventApi::new(broker.clone());
        let wait = events.wait_for("activity.end");
        events
            .publish_event("activity.end", Content::default(), Publish::default())
            .unwrap();
        let msg = wait.await.unwrap();
        assert_eq!(msg.routing_key(), "activity.end");
    }

    #[tokio::test]
    async fn wait_for_rejects_on_fatal_error() {
        let broker = event_broker();
        let events = EventApi::new(broker.clone());
        let wait = events.wait_for("activity.end");
        events
            .emit_fatal(ActivityError::new("boom"), Content::default())
            .unwrap();
        let err = wait.await.unwrap_err();
        assert_eq!(err.message, "boom");
    }
}
