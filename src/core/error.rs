use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::message::Message;

/// Runtime error type for the praxis activity engine.
///
/// These are invariant violations and broker faults that are thrown at the
/// caller. Failures that originate inside a behaviour or a flow condition are
/// not represented here; they travel through the broker as [`ActivityError`]
/// payloads instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// `run` was called while a run is already in flight.
    #[error("activity <{0}> is already running")]
    AlreadyRunning(String),

    /// `recover` was called on a running activity.
    #[error("cannot recover activity <{0}> while it is running")]
    RecoverWhileRunning(String),

    /// `resume` was called while the run queue is being consumed.
    #[error("cannot resume activity <{0}> while it is consuming")]
    ResumeWhileConsuming(String),

    /// `next` was called while a suspension point is active.
    #[error("cannot step activity <{0}> while {1}")]
    StepWhileBusy(String, String),

    /// A publish or bind referenced an exchange that was never asserted.
    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    /// An operation referenced a queue that was never asserted.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// A second consumer tried to attach to a queue held exclusively.
    #[error("queue <{0}> is exclusively consumed")]
    ExclusiveConsumer(String),

    /// Snapshot encoding or decoding failed.
    #[error("serialization failed")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A wrapped failure from a behaviour, a flow condition, or the formatter.
///
/// Activity errors are data: they are published on the `event` exchange and
/// carried inside message content, so they are serializable and keep the
/// source message that produced them. `Display` and `Error` are implemented
/// by hand because `source` here is the broker message that failed, not an
/// inner `std::error::Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityError {
    pub message: String,
    /// The message that was being processed when the failure happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Message>>,
    /// Description of the wrapped inner error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner: Option<String>,
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl ActivityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
            inner: None,
        }
    }

    /// Wrap an inner error, keeping its display string for the event payload.
    pub fn wrap(message: impl Into<String>, inner: impl std::fmt::Display) -> Self {
        Self {
            message: message.into(),
            source: None,
            inner: Some(inner.to_string()),
        }
    }

    pub fn with_source(mut self, source: Message) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_error_round_trips_through_json() {
        let err = ActivityError::wrap("no conditional flow taken", "condition blew up");
        let json = serde_json::to_string(&err).unwrap();
        let back: ActivityError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "no conditional flow taken");
        assert_eq!(back.inner.as_deref(), Some("condition blew up"));
        assert!(back.source.is_none());
    }

    #[test]
    fn runtime_errors_render_activity_id() {
        let err = Error::AlreadyRunning("task-1".to_string());
        assert_eq!(err.to_string(), "activity <task-1> is already running");
    }
}
