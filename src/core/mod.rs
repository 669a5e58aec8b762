//! Core types for the praxis activity runtime.
//!
//! # Domain model
//! - [`Message`]: a routed message with delivery fields, typed content, and
//!   publish properties
//! - [`Content`]: the typed message body shared by the run, event, api, and
//!   execution exchanges
//! - [`Environment`]: host settings such as step mode
//!
//! # Error handling
//! - [`Error`]: invariant violations and broker faults, thrown at the caller
//! - [`ActivityError`]: serializable behaviour/condition failures that travel
//!   through the broker as message content
//! - [`Result<T>`]: type alias for results using [`Error`]

mod environment;
mod error;
mod message;

pub use environment::{Environment, Settings};
pub use error::{ActivityError, Error, Result};
pub use message::{
    Content, FlowAction, Message, MessageFields, MessageProperties, OutboundFlowAction, Parent,
    Publish, ShakeVisit,
};

/// Replace every character that cannot appear in a routing key segment.
///
/// Used for deterministic compensation ids built from element ids.
pub fn broker_safe_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_safe_id_replaces_separators() {
        assert_eq!(broker_safe_id("task.1#a"), "task_1_a");
        assert_eq!(broker_safe_id("plain-id_0"), "plain-id_0");
    }
}
