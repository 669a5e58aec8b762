//! Run-message formatting.
//!
//! Extensions publish fragments on the `format-run` exchange; before a
//! non-control run transition the activity drains `format-run-q` and merges
//! every fragment's content into the run message. A fragment whose routing
//! key ends in `.begin` opens an asynchronous block: the transition is held
//! (status `formatting`) until the matching `.end` fragment arrives.

use crate::broker::Broker;
use crate::core::{ActivityError, Content, Message};

pub const FORMAT_QUEUE: &str = "format-run-q";

/// Outcome of one formatting pass.
#[derive(Debug)]
pub enum FormatOutcome {
    /// All fragments consumed; the transition may continue.
    Complete(Content),
    /// An asynchronous block is open; hold the transition and keep merging
    /// fragments as they arrive.
    Pending(Content),
}

/// Drain pending fragments from the format queue into `content`.
///
/// `open` carries the async-block state across passes: a `.begin` fragment
/// sets it, the matching `.end` fragment clears it.
pub fn run_format_pass(
    broker: &Broker,
    mut content: Content,
    open: &mut bool,
) -> Result<FormatOutcome, ActivityError> {
    while let Some(fragment) = broker.get(FORMAT_QUEUE) {
        content = apply_fragment(content, &fragment, open)?;
    }
    if *open {
        Ok(FormatOutcome::Pending(content))
    } else {
        Ok(FormatOutcome::Complete(content))
    }
}

/// Merge a single fragment, tracking async-block state.
pub fn apply_fragment(
    content: Content,
    fragment: &Message,
    open: &mut bool,
) -> Result<Content, ActivityError> {
    let key = fragment.routing_key();
    if key.ends_with(".error") || fragment.content.error.is_some() {
        let error = fragment
            .content
            .error
            .clone()
            .unwrap_or_else(|| ActivityError::new("formatting failed"));
        return Err(error);
    }
    if key.ends_with(".begin") {
        *open = true;
    } else if key.ends_with(".end") {
        *open = false;
    }
    Ok(content.merged_with(&fragment.content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{ExchangeKind, QueueOptions};
    use crate::core::Publish;
    use serde_json::json;

    fn format_broker() -> Broker {
        let broker = Broker::new();
        broker.assert_exchange("format-run", ExchangeKind::Topic);
        broker.assert_queue(FORMAT_QUEUE, QueueOptions::default());
        broker.bind_queue(FORMAT_QUEUE, "format-run", "#").unwrap();
        broker
    }

    fn publish_fragment(broker: &Broker, routing_key: &str, content: Content) {
        broker
            .publish("format-run", routing_key, content, Publish::default())
            .unwrap();
    }

    #[test]
    fn fragments_merge_in_order() {
        let broker = format_broker();
        let mut first = Content::default();
        first.extra.insert("a".to_string(), json!(1));
        publish_fragment(&broker, "run.enter.format", first);
        let mut second = Content::default();
        second.extra.insert("a".to_string(), json!(2));
        second.extra.insert("b".to_string(), json!(true));
        publish_fragment(&broker, "run.enter.format", second);

        let mut open = false;
        match run_format_pass(&broker, Content::default(), &mut open).unwrap() {
            FormatOutcome::Complete(content) => {
                assert_eq!(content.extra["a"], json!(2));
                assert_eq!(content.extra["b"], json!(true));
            }
            FormatOutcome::Pending(_) => panic!("no async block was opened"),
        }
    }

    #[test]
    fn begin_fragment_holds_the_transition_until_end() {
        let broker = format_broker();
        publish_fragment(&broker, "run.enter.io.begin", Content::default());

        let mut open = false;
        let outcome = run_format_pass(&broker, Content::default(), &mut open).unwrap();
        assert!(matches!(outcome, FormatOutcome::Pending(_)));
        assert!(open);

        let mut closing = Content::default();
        closing.extra.insert("io".to_string(), json!("loaded"));
        publish_fragment(&broker, "run.enter.io.end", closing);
        let outcome = run_format_pass(
            &broker,
            match outcome {
                FormatOutcome::Pending(content) => content,
                FormatOutcome::Complete(content) => content,
            },
            &mut open,
        )
        .unwrap();
        match outcome {
            FormatOutcome::Complete(content) => assert_eq!(content.extra["io"], json!("loaded")),
            FormatOutcome::Pending(_) => panic!("block should be closed"),
        }
    }

    #[test]
    fn error_fragment_fails_the_pass() {
        let broker = format_broker();
        let mut failing = Content::default();
        failing.error = Some(ActivityError::new("io mapping failed"));
        publish_fragment(&broker, "run.enter.io.error", failing);

        let mut open = false;
        let err = run_format_pass(&broker, Content::default(), &mut open).unwrap_err();
        assert_eq!(err.message, "io mapping failed");
    }
}
