use std::sync::Arc;

use serde_json::Value;

use crate::broker::Broker;
use crate::core::{ActivityError, Content, Environment, Message, Publish};

/// Factory producing a fresh behaviour per execution.
pub type BehaviourFactory = Arc<dyn Fn() -> Box<dyn ActivityBehaviour> + Send + Sync>;

/// Handle a behaviour uses to talk back to its activity.
///
/// Everything a behaviour does is a publish on the activity's `execution`
/// exchange; the execution holder and the activity bridge translate the
/// `execute.*` messages into state transitions.
#[derive(Clone)]
pub struct BehaviourContext {
    broker: Broker,
    pub activity_id: String,
    pub element_type: String,
    pub environment: Environment,
}

impl BehaviourContext {
    pub(crate) fn new(
        broker: Broker,
        activity_id: String,
        element_type: String,
        environment: Environment,
    ) -> Self {
        Self {
            broker,
            activity_id,
            element_type,
            environment,
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Publish a raw `execute.*` message. The routing key must start with
    /// `execute.`.
    pub fn publish(&self, routing_key: &str, content: Content) -> Result<(), ActivityError> {
        self.broker
            .publish("execution", routing_key, content, Publish::default())
            .map_err(|err| ActivityError::wrap("execution publish failed", err))
    }

    /// Announce that the execution is waiting for external input.
    pub fn wait(&self, content: Content) -> Result<(), ActivityError> {
        self.publish("execute.wait", content)
    }

    /// Complete the scope carried by `content`, optionally with output.
    pub fn complete(&self, mut content: Content, output: Option<Value>) -> Result<(), ActivityError> {
        if output.is_some() {
            content.output = output;
        }
        self.publish("execute.completed", content)
    }

    /// Fail the execution.
    pub fn error(&self, mut content: Content, error: ActivityError) -> Result<(), ActivityError> {
        content.error = Some(error);
        self.publish("execute.error", content)
    }

    /// Discard the execution cooperatively.
    pub fn discard(&self, content: Content) -> Result<(), ActivityError> {
        self.publish("execute.discard", content)
    }

    /// Ask the activity to resolve outbound flows now, before completion.
    /// Used by gateway-style behaviours; `content.outbound` may carry hints.
    pub fn take_outbound(&self, content: Content) -> Result<(), ActivityError> {
        self.publish("execute.outbound.take", content)
    }
}

/// Pluggable executor for one activity kind.
///
/// A behaviour drives a single execution scope: `execute` is invoked with
/// the `execute.start` message (redelivered on resume), api messages
/// addressed to the running execution arrive through `on_api_message`, and
/// any other `execute.*` traffic (child scopes, iteration bookkeeping)
/// through `on_execute_message`.
pub trait ActivityBehaviour: Send {
    fn execute(&mut self, ctx: &BehaviourContext, message: &Message) -> Result<(), ActivityError>;

    fn on_execute_message(
        &mut self,
        _ctx: &BehaviourContext,
        _message: &Message,
    ) -> Result<(), ActivityError> {
        Ok(())
    }

    fn on_api_message(
        &mut self,
        _ctx: &BehaviourContext,
        _message: &Message,
    ) -> Result<(), ActivityError> {
        Ok(())
    }

    fn on_stop(&mut self) {}
}

/// Default behaviour: completes immediately, passing the message content
/// through untouched. Gateways and plain tasks run on this.
#[derive(Debug, Default)]
pub struct PassthroughBehaviour;

impl ActivityBehaviour for PassthroughBehaviour {
    fn execute(&mut self, ctx: &BehaviourContext, message: &Message) -> Result<(), ActivityError> {
        ctx.complete(message.content.clone(), None)
    }
}

/// Convenience factory for [`PassthroughBehaviour`].
pub fn passthrough_factory() -> BehaviourFactory {
    Arc::new(|| Box::<PassthroughBehaviour>::default())
}
