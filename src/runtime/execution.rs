use tracing::debug;

use super::behaviour::{ActivityBehaviour, BehaviourContext};
use super::state::ExecutionSnapshot;
use crate::broker::Delivery;
use crate::core::{ActivityError, Content, Message, Publish};

pub const EXECUTE_QUEUE: &str = "execute-q";
pub const EXECUTE_CONSUMER: &str = "_activity-execute";
pub const EXECUTION_EXCHANGE: &str = "execution";

/// Per-run holder that drives the behaviour.
///
/// Lives from `run.execute` until the scope settles. Behaviour-level
/// `execute.*` messages land on `execute-q`; the holder invokes the
/// behaviour, mirrors notifications as `event activity.*`, and produces the
/// terminal `execution.*` messages the activity bridge consumes.
pub struct ActivityExecution {
    ctx: BehaviourContext,
    behaviour: Box<dyn ActivityBehaviour>,
    execute_message: Option<Message>,
    completed: bool,
}

impl ActivityExecution {
    pub fn new(ctx: BehaviourContext, behaviour: Box<dyn ActivityBehaviour>) -> Self {
        Self {
            ctx,
            behaviour,
            execute_message: None,
            completed: false,
        }
    }

    pub fn recovered(
        ctx: BehaviourContext,
        behaviour: Box<dyn ActivityBehaviour>,
        snapshot: &ExecutionSnapshot,
    ) -> Self {
        let mut execution = Self::new(ctx, behaviour);
        execution.completed = snapshot.completed;
        execution
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn execute_message(&self) -> Option<&Message> {
        self.execute_message.as_ref()
    }

    pub fn get_state(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            completed: self.completed,
        }
    }

    /// Start (or resume) the execution scope for a `run.execute` or
    /// `run.execute.passthrough` message.
    ///
    /// A fresh message opens the root scope by publishing `execute.start`;
    /// a redelivered one re-drives off the redelivered `execute.start`
    /// already sitting at the head of `execute-q`.
    pub fn execute(&mut self, message: &Message) -> Result<(), ActivityError> {
        self.execute_message = Some(message.clone());
        if message.is_redelivered() {
            return Ok(());
        }
        let mut content = message.content.clone();
        content.is_root_scope = Some(true);
        self.ctx.publish("execute.start", content)
    }

    /// Cooperative discard of the running scope.
    pub fn discard(&mut self, message: &Message) -> Result<(), ActivityError> {
        self.behaviour.on_stop();
        let content = self
            .execute_message
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| message.content.clone());
        self.ctx.publish("execute.discard", content)
    }

    pub fn on_api_message(&mut self, message: &Message) -> Result<(), ActivityError> {
        let ctx = self.ctx.clone();
        self.behaviour.on_api_message(&ctx, message)
    }

    pub fn on_stop(&mut self) {
        self.behaviour.on_stop();
    }

    /// Handle one `execute-q` delivery.
    pub fn on_execute_message(&mut self, delivery: &Delivery) -> Result<(), ActivityError> {
        let message = &delivery.message;
        let key = message.routing_key().to_string();
        let rest = key.strip_prefix("execute.").unwrap_or(&key).to_string();
        let broker = self.ctx.broker().clone();
        debug!(routing_key = %key, "execution message");

        match rest.as_str() {
            // scope start stays unacked until the scope settles
            "start" => {
                let ctx = self.ctx.clone();
                self.behaviour.execute(&ctx, message)
            }
            "completed" if is_root_scope(message) => {
                self.completed = true;
                let content = self.effective_content(&message.content);
                self.forward(&broker, "execution.completed", content)?;
                self.settle(&broker);
                Ok(())
            }
            "error" => {
                self.completed = true;
                let content = self.effective_content(&message.content);
                self.forward(&broker, "execution.error", content)?;
                self.settle(&broker);
                Ok(())
            }
            "discard" if is_root_scope(message) => {
                self.completed = true;
                let content = self.effective_content(&message.content);
                self.forward(&broker, "execution.discard", content)?;
                self.settle(&broker);
                Ok(())
            }
            "outbound.take" => {
                let content = self.effective_content(&message.content);
                self.forward(&broker, "execution.outbound.take", content)?;
                broker.ack(EXECUTE_QUEUE, delivery.delivery_tag);
                Ok(())
            }
            _ => {
                // notifications surface as events; child scope-control
                // messages stay between the behaviour and its children
                let scope_control = rest.ends_with("completed") || rest.ends_with("discard");
                if !scope_control {
                    let content = self.effective_content(&message.content);
                    broker
                        .publish(
                            "event",
                            &format!("activity.{rest}"),
                            content,
                            Publish::transient(),
                        )
                        .map_err(|err| ActivityError::wrap("event publish failed", err))?;
                }
                let ctx = self.ctx.clone();
                self.behaviour.on_execute_message(&ctx, message)?;
                broker.ack(EXECUTE_QUEUE, delivery.delivery_tag);
                Ok(())
            }
        }
    }

    /// Merge the original `run.execute` content with an execution message's
    /// content, re-injecting the original execution id and parent.
    fn effective_content(&self, incoming: &Content) -> Content {
        let Some(original) = self.execute_message.as_ref() else {
            return incoming.clone();
        };
        let mut content = original.content.merged_with(incoming);
        content.execution_id = original.content.execution_id.clone();
        content.parent = original.content.parent.clone();
        content
    }

    fn forward(
        &self,
        broker: &crate::broker::Broker,
        routing_key: &str,
        content: Content,
    ) -> Result<(), ActivityError> {
        broker
            .publish(EXECUTION_EXCHANGE, routing_key, content, Publish::default())
            .map_err(|err| ActivityError::wrap("execution publish failed", err))
    }

    /// Ack everything on `execute-q` and drop the scope consumer.
    fn settle(&self, broker: &crate::broker::Broker) {
        broker.ack_all(EXECUTE_QUEUE, EXECUTE_CONSUMER);
        broker.cancel(EXECUTE_CONSUMER);
    }
}

fn is_root_scope(message: &Message) -> bool {
    message.content.is_root_scope != Some(false)
}

impl std::fmt::Debug for ActivityExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityExecution")
            .field("completed", &self.completed)
            .field("has_execute_message", &self.execute_message.is_some())
            .finish()
    }
}
