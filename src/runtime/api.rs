use serde_json::Value;

use crate::broker::Broker;
use crate::core::{broker_safe_id, Content, Publish, Result};

/// Handle for poking a running activity from the outside.
///
/// Api messages are published on the activity's `api` exchange with routing
/// key `activity.<type>.<executionId>`; the activity's api consumer routes
/// them by type. Obtained from `Activity::get_api`.
#[derive(Clone)]
pub struct ActivityApi {
    broker: Broker,
    content: Content,
}

impl ActivityApi {
    pub(crate) fn new(broker: Broker, content: Content) -> Self {
        Self { broker, content }
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.content.execution_id.as_deref()
    }

    fn publish_api(&self, api_type: &str, message: Option<Value>) -> Result<()> {
        let execution_id = self.content.execution_id.clone().unwrap_or_default();
        let routing_key = format!("activity.{}.{}", api_type, broker_safe_id(&execution_id));
        let mut content = self.content.clone();
        content.message = message;
        self.broker.publish(
            "api",
            routing_key,
            content,
            Publish::transient().with_type(api_type),
        )
    }

    /// Signal the running execution, typically completing a wait.
    pub fn signal(&self, message: Option<Value>) -> Result<()> {
        self.publish_api("signal", message)
    }

    pub fn discard(&self) -> Result<()> {
        self.publish_api("discard", None)
    }

    pub fn stop(&self) -> Result<()> {
        self.publish_api("stop", None)
    }

    pub fn shake(&self) -> Result<()> {
        self.publish_api("shake", None)
    }
}

impl std::fmt::Debug for ActivityApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityApi")
            .field("id", &self.content.id)
            .field("execution_id", &self.content.execution_id)
            .finish()
    }
}
