use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ActivityError;

/// Which way a sequence flow went for one leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowAction {
    Take,
    Discard,
}

impl FlowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowAction::Take => "take",
            FlowAction::Discard => "discard",
        }
    }
}

/// Resolved action for one outbound flow, produced by the outbound evaluator
/// or adopted from a precomputed `outbound` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFlowAction {
    pub id: String,
    pub action: FlowAction,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,
    /// The value the flow condition evaluated to, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<String>,
    /// Per-flow unique id stamped at dispatch, derived from `flowId_action`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl OutboundFlowAction {
    pub fn new(id: impl Into<String>, action: FlowAction) -> Self {
        Self {
            id: id.into(),
            action,
            is_default: false,
            result: None,
            evaluation_id: None,
            sequence_id: None,
            message: None,
        }
    }
}

/// One visited element in a shake traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShakeVisit {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: String,
}

/// Identity of the element a message belongs under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

/// Message content.
///
/// The well-known fields the runtime reads and writes are typed; anything a
/// behaviour or a host adds on top rides along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Parent>,
    /// Action carried by flow-level messages (`flow.take`, `flow.discard`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<FlowAction>,
    /// Inbound message contents a run was triggered with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound: Option<Vec<Content>>,
    /// Precomputed or evaluated outbound actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound: Option<Vec<OutboundFlowAction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discard_sequence: Option<Vec<String>>,
    /// Visited elements of a shake traversal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Vec<ShakeVisit>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_outbound: Option<bool>,
    /// Exclusive-gateway semantics: discard the rest once one flow is taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_take_one: Option<bool>,
    /// Marks the root execution scope; child scopes set this to `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_root_scope: Option<bool>,
    /// Payload of an api signal or of an evaluator source message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActivityError>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Content {
    /// Overlay `other` on top of `self`: set fields in `other` win, extras
    /// are merged key by key.
    pub fn merged_with(&self, other: &Content) -> Content {
        let mut out = self.clone();
        macro_rules! take_if_set {
            ($($field:ident),+ $(,)?) => {
                $(if other.$field.is_some() {
                    out.$field = other.$field.clone();
                })+
            };
        }
        take_if_set!(
            id,
            element_type,
            name,
            execution_id,
            parent,
            action,
            inbound,
            outbound,
            discard_sequence,
            sequence,
            sequence_id,
            ignore_outbound,
            outbound_take_one,
            is_root_scope,
            message,
            output,
            error,
        );
        for (key, value) in &other.extra {
            out.extra.insert(key.clone(), value.clone());
        }
        out
    }
}

/// Delivery-level fields stamped by the broker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageFields {
    pub routing_key: String,
    pub exchange: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub redelivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_tag: Option<String>,
}

/// Publish-time properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageProperties {
    pub message_id: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Persistent messages participate in snapshots and recover.
    pub persistent: bool,
    /// Mandatory messages that route to no queue are surfaced as returns.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mandatory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl Default for MessageProperties {
    fn default() -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            message_type: None,
            correlation_id: None,
            persistent: true,
            mandatory: false,
            priority: None,
            timestamp: Utc::now(),
        }
    }
}

/// Options for a single publish.
#[derive(Debug, Clone)]
pub struct Publish {
    pub persistent: bool,
    pub mandatory: bool,
    pub message_type: Option<String>,
    pub correlation_id: Option<String>,
    pub priority: Option<u32>,
}

impl Default for Publish {
    fn default() -> Self {
        Self {
            persistent: true,
            mandatory: false,
            message_type: None,
            correlation_id: None,
            priority: None,
        }
    }
}

impl Publish {
    /// Transient messages are dropped from snapshots and from recover.
    pub fn transient() -> Self {
        Self {
            persistent: false,
            ..Self::default()
        }
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub(crate) fn into_properties(self) -> MessageProperties {
        MessageProperties {
            message_id: uuid::Uuid::new_v4().to_string(),
            message_type: self.message_type,
            correlation_id: self.correlation_id,
            persistent: self.persistent,
            mandatory: self.mandatory,
            priority: self.priority,
            timestamp: Utc::now(),
        }
    }
}

/// A routed message as seen by a consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub fields: MessageFields,
    pub content: Content,
    pub properties: MessageProperties,
}

impl Message {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        content: Content,
        properties: MessageProperties,
    ) -> Self {
        Self {
            fields: MessageFields {
                routing_key: routing_key.into(),
                exchange: exchange.into(),
                redelivered: false,
                consumer_tag: None,
            },
            content,
            properties,
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.fields.routing_key
    }

    pub fn is_redelivered(&self) -> bool {
        self.fields.redelivered
    }

    /// Last segment of the routing key, e.g. `wait` for `execute.wait`.
    pub fn key_suffix(&self) -> &str {
        self.fields
            .routing_key
            .rsplit('.')
            .next()
            .unwrap_or(&self.fields.routing_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merged_with_overlays_set_fields_and_extras() {
        let mut base = Content {
            id: Some("task".to_string()),
            execution_id: Some("task_1".to_string()),
            ..Content::default()
        };
        base.extra.insert("kept".to_string(), json!(1));

        let mut overlay = Content {
            output: Some(json!({"data": 1})),
            ..Content::default()
        };
        overlay.extra.insert("added".to_string(), json!(2));

        let merged = base.merged_with(&overlay);
        assert_eq!(merged.id.as_deref(), Some("task"));
        assert_eq!(merged.execution_id.as_deref(), Some("task_1"));
        assert_eq!(merged.output, Some(json!({"data": 1})));
        assert_eq!(merged.extra["kept"], json!(1));
        assert_eq!(merged.extra["added"], json!(2));
    }

    #[test]
    fn key_suffix_takes_last_segment() {
        let msg = Message::new(
            "execution",
            "execute.wait",
            Content::default(),
            MessageProperties::default(),
        );
        assert_eq!(msg.key_suffix(), "wait");
    }

    #[test]
    fn transient_publish_is_not_persistent() {
        let props = Publish::transient().into_properties();
        assert!(!props.persistent);
    }

    #[test]
    fn default_flags_are_omitted_from_serialized_content() {
        let content = Content {
            id: Some("gw".to_string()),
            ..Content::default()
        };
        let value = serde_json::to_value(&content).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("id"));
        assert!(!obj.contains_key("outbound"));
        assert!(!obj.contains_key("ignore_outbound"));
    }
}
