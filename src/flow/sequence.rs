use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::condition::FlowCondition;
use crate::broker::{Broker, EventApi, ExchangeKind};
use crate::core::{Content, FlowAction, Publish, Result, ShakeVisit};

/// Static definition of a sequence flow.
#[derive(Clone)]
pub struct SequenceFlowDef {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub element_type: String,
    pub is_default: bool,
    pub condition: Option<Arc<dyn FlowCondition>>,
}

impl SequenceFlowDef {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            element_type: "sequenceflow".to_string(),
            is_default: false,
            condition: None,
        }
    }

    pub fn default_flow(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_condition(mut self, condition: impl FlowCondition + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }
}

/// Per-flow counters, monotone over the flow's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCounters {
    pub take: u64,
    pub discard: u64,
    pub looped: u64,
}

/// Serializable flow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceFlowState {
    pub id: String,
    pub counters: FlowCounters,
}

struct FlowInner {
    counters: FlowCounters,
}

/// A directed edge between activities.
///
/// Each flow owns a small broker with a single `event` exchange; taking,
/// discarding, and shaking publish `flow.*` messages that downstream
/// activities funnel into their inbound queues.
#[derive(Clone)]
pub struct SequenceFlow {
    def: Arc<SequenceFlowDef>,
    inner: Arc<Mutex<FlowInner>>,
    broker: Broker,
}

impl SequenceFlow {
    pub fn new(def: SequenceFlowDef) -> Self {
        let broker = Broker::new();
        broker.assert_exchange("event", ExchangeKind::Topic);
        Self {
            def: Arc::new(def),
            inner: Arc::new(Mutex::new(FlowInner {
                counters: FlowCounters::default(),
            })),
            broker,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlowInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn source_id(&self) -> &str {
        &self.def.source_id
    }

    pub fn target_id(&self) -> &str {
        &self.def.target_id
    }

    pub fn element_type(&self) -> &str {
        &self.def.element_type
    }

    pub fn is_default(&self) -> bool {
        self.def.is_default
    }

    pub fn condition(&self) -> Option<Arc<dyn FlowCondition>> {
        self.def.condition.clone()
    }

    pub fn counters(&self) -> FlowCounters {
        self.lock().counters
    }

    pub fn broker(&self) -> Broker {
        self.broker.clone()
    }

    pub fn event_api(&self) -> EventApi {
        EventApi::new(self.broker.clone())
    }

    fn message_content(&self, base: Content, action: FlowAction) -> Content {
        Content {
            id: Some(self.def.id.clone()),
            element_type: Some(self.def.element_type.clone()),
            action: Some(action),
            ..base
        }
    }

    /// Take the flow: signal the target activity to run.
    pub fn take(&self, content: Content) -> Result<()> {
        self.lock().counters.take += 1;
        debug!(flow = %self.def.id, "take");
        self.broker.publish(
            "event",
            "flow.take",
            self.message_content(content, FlowAction::Take),
            Publish::default().with_type("take"),
        )
    }

    /// Discard the flow, appending this flow's id to the discard sequence.
    ///
    /// A discard whose sequence already contains this flow is a loop; it is
    /// reported as `flow.looped` and not propagated.
    pub fn discard(&self, mut content: Content) -> Result<()> {
        let sequence = content.discard_sequence.get_or_insert_with(Vec::new);
        if sequence.iter().any(|id| id == &self.def.id) {
            self.lock().counters.looped += 1;
            return self.broker.publish(
                "event",
                "flow.looped",
                self.message_content(content, FlowAction::Discard),
                Publish::transient().with_type("looped"),
            );
        }
        sequence.push(self.def.id.clone());
        self.lock().counters.discard += 1;
        debug!(flow = %self.def.id, "discard");
        self.broker.publish(
            "event",
            "flow.discard",
            self.message_content(content, FlowAction::Discard),
            Publish::default().with_type("discard"),
        )
    }

    /// Continue a shake traversal over this flow. Shake messages are
    /// transient.
    pub fn shake(&self, mut content: Content) -> Result<()> {
        content.sequence.get_or_insert_with(Vec::new).push(ShakeVisit {
            id: self.def.id.clone(),
            element_type: self.def.element_type.clone(),
        });
        self.broker.publish(
            "event",
            "flow.shake",
            self.message_content(content, FlowAction::Take),
            Publish::transient().with_type("shake"),
        )
    }

    pub fn get_state(&self) -> SequenceFlowState {
        SequenceFlowState {
            id: self.def.id.clone(),
            counters: self.lock().counters,
        }
    }

    pub fn recover(&self, state: &SequenceFlowState) {
        self.lock().counters = state.counters;
    }
}

impl std::fmt::Debug for SequenceFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceFlow")
            .field("id", &self.def.id)
            .field("source_id", &self.def.source_id)
            .field("target_id", &self.def.target_id)
            .field("is_default", &self.def.is_default)
            .finish()
    }
}
