use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::broker::{Broker, ExchangeKind};
use crate::core::{Content, FlowAction, Publish, Result};

/// Static definition of a compensation association.
#[derive(Debug, Clone)]
pub struct AssociationDef {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
}

impl AssociationDef {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationCounters {
    pub take: u64,
    pub discard: u64,
}

struct AssociationInner {
    counters: AssociationCounters,
}

/// A compensation-only directed edge feeding a compensation activity.
///
/// Mirrors [`SequenceFlow`](super::SequenceFlow) with `association.*`
/// routing keys; `complete` signals that the compensation phase is over.
#[derive(Clone)]
pub struct Association {
    def: Arc<AssociationDef>,
    inner: Arc<Mutex<AssociationInner>>,
    broker: Broker,
}

impl Association {
    pub fn new(def: AssociationDef) -> Self {
        let broker = Broker::new();
        broker.assert_exchange("event", ExchangeKind::Topic);
        Self {
            def: Arc::new(def),
            inner: Arc::new(Mutex::new(AssociationInner {
                counters: AssociationCounters::default(),
            })),
            broker,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AssociationInner> {
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

    pub fn counters(&self) -> AssociationCounters {
        self.lock().counters
    }

    pub fn broker(&self) -> Broker {
        self.broker.clone()
    }

    fn message_content(&self, base: Content, action: Option<FlowAction>) -> Content {
        Content {
            id: Some(self.def.id.clone()),
            element_type: Some("association".to_string()),
            action,
            ..base
        }
    }

    pub fn take(&self, content: Content) -> Result<()> {
        self.lock().counters.take += 1;
        self.broker.publish(
            "event",
            "association.take",
            self.message_content(content, Some(FlowAction::Take)),
            Publish::default().with_type("take"),
        )
    }

    pub fn discard(&self, content: Content) -> Result<()> {
        self.lock().counters.discard += 1;
        self.broker.publish(
            "event",
            "association.discard",
            self.message_content(content, Some(FlowAction::Discard)),
            Publish::default().with_type("discard"),
        )
    }

    /// Signal that the compensated scope completed and the target may wrap
    /// up its compensation run.
    pub fn complete(&self, content: Content) -> Result<()> {
        self.broker.publish(
            "event",
            "association.complete",
            self.message_content(content, None),
            Publish::default().with_type("complete"),
        )
    }
}

impl std::fmt::Debug for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Association")
            .field("id", &self.def.id)
            .field("source_id", &self.def.source_id)
            .field("target_id", &self.def.target_id)
            .finish()
    }
}
