//! Praxis: message-driven activity runtime
//!
//! `praxis` (πρᾶξις, Greek for "action") is the activity runtime core of a
//! workflow execution engine: a per-activity topic broker, a multi-phase
//! activity state machine driven by durable message queues, and a
//! conditional outbound evaluator.
//!
//! # Features
//!
//! - **Per-activity broker**: topic exchanges, durable and transient queues,
//!   acknowledgement, redelivery, consumer tags, purge, and serializable
//!   snapshots
//! - **Durable lifecycle**: `enter → start → execute → end → leave` with
//!   discard, error, and resume branches, all driven off the run queue
//! - **Stop / resume / recover**: unacked messages return to their queues
//!   and are redelivered, so an activity picks up exactly where it left off
//! - **Pluggable behaviours**: executors conforming to the
//!   [`ActivityBehaviour`] contract drive waits, signals, and loops
//! - **Outbound evaluation**: default-flow, take-one, and no-flow-taken
//!   semantics over conditional sequence flows
//!
//! # Quick start
//!
//! ```ignore
//! use praxis::prelude::*;
//!
//! let task = ActivityBuilder::new(
//!     ActivityDef::new("task", "manualtask"),
//!     passthrough_factory(),
//! )
//! .build();
//!
//! let left = task.wait_for("activity.leave");
//! task.run()?;
//! left.await?;
//! ```
//!
//! # Module organization
//!
//! Each module hides a design decision that is likely to change:
//!
//! - [`core`]: message model and error taxonomy (hides content encoding)
//! - [`broker`]: queues, routing, and delivery (hides broker internals)
//! - [`flow`]: flow elements and outbound evaluation (hides condition
//!   plumbing)
//! - [`runtime`]: the activity state machine (hides transition mechanics)

pub mod broker;
pub mod core;
pub mod flow;
pub mod runtime;

// Re-export commonly used types for convenience
pub use crate::core::{
    broker_safe_id, ActivityError, Content, Environment, Error, FlowAction, Message,
    OutboundFlowAction, Parent, Publish, Result as CoreResult, Settings,
};

pub use broker::{
    Broker, BrokerSnapshot, Delivery, EventApi, EventFuture, ExchangeKind, QueueOptions,
    SubscribeOptions,
};

pub use flow::{
    evaluate_outbound, Association, AssociationDef, FlowCondition, SequenceFlow, SequenceFlowDef,
    Trigger,
};

pub use runtime::{
    passthrough_factory, Activity, ActivityApi, ActivityBehaviour, ActivityBuilder,
    ActivityCounters, ActivityDef, ActivityState, ActivityStatus, BehaviourContext,
    BehaviourFactory, Extensions, PassthroughBehaviour,
};

// Re-export dependencies used in the public API so embedders do not hit
// version mismatches
pub use serde_json;
pub use tokio;
pub use uuid;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```ignore
/// use praxis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::broker::{Broker, EventApi, ExchangeKind, QueueOptions, SubscribeOptions};
    pub use crate::core::{
        ActivityError, Content, Environment, FlowAction, Message, Publish, Settings,
    };
    pub use crate::flow::{Association, AssociationDef, SequenceFlow, SequenceFlowDef};
    pub use crate::runtime::{
        passthrough_factory, Activity, ActivityBehaviour, ActivityBuilder, ActivityDef,
        BehaviourContext, PassthroughBehaviour,
    };
    pub use serde_json::{json, Value};
}
