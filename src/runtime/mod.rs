//! Activity runtime: the message-driven state machine and its satellites.
//!
//! # Entry points
//! - [`Activity`] / [`ActivityBuilder`]: the per-node state machine
//! - [`ActivityBehaviour`] / [`BehaviourContext`]: the pluggable executor
//!   contract
//! - [`ActivityApi`]: external handle for signal/discard/stop/shake
//!
//! # Satellites
//! - [`ActivityExecution`]: per-run holder driving the behaviour
//! - [`Extensions`]: activate/deactivate adapter around the run lifecycle
//! - [`formatter`]: format-fragment chains amending run-message content
//! - [`ActivityState`]: the serializable snapshot shape

mod activity;
mod api;
mod behaviour;
mod execution;
mod extensions;
pub mod formatter;
mod state;

pub use activity::{Activity, ActivityBuilder, ActivityDef, ActivityFlags, ActivityLookup};
pub use api::ActivityApi;
pub use behaviour::{
    passthrough_factory, ActivityBehaviour, BehaviourContext, BehaviourFactory,
    PassthroughBehaviour,
};
pub use execution::{ActivityExecution, EXECUTE_CONSUMER, EXECUTE_QUEUE};
pub use extensions::Extensions;
pub use state::{ActivityCounters, ActivityState, ActivityStatus, ExecutionSnapshot};
