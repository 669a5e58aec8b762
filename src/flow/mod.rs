//! Flow elements and outbound evaluation.
//!
//! - [`SequenceFlow`]: a directed edge with an optional condition and
//!   default flag; publishes `flow.take|discard|shake` on its own broker
//! - [`Association`]: a compensation-only edge publishing `association.*`
//! - [`Trigger`]: discriminated inbound source (flow, association, or the
//!   attached-to activity of a boundary event)
//! - [`evaluate_outbound`]: picks which outbound flows are taken or
//!   discarded for one leave

mod association;
mod condition;
mod outbound;
mod sequence;
mod trigger;

pub use association::{Association, AssociationCounters, AssociationDef};
pub use condition::{is_truthy, FlowCondition};
pub use outbound::evaluate_outbound;
pub use sequence::{FlowCounters, SequenceFlow, SequenceFlowDef, SequenceFlowState};
pub use trigger::Trigger;
