//! Conditional outbound evaluation.
//!
//! Selects which outbound sequence flows are taken or discarded for one
//! leave. The default flow is evaluated last, unconditional flows are always
//! taken, and `discard_rest_at_take` gives exclusive-gateway semantics.

use uuid::Uuid;

use super::condition::is_truthy;
use super::SequenceFlow;
use crate::core::{ActivityError, FlowAction, Message, OutboundFlowAction};

/// Evaluate the outbound flows of one activity against a leave message.
///
/// Returns one action per flow in declaration order. Fails when a condition
/// errors, or when no flow was taken even though outbound flows exist.
pub fn evaluate_outbound(
    flows: &[SequenceFlow],
    message: &Message,
    discard_rest_at_take: bool,
) -> Result<Vec<OutboundFlowAction>, ActivityError> {
    if flows.is_empty() {
        return Ok(Vec::new());
    }

    let evaluation_id = Uuid::new_v4().to_string();

    // Work in declaration order with the default flow moved last.
    let mut order: Vec<usize> = (0..flows.len()).collect();
    if let Some(default_pos) = order.iter().position(|&i| flows[i].is_default()) {
        let default_idx = order.remove(default_pos);
        order.push(default_idx);
    }

    let mut actions: Vec<Option<OutboundFlowAction>> = vec![None; flows.len()];
    let mut taken = false;

    for &idx in &order {
        let flow = &flows[idx];
        let mut action = OutboundFlowAction::new(flow.id(), FlowAction::Take);
        action.is_default = flow.is_default();
        action.evaluation_id = Some(evaluation_id.clone());

        if taken && (discard_rest_at_take || flow.is_default()) {
            action.action = FlowAction::Discard;
        } else if let Some(condition) = flow.condition().filter(|_| !flow.is_default()) {
            let result = condition
                .execute(message)
                .map_err(|err| err.with_source(message.clone()))?;
            action.action = if is_truthy(&result) {
                FlowAction::Take
            } else {
                FlowAction::Discard
            };
            action.result = Some(result);
        }
        // default flow and unconditional flows keep the take action

        if action.action == FlowAction::Take {
            taken = true;
        }
        action.message = message.content.message.clone();
        actions[idx] = Some(action);
    }

    if !taken {
        return Err(
            ActivityError::new("no conditional flow taken").with_source(message.clone())
        );
    }

    Ok(actions.into_iter().map(|a| a.expect("every flow evaluated")).collect())
}
