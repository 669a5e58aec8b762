//! Outbound dispatch scenarios: conditional flows, default flows, take-one
//! short-circuit, the no-flow-taken error, precomputed outbound hints via
//! the passthrough path, and ignored outbound.

mod common;

use common::*;
use praxis::prelude::*;
use praxis::runtime::BehaviourFactory;
use praxis::{FlowAction, Message, OutboundFlowAction};
use std::sync::Arc;

fn conditional_flow(id: &str, source: &str, target: &str, value: Value) -> SequenceFlow {
    SequenceFlow::new(
        SequenceFlowDef::new(id, source, target)
            .with_condition(move |_: &Message| Ok(value.clone())),
    )
}

#[tokio::test]
async fn conditional_outbound_takes_and_discards() {
    let yes = conditional_flow("yes", "gw", "a", json!(true));
    let no = conditional_flow("no", "gw", "b", json!(false));
    let gw = ActivityBuilder::new(
        ActivityDef::new("gw", "inclusivegateway"),
        passthrough_factory(),
    )
    .outbound(vec![yes.clone(), no.clone()])
    .build();

    let leaving = gw.wait_for("activity.leave");
    gw.run().unwrap();
    leaving.await.unwrap();

    assert_eq!(yes.counters().take, 1);
    assert_eq!(yes.counters().discard, 0);
    assert_eq!(no.counters().take, 0);
    assert_eq!(no.counters().discard, 1);
}

#[tokio::test]
async fn default_flow_taken_when_all_conditions_fail() {
    let cond = conditional_flow("cond", "gw", "a", json!(false));
    let default = SequenceFlow::new(SequenceFlowDef::new("default", "gw", "b").default_flow());
    let gw = ActivityBuilder::new(
        ActivityDef::new("gw", "exclusivegateway"),
        passthrough_factory(),
    )
    .outbound(vec![cond.clone(), default.clone()])
    .build();

    let leaving = gw.wait_for("activity.leave");
    gw.run().unwrap();
    leaving.await.unwrap();

    assert_eq!(default.counters().take, 1);
    assert_eq!(cond.counters().discard, 1);
}

#[tokio::test]
async fn take_one_discards_remaining_flows() {
    let first = conditional_flow("first", "gw", "a", json!(true));
    let second = conditional_flow("second", "gw", "b", json!(true));
    let gw = ActivityBuilder::new(
        ActivityDef::new("gw", "exclusivegateway"),
        passthrough_factory(),
    )
    .outbound(vec![first.clone(), second.clone()])
    .build();

    let leaving = gw.wait_for("activity.leave");
    let mut content = Content::default();
    content.outbound_take_one = Some(true);
    gw.run_with(Some(content)).unwrap();
    leaving.await.unwrap();

    assert_eq!(first.counters().take, 1);
    assert_eq!(second.counters().take, 0);
    assert_eq!(second.counters().discard, 1);
}

#[tokio::test]
async fn no_flow_taken_raises_activity_error() {
    let a = conditional_flow("a", "gw", "x", json!(false));
    let b = conditional_flow("b", "gw", "y", json!(false));
    let gw = ActivityBuilder::new(
        ActivityDef::new("gw", "exclusivegateway"),
        passthrough_factory(),
    )
    .outbound(vec![a.clone(), b.clone()])
    .build();

    let erroring = gw.wait_for("activity.error");
    gw.run().unwrap();
    let error_event = erroring.await.unwrap();
    let error = error_event.content.error.expect("error payload");
    assert_eq!(error.message, "no conditional flow taken");

    assert_eq!(a.counters().take, 0);
    assert_eq!(b.counters().take, 0);
}

/// Gateway-style behaviour that asks for outbound resolution before
/// completing, exercising `execute.outbound.take` and the passthrough path.
struct HintingGateway {
    take: String,
}

impl ActivityBehaviour for HintingGateway {
    fn execute(
        &mut self,
        ctx: &BehaviourContext,
        message: &Message,
    ) -> Result<(), ActivityError> {
        if message.content.outbound.is_some() {
            // second pass: outbound resolved, complete with it
            ctx.complete(message.content.clone(), None)
        } else {
            let mut content = message.content.clone();
            content.outbound = Some(vec![OutboundFlowAction::new(
                self.take.clone(),
                FlowAction::Take,
            )]);
            ctx.take_outbound(content)
        }
    }
}

#[tokio::test]
async fn outbound_hints_flow_through_passthrough() {
    let left = SequenceFlow::new(SequenceFlowDef::new("left", "gw", "a"));
    let right = SequenceFlow::new(SequenceFlowDef::new("right", "gw", "b"));
    let factory: BehaviourFactory = Arc::new(|| {
        Box::new(HintingGateway {
            take: "right".to_string(),
        })
    });
    let gw = ActivityBuilder::new(ActivityDef::new("gw", "exclusivegateway"), factory)
        .outbound(vec![left.clone(), right.clone()])
        .build();

    let leaving = gw.wait_for("activity.leave");
    gw.run().unwrap();
    leaving.await.unwrap();

    assert_eq!(right.counters().take, 1);
    assert_eq!(left.counters().take, 0);
    assert_eq!(left.counters().discard, 1, "unhinted flows are discarded");
    assert_eq!(gw.counters().taken, 1);
    assert_eq!(gw.broker().message_count("run-q"), 0);
}

#[tokio::test]
async fn ignore_outbound_leaves_without_dispatch() {
    let out = SequenceFlow::new(SequenceFlowDef::new("out", "task", "next"));
    let task = ActivityBuilder::new(
        ActivityDef::new("task", "manualtask"),
        passthrough_factory(),
    )
    .outbound(vec![out.clone()])
    .build();

    let leaving = task.wait_for("activity.leave");
    let mut content = Content::default();
    content.ignore_outbound = Some(true);
    task.run_with(Some(content)).unwrap();
    leaving.await.unwrap();

    assert_eq!(out.counters().take, 0);
    assert_eq!(out.counters().discard, 0);
    assert_eq!(task.counters().taken, 1);
}

#[tokio::test]
async fn condition_error_surfaces_as_activity_error() {
    let failing = SequenceFlow::new(
        SequenceFlowDef::new("bad", "gw", "x")
            .with_condition(|_: &Message| Err(ActivityError::new("condition blew up"))),
    );
    let gw = ActivityBuilder::new(
        ActivityDef::new("gw", "exclusivegateway"),
        passthrough_factory(),
    )
    .outbound(vec![failing])
    .build();

    let erroring = gw.wait_for("activity.error");
    gw.run().unwrap();
    let error_event = erroring.await.unwrap();
    assert_eq!(error_event.content.error.unwrap().message, "condition blew up");
}

#[tokio::test]
async fn outbound_is_dispatched_in_declaration_order() {
    let f1 = SequenceFlow::new(SequenceFlowDef::new("f1", "fork", "a"));
    let f2 = SequenceFlow::new(SequenceFlowDef::new("f2", "fork", "b"));
    let f3 = SequenceFlow::new(SequenceFlowDef::new("f3", "fork", "c"));
    let fork = ActivityBuilder::new(
        ActivityDef::new("fork", "parallelgateway"),
        passthrough_factory(),
    )
    .outbound(vec![f1.clone(), f2.clone(), f3.clone()])
    .build();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    for flow in [&f1, &f2, &f3] {
        let order_in = Arc::clone(&order);
        flow.event_api()
            .on("flow.take", move |message| {
                order_in
                    .lock()
                    .unwrap()
                    .push(message.content.id.clone().unwrap());
            })
            .unwrap();
    }

    let leaving = fork.wait_for("activity.leave");
    fork.run().unwrap();
    leaving.await.unwrap();

    assert_eq!(order.lock().unwrap().as_slice(), ["f1", "f2", "f3"]);
}

#[tokio::test]
async fn no_flow_taken_keeps_wait_for_pending_on_other_events() {
    // a failed evaluation must not produce a leave
    let a = conditional_flow("a", "gw", "x", json!(false));
    let gw = ActivityBuilder::new(
        ActivityDef::new("gw", "exclusivegateway"),
        passthrough_factory(),
    )
    .outbound(vec![a])
    .build();
    let events = record_events(&gw);
    let erroring = gw.wait_for("activity.error");
    gw.run().unwrap();
    erroring.await.unwrap();
    assert!(!event_keys(&events).contains(&"activity.leave".to_string()));
}
