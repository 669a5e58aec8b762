//! Snapshot and recovery: state round-trips through JSON, a fresh activity
//! picks up a mid-wait run, and recover is refused while running.

mod common;

use common::*;
use praxis::prelude::*;
use praxis::runtime::{ActivityState, EXECUTE_QUEUE};
use praxis::ActivityStatus;

fn build_task(flow_in: &SequenceFlow, flow_out: &SequenceFlow) -> Activity {
    ActivityBuilder::new(ActivityDef::new("task", "usertask"), user_task_factory())
        .inbound(vec![flow_in.clone()])
        .outbound(vec![flow_out.clone()])
        .build()
}

#[tokio::test]
async fn recover_mid_wait_then_resume_and_signal() {
    let model = linear_model(user_task_factory());
    let waiting = model.task.wait_for("activity.wait");
    model.start.run().unwrap();
    let wait_msg = waiting.await.unwrap();

    model.task.stop();
    let state = model.task.get_state();

    // serializability: the snapshot must survive a JSON round trip
    let json_state = serde_json::to_string(&state).unwrap();
    let state: ActivityState = serde_json::from_str(&json_state).unwrap();
    assert_eq!(state.status, Some(ActivityStatus::Executing));
    assert!(state.stopped);
    assert!(state.execution.is_some());

    // fresh instance over the same flows
    let fresh = build_task(&model.flow_in, &model.flow_out);
    fresh.recover(&state).unwrap();
    assert_eq!(fresh.status(), Some(ActivityStatus::Executing));
    assert_eq!(fresh.execution_id(), state.execution_id);
    assert_eq!(
        fresh.broker().message_count("run-q"),
        model.task.broker().message_count("run-q"),
        "residual run queue survives the round trip"
    );
    let head = fresh.broker().peek("run-q").unwrap();
    assert_eq!(head.fields.routing_key, "run.execute");
    assert!(head.fields.redelivered);

    let rewaiting = fresh.wait_for("activity.wait");
    let leaving = fresh.wait_for("activity.leave");
    fresh.resume().unwrap();
    rewaiting.await.unwrap();

    fresh
        .get_api(Some(&wait_msg))
        .signal(Some(json!({"recovered": true})))
        .unwrap();
    let leave = leaving.await.unwrap();
    assert_eq!(leave.content.output, Some(json!({"recovered": true})));
    assert_eq!(leave.content.execution_id, state.execution_id);
    assert_eq!(fresh.counters().taken, 1);
    assert_eq!(fresh.broker().message_count(EXECUTE_QUEUE), 0);

    // the recovered run drives the original outbound flow
    assert_eq!(model.flow_out.counters().take, 1);
}

#[tokio::test]
async fn counters_survive_recovery() {
    let model = linear_model(user_task_factory());

    // complete one run
    let waiting = model.task.wait_for("activity.wait");
    let leaving = model.task.wait_for("activity.leave");
    model.start.run().unwrap();
    let wait_msg = waiting.await.unwrap();
    model
        .task
        .get_api(Some(&wait_msg))
        .signal(Some(json!(1)))
        .unwrap();
    leaving.await.unwrap();

    let state = model.task.get_state();
    assert_eq!(state.counters.taken, 1);
    assert!(state.status.is_none());
    assert!(state.execution_id.is_none());

    let fresh = build_task(&model.flow_in, &model.flow_out);
    fresh.recover(&state).unwrap();
    assert_eq!(fresh.counters().taken, 1);

    // a new run gets a new execution id
    let waiting = fresh.wait_for("activity.wait");
    fresh.resume().unwrap();
    fresh.run().unwrap();
    let wait_msg2 = waiting.await.unwrap();
    assert_ne!(wait_msg2.content.execution_id, wait_msg.content.execution_id);
}

#[tokio::test]
async fn recover_while_running_is_refused() {
    let model = linear_model(user_task_factory());
    let waiting = model.task.wait_for("activity.wait");
    model.start.run().unwrap();
    waiting.await.unwrap();

    let state = model.task.get_state();
    let err = model.task.recover(&state).unwrap_err();
    assert!(err.to_string().contains("cannot recover"));
}

#[tokio::test]
async fn snapshot_inlines_truthy_flags_only() {
    let flow_out = SequenceFlow::new(SequenceFlowDef::new("out", "start", "next"));
    let start = ActivityBuilder::new(
        ActivityDef::new("start", "startevent"),
        passthrough_factory(),
    )
    .outbound(vec![flow_out])
    .build();

    let value = serde_json::to_value(start.get_state()).unwrap();
    let obj = value.as_object().unwrap();
    assert_eq!(obj["is_start"], serde_json::Value::Bool(true));
    assert!(!obj.contains_key("is_end"));
    assert!(!obj.contains_key("is_parallel_join"));
    assert!(!obj.contains_key("stopped"));
}
