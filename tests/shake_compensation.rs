//! Shake traversal and compensation: dry-run graph walks, loop detection,
//! shake idempotence, boundary-event triggering, and the compensation
//! start/end protocol.

mod common;

use common::*;
use praxis::prelude::*;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn shake_walks_the_graph_to_the_end() {
    let model = linear_model(user_task_factory());
    let shaken = model.end.wait_for("activity.shake.end");

    model.start.shake();

    let end_event = shaken.await.unwrap();
    let ids: Vec<String> = end_event
        .content
        .sequence
        .unwrap()
        .into_iter()
        .map(|visit| visit.id)
        .collect();
    assert_eq!(ids, ["start", "to-task", "task", "to-end", "end"]);

    // nothing executed
    assert!(model.task.status().is_none());
    assert_eq!(model.task.counters().taken, 0);
    assert_eq!(model.task.broker().message_count("run-q"), 0);
}

#[tokio::test]
async fn shake_is_idempotent_across_runs() {
    let model = linear_model(user_task_factory());
    let sequences = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sequences);
    model
        .end
        .on("activity.shake.end", move |message| {
            let ids: Vec<String> = message
                .content
                .sequence
                .unwrap_or_default()
                .into_iter()
                .map(|visit| visit.id)
                .collect();
            sink.lock().unwrap().push(ids);
        })
        .unwrap();

    model.start.shake();
    model.start.shake();

    let sequences = sequences.lock().unwrap();
    assert_eq!(sequences.len(), 2);
    assert_eq!(sequences[0], sequences[1]);
}

#[tokio::test]
async fn shake_reports_loops_instead_of_recursing() {
    let forward = SequenceFlow::new(SequenceFlowDef::new("forward", "a", "b"));
    let back = SequenceFlow::new(SequenceFlowDef::new("back", "b", "a"));
    let a = ActivityBuilder::new(ActivityDef::new("a", "task"), passthrough_factory())
        .inbound(vec![back.clone()])
        .outbound(vec![forward.clone()])
        .build();
    let _b = ActivityBuilder::new(ActivityDef::new("b", "task"), passthrough_factory())
        .inbound(vec![forward])
        .outbound(vec![back])
        .build();

    let looped = a.wait_for("activity.shake.loop");
    a.shake();
    let loop_event = looped.await.unwrap();
    let ids: Vec<String> = loop_event
        .content
        .sequence
        .unwrap()
        .into_iter()
        .map(|visit| visit.id)
        .collect();
    assert!(ids.contains(&"a".to_string()));
    assert!(ids.contains(&"b".to_string()));
}

#[tokio::test]
async fn boundary_event_runs_when_its_host_enters() {
    let host = ActivityBuilder::new(
        ActivityDef::new("host", "usertask"),
        user_task_factory(),
    )
    .build();
    let boundary = ActivityBuilder::new(
        ActivityDef::new("boundary", "boundaryevent"),
        passthrough_factory(),
    )
    .attached_to(&host)
    .build();
    boundary.activate();
    assert_eq!(boundary.flags().attached_to.as_deref(), Some("host"));
    assert!(!boundary.flags().is_start);

    let boundary_left = boundary.wait_for("activity.leave");
    host.run().unwrap();
    boundary_left.await.unwrap();
    assert_eq!(boundary.counters().taken, 1);
}

#[tokio::test]
async fn compensation_runs_on_association_complete() {
    let association = Association::new(AssociationDef::new("assoc", "doer", "undoer"));
    let mut def = ActivityDef::new("undoer", "servicetask");
    def.is_for_compensation = true;
    let undoer = ActivityBuilder::new(def, passthrough_factory())
        .associations(vec![association.clone()])
        .build();
    assert!(undoer.flags().is_for_compensation);
    assert!(!undoer.flags().is_start);

    let events = record_events(&undoer);

    // taken compensation work queues up but does not run yet
    association.take(Content::default()).unwrap();
    assert!(event_keys(&events).is_empty());
    assert_eq!(undoer.counters().taken, 0);

    // completion of the compensated scope triggers the run
    let mut complete_content = Content::default();
    complete_content.sequence_id = Some("seq-1".to_string());
    association.complete(complete_content).unwrap();

    let keys = event_keys(&events);
    assert_eq!(keys.first().map(String::as_str), Some("compensation.start"));
    assert!(keys.contains(&"activity.enter".to_string()));
    assert!(keys.contains(&"activity.leave".to_string()));
    assert_eq!(
        keys.last().map(String::as_str),
        Some("compensation.end"),
        "compensation ends after the run completes"
    );
    assert_eq!(undoer.counters().taken, 1);

    let start = find_event(&events, "compensation.start").unwrap();
    let end = find_event(&events, "compensation.end").unwrap();
    assert_eq!(
        start.content.extra.get("compensation_id"),
        end.content.extra.get("compensation_id"),
    );
    assert_eq!(
        start.content.extra.get("compensation_id"),
        Some(&json!("undoer_seq-1"))
    );
}

#[tokio::test]
async fn association_discard_purges_queued_inbound() {
    let association = Association::new(AssociationDef::new("assoc", "doer", "undoer"));
    let mut def = ActivityDef::new("undoer", "servicetask");
    def.is_for_compensation = true;
    let undoer = ActivityBuilder::new(def, passthrough_factory())
        .associations(vec![association.clone()])
        .build();

    association.take(Content::default()).unwrap();
    assert_eq!(undoer.broker().message_count("inbound-q"), 1);

    association.discard(Content::default()).unwrap();
    assert_eq!(undoer.broker().message_count("inbound-q"), 0);
}
