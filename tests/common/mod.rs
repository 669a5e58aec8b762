//! Shared fixtures for the integration tests: a user-task behaviour that
//! waits for an external signal, an event recorder, and a linear
//! start → task → end model.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use praxis::prelude::*;
use praxis::runtime::BehaviourFactory;
use praxis::Message;

/// Waits for an external signal and completes with the signal payload as
/// output. Re-waits when its start message is redelivered after a resume.
pub struct UserTaskBehaviour;

impl ActivityBehaviour for UserTaskBehaviour {
    fn execute(
        &mut self,
        ctx: &BehaviourContext,
        message: &Message,
    ) -> Result<(), ActivityError> {
        ctx.wait(message.content.clone())
    }

    fn on_api_message(
        &mut self,
        ctx: &BehaviourContext,
        message: &Message,
    ) -> Result<(), ActivityError> {
        let output = message.content.message.clone();
        ctx.complete(message.content.clone(), output)
    }
}

pub fn user_task_factory() -> BehaviourFactory {
    Arc::new(|| Box::new(UserTaskBehaviour))
}

/// Record every event an activity publishes, in publish order.
pub fn record_events(activity: &Activity) -> Arc<Mutex<Vec<Message>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    activity
        .on("#", move |message| sink.lock().unwrap().push(message))
        .expect("event recorder");
    events
}

pub fn event_keys(events: &Arc<Mutex<Vec<Message>>>) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.fields.routing_key.clone())
        .collect()
}

pub fn find_event(events: &Arc<Mutex<Vec<Message>>>, routing_key: &str) -> Option<Message> {
    events
        .lock()
        .unwrap()
        .iter()
        .find(|m| m.fields.routing_key == routing_key)
        .cloned()
}

/// Install the test log subscriber once; controlled with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `start → task → end` wired with two sequence flows. Every activity is
/// activated and ready to consume inbound.
pub struct LinearModel {
    pub start: Activity,
    pub task: Activity,
    pub end: Activity,
    pub flow_in: SequenceFlow,
    pub flow_out: SequenceFlow,
}

pub fn linear_model(task_factory: BehaviourFactory) -> LinearModel {
    init_tracing();
    let flow_in = SequenceFlow::new(SequenceFlowDef::new("to-task", "start", "task"));
    let flow_out = SequenceFlow::new(SequenceFlowDef::new("to-end", "task", "end"));

    let start = ActivityBuilder::new(
        ActivityDef::new("start", "startevent"),
        passthrough_factory(),
    )
    .outbound(vec![flow_in.clone()])
    .build();
    let task = ActivityBuilder::new(ActivityDef::new("task", "usertask"), task_factory)
        .inbound(vec![flow_in.clone()])
        .outbound(vec![flow_out.clone()])
        .build();
    let end = ActivityBuilder::new(ActivityDef::new("end", "endevent"), passthrough_factory())
        .inbound(vec![flow_out.clone()])
        .build();

    start.activate();
    task.activate();
    end.activate();

    LinearModel {
        start,
        task,
        end,
        flow_in,
        flow_out,
    }
}
