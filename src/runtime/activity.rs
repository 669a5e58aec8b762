use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::api::ActivityApi;
use super::behaviour::{BehaviourContext, BehaviourFactory};
use super::execution::{
    ActivityExecution, EXECUTE_CONSUMER, EXECUTE_QUEUE, EXECUTION_EXCHANGE,
};
use super::extensions::Extensions;
use super::formatter::{apply_fragment, run_format_pass, FormatOutcome, FORMAT_QUEUE};
use super::state::{ActivityCounters, ActivityState, ActivityStatus};
use crate::broker::{
    Broker, Delivery, EventApi, EventFuture, ExchangeKind, QueueOptions, SubscribeOptions,
};
use crate::core::{
    broker_safe_id, ActivityError, Content, Environment, Error, FlowAction, Message,
    OutboundFlowAction, Parent, Publish, Result, ShakeVisit,
};
use crate::flow::{evaluate_outbound, Association, SequenceFlow, Trigger};

const RUN_EXCHANGE: &str = "run";
const EVENT_EXCHANGE: &str = "event";
const API_EXCHANGE: &str = "api";
const FORMAT_EXCHANGE: &str = "format-run";

const RUN_QUEUE: &str = "run-q";
const INBOUND_QUEUE: &str = "inbound-q";
const EXECUTION_QUEUE: &str = "execution-q";

const RUN_CONSUMER: &str = "_activity-run";
const INBOUND_CONSUMER: &str = "_run-on-inbound";
const EXECUTION_CONSUMER: &str = "_activity-execution";
const API_CONSUMER: &str = "_activity-api";
const FORMAT_CONSUMER: &str = "_run-format";

/// Static activity definition, as handed over by the surrounding context.
#[derive(Debug, Clone, Default)]
pub struct ActivityDef {
    pub id: String,
    pub element_type: String,
    pub name: Option<String>,
    pub parent: Option<Parent>,
    pub is_sub_process: bool,
    pub is_multi_instance: bool,
    pub is_transaction: bool,
    pub is_throwing: bool,
    pub is_for_compensation: bool,
    pub is_parallel_gateway: bool,
    pub triggered_by_event: bool,
    /// Opaque behaviour metadata carried into snapshots.
    pub behaviour: Option<Value>,
}

impl ActivityDef {
    pub fn new(id: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            element_type: element_type.into(),
            ..Self::default()
        }
    }
}

/// Flags computed once at construction, then immutable.
#[derive(Debug, Clone, Default)]
pub struct ActivityFlags {
    pub is_end: bool,
    pub is_start: bool,
    pub is_sub_process: bool,
    pub is_multi_instance: bool,
    pub is_transaction: bool,
    pub is_throwing: bool,
    pub is_for_compensation: bool,
    pub is_parallel_join: bool,
    pub attached_to: Option<String>,
}

/// Context contract: resolve sibling activities by id.
pub trait ActivityLookup: Send + Sync {
    fn activity_by_id(&self, id: &str) -> Option<Activity>;
}

struct Statics {
    def: ActivityDef,
    flags: ActivityFlags,
    environment: Environment,
    inbound: Vec<SequenceFlow>,
    outbound: Vec<SequenceFlow>,
    associations: Vec<Association>,
    factory: BehaviourFactory,
    resolver: Option<Arc<dyn ActivityLookup>>,
}

#[derive(Clone)]
struct StateMessage {
    message: Message,
    delivery_tag: u64,
}

struct PendingFormat {
    message: Message,
    delivery_tag: u64,
    prev_status: Option<ActivityStatus>,
    content: Content,
    open: bool,
}

struct JoinEntry {
    source_id: String,
    message: Message,
    delivery_tag: u64,
}

struct ActivityInner {
    status: Option<ActivityStatus>,
    execution_id: Option<String>,
    init_execution_id: Option<String>,
    counters: ActivityCounters,
    stopped: bool,
    consuming: bool,
    state_message: Option<StateMessage>,
    execution: Option<ActivityExecution>,
    extensions: Option<Box<dyn Extensions>>,
    join_buffer: Vec<JoinEntry>,
    pending_format: Option<PendingFormat>,
}

/// A single executable workflow node.
///
/// The activity owns its broker and drives itself off the durable `run-q`:
/// inbound triggers funnel into `inbound-q`, the run consumer walks
/// `enter → start → execute → end → leave` (with discard, error, and resume
/// branches), the execution holder drives the behaviour, and leave
/// dispatches outbound flows through the outbound evaluator.
#[derive(Clone)]
pub struct Activity {
    statics: Arc<Statics>,
    inner: Arc<Mutex<ActivityInner>>,
    broker: Broker,
}

/// Builder assembling an activity with its flows, associations, and hooks.
pub struct ActivityBuilder {
    def: ActivityDef,
    factory: BehaviourFactory,
    environment: Environment,
    inbound: Vec<SequenceFlow>,
    outbound: Vec<SequenceFlow>,
    associations: Vec<Association>,
    attached_to: Option<(String, Broker)>,
    extensions: Option<Box<dyn Extensions>>,
    resolver: Option<Arc<dyn ActivityLookup>>,
}

impl ActivityBuilder {
    pub fn new(def: ActivityDef, factory: BehaviourFactory) -> Self {
        Self {
            def,
            factory,
            environment: Environment::default(),
            inbound: Vec::new(),
            outbound: Vec::new(),
            associations: Vec::new(),
            attached_to: None,
            extensions: None,
            resolver: None,
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn inbound(mut self, flows: Vec<SequenceFlow>) -> Self {
        self.inbound = flows;
        self
    }

    pub fn outbound(mut self, flows: Vec<SequenceFlow>) -> Self {
        self.outbound = flows;
        self
    }

    pub fn associations(mut self, associations: Vec<Association>) -> Self {
        self.associations = associations;
        self
    }

    /// Attach this (boundary) activity to a host activity.
    pub fn attached_to(mut self, host: &Activity) -> Self {
        self.attached_to = Some((host.id().to_string(), host.broker()));
        self
    }

    pub fn extensions(mut self, extensions: impl Extensions + 'static) -> Self {
        self.extensions = Some(Box::new(extensions));
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ActivityLookup>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Activity {
        let flags = ActivityFlags {
            is_end: self.outbound.is_empty(),
            is_start: self.inbound.is_empty()
                && self.attached_to.is_none()
                && !self.def.triggered_by_event
                && !self.def.is_for_compensation,
            is_sub_process: self.def.is_sub_process,
            is_multi_instance: self.def.is_multi_instance,
            is_transaction: self.def.is_transaction,
            is_throwing: self.def.is_throwing,
            is_for_compensation: self.def.is_for_compensation,
            is_parallel_join: self.def.is_parallel_gateway && self.inbound.len() >= 2,
            attached_to: self.attached_to.as_ref().map(|(id, _)| id.clone()),
        };

        let broker = Broker::new();
        for exchange in [
            RUN_EXCHANGE,
            EVENT_EXCHANGE,
            API_EXCHANGE,
            EXECUTION_EXCHANGE,
            FORMAT_EXCHANGE,
        ] {
            broker.assert_exchange(exchange, ExchangeKind::Topic);
        }
        for queue in [
            INBOUND_QUEUE,
            RUN_QUEUE,
            EXECUTE_QUEUE,
            EXECUTION_QUEUE,
            FORMAT_QUEUE,
        ] {
            broker.assert_queue(queue, QueueOptions::default());
        }
        broker
            .bind_queue(RUN_QUEUE, RUN_EXCHANGE, "run.#")
            .expect("run topology");
        broker
            .bind_queue(EXECUTE_QUEUE, EXECUTION_EXCHANGE, "execute.#")
            .expect("execution topology");
        broker
            .bind_queue(EXECUTION_QUEUE, EXECUTION_EXCHANGE, "execution.#")
            .expect("execution topology");
        broker
            .bind_queue(FORMAT_QUEUE, FORMAT_EXCHANGE, "#")
            .expect("format topology");

        let mut triggers: Vec<Trigger> =
            self.inbound.iter().cloned().map(Trigger::Flow).collect();
        triggers.extend(self.associations.iter().cloned().map(Trigger::Association));
        if let Some((id, host_broker)) = &self.attached_to {
            triggers.push(Trigger::Activity {
                id: id.clone(),
                broker: host_broker.clone(),
            });
        }

        let activity = Activity {
            statics: Arc::new(Statics {
                def: self.def,
                flags,
                environment: self.environment,
                inbound: self.inbound,
                outbound: self.outbound,
                associations: self.associations,
                factory: self.factory,
                resolver: self.resolver,
            }),
            inner: Arc::new(Mutex::new(ActivityInner {
                status: None,
                execution_id: None,
                init_execution_id: None,
                counters: ActivityCounters::default(),
                stopped: false,
                consuming: false,
                state_message: None,
                execution: None,
                extensions: self.extensions,
                join_buffer: Vec::new(),
                pending_format: None,
            })),
            broker,
        };

        activity.consume_execution_bridge();
        for trigger in triggers {
            activity.subscribe_trigger(trigger);
        }
        activity
    }
}

impl Activity {
    fn lock(&self) -> MutexGuard<'_, ActivityInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.statics.def.id
    }

    pub fn element_type(&self) -> &str {
        &self.statics.def.element_type
    }

    pub fn name(&self) -> Option<&str> {
        self.statics.def.name.as_deref()
    }

    pub fn flags(&self) -> &ActivityFlags {
        &self.statics.flags
    }

    pub fn environment(&self) -> &Environment {
        &self.statics.environment
    }

    pub fn broker(&self) -> Broker {
        self.broker.clone()
    }

    pub fn inbound(&self) -> &[SequenceFlow] {
        &self.statics.inbound
    }

    pub fn outbound(&self) -> &[SequenceFlow] {
        &self.statics.outbound
    }

    pub fn associations(&self) -> &[Association] {
        &self.statics.associations
    }

    pub fn status(&self) -> Option<ActivityStatus> {
        self.lock().status
    }

    pub fn counters(&self) -> ActivityCounters {
        self.lock().counters
    }

    pub fn execution_id(&self) -> Option<String> {
        self.lock().execution_id.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    // ------------------------------------------------------------------
    // Event API

    pub fn event_api(&self) -> EventApi {
        EventApi::new(self.broker.clone())
    }

    pub fn on(
        &self,
        pattern: &str,
        handler: impl FnMut(Message) + Send + 'static,
    ) -> Result<String> {
        self.event_api().on(pattern, handler)
    }

    pub fn once(
        &self,
        pattern: &str,
        handler: impl FnOnce(Message) + Send + 'static,
    ) -> Result<String> {
        self.event_api().once(pattern, handler)
    }

    pub fn wait_for(&self, pattern: &str) -> EventFuture {
        self.event_api().wait_for(pattern)
    }

    pub fn emit_fatal(&self, error: ActivityError, content: Content) -> Result<()> {
        self.event_api().emit_fatal(error, content)
    }

    // ------------------------------------------------------------------
    // Public operations

    /// Announce the activity with a preassigned execution id.
    pub fn init(&self) -> Result<()> {
        let execution_id = {
            let mut inner = self.lock();
            let id = self.statics.def.id.clone();
            inner
                .init_execution_id
                .get_or_insert_with(|| unique_id(&id))
                .clone()
        };
        let mut content = self.base_content();
        content.execution_id = Some(execution_id);
        self.publish_event("activity.init", content)
    }

    /// Begin consuming inbound triggers.
    pub fn activate(&self) {
        self.consume_inbound();
    }

    /// Stop consuming inbound triggers.
    pub fn deactivate(&self) {
        self.broker.cancel(INBOUND_CONSUMER);
    }

    /// Run the activity.
    ///
    /// Fails when a run is already in flight.
    pub fn run(&self) -> Result<()> {
        self.run_with(None)
    }

    pub fn run_with(&self, run_content: Option<Content>) -> Result<()> {
        let content = {
            let mut inner = self.lock();
            if inner.status.is_some() {
                return Err(Error::AlreadyRunning(self.statics.def.id.clone()));
            }
            let execution_id = inner
                .init_execution_id
                .take()
                .unwrap_or_else(|| unique_id(&self.statics.def.id));
            inner.execution_id = Some(execution_id.clone());
            inner.execution = None;
            let mut content = match run_content {
                Some(overrides) => self.base_content().merged_with(&overrides),
                None => self.base_content(),
            };
            content.execution_id = Some(execution_id);
            content
        };
        debug!(activity = %self.statics.def.id, "run");
        self.broker.publish(
            RUN_EXCHANGE,
            "run.enter",
            content.clone(),
            Publish::default().with_type("enter"),
        )?;
        self.broker.publish(
            RUN_EXCHANGE,
            "run.start",
            content,
            Publish::default().with_type("start"),
        )?;
        self.consume_api();
        self.consume_run_queue();
        Ok(())
    }

    /// Run the discard path from scratch.
    fn run_discard(&self, discard_content: Option<Content>) -> Result<()> {
        let content = {
            let mut inner = self.lock();
            if inner.status.is_some() {
                return Err(Error::AlreadyRunning(self.statics.def.id.clone()));
            }
            let execution_id = inner
                .init_execution_id
                .take()
                .unwrap_or_else(|| unique_id(&self.statics.def.id));
            inner.execution_id = Some(execution_id.clone());
            inner.execution = None;
            let mut content = match discard_content {
                Some(overrides) => self.base_content().merged_with(&overrides),
                None => self.base_content(),
            };
            content.execution_id = Some(execution_id);
            content
        };
        debug!(activity = %self.statics.def.id, "run discard");
        self.broker.publish(
            RUN_EXCHANGE,
            "run.discard",
            content,
            Publish::default().with_type("discard"),
        )?;
        self.consume_api();
        self.consume_run_queue();
        Ok(())
    }

    /// Discard the activity.
    ///
    /// Idle activities run the discard path; a running execution is asked to
    /// discard cooperatively; otherwise the run queue is replaced with a
    /// discard message.
    pub fn discard(&self) -> Result<()> {
        self.discard_with(None)
    }

    pub fn discard_with(&self, discard_content: Option<Content>) -> Result<()> {
        enum Plan {
            RunDiscard,
            Delegate(Message),
            Replace(Content),
        }
        let plan = {
            let inner = self.lock();
            if inner.status.is_none() {
                Plan::RunDiscard
            } else if inner
                .execution
                .as_ref()
                .is_some_and(|execution| !execution.completed())
            {
                let message = inner
                    .state_message
                    .as_ref()
                    .map(|sm| sm.message.clone())
                    .unwrap_or_else(|| {
                        Message::new(RUN_EXCHANGE, "run.discard", self.base_content(), Default::default())
                    });
                Plan::Delegate(message)
            } else {
                let content = inner
                    .state_message
                    .as_ref()
                    .map(|sm| sm.message.content.clone())
                    .unwrap_or_else(|| self.base_content());
                Plan::Replace(content)
            }
        };
        match plan {
            Plan::RunDiscard => self.run_discard(discard_content),
            Plan::Delegate(message) => {
                let result = {
                    let mut inner = self.lock();
                    inner.execution.as_mut().map(|e| e.discard(&message))
                };
                if let Some(Err(err)) = result {
                    self.publish_execution_error(err, message.content);
                }
                Ok(())
            }
            Plan::Replace(content) => {
                self.broker.purge(RUN_QUEUE);
                self.broker.publish(
                    RUN_EXCHANGE,
                    "run.discard",
                    content,
                    Publish::default().with_type("discard"),
                )
            }
        }
    }

    /// Cancel every consumer; unacked messages return to their queue heads
    /// for redelivery on resume. Queues are not purged.
    pub fn stop(&self) {
        {
            let mut inner = self.lock();
            inner.stopped = true;
            inner.consuming = false;
            if let Some(execution) = inner.execution.as_mut() {
                execution.on_stop();
            }
        }
        for tag in [
            API_CONSUMER,
            RUN_CONSUMER,
            INBOUND_CONSUMER,
            EXECUTION_CONSUMER,
            EXECUTE_CONSUMER,
            FORMAT_CONSUMER,
        ] {
            self.broker.cancel(tag);
        }
        debug!(activity = %self.statics.def.id, "stopped");
        let _ = self.publish_event("activity.stop", self.current_content());
    }

    /// Resume a stopped or recovered activity.
    ///
    /// Fails while the run queue is being consumed. With no status to pick
    /// up, resuming just re-activates inbound consumption.
    pub fn resume(&self) -> Result<()> {
        let has_status = {
            let mut inner = self.lock();
            if inner.consuming {
                return Err(Error::ResumeWhileConsuming(self.statics.def.id.clone()));
            }
            inner.stopped = false;
            inner.status.is_some()
        };
        if !has_status {
            self.activate();
            return Ok(());
        }
        debug!(activity = %self.statics.def.id, "resume");
        self.consume_execution_bridge();
        self.consume_api();
        self.broker.publish(
            RUN_EXCHANGE,
            "run.resume",
            self.current_content(),
            Publish::transient().with_type("resume"),
        )?;
        self.consume_run_queue();
        Ok(())
    }

    /// Restore a serialized state onto a freshly built activity.
    pub fn recover(&self, state: &ActivityState) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.consuming {
                return Err(Error::RecoverWhileRunning(self.statics.def.id.clone()));
            }
            inner.status = state.status;
            inner.execution_id = state.execution_id.clone();
            inner.counters = state.counters;
            inner.stopped = state.stopped;
            if let Some(snapshot) = &state.execution {
                inner.execution = Some(ActivityExecution::recovered(
                    self.behaviour_context(),
                    (self.statics.factory)(),
                    snapshot,
                ));
            }
        }
        self.broker.recover(&state.broker);
        Ok(())
    }

    /// Serialize the activity together with its broker.
    pub fn get_state(&self) -> ActivityState {
        let inner = self.lock();
        let flags = &self.statics.flags;
        ActivityState {
            id: self.statics.def.id.clone(),
            element_type: self.statics.def.element_type.clone(),
            name: self.statics.def.name.clone(),
            status: inner.status,
            parent: self.statics.def.parent.clone(),
            execution_id: inner.execution_id.clone(),
            stopped: inner.stopped,
            behaviour: self.statics.def.behaviour.clone(),
            counters: inner.counters,
            broker: self.broker.get_state(true),
            execution: inner.execution.as_ref().map(|e| e.get_state()),
            is_end: flags.is_end,
            is_start: flags.is_start,
            is_sub_process: flags.is_sub_process,
            is_multi_instance: flags.is_multi_instance,
            is_transaction: flags.is_transaction,
            is_throwing: flags.is_throwing,
            is_for_compensation: flags.is_for_compensation,
            is_parallel_join: flags.is_parallel_join,
            attached_to: flags.attached_to.clone(),
        }
    }

    /// Step mode: acknowledge the pending run message so the state machine
    /// can advance. Returns the message that was pending.
    pub fn next(&self) -> Result<Option<Message>> {
        let state_message = {
            let inner = self.lock();
            match inner.status {
                Some(ActivityStatus::Executing) => {
                    return Err(Error::StepWhileBusy(
                        self.statics.def.id.clone(),
                        "executing".to_string(),
                    ))
                }
                Some(ActivityStatus::Formatting) => {
                    return Err(Error::StepWhileBusy(
                        self.statics.def.id.clone(),
                        "formatting".to_string(),
                    ))
                }
                _ => {}
            }
            inner.state_message.clone()
        };
        let Some(state_message) = state_message else {
            return Ok(None);
        };
        self.broker.ack(RUN_QUEUE, state_message.delivery_tag);
        Ok(Some(state_message.message))
    }

    /// Api handle bound to a message, defaulting to the current state
    /// message.
    pub fn get_api(&self, message: Option<&Message>) -> ActivityApi {
        let content = message
            .map(|m| m.content.clone())
            .unwrap_or_else(|| self.current_content());
        ActivityApi::new(self.broker.clone(), content)
    }

    /// Resolve a sibling activity through the owning context.
    pub fn get_activity_by_id(&self, id: &str) -> Option<Activity> {
        self.statics
            .resolver
            .as_ref()
            .and_then(|resolver| resolver.activity_by_id(id))
    }

    /// Evaluate outbound flows against a message without dispatching.
    pub fn evaluate_outbound(
        &self,
        message: &Message,
        discard_rest_at_take: bool,
    ) -> std::result::Result<Vec<OutboundFlowAction>, ActivityError> {
        evaluate_outbound(&self.statics.outbound, message, discard_rest_at_take)
    }

    /// Dry-run graph traversal: walk outbound flows, appending visits to
    /// `content.sequence`, without executing anything.
    pub fn shake(&self) {
        let mut content = self.base_content();
        content.sequence = Some(vec![self.shake_visit()]);
        let _ = self.publish_event("activity.shake.start", content.clone());
        self.shake_outbound(content);
    }

    // ------------------------------------------------------------------
    // Topology and consumers

    fn behaviour_context(&self) -> BehaviourContext {
        BehaviourContext::new(
            self.broker.clone(),
            self.statics.def.id.clone(),
            self.statics.def.element_type.clone(),
            self.statics.environment.clone(),
        )
    }

    fn base_content(&self) -> Content {
        Content {
            id: Some(self.statics.def.id.clone()),
            element_type: Some(self.statics.def.element_type.clone()),
            name: self.statics.def.name.clone(),
            parent: self.statics.def.parent.clone(),
            ..Content::default()
        }
    }

    /// Content of the current state message, else base content with the
    /// current execution id.
    fn current_content(&self) -> Content {
        let inner = self.lock();
        inner
            .state_message
            .as_ref()
            .map(|sm| sm.message.content.clone())
            .unwrap_or_else(|| {
                let mut content = self.base_content();
                content.execution_id = inner.execution_id.clone();
                content
            })
    }

    fn publish_event(&self, routing_key: &str, content: Content) -> Result<()> {
        self.broker
            .publish(EVENT_EXCHANGE, routing_key, content, Publish::transient())
    }

    fn publish_run(&self, routing_key: &str, content: Content) {
        if let Err(err) = self.broker.publish(
            RUN_EXCHANGE,
            routing_key,
            content,
            Publish::default().with_type(routing_key.trim_start_matches("run.")),
        ) {
            warn!(activity = %self.statics.def.id, %err, routing_key, "run publish failed");
        }
    }

    /// Route a behaviour failure through the execution bridge.
    fn publish_execution_error(&self, error: ActivityError, mut content: Content) {
        content.error = Some(error);
        if let Err(err) = self.broker.publish(
            EXECUTION_EXCHANGE,
            "execution.error",
            content,
            Publish::default().with_type("error"),
        ) {
            warn!(activity = %self.statics.def.id, %err, "execution error publish failed");
        }
    }

    fn consume_run_queue(&self) {
        {
            let mut inner = self.lock();
            inner.consuming = true;
        }
        let activity = self.clone();
        if let Err(err) = self.broker.consume(
            RUN_QUEUE,
            SubscribeOptions::tagged(RUN_CONSUMER).exclusive(),
            move |delivery| activity.on_run_delivery(delivery),
        ) {
            warn!(activity = %self.statics.def.id, %err, "run consumer failed");
        }
    }

    fn consume_api(&self) {
        let activity = self.clone();
        if let Err(err) = self.broker.subscribe_tmp(
            API_EXCHANGE,
            "activity.#",
            SubscribeOptions::tagged(API_CONSUMER).no_ack(),
            move |delivery| activity.on_api_delivery(delivery),
        ) {
            warn!(activity = %self.statics.def.id, %err, "api consumer failed");
        }
    }

    fn consume_execution_bridge(&self) {
        let activity = self.clone();
        if let Err(err) = self.broker.consume(
            EXECUTION_QUEUE,
            SubscribeOptions::tagged(EXECUTION_CONSUMER),
            move |delivery| activity.on_execution_delivery(delivery),
        ) {
            warn!(activity = %self.statics.def.id, %err, "execution consumer failed");
        }
    }

    fn consume_execute_queue(&self) {
        let activity = self.clone();
        if let Err(err) = self.broker.consume(
            EXECUTE_QUEUE,
            SubscribeOptions::tagged(EXECUTE_CONSUMER).with_prefetch(100),
            move |delivery| activity.on_execute_delivery(delivery),
        ) {
            warn!(activity = %self.statics.def.id, %err, "execute consumer failed");
        }
    }

    fn consume_inbound(&self) {
        let options = if self.statics.flags.is_parallel_join {
            SubscribeOptions::tagged(INBOUND_CONSUMER).with_prefetch(1000)
        } else {
            SubscribeOptions::tagged(INBOUND_CONSUMER)
        };
        let activity = self.clone();
        if let Err(err) = self.broker.consume(INBOUND_QUEUE, options, move |delivery| {
            activity.on_inbound_delivery(delivery)
        }) {
            warn!(activity = %self.statics.def.id, %err, "inbound consumer failed");
        }
    }

    /// Funnel a trigger's event exchange into `inbound-q`.
    fn subscribe_trigger(&self, trigger: Trigger) {
        let pattern = match &trigger {
            Trigger::Flow(_) => "flow.#",
            Trigger::Association(_) => "association.#",
            Trigger::Activity { .. } => "activity.#",
        };
        let tag = format!("_inbound-{}", broker_safe_id(trigger.id()));
        let activity = self.clone();
        let trigger_broker = trigger.broker();
        let attached_id = match &trigger {
            Trigger::Activity { id, .. } => Some(id.clone()),
            _ => None,
        };
        let result = trigger_broker.subscribe_tmp(
            EVENT_EXCHANGE,
            pattern,
            SubscribeOptions::tagged(tag).no_ack(),
            move |delivery| activity.on_trigger_event(delivery.message, attached_id.as_deref()),
        );
        if let Err(err) = result {
            warn!(activity = %self.statics.def.id, %err, "trigger subscription failed");
        }
    }

    // ------------------------------------------------------------------
    // Inbound arrival

    fn on_trigger_event(&self, message: Message, attached_id: Option<&str>) {
        let key = message.routing_key().to_string();
        match key.as_str() {
            "flow.take" | "flow.discard" | "association.take" => {
                let _ = self.broker.send_to_queue(INBOUND_QUEUE, message);
            }
            "flow.shake" => self.shake_continue(message.content),
            "flow.looped" => {}
            "association.discard" => {
                self.broker.purge(INBOUND_QUEUE);
            }
            "association.complete" => {
                if !self.statics.flags.is_for_compensation {
                    return;
                }
                let compensation_id = compensation_id(
                    &self.statics.def.id,
                    message.content.sequence_id.as_deref(),
                );
                let mut content = message.content.clone();
                content
                    .extra
                    .insert("compensation_id".to_string(), Value::String(compensation_id));
                let _ = self.publish_event("compensation.start", content);
                let _ = self.broker.send_to_queue(INBOUND_QUEUE, message);
                self.consume_inbound();
            }
            "activity.enter" | "activity.discard" => {
                // only the attached-to activity's own lifecycle counts
                let matches_host = attached_id
                    .is_some_and(|id| message.content.id.as_deref() == Some(id));
                if matches_host {
                    let _ = self.broker.send_to_queue(INBOUND_QUEUE, message);
                }
            }
            _ => {}
        }
    }

    fn on_inbound_delivery(&self, delivery: Delivery) {
        if self.statics.flags.is_parallel_join {
            self.on_join_delivery(delivery);
            return;
        }
        self.broker.ack(INBOUND_QUEUE, delivery.delivery_tag);
        self.broker.cancel(INBOUND_CONSUMER);
        let message = delivery.message;
        match message.routing_key() {
            "flow.take" | "association.take" | "activity.enter" => {
                let mut content = self.base_content();
                content.inbound = Some(vec![message.content.clone()]);
                content.discard_sequence = message.content.discard_sequence.clone();
                if let Err(err) = self.run_with(Some(content)) {
                    warn!(activity = %self.statics.def.id, %err, "inbound run refused");
                }
            }
            "flow.discard" | "activity.discard" => {
                let mut content = self.base_content();
                content.inbound = Some(vec![message.content.clone()]);
                content.discard_sequence = message.content.discard_sequence.clone();
                if let Err(err) = self.run_discard(Some(content)) {
                    warn!(activity = %self.statics.def.id, %err, "inbound discard refused");
                }
            }
            "association.complete" => {
                let id = compensation_id(
                    &self.statics.def.id,
                    message.content.sequence_id.as_deref(),
                );
                let mut content = message.content.clone();
                content
                    .extra
                    .insert("compensation_id".to_string(), Value::String(id));
                let _ = self.publish_event("compensation.end", content);
            }
            other => {
                debug!(activity = %self.statics.def.id, routing_key = other, "ignored inbound");
            }
        }
    }

    /// Parallel join: buffer one message per distinct source flow and
    /// dispatch once the buffer covers every inbound trigger.
    fn on_join_delivery(&self, delivery: Delivery) {
        let wave = {
            let mut inner = self.lock();
            let source_id = delivery
                .message
                .content
                .id
                .clone()
                .unwrap_or_default();
            if inner.join_buffer.iter().any(|e| e.source_id == source_id) {
                // first arrival wins
                drop(inner);
                self.broker.ack(INBOUND_QUEUE, delivery.delivery_tag);
                return;
            }
            inner.join_buffer.push(JoinEntry {
                source_id,
                message: delivery.message,
                delivery_tag: delivery.delivery_tag,
            });
            if inner.join_buffer.len() == self.statics.inbound.len() {
                Some(std::mem::take(&mut inner.join_buffer))
            } else {
                None
            }
        };
        let Some(entries) = wave else {
            return;
        };
        for entry in &entries {
            self.broker.ack(INBOUND_QUEUE, entry.delivery_tag);
        }
        self.broker.cancel(INBOUND_CONSUMER);

        let any_take = entries
            .iter()
            .any(|e| e.message.routing_key() == "flow.take");
        let mut content = self.base_content();
        content.inbound = Some(entries.iter().map(|e| e.message.content.clone()).collect());
        if any_take {
            if let Err(err) = self.run_with(Some(content)) {
                warn!(activity = %self.statics.def.id, %err, "join run refused");
            }
        } else {
            // order-preserving union of every discard sequence
            let mut merged: Vec<String> = Vec::new();
            for entry in &entries {
                if let Some(sequence) = &entry.message.content.discard_sequence {
                    for id in sequence {
                        if !merged.contains(id) {
                            merged.push(id.clone());
                        }
                    }
                }
            }
            content.discard_sequence = Some(merged);
            if let Err(err) = self.run_discard(Some(content)) {
                warn!(activity = %self.statics.def.id, %err, "join discard refused");
            }
        }
    }

    // ------------------------------------------------------------------
    // Run queue

    fn on_run_delivery(&self, delivery: Delivery) {
        let key = delivery.message.routing_key().to_string();
        let control = matches!(
            key.as_str(),
            "run.next" | "run.resume" | "run.outbound.take" | "run.outbound.discard"
        );
        if !control {
            let mut inner = self.lock();
            inner.state_message = Some(StateMessage {
                message: delivery.message.clone(),
                delivery_tag: delivery.delivery_tag,
            });
        }
        debug!(activity = %self.statics.def.id, routing_key = %key, redelivered = delivery.message.is_redelivered(), "run message");

        if control {
            self.process_run_message(delivery.message, delivery.delivery_tag);
            return;
        }

        // formatter hook: drain format fragments before the transition
        let mut message = delivery.message;
        let mut open = false;
        match run_format_pass(&self.broker, message.content.clone(), &mut open) {
            Ok(FormatOutcome::Complete(content)) => {
                message.content = content;
                self.process_run_message(message, delivery.delivery_tag);
            }
            Ok(FormatOutcome::Pending(content)) => {
                let mut inner = self.lock();
                let prev_status = inner.status;
                inner.status = Some(ActivityStatus::Formatting);
                inner.pending_format = Some(PendingFormat {
                    message,
                    delivery_tag: delivery.delivery_tag,
                    prev_status,
                    content,
                    open,
                });
                drop(inner);
                self.consume_format_queue();
            }
            Err(error) => {
                // fatal: the run message stays unacked and is not advanced
                let _ = self.emit_fatal(error, message.content);
            }
        }
    }

    fn consume_format_queue(&self) {
        let activity = self.clone();
        if let Err(err) = self.broker.consume(
            FORMAT_QUEUE,
            SubscribeOptions::tagged(FORMAT_CONSUMER).no_ack(),
            move |delivery| activity.on_format_delivery(delivery),
        ) {
            warn!(activity = %self.statics.def.id, %err, "format consumer failed");
        }
    }

    fn on_format_delivery(&self, delivery: Delivery) {
        let finished = {
            let mut inner = self.lock();
            let Some(mut pending) = inner.pending_format.take() else {
                return;
            };
            let mut open = pending.open;
            match apply_fragment(pending.content.clone(), &delivery.message, &mut open) {
                Ok(content) => {
                    pending.content = content;
                    pending.open = open;
                    if open {
                        inner.pending_format = Some(pending);
                        None
                    } else {
                        inner.status = pending.prev_status;
                        Some(pending)
                    }
                }
                Err(error) => {
                    inner.pending_format = Some(pending);
                    drop(inner);
                    let _ = self.emit_fatal(error, delivery.message.content);
                    return;
                }
            }
        };
        if let Some(pending) = finished {
            self.broker.cancel(FORMAT_CONSUMER);
            let mut message = pending.message;
            message.content = pending.content;
            self.process_run_message(message, pending.delivery_tag);
        }
    }

    fn ack_run(&self, delivery_tag: u64) {
        if !self.statics.environment.settings.step {
            self.broker.ack(RUN_QUEUE, delivery_tag);
        }
    }

    fn process_run_message(&self, message: Message, delivery_tag: u64) {
        let key = message.routing_key().to_string();
        let redelivered = message.is_redelivered();
        match key.as_str() {
            "run.enter" => {
                {
                    let mut inner = self.lock();
                    inner.status = Some(ActivityStatus::Entered);
                    inner.execution_id = message.content.execution_id.clone();
                    if let Some(extensions) = inner.extensions.as_mut() {
                        extensions.activate(&self.broker, &message);
                    }
                }
                if !redelivered {
                    let _ = self.publish_event("activity.enter", message.content.clone());
                }
                self.ack_run(delivery_tag);
            }
            "run.start" => {
                {
                    let mut inner = self.lock();
                    inner.status = Some(ActivityStatus::Started);
                }
                self.publish_run("run.execute", message.content.clone());
                if !redelivered {
                    let _ = self.publish_event("activity.start", message.content.clone());
                }
                self.ack_run(delivery_tag);
            }
            "run.execute" | "run.execute.passthrough" => {
                if key == "run.execute.passthrough" && redelivered {
                    self.broker.ack(RUN_QUEUE, delivery_tag);
                    return;
                }
                {
                    let mut inner = self.lock();
                    inner.status = Some(ActivityStatus::Executing);
                    if redelivered {
                        if let Some(extensions) = inner.extensions.as_mut() {
                            extensions.activate(&self.broker, &message);
                        }
                    }
                    if inner.execution.is_none() {
                        inner.execution = Some(ActivityExecution::new(
                            self.behaviour_context(),
                            (self.statics.factory)(),
                        ));
                    }
                }
                self.consume_execute_queue();
                let result = {
                    let mut inner = self.lock();
                    inner.execution.as_mut().map(|e| e.execute(&message))
                };
                if let Some(Err(err)) = result {
                    self.publish_execution_error(err, message.content);
                }
                // the message stays unacked until the execution settles
            }
            "run.end" => {
                if redelivered {
                    self.lock().status = Some(ActivityStatus::End);
                    self.ack_run(delivery_tag);
                    return;
                }
                {
                    let mut inner = self.lock();
                    inner.status = Some(ActivityStatus::End);
                    inner.counters.taken += 1;
                }
                let _ = self.publish_event("activity.end", message.content.clone());
                self.run_leave(&message, false);
                self.ack_run(delivery_tag);
            }
            "run.discarded" => {
                if redelivered {
                    self.lock().status = Some(ActivityStatus::Discarded);
                    self.ack_run(delivery_tag);
                    return;
                }
                {
                    let mut inner = self.lock();
                    inner.status = Some(ActivityStatus::Discarded);
                    inner.counters.discarded += 1;
                }
                let _ = self.publish_event("activity.discard", message.content.clone());
                self.run_leave(&message, true);
                self.ack_run(delivery_tag);
            }
            "run.error" => {
                if !redelivered {
                    let _ = self.publish_event("activity.error", message.content.clone());
                }
                self.ack_run(delivery_tag);
            }
            "run.discard" => {
                let delegated = {
                    let mut inner = self.lock();
                    inner.status = Some(ActivityStatus::Discard);
                    let live = inner
                        .execution
                        .as_ref()
                        .is_some_and(|execution| !execution.completed());
                    if live {
                        inner.execution.as_mut().map(|e| e.discard(&message))
                    } else {
                        None
                    }
                };
                match delegated {
                    Some(Err(err)) => {
                        self.publish_execution_error(err, message.content.clone())
                    }
                    Some(Ok(())) => {}
                    None => self.publish_run("run.discarded", message.content.clone()),
                }
                self.ack_run(delivery_tag);
            }
            "run.leave" => {
                {
                    let mut inner = self.lock();
                    inner.status = None;
                    if let Some(extensions) = inner.extensions.as_mut() {
                        extensions.deactivate(&self.broker, &message);
                    }
                    inner.execution = None;
                    inner.execution_id = None;
                }
                self.broker.cancel(API_CONSUMER);
                if let Err(err) = self.broker.publish(
                    RUN_EXCHANGE,
                    "run.next",
                    message.content.clone(),
                    Publish::transient().with_type("next"),
                ) {
                    warn!(activity = %self.statics.def.id, %err, "run.next publish failed");
                }
                if !redelivered {
                    let _ = self.publish_event("activity.leave", message.content.clone());
                }
                self.ack_run(delivery_tag);
            }
            "run.next" => {
                self.broker.ack(RUN_QUEUE, delivery_tag);
                self.consume_inbound();
            }
            "run.resume" => {
                self.broker.ack(RUN_QUEUE, delivery_tag);
                let state_message = {
                    let inner = self.lock();
                    inner.state_message.clone()
                };
                let Some(state_message) = state_message else {
                    return;
                };
                let resumable = matches!(
                    state_message.message.routing_key(),
                    "run.enter" | "run.start" | "run.discarded" | "run.end" | "run.leave"
                );
                if resumable && state_message.message.is_redelivered() {
                    // re-drive the stalled transition, keeping the
                    // redelivered mark so events stay suppressed
                    let _ = self
                        .broker
                        .send_to_queue(RUN_QUEUE, state_message.message);
                }
            }
            "run.outbound.take" | "run.outbound.discard" => {
                // dispatch messages settle immediately; step mode has no
                // state-message handle on them
                self.broker.ack(RUN_QUEUE, delivery_tag);
                let flow_id = message.content.id.clone().unwrap_or_default();
                let Some(flow) = self
                    .statics
                    .outbound
                    .iter()
                    .find(|f| f.id() == flow_id)
                    .cloned()
                else {
                    warn!(activity = %self.statics.def.id, flow = %flow_id, "unknown outbound flow");
                    return;
                };
                let result = if key == "run.outbound.take" {
                    flow.take(message.content.clone())
                } else {
                    flow.discard(message.content.clone())
                };
                if let Err(err) = result {
                    warn!(activity = %self.statics.def.id, %err, "outbound dispatch failed");
                }
            }
            other => {
                debug!(activity = %self.statics.def.id, routing_key = other, "ignored run message");
                self.broker.ack(RUN_QUEUE, delivery_tag);
            }
        }
    }

    // ------------------------------------------------------------------
    // Leave and outbound dispatch

    fn run_leave(&self, message: &Message, is_discarded: bool) {
        let content = &message.content;
        if content.ignore_outbound == Some(true) || self.statics.outbound.is_empty() {
            self.publish_run("run.leave", content.clone());
            return;
        }

        let mut discard_sequence = content.discard_sequence.clone();
        let actions: Vec<OutboundFlowAction> = if is_discarded {
            // a boundary event seeds the sequence with its first inbound so
            // the attached-to activity recognizes its own shadow discard
            if discard_sequence.is_none() && self.statics.flags.attached_to.is_some() {
                discard_sequence = self
                    .statics
                    .inbound
                    .first()
                    .map(|flow| vec![flow.id().to_string()]);
            }
            self.statics
                .outbound
                .iter()
                .map(|flow| OutboundFlowAction::new(flow.id(), FlowAction::Discard))
                .collect()
        } else if let Some(precomputed) = &content.outbound {
            self.statics
                .outbound
                .iter()
                .map(|flow| {
                    precomputed
                        .iter()
                        .find(|action| action.id == flow.id())
                        .cloned()
                        .unwrap_or_else(|| {
                            OutboundFlowAction::new(flow.id(), FlowAction::Discard)
                        })
                })
                .collect()
        } else {
            let discard_rest = content.outbound_take_one == Some(true);
            match evaluate_outbound(&self.statics.outbound, message, discard_rest) {
                Ok(actions) => actions,
                Err(error) => {
                    let mut error_content = content.clone();
                    error_content.error = Some(error);
                    self.publish_run("run.error", error_content);
                    return;
                }
            }
        };

        for action in &actions {
            let mut outbound_content = Content {
                id: Some(action.id.clone()),
                element_type: Some("sequenceflow".to_string()),
                action: Some(action.action),
                execution_id: content.execution_id.clone(),
                sequence_id: Some(unique_id(&format!(
                    "{}_{}",
                    action.id,
                    action.action.as_str()
                ))),
                message: action.message.clone(),
                ..Content::default()
            };
            if action.action == FlowAction::Discard {
                outbound_content.discard_sequence = discard_sequence.clone();
            }
            self.publish_run(
                &format!("run.outbound.{}", action.action.as_str()),
                outbound_content,
            );
        }
        self.publish_run("run.leave", content.clone());
    }

    // ------------------------------------------------------------------
    // Execution bridge

    fn on_execute_delivery(&self, delivery: Delivery) {
        let outcome = {
            let mut inner = self.lock();
            inner
                .execution
                .as_mut()
                .map(|execution| execution.on_execute_message(&delivery))
        };
        match outcome {
            Some(Err(error)) => self.publish_execution_error(error, delivery.message.content),
            Some(Ok(())) => {}
            // scope is gone; settle the message so the queue drains
            None => self.broker.ack(EXECUTE_QUEUE, delivery.delivery_tag),
        }
    }

    fn on_execution_delivery(&self, delivery: Delivery) {
        let message = delivery.message;
        let key = message.routing_key().to_string();
        let rest = key.strip_prefix("execution.").unwrap_or(&key).to_string();
        let state_delivery_tag = {
            let inner = self.lock();
            inner.state_message.as_ref().and_then(|sm| {
                sm.message
                    .routing_key()
                    .starts_with("run.execute")
                    .then_some(sm.delivery_tag)
            })
        };

        match rest.as_str() {
            "outbound.take" => {
                let resolved = if let Some(hints) = &message.content.outbound {
                    self.statics
                        .outbound
                        .iter()
                        .map(|flow| {
                            hints
                                .iter()
                                .find(|action| action.id == flow.id())
                                .cloned()
                                .unwrap_or_else(|| {
                                    OutboundFlowAction::new(flow.id(), FlowAction::Discard)
                                })
                        })
                        .collect()
                } else {
                    let discard_rest = message.content.outbound_take_one == Some(true);
                    match evaluate_outbound(&self.statics.outbound, &message, discard_rest) {
                        Ok(actions) => actions,
                        Err(error) => {
                            self.fail_run(&message, error, state_delivery_tag);
                            self.broker.ack(EXECUTION_QUEUE, delivery.delivery_tag);
                            return;
                        }
                    }
                };
                let mut content = message.content.clone();
                content.outbound = Some(resolved);
                self.publish_run("run.execute.passthrough", content);
                if let Some(tag) = state_delivery_tag {
                    self.broker.ack(RUN_QUEUE, tag);
                }
            }
            "error" => {
                let error = message
                    .content
                    .error
                    .clone()
                    .unwrap_or_else(|| ActivityError::new("execution failed"));
                self.fail_run(&message, error, state_delivery_tag);
            }
            "discard" => {
                self.lock().status = Some(ActivityStatus::Discarded);
                self.publish_run("run.discarded", message.content.clone());
                if let Some(tag) = state_delivery_tag {
                    self.broker.ack(RUN_QUEUE, tag);
                }
            }
            // anything else, completion included, ends the run
            _ => {
                self.lock().status = Some(ActivityStatus::Executed);
                self.publish_run("run.end", message.content.clone());
                if let Some(tag) = state_delivery_tag {
                    self.broker.ack(RUN_QUEUE, tag);
                }
            }
        }
        self.broker.ack(EXECUTION_QUEUE, delivery.delivery_tag);
    }

    /// Error out the current run: `run.error` then `run.discarded`.
    fn fail_run(&self, message: &Message, error: ActivityError, state_delivery_tag: Option<u64>) {
        self.lock().status = Some(ActivityStatus::Error);
        let mut content = message.content.clone();
        content.error = Some(error);
        self.publish_run("run.error", content.clone());
        self.publish_run("run.discarded", content);
        if let Some(tag) = state_delivery_tag {
            self.broker.ack(RUN_QUEUE, tag);
        }
    }

    // ------------------------------------------------------------------
    // Api

    fn on_api_delivery(&self, delivery: Delivery) {
        let message = delivery.message;
        let addressed = {
            let inner = self.lock();
            inner.execution_id.is_some()
                && message.content.execution_id == inner.execution_id
        };
        if !addressed {
            return;
        }
        let api_type = message
            .properties
            .message_type
            .clone()
            .unwrap_or_default();
        debug!(activity = %self.statics.def.id, api = %api_type, "api message");
        match api_type.as_str() {
            "discard" => {
                if let Err(err) = self.discard() {
                    warn!(activity = %self.statics.def.id, %err, "api discard refused");
                }
            }
            "stop" => self.stop(),
            "shake" => self.shake(),
            "signal" => {
                let result = {
                    let mut inner = self.lock();
                    inner.execution.as_mut().map(|e| e.on_api_message(&message))
                };
                if let Some(Err(error)) = result {
                    self.publish_execution_error(error, message.content);
                }
            }
            other => {
                debug!(activity = %self.statics.def.id, api = other, "unhandled api message");
            }
        }
    }

    // ------------------------------------------------------------------
    // Shake

    fn shake_visit(&self) -> ShakeVisit {
        ShakeVisit {
            id: self.statics.def.id.clone(),
            element_type: self.statics.def.element_type.clone(),
        }
    }

    /// Continue a shake arriving over an inbound flow.
    fn shake_continue(&self, mut content: Content) {
        let own_id = &self.statics.def.id;
        if content
            .sequence
            .as_ref()
            .is_some_and(|sequence| sequence.iter().any(|visit| &visit.id == own_id))
        {
            let _ = self.publish_event("activity.shake.loop", content);
            return;
        }
        content.sequence.get_or_insert_with(Vec::new).push(self.shake_visit());
        self.shake_outbound(content);
    }

    fn shake_outbound(&self, content: Content) {
        if self.statics.flags.is_end {
            let _ = self.publish_event("activity.shake.end", content);
            return;
        }
        for flow in &self.statics.outbound {
            if let Err(err) = flow.shake(content.clone()) {
                warn!(activity = %self.statics.def.id, %err, "shake failed");
            }
        }
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Activity")
            .field("id", &self.statics.def.id)
            .field("type", &self.statics.def.element_type)
            .field("status", &inner.status)
            .field("counters", &inner.counters)
            .finish()
    }
}

fn unique_id(base: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", base, &suffix[..8])
}

fn compensation_id(activity_id: &str, sequence_id: Option<&str>) -> String {
    format!(
        "{}_{}",
        broker_safe_id(activity_id),
        broker_safe_id(sequence_id.unwrap_or("0"))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::behaviour::passthrough_factory;

    #[test]
    fn flags_are_computed_from_topology() {
        let inbound = vec![
            SequenceFlow::new(crate::flow::SequenceFlowDef::new("in1", "a", "gw")),
            SequenceFlow::new(crate::flow::SequenceFlowDef::new("in2", "b", "gw")),
        ];
        let mut def = ActivityDef::new("gw", "parallelgateway");
        def.is_parallel_gateway = true;
        let activity = ActivityBuilder::new(def, passthrough_factory())
            .inbound(inbound)
            .build();
        assert!(activity.flags().is_parallel_join);
        assert!(activity.flags().is_end);
        assert!(!activity.flags().is_start);
    }

    #[test]
    fn start_flag_requires_no_inbound() {
        let activity = ActivityBuilder::new(
            ActivityDef::new("start", "startevent"),
            passthrough_factory(),
        )
        .outbound(vec![SequenceFlow::new(crate::flow::SequenceFlowDef::new(
            "out", "start", "next",
        ))])
        .build();
        assert!(activity.flags().is_start);
        assert!(!activity.flags().is_end);
    }

    #[test]
    fn run_while_running_is_refused() {
        let wait_factory: BehaviourFactory = Arc::new(|| {
            Box::new(WaitBehaviour)
        });
        let activity =
            ActivityBuilder::new(ActivityDef::new("task", "usertask"), wait_factory).build();
        activity.run().unwrap();
        let err = activity.run().unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));
    }

    struct WaitBehaviour;

    impl crate::runtime::ActivityBehaviour for WaitBehaviour {
        fn execute(
            &mut self,
            ctx: &BehaviourContext,
            message: &Message,
        ) -> std::result::Result<(), ActivityError> {
            ctx.wait(message.content.clone())
        }
    }
}
