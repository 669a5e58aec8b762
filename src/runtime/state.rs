use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::BrokerSnapshot;
use crate::core::Parent;

/// Activity status. Unset exactly when the activity is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Entered,
    Started,
    Executing,
    Executed,
    Error,
    Discarded,
    End,
    /// Pseudo-status while the formatter holds a transition.
    Formatting,
    /// Pseudo-status on the discard path.
    Discard,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Entered => "entered",
            ActivityStatus::Started => "started",
            ActivityStatus::Executing => "executing",
            ActivityStatus::Executed => "executed",
            ActivityStatus::Error => "error",
            ActivityStatus::Discarded => "discarded",
            ActivityStatus::End => "end",
            ActivityStatus::Formatting => "formatting",
            ActivityStatus::Discard => "discard",
        }
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run outcome counters. Monotone non-decreasing over the activity's
/// lifetime; exactly one of the two increments per completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounters {
    pub taken: u64,
    pub discarded: u64,
}

/// Serialized execution holder state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub completed: bool,
}

/// Serializable activity state, produced by `Activity::get_state` and
/// consumed by `Activity::recover`. Truthy flags are inlined by name;
/// false flags are left out of the serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityState {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActivityStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Parent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stopped: bool,
    /// Opaque behaviour metadata from the activity definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<Value>,
    pub counters: ActivityCounters,
    pub broker: BrokerSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSnapshot>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_end: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_start: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_sub_process: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_multi_instance: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_transaction: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_throwing: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_for_compensation: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_parallel_join: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ActivityStatus::Executing).unwrap();
        assert_eq!(json, "\"executing\"");
        let back: ActivityStatus = serde_json::from_str("\"end\"").unwrap();
        assert_eq!(back, ActivityStatus::End);
    }

    #[test]
    fn false_flags_are_not_serialized() {
        let state = ActivityState {
            id: "task".to_string(),
            element_type: "usertask".to_string(),
            name: None,
            status: None,
            parent: None,
            execution_id: None,
            stopped: false,
            behaviour: None,
            counters: ActivityCounters::default(),
            broker: BrokerSnapshot {
                exchanges: Vec::new(),
                queues: Vec::new(),
            },
            execution: None,
            is_end: true,
            is_start: false,
            is_sub_process: false,
            is_multi_instance: false,
            is_transaction: false,
            is_throwing: false,
            is_for_compensation: false,
            is_parallel_join: false,
            attached_to: None,
        };
        let value = serde_json::to_value(&state).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("is_end"));
        assert!(!obj.contains_key("is_start"));
        assert!(!obj.contains_key("stopped"));
    }
}
