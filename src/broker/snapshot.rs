use serde::{Deserialize, Serialize};

use super::queue::QueueOptions;
use crate::core::Message;

/// Exchange kind. Topic exchanges route by wildcard pattern, direct
/// exchanges by exact key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Topic,
    Direct,
}

/// Serialized binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSnapshot {
    pub queue: String,
    pub pattern: String,
}

/// Serialized exchange with its bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    pub name: String,
    pub kind: ExchangeKind,
    pub bindings: Vec<BindingSnapshot>,
}

/// Serialized queue: options plus undelivered persistent messages in
/// delivery order, in-flight ones first and marked redelivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub options: QueueOptions,
    pub messages: Vec<Message>,
}

/// Serializable broker state, produced by `Broker::get_state` and consumed
/// by `Broker::recover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub exchanges: Vec<ExchangeSnapshot>,
    pub queues: Vec<QueueSnapshot>,
}
