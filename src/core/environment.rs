use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Host-provided runtime settings shared by every element of a process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub settings: Settings,
}

/// Runtime settings.
///
/// `step` puts every activity in step mode: run-queue messages are not
/// auto-acked and the external driver advances the state machine with
/// `next()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub step: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Environment {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Environment with step mode enabled.
    pub fn stepping() -> Self {
        Self {
            settings: Settings {
                step: true,
                ..Settings::default()
            },
        }
    }
}
