use std::time::Duration;

use serde::{Deserialize, Serialize};
use viewchat_core::ViewchatError;
use viewchat_sql::DEFAULT_UNSUPPORTED_MARKER;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// What happens to a session's history when a question fails for a reason
/// other than exhausted retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPolicy {
    /// Drop the whole window so a bad turn cannot poison later questions.
    #[default]
    ClearOnFailure,
    /// Roll back to the turns held before the failed question.
    PreserveOnFailure,
}

/// Literal markers bracketing an answer for clients that only read reply
/// text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentinels {
    pub start: String,
    pub end: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            start: "<SOS>".to_string(),
            end: "<EOS>".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: String,
    pub translation_temperature: f32,
    pub summary_temperature: f32,
    pub memory_window: usize,
    pub max_attempts: usize,
    #[serde(with = "duration_millis", rename = "backoff_ms")]
    pub backoff: Duration,
    pub event_buffer_size: usize,
    pub memory_policy: MemoryPolicy,
    pub unsupported_marker: String,
    pub sentinels: Sentinels,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            translation_temperature: 0.0,
            summary_temperature: 0.3,
            memory_window: 3,
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            event_buffer_size: 64,
            memory_policy: MemoryPolicy::default(),
            unsupported_marker: DEFAULT_UNSUPPORTED_MARKER.to_string(),
            sentinels: Sentinels::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ViewchatError> {
        if self.model.trim().is_empty() {
            return Err(ViewchatError::InvalidConfig("model must not be empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ViewchatError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(ViewchatError::InvalidConfig(
                "event_buffer_size must be at least 1".to_string(),
            ));
        }
        if self.unsupported_marker.trim().is_empty() {
            return Err(ViewchatError::InvalidConfig(
                "unsupported_marker must not be empty".to_string(),
            ));
        }
        for (name, value) in [
            ("translation_temperature", self.translation_temperature),
            ("summary_temperature", self.summary_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ViewchatError::InvalidConfig(format!(
                    "{name} must be within 0.0..=2.0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
