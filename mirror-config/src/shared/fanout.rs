use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the fan-out sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FanoutConfig {
    /// Events accumulated across all topics before a round of per-topic requests is sent.
    ///
    /// This bounds request sizes on the sink side and has no effect on offset bookkeeping.
    #[serde(default = "default_max_events_per_request")]
    pub max_events_per_request: usize,
    /// Number of events processed between two heartbeats.
    #[serde(default = "default_events_per_heartbeat")]
    pub events_per_heartbeat: usize,
    /// Wall-clock budget, in milliseconds, shared by all topic deliveries of one batch.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl FanoutConfig {
    pub const DEFAULT_MAX_EVENTS_PER_REQUEST: usize = 100_000;
    pub const DEFAULT_EVENTS_PER_HEARTBEAT: usize = 1_000;
    pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let checks = [
            ("fanout.max_events_per_request", self.max_events_per_request as u64),
            ("fanout.events_per_heartbeat", self.events_per_heartbeat as u64),
            ("fanout.batch_timeout_ms", self.batch_timeout_ms),
        ];

        for (field, value) in checks {
            if value == 0 {
                return Err(ValidationError::InvalidFieldValue {
                    field: field.to_owned(),
                    constraint: "must be greater than 0".to_owned(),
                });
            }
        }

        Ok(())
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_events_per_request: default_max_events_per_request(),
            events_per_heartbeat: default_events_per_heartbeat(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

fn default_max_events_per_request() -> usize {
    FanoutConfig::DEFAULT_MAX_EVENTS_PER_REQUEST
}

fn default_events_per_heartbeat() -> usize {
    FanoutConfig::DEFAULT_EVENTS_PER_HEARTBEAT
}

fn default_batch_timeout_ms() -> u64 {
    FanoutConfig::DEFAULT_BATCH_TIMEOUT_MS
}
