//! Engine configuration types for Stepwise.
//!
//! `EngineConfig` represents the `config.toml` that controls retry defaults
//! and the delay between retry attempts.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
///
/// Loaded from `{state_dir}/config.toml`. All fields have sensible defaults;
/// the default retry delay is zero, so failed attempts are retried immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry budget applied by `WorkflowDefinition::builder` unless overridden.
    #[serde(default = "default_max_retry_per_step")]
    pub default_max_retry_per_step: u32,

    /// Delay before the first retry of a failed step, in milliseconds.
    #[serde(default)]
    pub retry_backoff_ms: u64,

    /// Growth factor applied to the delay for each further retry.
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,

    /// Upper bound on any single retry delay, in milliseconds.
    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,
}

fn default_max_retry_per_step() -> u32 {
    3
}

fn default_retry_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_retry_backoff_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retry_per_step: default_max_retry_per_step(),
            retry_backoff_ms: 0,
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            max_retry_backoff_ms: default_max_retry_backoff_ms(),
        }
    }
}
