//! Engine configuration loader for Stepwise.
//!
//! Reads `config.toml` from the state directory and deserializes it into
//! [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::Path;

use stepwise_types::config::EngineConfig;

pub const CONFIG_FILE: &str = "config.toml";

/// Load engine configuration from `{state_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_engine_config(state_dir: &Path) -> EngineConfig {
    let path = state_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no engine config file, using defaults");
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unreadable engine config, using defaults");
            return EngineConfig::default();
        }
    };

    toml::from_str::<EngineConfig>(&content).unwrap_or_else(|err| {
        tracing::warn!(path = %path.display(), error = %err, "invalid engine config, using defaults");
        EngineConfig::default()
    })
}
