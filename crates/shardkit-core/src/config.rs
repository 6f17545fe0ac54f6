//! Sharding settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Default location of the shards document
pub const DEFAULT_SHARDS_CONFIG_FILE: &str = "config/shards.json";

/// Environment used when none is configured
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Process-level sharding settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// Create one (empty, lazily filled) pool per configured shard on setup.
    /// When false every shard must be established explicitly before use.
    pub establish_all_connections_on_setup: bool,

    /// Where the shard-group/shard connection document lives
    pub shards_config_file: PathBuf,

    /// Active environment (top-level key of the shards document)
    pub environment: String,

    /// Warn when a `using_shard` scope exits without ever resolving a
    /// connection through its selection
    pub no_connection_retrieved_warning: bool,

    /// Annotate every query log line with the `group:name` of its shard
    pub add_shard_tag_to_query_logs: bool,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            establish_all_connections_on_setup: true,
            shards_config_file: PathBuf::from(DEFAULT_SHARDS_CONFIG_FILE),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            no_connection_retrieved_warning: true,
            add_shard_tag_to_query_logs: true,
        }
    }
}

impl ShardingConfig {
    /// Load settings from environment variables, starting from defaults
    pub fn from_env() -> Self {
        let mut config = ShardingConfig::default();

        if let Ok(env) = std::env::var("SHARDING_ENV").or_else(|_| std::env::var("APP_ENV")) {
            if !env.trim().is_empty() {
                config.environment = env.trim().to_string();
            }
        }

        if let Ok(path) = std::env::var("SHARDS_CONFIG_FILE") {
            if !path.trim().is_empty() {
                config.shards_config_file = PathBuf::from(path.trim());
            }
        }

        if let Some(flag) = bool_var("SHARDING_ESTABLISH_ALL") {
            config.establish_all_connections_on_setup = flag;
        }
        if let Some(flag) = bool_var("SHARDING_WARN_UNUSED") {
            config.no_connection_retrieved_warning = flag;
        }
        if let Some(flag) = bool_var("SHARDING_TAG_QUERY_LOGS") {
            config.add_shard_tag_to_query_logs = flag;
        }

        config
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_shards_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.shards_config_file = path.into();
        self
    }

    pub fn with_establish_all(mut self, enabled: bool) -> Self {
        self.establish_all_connections_on_setup = enabled;
        self
    }

    pub fn with_unused_connection_warning(mut self, enabled: bool) -> Self {
        self.no_connection_retrieved_warning = enabled;
        self
    }

    pub fn with_query_log_tags(mut self, enabled: bool) -> Self {
        self.add_shard_tag_to_query_logs = enabled;
        self
    }
}

fn bool_var(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    parse_flag(&raw).or_else(|| {
        warn!(variable = name, value = %raw, "Ignoring unparsable boolean setting");
        None
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
