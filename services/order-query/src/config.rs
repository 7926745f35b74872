//! Configuration for the query service.

use order_pipeline_core::config::{
    load_app_config, ConfigError, ConsumerSettings, OffsetReset, TopicConfig,
};
use serde::Deserialize;
use std::net::SocketAddr;

/// Query service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Topic names
    pub topics: TopicConfig,
    /// The `[query]` table
    pub query: QuerySettings,
}

/// The `[query]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Client id reported to the broker
    pub client_id: String,
    /// Consumer group, or its prefix when `group_per_instance` is set
    pub group_id: String,
    /// Join a group of one, named after this process. The read store lives
    /// in memory, so every start must replay the orders topic from the
    /// beginning instead of resuming from another process's commits.
    pub group_per_instance: bool,
    /// Let the client commit on its own schedule. Leave off: the consumer
    /// commits after each applied batch.
    pub auto_commit: bool,
    /// Where a new group starts reading
    pub offset_reset: OffsetReset,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            client_id: "order-query".to_string(),
            group_id: "order-query".to_string(),
            group_per_instance: true,
            auto_commit: false,
            offset_reset: OffsetReset::Earliest,
        }
    }
}

impl QuerySettings {
    /// Consumer settings for the broker connection.
    ///
    /// `instance` names this process; it is only used with
    /// `group_per_instance`.
    #[must_use]
    pub fn consumer_settings(&self, instance: &str) -> ConsumerSettings {
        let settings = ConsumerSettings {
            group_id: self.group_id.clone(),
            client_id: self.client_id.clone(),
            auto_commit: self.auto_commit,
            offset_reset: self.offset_reset,
        };
        if self.group_per_instance {
            settings.for_instance(instance)
        } else {
            settings
        }
    }
}

impl Config {
    /// Load from the application config file named by the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is unreadable or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_app_config(|key| std::env::var(key).ok())
    }
}
