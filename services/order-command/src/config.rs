//! Configuration for the command service.
//!
//! Broker connection facts come from the environment
//! ([`BrokerConfig::from_env`](order_pipeline_core::config::BrokerConfig::from_env));
//! everything else comes from the TOML application config.

use order_pipeline_core::config::{load_app_config, ConfigError, TopicConfig};
use serde::Deserialize;
use std::net::SocketAddr;

/// Command service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Topic names
    pub topics: TopicConfig,
    /// The `[command]` table
    pub command: CommandSettings,
}

/// The `[command]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Producer client id reported to the broker
    pub client_id: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            client_id: "order-command".to_string(),
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

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use order_pipeline_core::config::parse_app_config;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = parse_app_config("").expect("empty toml");
        assert_eq!(config, Config::default());
        assert_eq!(config.command.bind_addr.port(), 8080);
        assert_eq!(config.topics.orders, "orders");
    }

    #[test]
    fn reads_command_table() {
        let config: Config = parse_app_config(
            r#"
            [topics]
            orders = "orders-v2"

            [command]
            bind_addr = "127.0.0.1:9000"
            client_id = "order-command-eu"

            [query]
            group_id = "ignored-by-this-service"
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.topics.orders, "orders-v2");
        assert_eq!(config.command.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.command.client_id, "order-command-eu");
    }
}
