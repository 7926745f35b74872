//! Broker connection configuration.
//!
//! Connection facts (bootstrap servers, credentials, trust store) are read from
//! the process environment exactly once, at startup, into a [`BrokerConfig`].
//! The config is then passed by reference to whatever builds producer or
//! consumer connections. Nothing in this module touches global state after
//! loading.
//!
//! # Credential Mechanism Policy
//!
//! The SASL mechanism is an explicit field on [`Credentials`]. When loading
//! from the environment it is derived from the username:
//!
//! | username value | mechanism | typical deployment |
//! |---|---|---|
//! | `"token"` | `PLAIN` over TLS | managed cloud broker |
//! | any other non-empty | `SCRAM-SHA-512` over TLS | self-hosted cluster |
//! | absent/empty | none (plaintext) | local/dev only |
//!
//! # Parameter Sets
//!
//! [`BrokerConfig::producer_params`] and [`BrokerConfig::consumer_params`]
//! produce [`ConnectionParams`]: librdkafka property names mapped to values,
//! ready to be fed into a client config.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable names.
pub mod env_vars {
    /// Comma-separated bootstrap servers. Required.
    pub const KAFKA_BROKERS: &str = "KAFKA_BROKERS";
    /// SASL username.
    pub const KAFKA_USER: &str = "KAFKA_USER";
    /// SASL password.
    pub const KAFKA_PASSWORD: &str = "KAFKA_PASSWORD";
    /// Set to `"true"` to layer the trust store onto the TLS settings.
    pub const TRUSTSTORE_ENABLED: &str = "TRUSTSTORE_ENABLED";
    /// Path to the CA bundle.
    pub const TRUSTSTORE_PATH: &str = "TRUSTSTORE_PATH";
    /// Trust store password.
    pub const TRUSTSTORE_PWD: &str = "TRUSTSTORE_PWD";
    /// Path of the TOML application config.
    pub const CONFIG_PATH: &str = "ORDER_PIPELINE_CONFIG";
}

/// Application config read when `ORDER_PIPELINE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/application.toml";

/// Fixed broker timeouts.
pub mod timeouts {
    use std::time::Duration;

    /// Upper bound on a single publish, from send to acknowledgment.
    pub const PRODUCER_TIMEOUT: Duration = Duration::from_secs(10);
    /// Upper bound on flushing a producer when it is closed.
    pub const PRODUCER_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
    /// Upper bound on a single consumer poll.
    pub const CONSUMER_POLL_TIMEOUT: Duration = Duration::from_secs(10);
    /// Upper bound on the final commit and release of a consumer.
    pub const CONSUMER_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
    /// Upper bound on waiting for background tasks at process termination.
    pub const TERMINATION_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Username that selects the `PLAIN` mechanism (managed cloud brokers).
pub const MANAGED_CLOUD_USERNAME: &str = "token";

/// Errors raised while loading configuration.
///
/// All of these are fatal: a process that cannot load its configuration
/// must not start.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is absent or empty
    #[error("Missing environment variable {0}")]
    MissingVariable(&'static str),

    /// A configuration value could not be interpreted
    #[error("Invalid configuration value for '{key}': {reason}")]
    Invalid {
        /// The offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// A configuration file could not be read
    #[error("Failed to read configuration file {path}: {reason}")]
    Unreadable {
        /// Path of the file
        path: String,
        /// Underlying I/O failure
        reason: String,
    },
}

/// SASL mechanism used to authenticate against the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMechanism {
    /// Plain username/password, only ever sent over TLS.
    Plain,
    /// Salted challenge-response with SHA-512.
    ScramSha512,
}

impl CredentialMechanism {
    /// Apply the username heuristic: the managed-cloud sentinel selects
    /// `PLAIN`, anything else selects `SCRAM-SHA-512`.
    #[must_use]
    pub fn for_username(username: &str) -> Self {
        if username == MANAGED_CLOUD_USERNAME {
            Self::Plain
        } else {
            Self::ScramSha512
        }
    }

    /// The librdkafka `sasl.mechanism` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

impl fmt::Display for CredentialMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SASL credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// Mechanism to authenticate with
    pub mechanism: CredentialMechanism,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mechanism", &self.mechanism)
            .finish()
    }
}

/// Client trust store layered onto TLS connections.
#[derive(Clone, PartialEq, Eq)]
pub struct TrustStore {
    /// Path to the CA bundle
    pub path: String,
    /// Password, if the store carries one
    pub password: Option<String>,
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustStore")
            .field("path", &self.path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Transport security in effect for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProtocol {
    /// Unencrypted, unauthenticated. Local development only.
    Plaintext,
    /// SASL authentication over TLS.
    SaslSsl,
}

impl SecurityProtocol {
    /// The librdkafka `security.protocol` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::SaslSsl => "SASL_SSL",
        }
    }
}

/// Where a consumer group with no committed offset starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from the beginning of each partition
    #[default]
    Earliest,
    /// Start from the end of each partition
    Latest,
    /// Fail instead of guessing
    Error,
}

impl OffsetReset {
    /// The librdkafka `auto.offset.reset` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
            Self::Error => "error",
        }
    }
}

/// Caller-supplied consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Consumer group identifier
    pub group_id: String,
    /// Client identifier reported to the broker
    pub client_id: String,
    /// Whether the client commits offsets on its own schedule
    pub auto_commit: bool,
    /// Offset reset policy for new groups
    pub offset_reset: OffsetReset,
}

impl ConsumerSettings {
    /// Settings for a group of one: `-{instance}` is appended to the group id.
    ///
    /// A consumer whose read model does not outlive the process must not
    /// resume from offsets committed by an earlier process. Under its own
    /// group it has none, so `offset_reset` decides where it starts.
    #[must_use]
    pub fn for_instance(mut self, instance: &str) -> Self {
        self.group_id = format!("{}-{instance}", self.group_id);
        self
    }
}

/// A complete set of client properties keyed by librdkafka property name.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams(BTreeMap<String, String>);

impl ConnectionParams {
    /// Create an empty parameter set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether a property is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.0 {
            if key.contains("password") {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

/// Broker connection configuration.
///
/// Built once at startup and passed by reference to producer and consumer
/// constructors.
///
/// # Example
///
/// ```
/// use order_pipeline_core::config::{BrokerConfig, ConsumerSettings, OffsetReset};
///
/// let config = BrokerConfig::new("localhost:9092");
/// let producer = config.producer_params("order-command");
/// assert_eq!(producer.get("acks"), Some("1"));
///
/// let consumer = config.consumer_params(&ConsumerSettings {
///     group_id: "order-query".to_string(),
///     client_id: "order-query-1".to_string(),
///     auto_commit: false,
///     offset_reset: OffsetReset::Earliest,
/// });
/// assert_eq!(consumer.get("enable.auto.commit"), Some("false"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Comma-separated bootstrap servers
    pub bootstrap_servers: String,
    /// SASL credentials; `None` means plaintext
    pub credentials: Option<Credentials>,
    /// Trust store layered onto TLS; ignored without credentials
    pub trust_store: Option<TrustStore>,
    /// Producer `message.timeout.ms`
    pub producer_timeout: Duration,
}

impl BrokerConfig {
    /// Plaintext configuration for the given bootstrap servers.
    #[must_use]
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            credentials: None,
            trust_store: None,
            producer_timeout: timeouts::PRODUCER_TIMEOUT,
        }
    }

    /// Enable SASL over TLS with the given credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Layer a trust store onto TLS connections.
    #[must_use]
    pub fn with_trust_store(mut self, trust_store: TrustStore) -> Self {
        self.trust_store = Some(trust_store);
        self
    }

    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVariable`] if `KAFKA_BROKERS` is absent,
    /// or if the trust store is enabled without a path.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// This is the only place the username heuristic is applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVariable`] if the bootstrap servers are
    /// absent, or if the trust store is enabled without a path.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let brokers = non_empty(env_vars::KAFKA_BROKERS)
            .ok_or(ConfigError::MissingVariable(env_vars::KAFKA_BROKERS))?;
        let mut config = Self::new(brokers);

        if let (Some(username), Some(password)) =
            (non_empty(env_vars::KAFKA_USER), non_empty(env_vars::KAFKA_PASSWORD))
        {
            let mechanism = CredentialMechanism::for_username(&username);
            config = config.with_credentials(Credentials {
                username,
                password,
                mechanism,
            });

            if lookup(env_vars::TRUSTSTORE_ENABLED).as_deref() == Some("true") {
                let path = non_empty(env_vars::TRUSTSTORE_PATH)
                    .ok_or(ConfigError::MissingVariable(env_vars::TRUSTSTORE_PATH))?;
                config = config.with_trust_store(TrustStore {
                    path,
                    password: non_empty(env_vars::TRUSTSTORE_PWD),
                });
            }
        }

        tracing::info!(
            bootstrap_servers = %config.bootstrap_servers,
            security_protocol = config.security_protocol().as_str(),
            mechanism = config.credentials.as_ref().map(|c| c.mechanism.as_str()),
            trust_store = config.trust_store.is_some(),
            "Loaded broker configuration"
        );

        Ok(config)
    }

    /// Transport security implied by this configuration.
    #[must_use]
    pub const fn security_protocol(&self) -> SecurityProtocol {
        if self.credentials.is_some() {
            SecurityProtocol::SaslSsl
        } else {
            SecurityProtocol::Plaintext
        }
    }

    /// Producer parameters.
    ///
    /// Acknowledgment is required from the partition leader (`acks=1`) and
    /// idempotent retries are disabled; duplicates that slip through on
    /// retry-after-timeout are absorbed by the idempotent read-side fold.
    #[must_use]
    pub fn producer_params(&self, client_id: &str) -> ConnectionParams {
        let mut params = self.common_params();
        params
            .set("client.id", client_id)
            .set("acks", "1")
            .set("enable.idempotence", "false")
            .set(
                "message.timeout.ms",
                self.producer_timeout.as_millis().to_string(),
            );
        params
    }

    /// Consumer parameters.
    #[must_use]
    pub fn consumer_params(&self, settings: &ConsumerSettings) -> ConnectionParams {
        let mut params = self.common_params();
        params
            .set("group.id", settings.group_id.as_str())
            .set("client.id", settings.client_id.as_str())
            .set("enable.auto.commit", settings.auto_commit.to_string())
            .set("auto.offset.reset", settings.offset_reset.as_str())
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false");
        params
    }

    fn common_params(&self) -> ConnectionParams {
        let mut params = ConnectionParams::new();
        params
            .set("bootstrap.servers", self.bootstrap_servers.as_str())
            .set("security.protocol", self.security_protocol().as_str());

        if let Some(credentials) = &self.credentials {
            params
                .set("sasl.mechanism", credentials.mechanism.as_str())
                .set("sasl.username", credentials.username.as_str())
                .set("sasl.password", credentials.password.as_str())
                .set("ssl.endpoint.identification.algorithm", "https");
            // No TLS version pin: librdkafka has no such property and OpenSSL 3
            // refuses anything older than TLS 1.2 at its default security level

            if let Some(trust_store) = &self.trust_store {
                params.set("ssl.ca.location", trust_store.path.as_str());
                if trust_store.password.is_some() {
                    // librdkafka reads PEM bundles, which carry no password
                    tracing::warn!(
                        path = %trust_store.path,
                        "Trust store password is set but not used by the client"
                    );
                }
            }
        }

        params
    }
}

/// Topic names, the `[topics]` table of the application config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Authoritative order-lifecycle events
    pub orders: String,
    /// Incoming command requests
    pub order_commands: String,
    /// Poison-message and processing-failure sink
    pub errors: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            orders: "orders".to_string(),
            order_commands: "order-commands".to_string(),
            errors: "errors".to_string(),
        }
    }
}

/// Read a configuration file to a string.
///
/// # Errors
///
/// Returns [`ConfigError::Unreadable`] if the file cannot be read.
pub fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Parse a TOML application config.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the text is not valid TOML or does not
/// match `T`.
pub fn parse_app_config<T: DeserializeOwned>(text: &str) -> Result<T, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Invalid {
        key: env_vars::CONFIG_PATH.to_string(),
        reason: e.to_string(),
    })
}

/// Load the application config.
///
/// The path comes from `ORDER_PIPELINE_CONFIG`; a path given there must
/// exist. Without it [`DEFAULT_CONFIG_PATH`] is tried, and if that file is
/// absent every table takes its defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Unreadable`] if an explicitly configured file
/// cannot be read, or [`ConfigError::Invalid`] if a file does not parse.
pub fn load_app_config<T, F>(lookup: F) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(env_vars::CONFIG_PATH).filter(|p| !p.trim().is_empty()) {
        let text = read_config_file(Path::new(&path))?;
        tracing::info!(path = %path, "Loaded application config");
        return parse_app_config(&text);
    }

    let path = Path::new(DEFAULT_CONFIG_PATH);
    if path.exists() {
        let text = read_config_file(path)?;
        tracing::info!(path = DEFAULT_CONFIG_PATH, "Loaded application config");
        parse_app_config(&text)
    } else {
        tracing::warn!(
            path = DEFAULT_CONFIG_PATH,
            "No application config found, using defaults"
        );
        Ok(T::default())
    }
}
