//! Session configuration.
//!
//! [`SessionConfig`] can be built in code (see
//! [`SessionBuilder`](crate::SessionBuilder)), parsed from JSON, or overlaid
//! from `SHOTWIRE_*` environment variables. Durations are expressed in
//! milliseconds in both JSON and the environment.
//!
//! # Example
//!
//! ```
//! use shotwire::config::{ReconnectPolicy, SessionConfig};
//!
//! let config = SessionConfig::from_json_str(
//!     r#"{ "host": "10.0.0.7", "idle_delay_ms": 500, "reconnect": { "mode": "reconnect" } }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.host, "10.0.0.7");
//! assert_eq!(config.port, 4444);
//! assert!(matches!(config.reconnect, ReconnectPolicy::Reconnect { .. }));
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShotwireError};
use crate::protocol::DEFAULT_MAX_PAYLOAD_LENGTH;

/// Default producer host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default producer port.
pub const DEFAULT_PORT: u16 = 4444;

/// Default pause after each delivered frame.
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_secs(1);

/// Default first reconnect delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default reconnect delay ceiling.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// What the session does when an established connection fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// End the run on the first connection failure. The caller restarts it.
    #[default]
    FailFast,
    /// Reconnect with exponential backoff.
    Reconnect {
        #[serde(rename = "initial_backoff_ms", with = "duration_ms", default = "default_initial_backoff")]
        initial_backoff: Duration,
        #[serde(rename = "max_backoff_ms", with = "duration_ms", default = "default_max_backoff")]
        max_backoff: Duration,
        /// Consecutive failed connects before giving up; `None` retries forever.
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    /// Reconnect with the default backoff and no attempt limit.
    pub fn reconnect() -> Self {
        ReconnectPolicy::Reconnect {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_attempts: None,
        }
    }

    fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" | "off" | "false" => Ok(ReconnectPolicy::FailFast),
            "reconnect" | "on" | "true" => Ok(ReconnectPolicy::reconnect()),
            other => Err(ShotwireError::Config(format!(
                "unknown reconnect policy {:?}",
                other
            ))),
        }
    }
}

/// Settings for one streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Producer host name or address.
    pub host: String,
    /// Producer port.
    pub port: u16,
    /// Pause after each delivered (or empty) frame.
    #[serde(rename = "idle_delay_ms", with = "duration_ms")]
    pub idle_delay: Duration,
    /// Limit for establishing the TCP connection.
    #[serde(rename = "connect_timeout_ms", with = "opt_duration_ms")]
    pub connect_timeout: Option<Duration>,
    /// Limit for receiving one complete frame after requesting it.
    #[serde(rename = "read_timeout_ms", with = "opt_duration_ms")]
    pub read_timeout: Option<Duration>,
    /// Largest payload accepted from the producer.
    pub max_payload_length: usize,
    /// Behavior after a connection failure.
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_delay: DEFAULT_IDLE_DELAY,
            connect_timeout: None,
            read_timeout: None,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            reconnect: ReconnectPolicy::FailFast,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with defaults for everything but the address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ShotwireError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Overlay `SHOTWIRE_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay `SHOTWIRE_*` variables from an arbitrary lookup.
    ///
    /// Recognized keys: `SHOTWIRE_HOST`, `SHOTWIRE_PORT`,
    /// `SHOTWIRE_IDLE_DELAY_MS`, `SHOTWIRE_CONNECT_TIMEOUT_MS`,
    /// `SHOTWIRE_READ_TIMEOUT_MS`, `SHOTWIRE_MAX_PAYLOAD`,
    /// `SHOTWIRE_RECONNECT` (`fail_fast` or `reconnect`).
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SHOTWIRE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("SHOTWIRE_PORT") {
            self.port = parse_env("SHOTWIRE_PORT", &port)?;
        }
        if let Some(ms) = lookup("SHOTWIRE_IDLE_DELAY_MS") {
            self.idle_delay = Duration::from_millis(parse_env("SHOTWIRE_IDLE_DELAY_MS", &ms)?);
        }
        if let Some(ms) = lookup("SHOTWIRE_CONNECT_TIMEOUT_MS") {
            self.connect_timeout = Some(Duration::from_millis(parse_env(
                "SHOTWIRE_CONNECT_TIMEOUT_MS",
                &ms,
            )?));
        }
        if let Some(ms) = lookup("SHOTWIRE_READ_TIMEOUT_MS") {
            self.read_timeout = Some(Duration::from_millis(parse_env(
                "SHOTWIRE_READ_TIMEOUT_MS",
                &ms,
            )?));
        }
        if let Some(max) = lookup("SHOTWIRE_MAX_PAYLOAD") {
            self.max_payload_length = parse_env("SHOTWIRE_MAX_PAYLOAD", &max)?;
        }
        if let Some(policy) = lookup("SHOTWIRE_RECONNECT") {
            self.reconnect = ReconnectPolicy::parse(&policy)?;
        }
        self.validate()
    }

    /// Check that the configuration can be used to start a session.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ShotwireError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ShotwireError::Config("port must not be 0".to_string()));
        }
        if self.max_payload_length == 0 {
            return Err(ShotwireError::Config(
                "max_payload_length must be positive".to_string(),
            ));
        }
        if let ReconnectPolicy::Reconnect {
            max_attempts: Some(0),
            ..
        } = self.reconnect
        {
            return Err(ShotwireError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ShotwireError::Config(format!("invalid value for {}: {:?}", key, value)))
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
