//! Client configuration
//!
//! Loaded from TOML, e.g.
//!
//! ```toml
//! url = "wss://hub.example.com/ws"
//! token = "secret"
//! heartbeat_interval = 30
//! reconnect_delay = "500ms"
//! max_reconnect_attempts = 10
//! ```
//!
//! Durations are whole seconds or strings with an `ms`/`s`/`m` suffix.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 100;
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(60);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Longest accepted value for any duration setting
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Environment variable overriding `url`
pub const ENV_URL: &str = "TAIBAI_WS_URL";
/// Environment variable overriding `token`
pub const ENV_TOKEN: &str = "TAIBAI_TOKEN";

/// Error type for config loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Immutable connection parameters for one hub client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hub endpoint; http(s) URLs are mapped to ws(s)
    pub url: String,
    /// Bearer token sent on the upgrade request. Empty means no header.
    #[serde(default)]
    pub token: String,
    /// Application-level ping cadence
    #[serde(default = "defaults::heartbeat_interval", with = "duration")]
    pub heartbeat_interval: Duration,
    /// Wait before each reconnect attempt
    #[serde(default = "defaults::reconnect_delay", with = "duration")]
    pub reconnect_delay: Duration,
    /// Cap for exponential backoff. `None` keeps the delay fixed.
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub max_reconnect_delay: Option<Duration>,
    /// 0 = unlimited
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "defaults::outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "defaults::dial_timeout", with = "duration")]
    pub dial_timeout: Duration,
    /// Rolling read deadline, reset on every received frame
    #[serde(default = "defaults::read_deadline", with = "duration")]
    pub read_deadline: Duration,
    /// Transport-level websocket ping cadence
    #[serde(default = "defaults::keepalive_interval", with = "duration")]
    pub keepalive_interval: Duration,
}

mod defaults {
    use super::*;

    pub fn heartbeat_interval() -> Duration {
        DEFAULT_HEARTBEAT_INTERVAL
    }
    pub fn reconnect_delay() -> Duration {
        DEFAULT_RECONNECT_DELAY
    }
    pub fn outbound_capacity() -> usize {
        DEFAULT_OUTBOUND_CAPACITY
    }
    pub fn dial_timeout() -> Duration {
        DEFAULT_DIAL_TIMEOUT
    }
    pub fn read_deadline() -> Duration {
        DEFAULT_READ_DEADLINE
    }
    pub fn keepalive_interval() -> Duration {
        DEFAULT_KEEPALIVE_INTERVAL
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: None,
            max_reconnect_attempts: 0,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            read_deadline: DEFAULT_READ_DEADLINE,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), url = %config.url, "Loaded client config");
        Ok(config)
    }

    /// Parse and validate config from TOML content
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TAIBAI_WS_URL` / `TAIBAI_TOKEN` when set
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_URL) {
            self.url = url;
        }
        if let Ok(token) = std::env::var(ENV_TOKEN) {
            self.token = token;
        }
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_delay(mut self, cap: Duration) -> Self {
        self.max_reconnect_delay = Some(cap);
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Endpoint with the scheme mapped to ws/wss
    pub fn ws_url(&self) -> String {
        let url = self.url.trim();
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            url.to_string()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.ws_url();
        if url.is_empty() {
            return Err(ConfigError::Invalid("url is required".into()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "unsupported url scheme: {}",
                self.url
            )));
        }
        let intervals = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("dial_timeout", self.dial_timeout),
            ("read_deadline", self.read_deadline),
            ("keepalive_interval", self.keepalive_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        let delays = [
            ("reconnect_delay", Some(self.reconnect_delay)),
            ("max_reconnect_delay", self.max_reconnect_delay),
        ];
        let bounded = intervals.into_iter().chain(
            delays
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| (name, v))),
        );
        for (name, value) in bounded {
            if value > MAX_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{} exceeds {}s",
                    name,
                    MAX_DURATION.as_secs()
                )));
            }
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound_capacity must be non-zero".into(),
            ));
        }
        if let Some(cap) = self.max_reconnect_delay {
            if cap < self.reconnect_delay {
                return Err(ConfigError::Invalid(
                    "max_reconnect_delay is shorter than reconnect_delay".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Durations as integer seconds or "250ms" / "5s" / "2m" strings
mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum Raw {
        Secs(u64),
        Text(String),
    }

    impl Raw {
        pub(super) fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
            match self {
                Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
                Raw::Text(text) => parse(&text).map_err(E::custom),
            }
        }
    }

    pub(super) fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let (digits, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
            Some(idx) => text.split_at(idx),
            None => (text, "s"),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration: {:?}", text))?;
        match unit.trim() {
            "ms" => Ok(Duration::from_millis(value)),
            "s" => Ok(Duration::from_secs(value)),
            "m" => value
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration out of range: {:?}", text)),
            other => Err(format!("unknown duration unit {:?}", other)),
        }
    }

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            s.serialize_u64(value.as_secs())
        } else {
            s.serialize_str(&format!("{}ms", value.as_millis()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Raw::deserialize(d)?.into_duration()
    }
}

mod opt_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => super::duration::serialize(d, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<super::duration::Raw>::deserialize(d)?
            .map(|raw| raw.into_duration())
            .transpose()
    }
}
