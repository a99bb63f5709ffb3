// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hub configuration.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults;
//! 2. a JSON file ([`HubConfig::load`]);
//! 3. `PARTICLEHUB_*` environment variables ([`HubConfig::apply_env`]).
//!
//! ```json
//! {
//!   "access_token": "0123456789abcdef",
//!   "api_url": "https://api.particle.io/v1",
//!   "state_file": "state.json",
//!   "log_interval_secs": 60,
//!   "default_sink": "influx",
//!   "sinks": {
//!     "influx": { "kind": "influx", "host": "localhost", "database": "particle" }
//!   },
//!   "reconnection": { "initial_delay_ms": 1000, "max_delay_ms": 60000 }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::cloud::CloudConfig;
use crate::error::ConfigError;
use crate::scheduler::{DEFAULT_LOG_INTERVAL, DEFAULT_STOP_TIMEOUT};
use crate::sink::SinkConfig;
use crate::stream::EventKind;

/// Environment variable holding the cloud access token.
pub const ENV_TOKEN: &str = "PARTICLEHUB_TOKEN";
/// Environment variable overriding the cloud API base URL.
pub const ENV_API_URL: &str = "PARTICLEHUB_API_URL";
/// Environment variable overriding the state file path.
pub const ENV_STATE_FILE: &str = "PARTICLEHUB_STATE_FILE";
/// Environment variable selecting the sink by name.
pub const ENV_SINK: &str = "PARTICLEHUB_SINK";
/// Environment variable overriding the logging interval, in seconds.
pub const ENV_LOG_INTERVAL: &str = "PARTICLEHUB_LOG_INTERVAL_SECS";

// ============================================================================
// HubConfig
// ============================================================================

/// Configuration of a [`Hub`](crate::Hub).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use particlehub::HubConfig;
/// use particlehub::sink::SinkConfig;
///
/// let config = HubConfig::new("token")
///     .with_log_interval(Duration::from_secs(30))
///     .with_sink("influx", SinkConfig::influx("localhost", "particle"));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.default_sink(), Some("influx"));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    access_token: String,
    api_url: String,
    state_file: Option<PathBuf>,
    #[serde(rename = "log_interval_secs", deserialize_with = "secs")]
    log_interval: Duration,
    #[serde(rename = "stop_timeout_ms", deserialize_with = "millis")]
    stop_timeout: Duration,
    subscribed_events: BTreeSet<EventKind>,
    default_sink: Option<String>,
    sinks: BTreeMap<String, SinkConfig>,
    reconnection: ReconnectionPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            api_url: CloudConfig::DEFAULT_BASE_URL.to_string(),
            state_file: Some(PathBuf::from("state.json")),
            log_interval: DEFAULT_LOG_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            subscribed_events: EventKind::ALL.into_iter().collect(),
            default_sink: None,
            sinks: BTreeMap::new(),
            reconnection: ReconnectionPolicy::default(),
        }
    }
}

impl HubConfig {
    /// Creates a default configuration for an access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    /// Reads a JSON configuration file. Absent settings keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Builds a configuration from defaults and the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an unusable value.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Overrides settings from `PARTICLEHUB_*` variables resolved by `lookup`.
    ///
    /// Empty values are ignored, except for the state file where an empty
    /// value disables persistence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the interval is not a
    /// positive integer.
    pub fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(token) = non_empty(ENV_TOKEN) {
            self.access_token = token;
        }
        if let Some(url) = non_empty(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(path) = lookup(ENV_STATE_FILE) {
            self.state_file = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(sink) = non_empty(ENV_SINK) {
            self.default_sink = Some(sink);
        }
        if let Some(secs) = non_empty(ENV_LOG_INTERVAL) {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::InvalidValue {
                field: ENV_LOG_INTERVAL,
                message: format!("{secs:?}: {e}"),
            })?;
            self.log_interval = Duration::from_secs(secs);
        }
        Ok(self)
    }

    /// Checks that the configuration can run a hub.
    ///
    /// # Errors
    ///
    /// Returns error if the access token is missing, the interval is zero,
    /// or the selected sink is unknown or incomplete.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token.is_empty() {
            return Err(ConfigError::Missing("access token"));
        }
        if self.api_url.is_empty() {
            return Err(ConfigError::Missing("API URL"));
        }
        if self.log_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "log_interval_secs",
                message: "must be positive".to_string(),
            });
        }
        if let Some(sink) = self.selected_sink()? {
            sink.validate()?;
        }
        Ok(())
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// Sets the cloud API base URL.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Sets the state file, or disables persistence with `None`.
    #[must_use]
    pub fn with_state_file(mut self, path: Option<PathBuf>) -> Self {
        self.state_file = path;
        self
    }

    /// Sets the time between two polls of a managed device.
    #[must_use]
    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    /// Sets the bounded wait for a task to stop.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets the handled stream event kinds.
    #[must_use]
    pub fn with_subscribed_events(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.subscribed_events = kinds.into_iter().collect();
        self
    }

    /// Adds a named sink and selects it.
    #[must_use]
    pub fn with_sink(mut self, name: impl Into<String>, sink: SinkConfig) -> Self {
        let name = name.into();
        self.sinks.insert(name.clone(), sink);
        self.default_sink = Some(name);
        self
    }

    /// Disables sink logging.
    #[must_use]
    pub fn without_sink(mut self) -> Self {
        self.default_sink = None;
        self
    }

    /// Sets the stream reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the cloud API base URL.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Returns the state file path, if persistence is enabled.
    #[must_use]
    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    /// Returns the logging interval.
    #[must_use]
    pub fn log_interval(&self) -> Duration {
        self.log_interval
    }

    /// Returns the stop timeout.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Returns the handled stream event kinds.
    #[must_use]
    pub fn subscribed_events(&self) -> &BTreeSet<EventKind> {
        &self.subscribed_events
    }

    /// Returns the selected sink name.
    #[must_use]
    pub fn default_sink(&self) -> Option<&str> {
        self.default_sink.as_deref()
    }

    /// Returns the stream reconnection policy.
    #[must_use]
    pub fn reconnection(&self) -> &ReconnectionPolicy {
        &self.reconnection
    }

    /// Returns the configuration of the selected sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSink`] if a sink is selected but not
    /// configured.
    pub fn selected_sink(&self) -> Result<Option<&SinkConfig>, ConfigError> {
        match &self.default_sink {
            None => Ok(None),
            Some(name) => self
                .sinks
                .get(name)
                .map(Some)
                .ok_or_else(|| ConfigError::UnknownSink(name.clone())),
        }
    }

    /// Returns the cloud client configuration.
    #[must_use]
    pub fn cloud_config(&self) -> CloudConfig {
        CloudConfig::new(self.access_token.clone()).with_base_url(self.api_url.clone())
    }

    /// Returns the URL of the device event stream.
    #[must_use]
    pub fn stream_url(&self) -> String {
        self.cloud_config().stream_url()
    }
}

// ============================================================================
// ReconnectionPolicy
// ============================================================================

/// Backoff between event stream reconnections.
///
/// The delay starts at `initial_delay` and is multiplied by
/// `backoff_multiplier` after each failed attempt, up to `max_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use particlehub::config::ReconnectionPolicy;
///
/// let policy = ReconnectionPolicy::new()
///     .with_max_retries(5)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(30));
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    /// Whether the stream is reopened after it ends.
    pub enabled: bool,
    /// Maximum number of consecutive retries (None = infinite).
    pub max_retries: Option<u32>,
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", deserialize_with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound of the delay.
    #[serde(rename = "max_delay_ms", deserialize_with = "millis")]
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f32,
}

impl ReconnectionPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that never reconnects.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of consecutive retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the upper bound of the delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let multiplier = self
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f32 * multiplier;

        // saturating float to int cast; an infinite product lands on u64::MAX
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }

    /// Returns `true` if retry number `attempt` (zero-based) may run.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

fn secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkKind;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = HubConfig::default();

        assert_eq!(config.api_url(), "https://api.particle.io/v1");
        assert_eq!(config.state_file(), Some(Path::new("state.json")));
        assert_eq!(config.log_interval(), Duration::from_secs(60));
        assert_eq!(config.stop_timeout(), Duration::from_secs(1));
        assert_eq!(config.subscribed_events().len(), 3);
        assert_eq!(config.default_sink(), None);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("access token"))
        ));
    }

    #[test]
    fn load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "access_token": "abc",
                "log_interval_secs": 15,
                "subscribed_events": ["DATA"],
                "default_sink": "db",
                "sinks": { "db": { "kind": "influx", "host": "h", "database": "d" } },
                "reconnection": { "initial_delay_ms": 250, "max_retries": 3 }
            }"#,
        )
        .unwrap();

        let config = HubConfig::load(&path).unwrap();

        assert_eq!(config.access_token(), "abc");
        assert_eq!(config.log_interval(), Duration::from_secs(15));
        assert_eq!(
            config.subscribed_events(),
            &BTreeSet::from([EventKind::Data])
        );
        assert_eq!(config.selected_sink().unwrap().unwrap().kind, SinkKind::Influx);
        assert_eq!(config.reconnection().initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnection().max_retries, Some(3));
        assert_eq!(config.reconnection().max_delay, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_missing_file() {
        let err = HubConfig::load("/nonexistent/particlehub.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overrides() {
        let config = HubConfig::new("file-token")
            .apply_vars(vars(&[
                (ENV_TOKEN, "env-token"),
                (ENV_API_URL, "http://localhost:9000/v1"),
                (ENV_STATE_FILE, "/tmp/hub.json"),
                (ENV_LOG_INTERVAL, "5"),
            ]))
            .unwrap();

        assert_eq!(config.access_token(), "env-token");
        assert_eq!(config.api_url(), "http://localhost:9000/v1");
        assert_eq!(config.state_file(), Some(Path::new("/tmp/hub.json")));
        assert_eq!(config.log_interval(), Duration::from_secs(5));
    }

    #[test]
    fn empty_state_file_variable_disables_persistence() {
        let config = HubConfig::new("t")
            .apply_vars(vars(&[(ENV_STATE_FILE, ""), (ENV_TOKEN, "")]))
            .unwrap();

        assert_eq!(config.state_file(), None);
        assert_eq!(config.access_token(), "t");
    }

    #[test]
    fn bad_interval_variable() {
        let err = HubConfig::new("t")
            .apply_vars(vars(&[(ENV_LOG_INTERVAL, "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: ENV_LOG_INTERVAL,
                ..
            }
        ));
    }

    #[test]
    fn unknown_sink_is_rejected() {
        let config = HubConfig::new("t").apply_vars(vars(&[(ENV_SINK, "nope")])).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownSink(name)) if name == "nope"
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = HubConfig::new("t").with_log_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn stream_url_from_api_url() {
        let config = HubConfig::new("tok").with_api_url("http://cloud/v1/");
        assert_eq!(
            config.stream_url(),
            "http://cloud/v1/devices/events?access_token=tok"
        );
    }

    #[test]
    fn reconnection_backoff() {
        let policy = ReconnectionPolicy::new();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn reconnection_retry_limits() {
        assert!(ReconnectionPolicy::new().should_retry(1_000_000));

        let limited = ReconnectionPolicy::new().with_max_retries(2);
        assert!(limited.should_retry(1));
        assert!(!limited.should_retry(2));

        assert!(!ReconnectionPolicy::disabled().should_retry(0));
    }
}
