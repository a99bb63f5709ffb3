// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime sink selection.

use serde::Deserialize;

use crate::device::Tags;
use crate::error::{ConfigError, SinkError};

use super::{InfluxConfig, InfluxSink, LogSink, MemorySink, Point};

/// Sink backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// InfluxDB 1.x over HTTP.
    Influx,
    /// In-process buffer.
    Memory,
}

/// One named sink entry of the configuration file.
///
/// ```json
/// { "kind": "influx", "host": "localhost", "port": 8086,
///   "username": "admin", "password": "secret", "database": "particle" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SinkConfig {
    /// Backend.
    pub kind: SinkKind,
    /// Server host.
    #[serde(default)]
    pub host: Option<String>,
    /// Server port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login.
    #[serde(default)]
    pub username: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// Target database.
    #[serde(default)]
    pub database: Option<String>,
    /// Whether to connect over HTTPS.
    #[serde(default)]
    pub use_https: bool,
}

impl SinkConfig {
    /// Creates an in-memory sink entry.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            kind: SinkKind::Memory,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            use_https: false,
        }
    }

    /// Creates an InfluxDB sink entry.
    #[must_use]
    pub fn influx(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            kind: SinkKind::Influx,
            host: Some(host.into()),
            database: Some(database.into()),
            ..Self::memory()
        }
    }

    /// Checks that every setting the backend needs is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the absent setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == SinkKind::Influx {
            if self.host.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::Missing("sink host"));
            }
            if self.database.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::Missing("sink database"));
            }
        }
        Ok(())
    }

    fn influx_config(&self) -> Result<InfluxConfig, ConfigError> {
        self.validate()?;

        let mut config = InfluxConfig::new(
            self.host.clone().unwrap_or_default(),
            self.database.clone().unwrap_or_default(),
        )
        .with_https(self.use_https);

        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            config = config.with_credentials(username, password);
        }
        Ok(config)
    }
}

/// A sink chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnySink {
    /// InfluxDB backend.
    Influx(InfluxSink),
    /// In-memory backend.
    Memory(MemorySink),
}

impl AnySink {
    /// Builds the sink an entry describes.
    ///
    /// # Errors
    ///
    /// Returns error if the entry lacks a required setting or the HTTP
    /// client cannot be created.
    pub fn from_config(config: &SinkConfig) -> Result<Self, ConfigError> {
        match config.kind {
            SinkKind::Memory => Ok(Self::Memory(MemorySink::new())),
            SinkKind::Influx => {
                let sink = InfluxSink::new(config.influx_config()?).map_err(|e| {
                    ConfigError::InvalidValue {
                        field: "sink",
                        message: e.to_string(),
                    }
                })?;
                Ok(Self::Influx(sink))
            }
        }
    }

    /// Returns the backend kind.
    #[must_use]
    pub fn kind(&self) -> SinkKind {
        match self {
            Self::Influx(_) => SinkKind::Influx,
            Self::Memory(_) => SinkKind::Memory,
        }
    }
}

impl LogSink for AnySink {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        match self {
            Self::Influx(sink) => sink.write(points).await,
            Self::Memory(sink) => sink.write(points).await,
        }
    }

    async fn query(&self, filter: &Tags, limit: usize) -> Result<Vec<Point>, SinkError> {
        match self {
            Self::Influx(sink) => sink.query(filter, limit).await,
            Self::Memory(sink) => sink.query(filter, limit).await,
        }
    }
}
