// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! InfluxDB 1.x sink.
//!
//! Points are written with the line protocol to `/write`; every point carries
//! a single field named `value`. Queries go through `/query` with InfluxQL.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::device::Tags;
use crate::error::SinkError;

use super::{LogSink, Point};

/// Name of the single field written per point.
const FIELD: &str = "value";

// ============================================================================
// InfluxConfig
// ============================================================================

/// Connection settings for an InfluxDB 1.x server.
///
/// # Examples
///
/// ```
/// use particlehub::sink::InfluxConfig;
///
/// let config = InfluxConfig::new("localhost", "particle")
///     .with_port(8087)
///     .with_credentials("admin", "secret");
///
/// assert_eq!(config.base_url(), "http://localhost:8087");
/// ```
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    host: String,
    port: u16,
    database: String,
    username: Option<String>,
    password: Option<String>,
    use_https: bool,
    timeout: Duration,
}

impl InfluxConfig {
    /// Default HTTP API port.
    pub const DEFAULT_PORT: u16 = 8086;
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a configuration for a database on a host.
    #[must_use]
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            database: database.into(),
            username: None,
            password: None,
            use_https: false,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the credentials sent with every request.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Enables HTTPS.
    #[must_use]
    pub fn with_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the server base URL.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    fn auth_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![("db", self.database.as_str())];
        if let Some(username) = &self.username {
            params.push(("u", username.as_str()));
        }
        if let Some(password) = &self.password {
            params.push(("p", password.as_str()));
        }
        params
    }
}

// ============================================================================
// InfluxSink
// ============================================================================

/// Log sink backed by the InfluxDB 1.x HTTP API.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    config: InfluxConfig,
    client: Client,
}

impl InfluxSink {
    /// Creates a sink from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Server`] if the HTTP client cannot be created.
    pub fn new(config: InfluxConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Server(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Returns the sink configuration.
    #[must_use]
    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }
}

impl LogSink for InfluxSink {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        let body = points
            .iter()
            .filter_map(line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        if body.is_empty() {
            return Ok(());
        }

        let mut params = self.config.auth_params();
        params.push(("precision", "ns"));

        tracing::debug!(
            database = %self.config.database,
            count = points.len(),
            "Writing points to InfluxDB"
        );

        let response = self
            .client
            .post(format!("{}/write", self.config.base_url()))
            .query(&params)
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Server(e.to_string()))?;

        check_status(response).await.map(drop)
    }

    async fn query(&self, filter: &Tags, limit: usize) -> Result<Vec<Point>, SinkError> {
        let statement = select_statement(filter, limit);
        let mut params = self.config.auth_params();
        params.push(("q", statement.as_str()));

        tracing::debug!(query = %statement, "Querying InfluxDB");

        let response = self
            .client
            .get(format!("{}/query", self.config.base_url()))
            .query(&params)
            .send()
            .await
            .map_err(|e| SinkError::Server(e.to_string()))?;

        let body: QueryResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SinkError::Server(e.to_string()))?;

        let mut points = body.into_points()?;
        points.truncate(limit);
        Ok(points)
    }
}

async fn check_status(response: Response) -> Result<Response, SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.text().await {
        Ok(text) if !text.is_empty() => format!("HTTP {}: {}", status.as_u16(), text.trim()),
        _ => format!("HTTP {}", status.as_u16()),
    };

    if status.is_client_error() && message.contains(PARTIAL_WRITE) {
        Err(SinkError::Partial {
            dropped: dropped_count(&message),
            message,
        })
    } else if status.is_client_error() {
        Err(SinkError::Client(message))
    } else {
        Err(SinkError::Server(message))
    }
}

/// Marker of a 400 answer after which the other points were stored.
const PARTIAL_WRITE: &str = "partial write";

/// Reads the `dropped=N` count the server appends to partial write errors.
fn dropped_count(message: &str) -> Option<usize> {
    let (_, rest) = message.rsplit_once("dropped=")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

// ============================================================================
// Line protocol
// ============================================================================

/// Encodes one point, or `None` if its value has no field representation.
fn line_protocol(point: &Point) -> Option<String> {
    let value = field_value(&point.value)?;

    let mut line = escape(&point.measurement, &[',', ' ']);
    for (key, tag) in &point.tags {
        // empty tag values are rejected by the server
        if tag.is_empty() {
            continue;
        }
        let _ = write!(
            line,
            ",{}={}",
            escape(key, &[',', '=', ' ']),
            escape(tag, &[',', '=', ' '])
        );
    }
    let _ = write!(line, " {FIELD}={value}");
    if let Some(nanos) = point.time.and_then(|t| t.timestamp_nanos_opt()) {
        let _ = write!(line, " {nanos}");
    }

    Some(line)
}

fn field_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(format!("{n}i")),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(quote(s)),
        other => Some(quote(&other.to_string())),
    }
}

/// Escapes identifiers and tag values. Line breaks would end the line, so
/// they become (escaped) spaces.
fn escape(text: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        let c = if matches!(c, '\n' | '\r') { ' ' } else { c };
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn select_statement(filter: &Tags, limit: usize) -> String {
    let mut statement = String::from("SELECT * FROM /.*/");
    for (i, (key, value)) in filter.iter().enumerate() {
        let keyword = if i == 0 { "WHERE" } else { "AND" };
        let _ = write!(
            statement,
            " {keyword} \"{}\" = '{}'",
            key.replace('"', "\\\""),
            value.replace('\'', "\\'")
        );
    }
    let _ = write!(statement, " LIMIT {limit}");
    statement
}

// ============================================================================
// Query responses
// ============================================================================

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    name: String,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl QueryResponse {
    fn into_points(self) -> Result<Vec<Point>, SinkError> {
        if let Some(error) = self.error {
            return Err(SinkError::Client(error));
        }

        let mut points = Vec::new();
        for result in self.results {
            if let Some(error) = result.error {
                return Err(SinkError::Client(error));
            }
            for series in result.series {
                points.extend(series.into_points());
            }
        }
        Ok(points)
    }
}

impl Series {
    /// Every column other than `time` and the value field is a tag.
    fn into_points(self) -> impl Iterator<Item = Point> {
        let Series {
            name,
            columns,
            values,
        } = self;

        values.into_iter().filter_map(move |row| {
            let mut point = Point::new(name.clone(), Value::Null, Tags::new());
            for (column, cell) in columns.iter().zip(row) {
                match (column.as_str(), cell) {
                    ("time", Value::String(s)) => {
                        point.time = DateTime::parse_from_rfc3339(&s)
                            .ok()
                            .map(|t| t.with_timezone(&Utc));
                    }
                    (FIELD, value) => point.value = value,
                    (_, Value::String(tag)) => {
                        point.tags.insert(column.clone(), tag);
                    }
                    _ => {}
                }
            }
            (!point.value.is_null()).then_some(point)
        })
    }
}
