// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time-series log sinks.
//!
//! A sink receives [`Point`]s: one measurement value annotated with the
//! device tags. The dispatcher and the scheduler produce [`Reading`]s
//! (mappings of measurement name to value) and hand them to
//! [`write_reading`], which converts them and swallows sink failures:
//!
//! - [`SinkError::Client`]: the sink rejected the data.
//! - [`SinkError::Partial`]: the sink stored some points and rejected others.
//! - [`SinkError::Server`]: the sink is unavailable.
//!
//! Both are logged and the write is dropped; neither reaches the caller.
//!
//! # Sinks
//!
//! - [`InfluxSink`]: InfluxDB 1.x HTTP API
//! - [`MemorySink`]: in-process buffer, for tests and dry runs
//! - [`AnySink`]: runtime selection between the above by configured name

mod config;
mod influx;
mod memory;

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::device::Tags;
use crate::error::SinkError;

pub use config::{AnySink, SinkConfig, SinkKind};
pub use influx::{InfluxConfig, InfluxSink};
pub use memory::MemorySink;

/// Mapping of measurement name to value, as produced by one event or poll.
pub type Reading = BTreeMap<String, Value>;

/// Key of a reading entry that carries the point time instead of a value.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// A single logged value.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name.
    pub measurement: String,
    /// Measured value.
    pub value: Value,
    /// Device tags.
    pub tags: Tags,
    /// Observation time; the sink assigns one when absent.
    pub time: Option<DateTime<Utc>>,
}

impl Point {
    /// Creates an untimed point.
    #[must_use]
    pub fn new(measurement: impl Into<String>, value: impl Into<Value>, tags: Tags) -> Self {
        Self {
            measurement: measurement.into(),
            value: value.into(),
            tags,
            time: None,
        }
    }

    /// Sets the observation time.
    #[must_use]
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Returns `true` if every filter tag is present on the point with the
    /// same value.
    #[must_use]
    pub fn matches(&self, filter: &Tags) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}

/// A destination for logged points.
pub trait LogSink: Send + Sync + 'static {
    /// Writes a batch of points.
    fn write(&self, points: &[Point]) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Returns up to `limit` points whose tags match `filter`.
    ///
    /// Sinks that cannot be queried keep this default, which reports
    /// [`SinkError::Unsupported`].
    fn query(
        &self,
        filter: &Tags,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Point>, SinkError>> + Send {
        let _ = (filter, limit);
        std::future::ready(Err(SinkError::Unsupported))
    }
}

/// Converts a reading into points carrying `tags`.
///
/// Every entry becomes one point named after its key, except:
///
/// - keys that are also tag names (a variable promoted to a tag is logged as
///   a tag, not as a measurement);
/// - the [`TIMESTAMP_KEY`] entry, whose RFC 3339 value becomes the time of
///   every point.
#[must_use]
pub fn points_from_reading(reading: &Reading, tags: &Tags) -> Vec<Point> {
    let time = reading
        .get(TIMESTAMP_KEY)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    reading
        .iter()
        .filter(|(key, _)| key.as_str() != TIMESTAMP_KEY && !tags.contains_key(key.as_str()))
        .map(|(key, value)| Point {
            measurement: key.clone(),
            value: value.clone(),
            tags: tags.clone(),
            time,
        })
        .collect()
}

/// Writes points, logging and dropping any sink failure.
///
/// Returns the number of points the sink accepted.
pub async fn write_points<S: LogSink + ?Sized>(sink: &S, points: &[Point]) -> usize {
    if points.is_empty() {
        return 0;
    }

    match sink.write(points).await {
        Ok(()) => points.len(),
        Err(SinkError::Client(message)) => {
            tracing::error!(error = %message, count = points.len(), "Sink rejected points");
            0
        }
        Err(SinkError::Partial { dropped, message }) => {
            // an unreported drop count means nothing is known to be stored
            let accepted = dropped.map_or(0, |dropped| points.len().saturating_sub(dropped));
            tracing::warn!(
                error = %message,
                count = points.len(),
                accepted,
                "Sink stored part of the batch"
            );
            accepted
        }
        Err(SinkError::Server(message)) => {
            tracing::error!(error = %message, count = points.len(), "Sink unavailable, points dropped");
            0
        }
        Err(SinkError::Unsupported) => {
            tracing::warn!("Sink does not accept writes");
            0
        }
    }
}

/// Converts a reading and writes it, swallowing sink failures.
pub async fn write_reading<S: LogSink + ?Sized>(sink: &S, reading: &Reading, tags: &Tags) -> usize {
    write_points(sink, &points_from_reading(reading, tags)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> Tags {
        Tags::from([("loc".to_string(), "lab".to_string())])
    }

    #[test]
    fn points_from_reading_one_per_key() {
        let reading = Reading::from([
            ("temp".to_string(), Value::from("21")),
            ("hum".to_string(), Value::from(55)),
        ]);

        let points = points_from_reading(&reading, &tags());

        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.tags == tags() && p.time.is_none()));
        assert!(points.iter().any(|p| p.measurement == "hum" && p.value == Value::from(55)));
    }

    #[test]
    fn timestamp_becomes_point_time() {
        let reading = Reading::from([
            ("temp".to_string(), Value::from("21")),
            (
                TIMESTAMP_KEY.to_string(),
                Value::from("2014-05-28T19:20:34.638Z"),
            ),
        ]);

        let points = points_from_reading(&reading, &Tags::new());

        assert_eq!(points.len(), 1);
        let time = points[0].time.unwrap();
        assert_eq!(time.to_rfc3339(), "2014-05-28T19:20:34.638+00:00");
    }

    #[test]
    fn tag_keys_are_not_measurements() {
        let reading = Reading::from([
            ("temp".to_string(), Value::from(21)),
            ("loc".to_string(), Value::from("lab")),
        ]);

        let points = points_from_reading(&reading, &tags());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "temp");
    }

    #[test]
    fn point_filter_matching() {
        let point = Point::new("temp", 21, tags());

        assert!(point.matches(&Tags::new()));
        assert!(point.matches(&tags()));
        assert!(!point.matches(&Tags::from([("loc".to_string(), "home".to_string())])));
    }

    #[tokio::test]
    async fn write_points_swallows_errors() {
        let sink = MemorySink::new();
        sink.fail_with(Some(SinkError::Server("down".to_string())));

        let written = write_points(&sink, &[Point::new("temp", 21, Tags::new())]).await;

        assert_eq!(written, 0);
        assert!(sink.points().is_empty());
    }

    #[tokio::test]
    async fn write_points_counts_partial_writes() {
        let sink = MemorySink::new();
        let points = [
            Point::new("temp", 21, Tags::new()),
            Point::new("hum", 55, Tags::new()),
            Point::new("LOG", "booted", Tags::new()),
        ];

        sink.fail_with(Some(SinkError::Partial {
            dropped: Some(1),
            message: "field type conflict".to_string(),
        }));
        assert_eq!(write_points(&sink, &points).await, 2);

        sink.fail_with(Some(SinkError::Partial {
            dropped: None,
            message: "field type conflict".to_string(),
        }));
        assert_eq!(write_points(&sink, &points).await, 0);
    }

    #[tokio::test]
    async fn write_reading_counts_points() {
        let sink = MemorySink::new();
        let reading = Reading::from([("LOG".to_string(), Value::from("booted"))]);

        assert_eq!(write_reading(&sink, &reading, &tags()).await, 1);
        assert_eq!(sink.points()[0].tags, tags());
    }
}
