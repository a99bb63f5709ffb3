// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stream event types and payload parsing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceId;
use crate::sink::{Reading, TIMESTAMP_KEY};

/// Category of a published stream event.
///
/// The upstream protocol defines exactly these three kinds; events published
/// under any other name are never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// Free-form log line.
    Log,
    /// `key=value` telemetry.
    Data,
    /// Device-side error report.
    Error,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 3] = [EventKind::Log, EventKind::Data, EventKind::Error];

    /// Returns the wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "LOG",
            Self::Data => "DATA",
            Self::Error => "ERROR",
        }
    }

    /// Resolves a wire event name. Matching is exact.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "LOG" => Some(Self::Log),
            "DATA" => Some(Self::Data),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame of the event stream, before any interpretation.
///
/// `event` is the SSE event name, `data` the (JSON) payload string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Event name.
    pub event: String,
    /// Event payload.
    pub data: String,
}

impl RawEvent {
    /// Creates a raw event.
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// JSON object carried in the payload of every published event.
#[derive(Debug, Deserialize)]
struct Envelope {
    coreid: DeviceId,
    #[serde(default)]
    data: Option<String>,
    published_at: String,
    #[serde(default)]
    ttl: Option<Value>,
}

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Publishing device.
    pub device_id: DeviceId,
    /// Event kind.
    pub kind: EventKind,
    /// Raw published data.
    pub payload: String,
    /// Publication time as sent by the cloud.
    pub published_at: String,
    /// Time-to-live in seconds, when present.
    pub ttl: Option<u64>,
}

impl StreamEvent {
    /// Decodes the JSON envelope of a raw event under the given kind.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the payload is not an event envelope.
    pub fn decode(kind: EventKind, raw: &RawEvent) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(&raw.data)?;

        // ttl arrives as a string from older clouds and as a number from newer ones
        let ttl = envelope.ttl.as_ref().and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });

        Ok(Self {
            device_id: envelope.coreid,
            kind,
            payload: envelope.data.unwrap_or_default(),
            published_at: envelope.published_at,
            ttl,
        })
    }

    /// Parses the publication time, if it is valid RFC 3339.
    #[must_use]
    pub fn published_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.published_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Builds the reading this event contributes to the log sink.
    ///
    /// `DATA` payloads are split into pairs and stamped with a `timestamp`
    /// entry; `LOG` and `ERROR` payloads are wrapped under their kind name.
    #[must_use]
    pub fn to_reading(&self) -> Reading {
        match self.kind {
            EventKind::Data => {
                let mut reading = parse_data_payload(&self.payload);
                reading.insert(
                    TIMESTAMP_KEY.to_string(),
                    Value::String(self.published_at.clone()),
                );
                reading
            }
            EventKind::Log | EventKind::Error => {
                let mut reading = Reading::new();
                reading.insert(
                    self.kind.as_str().to_string(),
                    Value::String(self.payload.clone()),
                );
                reading
            }
        }
    }
}

/// Parses a `k1=v1,k2=v2` payload.
///
/// Segments without `=` are skipped. Only the first `=` splits a pair, so
/// values may themselves contain `=`. Values stay strings.
///
/// # Examples
///
/// ```
/// use particlehub::stream::parse_data_payload;
///
/// let reading = parse_data_payload("temp=21,hum=55");
/// assert_eq!(reading["temp"], "21");
/// assert_eq!(reading["hum"], "55");
/// ```
#[must_use]
pub fn parse_data_payload(payload: &str) -> Reading {
    payload
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                tracing::debug!(pair = %pair, "Skipping DATA pair without a key");
                return None;
            }
            Some((key.to_string(), Value::String(value.trim().to_string())))
        })
        .collect()
}
