// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `particlehub` library.
//!
//! Registry and scheduler failures surface through [`Error`] and are returned
//! to the caller. Sink failures ([`SinkError`]) never leave the sink boundary:
//! they are logged and the write is dropped.

use std::path::PathBuf;

use thiserror::Error;

use crate::device::DeviceId;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The cloud API could not be reached or rejected the request.
    ///
    /// When raised by a refresh, the registry's device set becomes unknown.
    #[error("cloud unavailable: {0}")]
    CloudUnavailable(#[from] CloudError),

    /// The operation referenced a device absent from the registry.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// A tag removal referenced a tag the device does not carry.
    #[error("tag {tag:?} not found on device {device_id}")]
    TagNotFound {
        /// The device the tag was looked up on.
        device_id: DeviceId,
        /// The missing tag name.
        tag: String,
    },

    /// Logging could not be started for a device.
    #[error("cannot start logging: {0}")]
    LogStart(#[from] LogStartError),

    /// Logging could not be stopped cleanly for a device.
    #[error("cannot stop logging: {0}")]
    LogStop(#[from] LogStopError),

    /// The event stream failed.
    #[error("event stream error: {0}")]
    Stream(#[from] StreamError),

    /// Reading or writing the persisted registry state failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The configuration is invalid or could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the cloud API client.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The cloud answered with a non-success status.
    #[error("HTTP {status} - {reason}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The canonical reason phrase, if known.
        reason: String,
    },

    /// The access token was rejected.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors raised when starting a logging task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogStartError {
    /// Only managed devices can be logged.
    #[error("device {0} is not managed")]
    NotManaged(DeviceId),
}

/// Errors raised when stopping a logging task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogStopError {
    /// The task did not exit within the stop timeout and was aborted.
    #[error("logging task for {device_id} did not stop within {timeout_ms} ms")]
    Timeout {
        /// The device whose task overran.
        device_id: DeviceId,
        /// The bounded wait that was exceeded.
        timeout_ms: u64,
    },

    /// The task panicked before it could be joined.
    #[error("logging task for {0} panicked")]
    Panicked(DeviceId),
}

/// Errors raised by an event stream source.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The HTTP connection failed or was interrupted.
    #[error("HTTP stream failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The stream endpoint answered with a non-success status.
    #[error("stream endpoint returned HTTP {0}")]
    Status(u16),

    /// The source could not be opened for another reason.
    #[error("stream connection failed: {0}")]
    ConnectionFailed(String),
}

/// Errors raised by a log sink.
///
/// These are caught by [`write_points`](crate::sink::write_points) and never
/// propagate to callers of the dispatcher or the scheduler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink rejected the data.
    #[error("sink rejected points: {0}")]
    Client(String),

    /// The sink stored part of the batch and rejected the rest.
    #[error("sink dropped part of the batch: {message}")]
    Partial {
        /// Points rejected, when the sink reports it.
        dropped: Option<usize>,
        /// The sink's explanation.
        message: String,
    },

    /// The sink could not be reached or failed internally.
    #[error("sink unavailable: {0}")]
    Server(String),

    /// The sink does not implement this operation.
    #[error("operation not supported by this sink")]
    Unsupported,
}

/// Errors raised while reading or writing the persisted registry state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The state file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON for the schema.
    #[error("invalid state file: {0}")]
    Json(#[from] serde_json::Error),

    /// The state file was written by a newer schema.
    #[error("state schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// The version found in the file.
        found: u32,
        /// The newest version this build understands.
        supported: u32,
    },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON.
    #[error("invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),

    /// A required setting is missing.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// The selected sink name has no configuration entry.
    #[error("unknown sink: {0}")]
    UnknownSink(String),

    /// A setting has an unusable value.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// The offending setting.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_not_found_display() {
        let err = Error::TagNotFound {
            device_id: DeviceId::new("abc123"),
            tag: "loc".to_string(),
        };
        assert_eq!(err.to_string(), "tag \"loc\" not found on device abc123");
    }

    #[test]
    fn error_from_log_start_error() {
        let err: Error = LogStartError::NotManaged(DeviceId::new("abc")).into();
        assert!(matches!(err, Error::LogStart(LogStartError::NotManaged(_))));
    }

    #[test]
    fn cloud_status_display() {
        let err = CloudError::Status {
            status: 503,
            reason: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503 - Service Unavailable");
    }

    #[test]
    fn log_stop_timeout_display() {
        let err = LogStopError::Timeout {
            device_id: DeviceId::new("dev1"),
            timeout_ms: 1000,
        };
        assert_eq!(
            err.to_string(),
            "logging task for dev1 did not stop within 1000 ms"
        );
    }

    #[test]
    fn unsupported_version_display() {
        let err = PersistenceError::UnsupportedVersion {
            found: 3,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "state schema version 3 is newer than supported version 1"
        );
    }
}
