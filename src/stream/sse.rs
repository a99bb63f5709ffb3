// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Server-sent event source.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;

use crate::error::StreamError;

use super::RawEvent;

/// A lazy, unbounded sequence of raw events.
///
/// The sequence ends when the connection closes and is not restartable;
/// reconnecting means opening a new one.
pub type EventStream = BoxStream<'static, Result<RawEvent, StreamError>>;

/// Something that can open an event stream.
pub trait EventSource: Send + Sync + 'static {
    /// Opens a new connection and returns its events.
    fn open(&self) -> impl Future<Output = Result<EventStream, StreamError>> + Send;
}

/// Event source reading `text/event-stream` over HTTP.
///
/// # Examples
///
/// ```no_run
/// use particlehub::stream::{EventSource, SseSource};
/// use futures_util::StreamExt;
///
/// # async fn example() -> particlehub::Result<()> {
/// let source = SseSource::new("https://api.particle.io/v1/devices/events?access_token=t")?;
/// let mut events = source.open().await?;
/// while let Some(event) = events.next().await {
///     println!("{:?}", event?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SseSource {
    url: String,
    client: Client,
}

impl SseSource {
    /// Default connect timeout. Reads have no timeout: streams idle for long.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a source for the given stream URL.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(url: impl Into<String>) -> Result<Self, StreamError> {
        let client = Client::builder()
            .connect_timeout(Self::DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Returns the stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventSource for SseSource {
    async fn open(&self) -> Result<EventStream, StreamError> {
        tracing::info!("Connecting to event stream");

        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StreamError::Status(response.status().as_u16()));
        }

        tracing::info!("Event stream connected");

        let bytes = response.bytes_stream().boxed();
        let events = stream::unfold(
            (bytes, SseDecoder::new(), VecDeque::new()),
            |(mut bytes, mut decoder, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (bytes, decoder, pending)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.feed(&chunk)),
                        Some(Err(e)) => {
                            return Some((Err(StreamError::Http(e)), (bytes, decoder, pending)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(events.boxed())
    }
}

/// Incremental decoder for `text/event-stream` framing.
///
/// Bytes are fed in arbitrary chunks; complete events come out. Lines are
/// split on `\n` with an optional trailing `\r`. Comment lines (leading `:`)
/// and the `id` and `retry` fields are ignored. An incomplete event at end of
/// input is discarded.
///
/// A line longer than [`MAX_LINE_BYTES`](Self::MAX_LINE_BYTES) is dropped
/// up to its terminating `\n`, together with the event it belongs to.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    overflowed: bool,
    event: String,
    data: Vec<String>,
}

impl SseDecoder {
    /// Longest line kept in memory while waiting for its terminator.
    pub const MAX_LINE_BYTES: usize = 64 * 1024;

    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        let mut events = Vec::new();

        for &byte in chunk {
            if self.overflowed {
                self.overflowed = byte != b'\n';
                continue;
            }
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                    events.push(event);
                }
            } else if self.line.len() < Self::MAX_LINE_BYTES {
                self.line.push(byte);
            } else {
                tracing::warn!(
                    limit = Self::MAX_LINE_BYTES,
                    event = %self.event,
                    "Stream line too long, dropping event"
                );
                self.overflowed = true;
                self.line = Vec::new();
                self.event.clear();
                self.data.clear();
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<RawEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = value.to_string(),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<RawEvent> {
        let event = std::mem::take(&mut self.event);
        let data = std::mem::take(&mut self.data);

        if data.is_empty() {
            return None;
        }

        let name = if event.is_empty() {
            "message".to_string()
        } else {
            event
        };
        Some(RawEvent::new(name, data.join("\n")))
    }
}
