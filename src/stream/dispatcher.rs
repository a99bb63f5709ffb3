// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stream event routing.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cloud::CloudApi;
use crate::error::StreamError;
use crate::registry::DeviceRegistry;
use crate::sink::{LogSink, write_reading};
use crate::subscription::{ObserverRegistry, SubscriptionId};

use super::{EventKind, EventSource, EventStream, RawEvent, StreamEvent, StreamState};

/// What the dispatcher did with one raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The payload was empty.
    Ignored,
    /// The event name is not a known kind.
    UnknownKind,
    /// The kind is not subscribed.
    Unsubscribed,
    /// The payload is not a valid event envelope.
    Malformed,
    /// The publishing device is absent or not managed.
    Unmanaged,
    /// The event was written and observers were called.
    Handled {
        /// Event kind.
        kind: EventKind,
        /// Points the sink accepted.
        written: usize,
    },
}

/// How a run over one stream ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// The server closed the stream.
    Closed,
    /// The cancellation token fired.
    Cancelled,
    /// The stream failed.
    Failed(StreamError),
}

/// Summary of a run over one stream.
#[derive(Debug)]
pub struct RunReport {
    /// Raw events received, whatever their outcome.
    pub events: u64,
    /// Why the run ended.
    pub end: StreamEnd,
}

/// Routes stream events to the log sink and to observers.
///
/// Each event goes through the same steps: empty payloads are ignored, the
/// event name must be a subscribed [`EventKind`], the envelope must decode,
/// and the publishing device must be managed. Surviving events are written
/// to the sink (when one is configured) tagged with the device tags, then
/// passed raw to every observer.
///
/// The dispatcher consumes one stream at a time and never reconnects; a
/// supervisor opens a new stream when the previous one ends.
pub struct StreamDispatcher<C, S> {
    registry: Arc<DeviceRegistry<C>>,
    sink: Option<Arc<S>>,
    subscribed: BTreeSet<EventKind>,
    observers: ObserverRegistry,
    state_tx: watch::Sender<StreamState>,
}

impl<C: CloudApi, S: LogSink> StreamDispatcher<C, S> {
    /// Creates a dispatcher subscribed to every kind.
    ///
    /// Without a sink, events are still filtered and passed to observers.
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry<C>>, sink: Option<Arc<S>>) -> Self {
        let (state_tx, _) = watch::channel(StreamState::Disconnected);
        Self {
            registry,
            sink,
            subscribed: EventKind::ALL.into_iter().collect(),
            observers: ObserverRegistry::new(),
            state_tx,
        }
    }

    /// Restricts the kinds that are handled.
    #[must_use]
    pub fn with_subscribed_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.subscribed = kinds.into_iter().collect();
        self
    }

    /// Returns the subscribed kinds.
    #[must_use]
    pub fn subscribed_kinds(&self) -> &BTreeSet<EventKind> {
        &self.subscribed
    }

    /// Returns `true` if events are written to a sink.
    #[must_use]
    pub fn sink_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Registers an observer called with every handled raw event.
    pub fn on_event<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    /// Unregisters an observer.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state_tx.borrow()
    }

    /// Returns a receiver following connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: StreamState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!(from = %current, to = %state, "Stream state changed");
                *current = state;
                true
            }
        });
    }

    /// Routes one raw event.
    pub async fn handle(&self, raw: &RawEvent) -> Outcome {
        if raw.data.is_empty() {
            return Outcome::Ignored;
        }

        let Some(kind) = EventKind::from_name(&raw.event) else {
            tracing::trace!(event = %raw.event, "Ignoring unknown event kind");
            return Outcome::UnknownKind;
        };
        if !self.subscribed.contains(&kind) {
            return Outcome::Unsubscribed;
        }

        let event = match StreamEvent::decode(kind, raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(event = %raw.event, error = %e, "Dropping malformed stream event");
                return Outcome::Malformed;
            }
        };

        let Some(tags) = self.registry.managed_tags(&event.device_id).await else {
            tracing::trace!(device_id = %event.device_id, %kind, "Ignoring event from unmanaged device");
            return Outcome::Unmanaged;
        };

        let written = match &self.sink {
            Some(sink) => write_reading(sink.as_ref(), &event.to_reading(), &tags).await,
            None => 0,
        };

        tracing::debug!(device_id = %event.device_id, %kind, written, "Stream event handled");

        self.observers.dispatch(raw);
        Outcome::Handled { kind, written }
    }

    /// Consumes a stream until it ends, fails or `cancel` fires.
    pub async fn run(&self, mut stream: EventStream, cancel: &CancellationToken) -> RunReport {
        self.set_state(StreamState::Streaming);
        let mut events = 0;

        let end = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break StreamEnd::Cancelled,

                next = stream.next() => match next {
                    Some(Ok(raw)) => {
                        events += 1;
                        self.handle(&raw).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Event stream failed");
                        break StreamEnd::Failed(e);
                    }
                    None => {
                        tracing::info!("Event stream closed by server");
                        break StreamEnd::Closed;
                    }
                },
            }
        };

        self.set_state(StreamState::Disconnected);
        RunReport { events, end }
    }

    /// Opens one connection on `source` and runs it to completion.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be opened.
    pub async fn stream_once<E: EventSource>(
        &self,
        source: &E,
        cancel: &CancellationToken,
    ) -> Result<RunReport, StreamError> {
        self.set_state(StreamState::Connecting);

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.set_state(StreamState::Disconnected);
                return Ok(RunReport { events: 0, end: StreamEnd::Cancelled });
            }
            opened = source.open() => opened,
        };

        match opened {
            Ok(stream) => Ok(self.run(stream, cancel).await),
            Err(e) => {
                self.set_state(StreamState::Disconnected);
                Err(e)
            }
        }
    }
}

impl<C, S> std::fmt::Debug for StreamDispatcher<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDispatcher")
            .field("subscribed", &self.subscribed)
            .field("sink_enabled", &self.sink.is_some())
            .field("observers", &self.observers)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}
