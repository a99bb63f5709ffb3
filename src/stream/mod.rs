// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event stream.
//!
//! The cloud publishes device activity as server-sent events. This module
//! decodes the framing ([`SseDecoder`]), opens connections ([`SseSource`])
//! and routes each event to the sink and to observers
//! ([`StreamDispatcher`]).
//!
//! Only three event kinds are meaningful ([`EventKind`]); anything else is
//! dropped before reaching a handler.

mod dispatcher;
mod event;
mod sse;

pub use dispatcher::{Outcome, RunReport, StreamDispatcher, StreamEnd};
pub use event::{EventKind, RawEvent, StreamEvent, parse_data_payload};
pub use sse::{EventSource, EventStream, SseDecoder, SseSource};

/// Connection state of the dispatcher.
///
/// Transitions run `Disconnected → Connecting → Streaming → Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// No connection.
    #[default]
    Disconnected,
    /// Opening a connection.
    Connecting,
    /// Consuming events.
    Streaming,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
        };
        f.write_str(name)
    }
}
