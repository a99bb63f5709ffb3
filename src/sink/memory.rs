// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process sink.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::Tags;
use crate::error::SinkError;

use super::{LogSink, Point};

/// A sink that keeps every point in memory.
///
/// Clones share the same buffer. A failure can be injected to exercise the
/// error paths of callers.
///
/// # Examples
///
/// ```
/// use particlehub::sink::{LogSink, MemorySink, Point};
/// use particlehub::device::Tags;
///
/// # async fn example() {
/// let sink = MemorySink::new();
/// sink.write(&[Point::new("temp", 21, Tags::new())]).await.unwrap();
/// assert_eq!(sink.len(), 1);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    points: Arc<Mutex<Vec<Point>>>,
    failure: Arc<Mutex<Option<SinkError>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail with `error`, or succeed with `None`.
    pub fn fail_with(&self, error: Option<SinkError>) {
        *self.failure.lock() = error;
    }

    /// Returns a copy of every stored point, oldest first.
    #[must_use]
    pub fn points(&self) -> Vec<Point> {
        self.points.lock().clone()
    }

    /// Returns the number of stored points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    /// Returns `true` if nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }

    /// Drops every stored point.
    pub fn clear(&self) {
        self.points.lock().clear();
    }
}

impl LogSink for MemorySink {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.points.lock().extend_from_slice(points);
        Ok(())
    }

    async fn query(&self, filter: &Tags, limit: usize) -> Result<Vec<Point>, SinkError> {
        Ok(self
            .points
            .lock()
            .iter()
            .filter(|p| p.matches(filter))
            .take(limit)
            .cloned()
            .collect())
    }
}
