// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::Mutex;
use particlehub::error::{CloudError, StreamError};
use particlehub::stream::{EventSource, EventStream, RawEvent};
use particlehub::{CloudApi, DeviceId, DeviceSummary};
use serde_json::Value;

// ============================================================================
// Cloud
// ============================================================================

#[derive(Debug, Default)]
pub struct FakeCloud {
    devices: Mutex<Vec<DeviceSummary>>,
    variables: Mutex<HashMap<(DeviceId, String), Value>>,
    unavailable: AtomicBool,
    list_calls: AtomicUsize,
}

impl FakeCloud {
    pub fn with_devices(devices: Vec<DeviceSummary>) -> Arc<Self> {
        let cloud = Self::default();
        *cloud.devices.lock() = devices;
        Arc::new(cloud)
    }

    pub fn set_devices(&self, devices: Vec<DeviceSummary>) {
        *self.devices.lock() = devices;
    }

    pub fn set_variable(&self, device_id: &str, name: &str, value: impl Into<Value>) {
        self.variables
            .lock()
            .insert((DeviceId::new(device_id), name.to_string()), value.into());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), CloudError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CloudError::Status {
                status: 503,
                reason: "Service Unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn not_found() -> CloudError {
    CloudError::Status {
        status: 404,
        reason: "Not Found".to_string(),
    }
}

impl CloudApi for FakeCloud {
    async fn list_devices(&self) -> Result<Vec<DeviceSummary>, CloudError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.devices.lock().clone())
    }

    async fn get_variable(&self, device_id: &DeviceId, name: &str) -> Result<Value, CloudError> {
        self.check_available()?;
        self.variables
            .lock()
            .get(&(device_id.clone(), name.to_string()))
            .cloned()
            .ok_or_else(not_found)
    }

    async fn call_function(
        &self,
        _device_id: &DeviceId,
        _name: &str,
        _arg: &str,
    ) -> Result<bool, CloudError> {
        self.check_available()?;
        Ok(true)
    }

    async fn get_full_device(&self, device_id: &DeviceId) -> Result<DeviceSummary, CloudError> {
        self.check_available()?;
        self.devices
            .lock()
            .iter()
            .find(|d| &d.id == device_id)
            .cloned()
            .ok_or_else(not_found)
    }
}

// ============================================================================
// Event source
// ============================================================================

/// One scripted connection attempt.
#[derive(Debug, Clone)]
pub enum Connection {
    /// Opening fails.
    Refused,
    /// Delivers the events, then closes.
    Events(Vec<RawEvent>),
}

/// Event source replaying scripted connections.
///
/// Once the script is exhausted, connections stay open without events.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Connection>>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Connection>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `open` calls, readable after the source is moved.
    pub fn opens(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

impl EventSource for ScriptedSource {
    async fn open(&self) -> Result<EventStream, StreamError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(Connection::Refused) => {
                Err(StreamError::ConnectionFailed("refused".to_string()))
            }
            Some(Connection::Events(events)) => {
                Ok(stream::iter(events.into_iter().map(Ok)).boxed())
            }
            None => Ok(stream::pending().boxed()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn device(id: &str, variables: &[&str]) -> DeviceSummary {
    variables
        .iter()
        .fold(DeviceSummary::new(id).with_online(true), |summary, name| {
            summary.with_variable(*name, "double")
        })
}

pub fn published(kind: &str, device_id: &str, data: &str) -> RawEvent {
    RawEvent::new(
        kind,
        serde_json::json!({
            "coreid": device_id,
            "data": data,
            "published_at": "2026-03-01T12:00:00.000Z",
            "ttl": 60,
        })
        .to_string(),
    )
}
