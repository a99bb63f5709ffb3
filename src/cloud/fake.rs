// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory cloud for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::cloud::CloudApi;
use crate::device::{DeviceId, DeviceSummary};
use crate::error::CloudError;

#[derive(Debug, Default)]
pub(crate) struct FakeCloud {
    devices: Mutex<Vec<DeviceSummary>>,
    variables: Mutex<HashMap<(DeviceId, String), Value>>,
    calls: Mutex<Vec<(DeviceId, String, String)>>,
    unavailable: AtomicBool,
    list_calls: AtomicUsize,
    variable_reads: AtomicUsize,
}

impl FakeCloud {
    pub(crate) fn with_devices(devices: Vec<DeviceSummary>) -> Self {
        let cloud = Self::default();
        cloud.set_devices(devices);
        cloud
    }

    pub(crate) fn set_devices(&self, devices: Vec<DeviceSummary>) {
        *self.devices.lock() = devices;
    }

    pub(crate) fn set_variable(&self, device_id: &str, name: &str, value: impl Into<Value>) {
        self.variables
            .lock()
            .insert((DeviceId::new(device_id), name.to_string()), value.into());
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn variable_reads(&self) -> usize {
        self.variable_reads.load(Ordering::SeqCst)
    }

    pub(crate) fn function_calls(&self) -> Vec<(DeviceId, String, String)> {
        self.calls.lock().clone()
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
        tokio::task::yield_now().await;
        self.check_available()?;
        Ok(self.devices.lock().clone())
    }

    async fn get_variable(&self, device_id: &DeviceId, name: &str) -> Result<Value, CloudError> {
        self.variable_reads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.check_available()?;
        self.variables
            .lock()
            .get(&(device_id.clone(), name.to_string()))
            .cloned()
            .ok_or_else(not_found)
    }

    async fn call_function(
        &self,
        device_id: &DeviceId,
        name: &str,
        arg: &str,
    ) -> Result<bool, CloudError> {
        self.check_available()?;
        self.calls
            .lock()
            .push((device_id.clone(), name.to_string(), arg.to_string()));
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
