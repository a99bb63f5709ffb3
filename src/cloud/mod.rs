// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud API access.
//!
//! The registry and the logging scheduler talk to the cloud through the
//! [`CloudApi`] trait. [`CloudClient`] is the HTTP implementation used in
//! production; tests substitute in-memory fakes.

#[cfg(test)]
pub(crate) mod fake;
mod http;

use std::future::Future;

use serde_json::Value;

use crate::device::{DeviceId, DeviceSummary};
use crate::error::CloudError;

pub use http::{CloudClient, CloudConfig};

/// Request/response operations offered by the device cloud.
///
/// Every call carries the client's access credential. Any non-success
/// response surfaces as a [`CloudError`].
pub trait CloudApi: Send + Sync + 'static {
    /// Lists every device visible to the credential.
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceSummary>, CloudError>> + Send;

    /// Reads the current value of one device variable.
    fn get_variable(
        &self,
        device_id: &DeviceId,
        name: &str,
    ) -> impl Future<Output = Result<Value, CloudError>> + Send;

    /// Calls a device function with a string argument.
    ///
    /// Returns `true` when the device accepted the call.
    fn call_function(
        &self,
        device_id: &DeviceId,
        name: &str,
        arg: &str,
    ) -> impl Future<Output = Result<bool, CloudError>> + Send;

    /// Fetches the full record of one device, including its variable names.
    fn get_full_device(
        &self,
        device_id: &DeviceId,
    ) -> impl Future<Output = Result<DeviceSummary, CloudError>> + Send;
}
