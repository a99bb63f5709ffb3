// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP client for the Particle device cloud.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::cloud::CloudApi;
use crate::device::{DeviceId, DeviceSummary};
use crate::error::CloudError;

// ============================================================================
// CloudConfig
// ============================================================================

/// Configuration for the cloud API client.
///
/// # Examples
///
/// ```
/// use particlehub::cloud::CloudConfig;
/// use std::time::Duration;
///
/// let config = CloudConfig::new("my-token")
///     .with_base_url("https://api.example.com/v1")
///     .with_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.base_url(), "https://api.example.com/v1");
/// ```
#[derive(Debug, Clone)]
pub struct CloudConfig {
    base_url: String,
    access_token: String,
    timeout: Duration,
}

impl CloudConfig {
    /// Default API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.particle.io/v1";
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a configuration for the given access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            access_token: access_token.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the API base URL. A trailing slash is ignored.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the URL of the account-wide device event stream.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!(
            "{}/devices/events?access_token={}",
            self.base_url,
            urlencoding::encode(&self.access_token)
        )
    }

    /// Creates a [`CloudClient`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn into_client(self) -> Result<CloudClient, CloudError> {
        let client = Client::builder().timeout(self.timeout).build()?;

        Ok(CloudClient {
            base_url: self.base_url,
            access_token: self.access_token,
            client,
        })
    }
}

// ============================================================================
// CloudClient
// ============================================================================

/// HTTP implementation of [`CloudApi`].
///
/// The access token travels as the `access_token` query (or form) parameter.
///
/// # Examples
///
/// ```no_run
/// use particlehub::cloud::{CloudApi, CloudConfig};
///
/// # async fn example() -> particlehub::Result<()> {
/// let client = CloudConfig::new("my-token").into_client()?;
/// for device in client.list_devices().await? {
///     println!("{} {:?}", device.id, device.name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CloudClient {
    base_url: String,
    access_token: String,
    client: Client,
}

/// Body of a variable read.
#[derive(Debug, Deserialize)]
struct VariableResponse {
    result: Option<Value>,
}

/// Body of a function call.
#[derive(Debug, Deserialize)]
struct FunctionResponse {
    #[serde(default = "default_connected")]
    connected: bool,
}

fn default_connected() -> bool {
    true
}

impl CloudClient {
    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn devices_url(&self) -> String {
        format!("{}/devices", self.base_url)
    }

    fn device_url(&self, device_id: &DeviceId) -> String {
        format!(
            "{}/devices/{}",
            self.base_url,
            urlencoding::encode(device_id.as_str())
        )
    }

    fn member_url(&self, device_id: &DeviceId, member: &str) -> String {
        format!(
            "{}/{}",
            self.device_url(device_id),
            urlencoding::encode(member)
        )
    }

    async fn get(&self, url: &str) -> Result<Response, CloudError> {
        tracing::debug!(url = %url, "Sending cloud GET");

        let response = self
            .client
            .get(url)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?;

        check_status(response)
    }
}

fn check_status(response: Response) -> Result<Response, CloudError> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(CloudError::AuthenticationFailed);
    }

    if !status.is_success() {
        return Err(CloudError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        });
    }

    Ok(response)
}

impl CloudApi for CloudClient {
    async fn list_devices(&self) -> Result<Vec<DeviceSummary>, CloudError> {
        let response = self.get(&self.devices_url()).await?;
        let devices: Vec<DeviceSummary> = response.json().await?;

        tracing::debug!(count = devices.len(), "Received device list");

        Ok(devices)
    }

    async fn get_variable(&self, device_id: &DeviceId, name: &str) -> Result<Value, CloudError> {
        let response = self.get(&self.member_url(device_id, name)).await?;
        let body: VariableResponse = response.json().await?;

        body.result.ok_or_else(|| {
            CloudError::InvalidResponse(format!("variable {name} response has no result"))
        })
    }

    async fn call_function(
        &self,
        device_id: &DeviceId,
        name: &str,
        arg: &str,
    ) -> Result<bool, CloudError> {
        let url = self.member_url(device_id, name);

        tracing::debug!(url = %url, arg = %arg, "Calling device function");

        let response = self
            .client
            .post(&url)
            .form(&[("args", arg), ("access_token", self.access_token.as_str())])
            .send()
            .await?;

        let body: FunctionResponse = check_status(response)?.json().await?;
        Ok(body.connected)
    }

    async fn get_full_device(&self, device_id: &DeviceId) -> Result<DeviceSummary, CloudError> {
        let response = self.get(&self.device_url(device_id)).await?;
        Ok(response.json().await?)
    }
}
