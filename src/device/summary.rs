// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device records as returned by the cloud API.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::DeviceId;

/// A device record from the cloud device list or device detail endpoint.
///
/// All fields except `id` are optional on the wire; the cloud omits or
/// nulls `variables` and `functions` for offline devices.
///
/// # Examples
///
/// ```
/// use particlehub::device::DeviceSummary;
///
/// let json = r#"{"id":"abc","name":"boiler","connected":true,
///                "variables":{"temp":"double"},"functions":["reset"]}"#;
/// let summary: DeviceSummary = serde_json::from_str(json).unwrap();
///
/// assert_eq!(summary.name.as_deref(), Some("boiler"));
/// assert!(summary.variables.contains_key("temp"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// Stable device identifier.
    pub id: DeviceId,

    /// User-assigned device name.
    #[serde(default)]
    pub name: Option<String>,

    /// Whether the device holds a cloud connection.
    #[serde(default, deserialize_with = "null_as_default")]
    pub connected: bool,

    /// Whether the device was recently heard from.
    #[serde(default, deserialize_with = "null_as_default")]
    pub online: bool,

    /// Product status string reported by the cloud.
    #[serde(default)]
    pub status: Option<String>,

    /// Free-form notes attached in the cloud console.
    #[serde(default)]
    pub notes: Option<String>,

    /// Exposed variables, keyed by name, valued by declared type.
    #[serde(default, deserialize_with = "null_as_default")]
    pub variables: BTreeMap<String, String>,

    /// Exposed function names.
    #[serde(default, deserialize_with = "null_as_default")]
    pub functions: Vec<String>,
}

impl DeviceSummary {
    /// Creates a summary with only an identifier set.
    #[must_use]
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            connected: false,
            online: false,
            status: None,
            notes: None,
            variables: BTreeMap::new(),
            functions: Vec::new(),
        }
    }

    /// Sets the device name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets both `online` and `connected`.
    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self.connected = online;
        self
    }

    /// Sets the status string.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Declares an exposed variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        self.variables.insert(name.into(), kind.into());
        self
    }

    /// Declares an exposed function.
    #[must_use]
    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.functions.push(name.into());
        self
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_record() {
        let json = r#"{
            "id": "0123456789abcdef",
            "name": "greenhouse",
            "last_app": null,
            "connected": true,
            "online": true,
            "status": "normal",
            "notes": "north wall",
            "variables": {"temp": "double", "hum": "int32"},
            "functions": ["led", "reset"]
        }"#;

        let summary: DeviceSummary = serde_json::from_str(json).unwrap();

        assert_eq!(summary.id, DeviceId::new("0123456789abcdef"));
        assert_eq!(summary.name.as_deref(), Some("greenhouse"));
        assert!(summary.connected);
        assert!(summary.online);
        assert_eq!(summary.status.as_deref(), Some("normal"));
        assert_eq!(summary.notes.as_deref(), Some("north wall"));
        assert_eq!(summary.variables.len(), 2);
        assert_eq!(summary.functions, vec!["led", "reset"]);
    }

    #[test]
    fn null_collections_become_empty() {
        let json = r#"{"id":"abc","variables":null,"functions":null,"connected":null}"#;
        let summary: DeviceSummary = serde_json::from_str(json).unwrap();

        assert!(summary.variables.is_empty());
        assert!(summary.functions.is_empty());
        assert!(!summary.connected);
    }

    #[test]
    fn missing_id_is_rejected() {
        let result = serde_json::from_str::<DeviceSummary>(r#"{"name":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn builder_chain() {
        let summary = DeviceSummary::new("abc")
            .with_name("boiler")
            .with_online(true)
            .with_variable("temp", "double")
            .with_function("reset");

        assert!(summary.online && summary.connected);
        assert_eq!(summary.variables.get("temp").map(String::as_str), Some("double"));
        assert_eq!(summary.functions, vec!["reset"]);
    }
}
