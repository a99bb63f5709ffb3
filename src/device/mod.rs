// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory representation of cloud devices.
//!
//! A [`Device`] combines two kinds of data:
//!
//! - **Cloud-owned** fields (name, connectivity, status, exposed variables),
//!   overwritten on every registry refresh from a [`DeviceSummary`].
//! - **Locally owned** fields (tags, the managed flag and the last observed
//!   variable values), which survive refreshes and are never sent back to the
//!   cloud.

mod device_id;
mod summary;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

pub use device_id::DeviceId;
pub use summary::DeviceSummary;

/// User-assigned annotations attached to every point logged for a device.
pub type Tags = BTreeMap<String, String>;

/// A device known to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub(crate) id: DeviceId,
    pub(crate) name: String,
    pub(crate) online: bool,
    pub(crate) connected: bool,
    pub(crate) status: String,
    pub(crate) notes: Option<String>,
    pub(crate) variables: BTreeSet<String>,
    pub(crate) functions: BTreeSet<String>,
    pub(crate) variable_state: BTreeMap<String, Value>,
    pub(crate) tags: Tags,
    pub(crate) is_managed: bool,
}

impl Device {
    /// Creates an unmanaged, untagged device from a cloud record.
    #[must_use]
    pub fn from_summary(summary: DeviceSummary) -> Self {
        let mut device = Self {
            id: summary.id.clone(),
            name: String::new(),
            online: false,
            connected: false,
            status: String::new(),
            notes: None,
            variables: BTreeSet::new(),
            functions: BTreeSet::new(),
            variable_state: BTreeMap::new(),
            tags: Tags::new(),
            is_managed: false,
        };
        device.apply_summary(summary);
        device
    }

    /// Overwrites the cloud-owned fields, leaving local data untouched.
    pub(crate) fn apply_summary(&mut self, summary: DeviceSummary) {
        self.name = summary.name.unwrap_or_else(|| summary.id.to_string());
        self.online = summary.online;
        self.connected = summary.connected;
        self.status = summary.status.unwrap_or_default();
        self.notes = summary.notes;
        self.variables = summary.variables.into_keys().collect();
        self.functions = summary.functions.into_iter().collect();
    }

    /// Carries the locally owned fields of a previous record over to this one.
    pub(crate) fn adopt_local_state(&mut self, previous: Device) {
        self.tags = previous.tags;
        self.is_managed = previous.is_managed;
        self.variable_state = previous.variable_state;
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Returns the device name (the identifier when the cloud has none).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the device was online at the last refresh.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Returns whether the device held a cloud connection at the last refresh.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns the cloud status string.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Returns the cloud console notes, if any.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Returns the names of the variables the device exposes.
    #[must_use]
    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    /// Returns the names of the functions the device exposes.
    #[must_use]
    pub fn functions(&self) -> &BTreeSet<String> {
        &self.functions
    }

    /// Returns `true` if the device exposes a variable with this name.
    #[must_use]
    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains(name)
    }

    /// Returns the last observed value of every polled variable.
    #[must_use]
    pub fn variable_state(&self) -> &BTreeMap<String, Value> {
        &self.variable_state
    }

    /// Returns the device tags.
    #[must_use]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Returns whether the device participates in periodic logging.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.is_managed
    }
}

/// Renders a variable value as a tag value.
///
/// Strings are used verbatim; other JSON values use their compact encoding.
#[must_use]
pub fn tag_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> DeviceSummary {
        DeviceSummary::new("abc")
            .with_name("boiler")
            .with_online(true)
            .with_status("normal")
            .with_variable("temp", "double")
            .with_function("reset")
    }

    #[test]
    fn from_summary_copies_cloud_fields() {
        let device = Device::from_summary(summary());

        assert_eq!(device.id(), &DeviceId::new("abc"));
        assert_eq!(device.name(), "boiler");
        assert!(device.is_online());
        assert!(device.is_connected());
        assert_eq!(device.status(), "normal");
        assert!(device.has_variable("temp"));
        assert!(device.functions().contains("reset"));
        assert!(device.tags().is_empty());
        assert!(!device.is_managed());
    }

    #[test]
    fn name_falls_back_to_id() {
        let device = Device::from_summary(DeviceSummary::new("abc"));
        assert_eq!(device.name(), "abc");
    }

    #[test]
    fn adopt_local_state_keeps_tags_and_managed_flag() {
        let mut old = Device::from_summary(summary());
        old.tags.insert("loc".to_string(), "lab".to_string());
        old.is_managed = true;
        old.variable_state
            .insert("temp".to_string(), Value::from(21.5));

        let mut fresh = Device::from_summary(summary().with_online(false).with_status("gone"));
        fresh.adopt_local_state(old);

        assert_eq!(fresh.tags().get("loc").map(String::as_str), Some("lab"));
        assert!(fresh.is_managed());
        assert_eq!(fresh.variable_state().get("temp"), Some(&Value::from(21.5)));
        assert!(!fresh.is_online());
        assert_eq!(fresh.status(), "gone");
    }

    #[test]
    fn apply_summary_leaves_local_state() {
        let mut device = Device::from_summary(summary());
        device.tags.insert("loc".to_string(), "lab".to_string());
        device.is_managed = true;

        device.apply_summary(DeviceSummary::new("abc").with_name("renamed"));

        assert_eq!(device.name(), "renamed");
        assert!(!device.has_variable("temp"));
        assert!(device.is_managed());
        assert_eq!(device.tags().len(), 1);
    }

    #[test]
    fn tag_value_rendering() {
        assert_eq!(tag_value(&Value::from("lab")), "lab");
        assert_eq!(tag_value(&Value::from(21)), "21");
        assert_eq!(tag_value(&Value::from(true)), "true");
        assert_eq!(tag_value(&Value::Null), "");
    }
}
