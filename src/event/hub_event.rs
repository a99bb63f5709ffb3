// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry event types.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::device::{DeviceId, Tags};

/// Events emitted by the device registry.
///
/// These notify subscribers about changes to the device set and to locally
/// owned device data. Stream events are delivered separately, through
/// observers registered on the dispatcher.
///
/// # Examples
///
/// ```
/// use particlehub::DeviceId;
/// use particlehub::event::HubEvent;
///
/// let event = HubEvent::ManagedChanged {
///     device_id: DeviceId::new("abc"),
///     managed: true,
/// };
/// assert_eq!(event.device_id(), Some(&DeviceId::new("abc")));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// A refresh succeeded and changed the device set.
    DevicesRefreshed {
        /// Devices that appeared in this refresh.
        added: Vec<DeviceId>,
        /// Devices that disappeared in this refresh.
        removed: Vec<DeviceId>,
    },

    /// A refresh failed; the device set is now unknown.
    CloudUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// A device joined or left the managed set.
    ManagedChanged {
        /// The device.
        device_id: DeviceId,
        /// Whether it is now managed.
        managed: bool,
    },

    /// A device's tags were edited.
    TagsChanged {
        /// The device.
        device_id: DeviceId,
        /// The complete new tag map.
        tags: Tags,
    },

    /// A device was polled for its variables.
    VariablesUpdated {
        /// The device.
        device_id: DeviceId,
        /// The values read in this poll.
        values: BTreeMap<String, Value>,
    },
}

impl HubEvent {
    /// Returns the device this event concerns, if it concerns exactly one.
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::ManagedChanged { device_id, .. }
            | Self::TagsChanged { device_id, .. }
            | Self::VariablesUpdated { device_id, .. } => Some(device_id),
            Self::DevicesRefreshed { .. } | Self::CloudUnavailable { .. } => None,
        }
    }

    /// Returns `true` if this event reports a change of the device set.
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        matches!(
            self,
            Self::DevicesRefreshed { .. } | Self::CloudUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_accessor() {
        let id = DeviceId::new("abc");
        let event = HubEvent::TagsChanged {
            device_id: id.clone(),
            tags: Tags::new(),
        };
        assert_eq!(event.device_id(), Some(&id));

        let event = HubEvent::DevicesRefreshed {
            added: vec![id],
            removed: vec![],
        };
        assert_eq!(event.device_id(), None);
    }

    #[test]
    fn refresh_classification() {
        assert!(
            HubEvent::CloudUnavailable {
                reason: "down".to_string()
            }
            .is_refresh()
        );
        assert!(
            !HubEvent::ManagedChanged {
                device_id: DeviceId::new("a"),
                managed: true
            }
            .is_refresh()
        );
    }
}
