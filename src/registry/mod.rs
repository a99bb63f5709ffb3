// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registry and its persisted state.
//!
//! The [`DeviceRegistry`] is the single owner of device records. It merges
//! cloud refreshes with locally owned data, and persists that local data
//! through a [`StateStore`].
//!
//! # Unknown versus empty
//!
//! A registry that has never synced, or whose last refresh failed, reports
//! [`DeviceListing::Unknown`]. An account with no devices reports an empty
//! [`DeviceListing::Known`].

mod device_registry;
mod persistence;

use chrono::{DateTime, Utc};

use crate::device::{Device, DeviceId, Tags};
use crate::sink::Reading;

pub use device_registry::DeviceRegistry;
pub use persistence::{PersistedState, StateStore};

/// Outcome of the most recent refresh.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No refresh has completed yet.
    #[default]
    NeverSynced,
    /// The last refresh succeeded.
    Synced {
        /// Completion time.
        at: DateTime<Utc>,
    },
    /// The last refresh failed.
    Unavailable {
        /// Failure time.
        since: DateTime<Utc>,
        /// Failure description.
        reason: String,
    },
}

impl SyncState {
    /// Returns `true` after a successful refresh.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }
}

/// Result of listing the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceListing {
    /// The device set as of the last successful refresh, ordered by id.
    Known(Vec<Device>),
    /// The device set cannot be trusted.
    Unknown,
}

impl DeviceListing {
    /// Returns `true` for a known listing.
    #[must_use]
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// Returns the devices of a known listing.
    #[must_use]
    pub fn into_known(self) -> Option<Vec<Device>> {
        match self {
            Self::Known(devices) => Some(devices),
            Self::Unknown => None,
        }
    }
}

/// Device set changes made by one refresh.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshReport {
    /// Devices that were not present before.
    pub added: Vec<DeviceId>,
    /// Devices that were dropped.
    pub removed: Vec<DeviceId>,
    /// Devices now present.
    pub device_count: usize,
}

impl RefreshReport {
    /// Returns `true` if the device set changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// What a restore reapplied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestoreReport {
    /// Devices whose managed flag was restored.
    pub managed: Vec<DeviceId>,
    /// Number of devices whose tags were restored.
    pub tagged: usize,
    /// Stored devices that are not present.
    pub skipped: Vec<DeviceId>,
}

/// Values read by one device poll.
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePoll {
    /// Variable values that could be read.
    pub values: Reading,
    /// Device tags after the poll.
    pub tags: Tags,
}
