// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry state persistence.
//!
//! Only locally owned data is written: the managed device ids and the tag
//! map of each device. Cloud-owned fields are re-fetched on every start.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::{DeviceId, Tags};
use crate::error::PersistenceError;

/// On-disk registry state.
///
/// ```json
/// {
///   "version": 1,
///   "managed_device_ids": ["abc"],
///   "tags": { "abc": { "loc": "lab" } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Schema version.
    pub version: u32,
    /// Devices enrolled in logging.
    #[serde(default)]
    pub managed_device_ids: BTreeSet<DeviceId>,
    /// Tags per device.
    #[serde(default)]
    pub tags: BTreeMap<DeviceId, Tags>,
}

impl PersistedState {
    /// Newest schema version this build reads and the one it writes.
    pub const CURRENT_VERSION: u32 = 1;

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managed_device_ids.is_empty() && self.tags.is_empty()
    }
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            managed_device_ids: BTreeSet::new(),
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// JSON file holding a [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Creates a store at the given path. Nothing is touched until the first
    /// load or save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored state. A missing file is an empty state.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON for the
    /// schema, or was written by a newer schema version.
    pub async fn load(&self) -> Result<PersistedState, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No state file found, starting empty");
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let probe: VersionProbe = serde_json::from_str(&contents)?;
        if probe.version > PersistedState::CURRENT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: probe.version,
                supported: PersistedState::CURRENT_VERSION,
            });
        }

        let state: PersistedState = serde_json::from_str(&contents)?;
        tracing::info!(
            path = %self.path.display(),
            managed = state.managed_device_ids.len(),
            tagged = state.tags.len(),
            "Loaded registry state"
        );
        Ok(state)
    }

    /// Writes the state, replacing the file atomically.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let contents = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, contents)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::debug!(path = %self.path.display(), "Saved registry state");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
