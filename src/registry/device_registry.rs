// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast};

use crate::cloud::CloudApi;
use crate::device::{Device, DeviceId, Tags, tag_value};
use crate::error::{Error, Result};
use crate::event::{EventBus, HubEvent};
use crate::sink::Reading;

use super::persistence::{PersistedState, StateStore};
use super::{DeviceListing, DevicePoll, RefreshReport, RestoreReport, SyncState};

#[derive(Debug, Default)]
struct RegistryState {
    devices: BTreeMap<DeviceId, Device>,
    sync: SyncState,
}

/// Guards writes to the store.
///
/// Until the stored state has been restored, a write would replace it with
/// a snapshot that lacks it, so edits only mark the registry as unsaved.
#[derive(Debug, Default)]
struct PersistGate {
    restored: bool,
    unsaved: bool,
}

/// Registry of the devices visible to the cloud account.
///
/// Cloud-owned device data is replaced on every [`refresh`](Self::refresh);
/// locally owned data (tags, managed flag, last variable values) is carried
/// over for devices that are still present. Every local edit is persisted
/// when a [`StateStore`] is attached.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use particlehub::cloud::CloudConfig;
/// use particlehub::registry::{DeviceRegistry, StateStore};
///
/// # async fn example() -> particlehub::Result<()> {
/// let cloud = Arc::new(CloudConfig::new("token").into_client()?);
/// let registry = DeviceRegistry::new(cloud).with_store(StateStore::new("state.json"));
///
/// registry.refresh().await?;
/// registry.restore().await?;
///
/// for id in registry.managed_ids().await {
///     println!("logging {id}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceRegistry<C> {
    cloud: Arc<C>,
    state: RwLock<RegistryState>,
    store: Option<StateStore>,
    /// Held from snapshot to write so files land in mutation order.
    persist_lock: Mutex<PersistGate>,
    event_bus: EventBus,
}

impl<C: CloudApi> DeviceRegistry<C> {
    /// Creates an empty, never synced registry without persistence.
    #[must_use]
    pub fn new(cloud: Arc<C>) -> Self {
        Self {
            cloud,
            state: RwLock::new(RegistryState::default()),
            store: None,
            persist_lock: Mutex::new(PersistGate::default()),
            event_bus: EventBus::new(),
        }
    }

    /// Attaches a state store.
    #[must_use]
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Publishes notifications on the given bus instead of a private one.
    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Returns the cloud client.
    #[must_use]
    pub fn cloud(&self) -> &Arc<C> {
        &self.cloud
    }

    /// Returns the attached state store.
    #[must_use]
    pub fn store(&self) -> Option<&StateStore> {
        self.store.as_ref()
    }

    /// Subscribes to registry notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.event_bus.subscribe()
    }

    /// Returns the notification bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Re-fetches the device list and merges it into the registry.
    ///
    /// Devices still present keep their tags, managed flag and variable
    /// values; devices absent from the list are dropped. The merge runs under
    /// the write lock against the records current at that moment, so local
    /// edits made while the cloud call was in flight survive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CloudUnavailable`] if the list cannot be fetched. The
    /// registry then reports its device set as unknown but keeps its records.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let summaries = match self.cloud.list_devices().await {
            Ok(summaries) => summaries,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(error = %e, "Device refresh failed");
                self.state.write().await.sync = SyncState::Unavailable {
                    since: Utc::now(),
                    reason: reason.clone(),
                };
                self.event_bus.publish(HubEvent::CloudUnavailable { reason });
                return Err(e.into());
            }
        };

        let report = {
            let mut state = self.state.write().await;
            let mut previous = std::mem::take(&mut state.devices);
            let mut next = BTreeMap::new();
            let mut added = Vec::new();

            for summary in summaries {
                let id = summary.id.clone();
                let mut device = Device::from_summary(summary);
                // a duplicate id in one response adopts from its earlier twin
                match previous.remove(&id).or_else(|| next.remove(&id)) {
                    Some(old) => device.adopt_local_state(old),
                    None => added.push(id.clone()),
                }
                next.insert(id, device);
            }

            let removed: Vec<DeviceId> = previous.into_keys().collect();
            let device_count = next.len();
            state.devices = next;
            state.sync = SyncState::Synced { at: Utc::now() };

            RefreshReport {
                added,
                removed,
                device_count,
            }
        };

        tracing::info!(
            devices = report.device_count,
            added = report.added.len(),
            removed = report.removed.len(),
            "Device list refreshed"
        );

        if report.changed() {
            self.event_bus.publish(HubEvent::DevicesRefreshed {
                added: report.added.clone(),
                removed: report.removed.clone(),
            });
        }

        Ok(report)
    }

    /// Re-fetches one device record, updating its cloud-owned fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry,
    /// or [`Error::CloudUnavailable`] if the record cannot be fetched.
    pub async fn refresh_device(&self, device_id: &DeviceId) -> Result<()> {
        self.ensure_present(device_id).await?;

        let summary = self.cloud.get_full_device(device_id).await?;

        let mut state = self.state.write().await;
        let device = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
        device.apply_summary(summary);

        tracing::debug!(%device_id, variables = device.variables().len(), "Device record refreshed");
        Ok(())
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Enrolls a device in logging or removes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry.
    pub async fn set_managed(&self, device_id: &DeviceId, managed: bool) -> Result<()> {
        let changed = {
            let mut state = self.state.write().await;
            let device = state
                .devices
                .get_mut(device_id)
                .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
            let changed = device.is_managed != managed;
            device.is_managed = managed;
            changed
        };

        if changed {
            tracing::info!(%device_id, managed, "Managed flag changed");
            self.event_bus.publish(HubEvent::ManagedChanged {
                device_id: device_id.clone(),
                managed,
            });
        }

        self.persist_logged().await;
        Ok(())
    }

    /// Adds a tag to a device, or rewrites it if present.
    ///
    /// When the device exposes a variable of the same name, its current value
    /// becomes the tag value. The read is best effort: on failure, or when no
    /// such variable exists, the value is empty. Returns the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry.
    pub async fn add_tag(&self, device_id: &DeviceId, tag: &str) -> Result<String> {
        let exposes_variable = {
            let state = self.state.read().await;
            state
                .devices
                .get(device_id)
                .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?
                .has_variable(tag)
        };

        let value = if exposes_variable {
            match self.cloud.get_variable(device_id, tag).await {
                Ok(value) => tag_value(&value),
                Err(e) => {
                    tracing::warn!(%device_id, tag, error = %e, "Failed to read tag variable");
                    String::new()
                }
            }
        } else {
            String::new()
        };

        let tags = {
            let mut state = self.state.write().await;
            let device = state
                .devices
                .get_mut(device_id)
                .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
            device.tags.insert(tag.to_string(), value.clone());
            device.tags.clone()
        };

        tracing::debug!(%device_id, tag, value = %value, "Tag added");
        self.event_bus.publish(HubEvent::TagsChanged {
            device_id: device_id.clone(),
            tags,
        });
        self.persist_logged().await;
        Ok(value)
    }

    /// Removes a tag from a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry,
    /// or [`Error::TagNotFound`] if it does not carry the tag. Nothing is
    /// changed or persisted in either case.
    pub async fn remove_tag(&self, device_id: &DeviceId, tag: &str) -> Result<()> {
        let tags = {
            let mut state = self.state.write().await;
            let device = state
                .devices
                .get_mut(device_id)
                .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
            if device.tags.remove(tag).is_none() {
                return Err(Error::TagNotFound {
                    device_id: device_id.clone(),
                    tag: tag.to_string(),
                });
            }
            device.tags.clone()
        };

        tracing::debug!(%device_id, tag, "Tag removed");
        self.event_bus.publish(HubEvent::TagsChanged {
            device_id: device_id.clone(),
            tags,
        });
        self.persist_logged().await;
        Ok(())
    }

    // =========================================================================
    // Device I/O
    // =========================================================================

    /// Reads every variable the device exposes.
    ///
    /// Failed reads are logged and left out of the result. The values are
    /// stored as the device's last observed state, and tags named after a
    /// variable take its new value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry.
    pub async fn poll_device(&self, device_id: &DeviceId) -> Result<DevicePoll> {
        let variables = {
            let state = self.state.read().await;
            state
                .devices
                .get(device_id)
                .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?
                .variables
                .clone()
        };

        let mut values = Reading::new();
        for name in &variables {
            match self.cloud.get_variable(device_id, name).await {
                Ok(value) => {
                    values.insert(name.clone(), value);
                }
                Err(e) => {
                    tracing::debug!(%device_id, variable = %name, error = %e, "Variable read failed");
                }
            }
        }

        let tags = {
            let mut state = self.state.write().await;
            let device = state
                .devices
                .get_mut(device_id)
                .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;

            for (tag, tag_val) in &mut device.tags {
                if let Some(value) = values.get(tag) {
                    *tag_val = tag_value(value);
                }
            }
            device
                .variable_state
                .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            device.tags.clone()
        };

        if !values.is_empty() {
            self.event_bus.publish(HubEvent::VariablesUpdated {
                device_id: device_id.clone(),
                values: values.clone(),
            });
        }

        Ok(DevicePoll { values, tags })
    }

    /// Calls a function on a device.
    ///
    /// Returns `true` when the device accepted the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry,
    /// or [`Error::CloudUnavailable`] if the call fails.
    pub async fn call_function(&self, device_id: &DeviceId, name: &str, arg: &str) -> Result<bool> {
        self.ensure_present(device_id).await?;
        tracing::info!(%device_id, function = name, "Calling device function");
        Ok(self.cloud.call_function(device_id, name, arg).await?)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Writes the managed ids and tag maps to the attached store.
    ///
    /// Does nothing without a store, before the first successful refresh, or
    /// before [`restore`](Self::restore) has read the stored state. Edits made
    /// before the restore are written by the restore itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the file cannot be written.
    pub async fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let mut gate = self.persist_lock.lock().await;
        if !gate.restored {
            tracing::debug!("Stored state not restored yet, deferring persist");
            gate.unsaved = true;
            return Ok(());
        }

        self.save_snapshot(store).await
    }

    async fn save_snapshot(&self, store: &StateStore) -> Result<()> {
        let snapshot = {
            let state = self.state.read().await;
            if state.sync == SyncState::NeverSynced {
                tracing::debug!("Registry never synced, skipping persist");
                return Ok(());
            }
            snapshot(&state.devices)
        };

        store.save(&snapshot).await?;
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            tracing::error!(error = %e, "Failed to persist registry state");
        }
    }

    /// Reapplies stored managed flags and tags onto present devices.
    ///
    /// Meant to run once, after the first refresh. Stored entries for devices
    /// that are not present are skipped. A tag edited since startup keeps its
    /// local value. Until this succeeds the store is never written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the stored state cannot be read.
    pub async fn restore(&self) -> Result<RestoreReport> {
        let Some(store) = &self.store else {
            return Ok(RestoreReport::default());
        };

        let mut gate = self.persist_lock.lock().await;
        let stored = store.load().await?;
        let mut report = RestoreReport::default();

        {
            let mut state = self.state.write().await;

            for device_id in stored.managed_device_ids {
                match state.devices.get_mut(&device_id) {
                    Some(device) => {
                        device.is_managed = true;
                        report.managed.push(device_id);
                    }
                    None => {
                        tracing::warn!(%device_id, "Stored managed device not present, skipping");
                        report.skipped.push(device_id);
                    }
                }
            }

            for (device_id, tags) in stored.tags {
                match state.devices.get_mut(&device_id) {
                    Some(device) => {
                        report.tagged += 1;
                        for (tag, value) in tags {
                            device.tags.entry(tag).or_insert(value);
                        }
                    }
                    None => {
                        tracing::warn!(%device_id, "Stored tags for absent device, skipping");
                        if !report.skipped.contains(&device_id) {
                            report.skipped.push(device_id);
                        }
                    }
                }
            }
        }

        gate.restored = true;
        if std::mem::take(&mut gate.unsaved) {
            self.save_snapshot(store).await?;
        }

        tracing::info!(
            managed = report.managed.len(),
            tagged = report.tagged,
            skipped = report.skipped.len(),
            "Registry state restored"
        );
        Ok(report)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns a copy of one device.
    pub async fn get(&self, device_id: &DeviceId) -> Option<Device> {
        self.state.read().await.devices.get(device_id).cloned()
    }

    /// Lists the devices, or [`DeviceListing::Unknown`] when the last refresh
    /// failed or none has run yet.
    pub async fn list(&self) -> DeviceListing {
        let state = self.state.read().await;
        match state.sync {
            SyncState::Synced { .. } => {
                DeviceListing::Known(state.devices.values().cloned().collect())
            }
            SyncState::NeverSynced | SyncState::Unavailable { .. } => DeviceListing::Unknown,
        }
    }

    /// Returns the ids of every managed device.
    pub async fn managed_ids(&self) -> Vec<DeviceId> {
        self.state
            .read()
            .await
            .devices
            .values()
            .filter(|d| d.is_managed)
            .map(|d| d.id.clone())
            .collect()
    }

    /// Returns the tags of a device if it is present and managed.
    pub async fn managed_tags(&self, device_id: &DeviceId) -> Option<Tags> {
        self.state
            .read()
            .await
            .devices
            .get(device_id)
            .filter(|d| d.is_managed)
            .map(|d| d.tags.clone())
    }

    /// Returns `true` if the device is present and managed.
    pub async fn is_managed(&self, device_id: &DeviceId) -> bool {
        self.state
            .read()
            .await
            .devices
            .get(device_id)
            .is_some_and(|d| d.is_managed)
    }

    /// Returns the tags of a device.
    pub async fn tags(&self, device_id: &DeviceId) -> Option<Tags> {
        self.state
            .read()
            .await
            .devices
            .get(device_id)
            .map(|d| d.tags.clone())
    }

    /// Returns the synchronization state.
    pub async fn sync_state(&self) -> SyncState {
        self.state.read().await.sync.clone()
    }

    /// Returns the number of devices held, including during an outage.
    pub async fn len(&self) -> usize {
        self.state.read().await.devices.len()
    }

    /// Returns `true` if no device is held.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.devices.is_empty()
    }

    async fn ensure_present(&self, device_id: &DeviceId) -> Result<()> {
        if self.state.read().await.devices.contains_key(device_id) {
            Ok(())
        } else {
            Err(Error::DeviceNotFound(device_id.clone()))
        }
    }
}

fn snapshot(devices: &BTreeMap<DeviceId, Device>) -> PersistedState {
    PersistedState {
        version: PersistedState::CURRENT_VERSION,
        managed_device_ids: devices
            .values()
            .filter(|d| d.is_managed)
            .map(|d| d.id.clone())
            .collect(),
        tags: devices
            .values()
            .filter(|d| !d.tags.is_empty())
            .map(|d| (d.id.clone(), d.tags.clone()))
            .collect(),
    }
}
