// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hub façade tying the registry, the dispatcher and the scheduler together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cloud::{CloudApi, CloudClient};
use crate::config::{HubConfig, ReconnectionPolicy};
use crate::device::{Device, DeviceId, Tags};
use crate::error::{Error, Result, SinkError};
use crate::event::HubEvent;
use crate::registry::{DeviceListing, DevicePoll, DeviceRegistry, RefreshReport, StateStore};
use crate::scheduler::LogScheduler;
use crate::sink::{AnySink, LogSink, Point};
use crate::stream::{EventSource, RawEvent, SseSource, StreamDispatcher, StreamEnd, StreamState};
use crate::subscription::SubscriptionId;

/// The running hub.
///
/// Owns one [`DeviceRegistry`], one [`StreamDispatcher`] fed by a supervised
/// stream task, and one [`LogScheduler`].
///
/// # Lifecycle
///
/// [`start`](Self::start) refreshes the registry, restores the persisted
/// state, starts logging for every restored managed device and spawns the
/// stream supervisor. [`shutdown`](Self::shutdown) cancels everything, waits
/// for each task within the stop timeout and persists a final time.
///
/// # Examples
///
/// ```no_run
/// use particlehub::{DeviceId, Hub, HubConfig};
///
/// #[tokio::main]
/// async fn main() -> particlehub::Result<()> {
///     let config = HubConfig::from_env()?;
///     let hub = Hub::from_config(&config)?;
///     hub.start(Hub::stream_source(&config)?).await?;
///
///     hub.add_device(&DeviceId::new("0123456789abcdef")).await?;
///     hub.add_tag(&DeviceId::new("0123456789abcdef"), "location").await?;
///
///     tokio::signal::ctrl_c().await.ok();
///     hub.shutdown().await
/// }
/// ```
pub struct Hub<C, S> {
    registry: Arc<DeviceRegistry<C>>,
    dispatcher: Arc<StreamDispatcher<C, S>>,
    scheduler: LogScheduler<C, S>,
    sink: Option<Arc<S>>,
    reconnection: ReconnectionPolicy,
    stop_timeout: Duration,
    cancel: CancellationToken,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    /// Held across a managed-flag change and the matching task start or stop.
    control_lock: tokio::sync::Mutex<()>,
}

impl Hub<CloudClient, AnySink> {
    /// Builds a hub talking to the cloud over HTTP and logging to the sink
    /// the configuration selects.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or a client cannot be
    /// created.
    pub fn from_config(config: &HubConfig) -> Result<Self> {
        config.validate()?;

        let cloud = config.cloud_config().into_client()?;
        let sink = config
            .selected_sink()?
            .map(AnySink::from_config)
            .transpose()?;

        Ok(Self::new(Arc::new(cloud), sink, config))
    }

    /// Creates the HTTP event source the configuration points at.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn stream_source(config: &HubConfig) -> Result<SseSource> {
        Ok(SseSource::new(config.stream_url())?)
    }
}

impl<C: CloudApi, S: LogSink> Hub<C, S> {
    /// Assembles a hub. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(cloud: Arc<C>, sink: Option<S>, config: &HubConfig) -> Self {
        let cancel = CancellationToken::new();
        let sink = sink.map(Arc::new);

        let mut registry = DeviceRegistry::new(cloud);
        if let Some(path) = config.state_file() {
            registry = registry.with_store(StateStore::new(path));
        }
        let registry = Arc::new(registry);

        let dispatcher = StreamDispatcher::new(Arc::clone(&registry), sink.clone())
            .with_subscribed_kinds(config.subscribed_events().iter().copied());

        let scheduler = LogScheduler::new(Arc::clone(&registry), sink.clone())
            .with_interval(config.log_interval())
            .with_stop_timeout(config.stop_timeout())
            .with_parent_token(&cancel);

        Self {
            registry,
            dispatcher: Arc::new(dispatcher),
            scheduler,
            sink,
            reconnection: config.reconnection().clone(),
            stop_timeout: config.stop_timeout(),
            cancel,
            stream_task: Mutex::new(None),
            control_lock: tokio::sync::Mutex::new(()),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the hub.
    ///
    /// The initial refresh is retried per the reconnection policy. The
    /// persisted state is restored only after it succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CloudUnavailable`] if the initial refresh fails for
    /// good, or [`Error::Persistence`] if the stored state cannot be read.
    pub async fn start<E: EventSource>(&self, source: E) -> Result<()> {
        self.initial_refresh().await?;

        let restored = self.registry.restore().await?;

        {
            let _control = self.control_lock.lock().await;
            for device_id in &restored.managed {
                if let Err(e) = self.scheduler.start(device_id).await {
                    tracing::warn!(%device_id, error = %e, "Failed to resume logging");
                }
            }
        }

        self.spawn_stream(source);

        tracing::info!(
            managed = restored.managed.len(),
            sink = self.sink.is_some(),
            "Hub started"
        );
        Ok(())
    }

    async fn initial_refresh(&self) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let error = match self.registry.refresh().await {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };

            if !self.reconnection.should_retry(attempt) {
                return Err(error);
            }

            let delay = self.reconnection.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tracing::warn!(
                error = %error,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Initial refresh failed, retrying"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(error),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Spawns the supervised stream task on `source`.
    ///
    /// Does nothing if a stream task is already running.
    pub fn spawn_stream<E: EventSource>(&self, source: E) {
        let mut slot = self.stream_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::warn!("Stream task already running");
            return;
        }

        *slot = Some(tokio::spawn(supervise_stream(
            Arc::clone(&self.dispatcher),
            source,
            self.reconnection.clone(),
            self.cancel.child_token(),
        )));
    }

    /// Stops the stream and every logging task, then persists the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the final write fails.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Hub shutting down");
        self.cancel.cancel();

        let stream_task = self.stream_task.lock().take();
        if let Some(mut handle) = stream_task
            && tokio::time::timeout(self.stop_timeout, &mut handle)
                .await
                .is_err()
        {
            handle.abort();
            tracing::warn!("Stream task did not stop in time, aborted");
        }

        for failure in self.scheduler.shutdown().await {
            tracing::warn!(error = %failure, "Logging task did not stop cleanly");
        }

        self.registry.persist().await
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Enrolls a device in logging and starts its task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry.
    pub async fn add_device(&self, device_id: &DeviceId) -> Result<()> {
        let _control = self.control_lock.lock().await;
        self.registry.set_managed(device_id, true).await?;
        self.scheduler.start(device_id).await?;
        Ok(())
    }

    /// Removes a device from logging and stops its task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry,
    /// or [`Error::LogStop`] if its task did not stop cleanly.
    pub async fn remove_device(&self, device_id: &DeviceId) -> Result<()> {
        let _control = self.control_lock.lock().await;
        self.registry.set_managed(device_id, false).await?;
        self.scheduler.stop(device_id).await?;
        Ok(())
    }

    /// Adds a tag to a device. See [`DeviceRegistry::add_tag`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry.
    pub async fn add_tag(&self, device_id: &DeviceId, tag: &str) -> Result<String> {
        self.registry.add_tag(device_id, tag).await
    }

    /// Removes a tag from a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] or [`Error::TagNotFound`].
    pub async fn remove_tag(&self, device_id: &DeviceId, tag: &str) -> Result<()> {
        self.registry.remove_tag(device_id, tag).await
    }

    /// Refreshes the registry and stops logging for devices that left.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CloudUnavailable`] if the device list cannot be
    /// fetched.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let report = self.registry.refresh().await?;

        for device_id in &report.removed {
            if let Err(e) = self.scheduler.stop(device_id).await {
                tracing::warn!(%device_id, error = %e, "Failed to stop logging for removed device");
            }
        }
        Ok(report)
    }

    /// Reads every variable of a device now, outside the logging schedule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is not in the registry.
    pub async fn update_device_data(&self, device_id: &DeviceId) -> Result<DevicePoll> {
        self.registry.poll_device(device_id).await
    }

    /// Calls a function on a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] or [`Error::CloudUnavailable`].
    pub async fn call_function(&self, device_id: &DeviceId, name: &str, arg: &str) -> Result<bool> {
        self.registry.call_function(device_id, name, arg).await
    }

    /// Returns up to `limit` logged points whose tags match `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Unsupported`] without a sink, or the sink's
    /// own failure.
    pub async fn query_points(
        &self,
        filter: &Tags,
        limit: usize,
    ) -> std::result::Result<Vec<Point>, SinkError> {
        match &self.sink {
            Some(sink) => sink.query(filter, limit).await,
            None => Err(SinkError::Unsupported),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Registers a callback for every handled stream event.
    pub fn on_event<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        self.dispatcher.on_event(callback)
    }

    /// Unregisters a stream callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Subscribes to registry notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.registry.subscribe()
    }

    /// Returns the stream connection state.
    #[must_use]
    pub fn stream_state(&self) -> StreamState {
        self.dispatcher.state()
    }

    /// Returns a receiver following stream connection state changes.
    #[must_use]
    pub fn watch_stream_state(&self) -> watch::Receiver<StreamState> {
        self.dispatcher.watch_state()
    }

    /// Lists the devices. See [`DeviceRegistry::list`].
    pub async fn devices(&self) -> DeviceListing {
        self.registry.list().await
    }

    /// Returns a copy of one device.
    pub async fn device(&self, device_id: &DeviceId) -> Option<Device> {
        self.registry.get(device_id).await
    }

    /// Returns `true` if a logging task runs for the device.
    #[must_use]
    pub fn is_logging(&self, device_id: &DeviceId) -> bool {
        self.scheduler.is_running(device_id)
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry<C>> {
        &self.registry
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<StreamDispatcher<C, S>> {
        &self.dispatcher
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &LogScheduler<C, S> {
        &self.scheduler
    }
}

impl<C, S> std::fmt::Debug for Hub<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("sink_enabled", &self.sink.is_some())
            .field("stop_timeout", &self.stop_timeout)
            .field("shut_down", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Keeps one stream open at a time, reconnecting with backoff.
///
/// The attempt counter resets after a connection that delivered events, so a
/// long healthy stream that drops reconnects quickly.
async fn supervise_stream<C: CloudApi, S: LogSink, E: EventSource>(
    dispatcher: Arc<StreamDispatcher<C, S>>,
    source: E,
    policy: ReconnectionPolicy,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        match dispatcher.stream_once(&source, &cancel).await {
            Ok(report) => {
                if report.events > 0 {
                    attempt = 0;
                }
                match report.end {
                    StreamEnd::Cancelled => break,
                    StreamEnd::Closed => {}
                    StreamEnd::Failed(e) => {
                        tracing::warn!(error = %e, events = report.events, "Event stream dropped");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to open event stream"),
        }

        if cancel.is_cancelled() {
            break;
        }
        if !policy.should_retry(attempt) {
            tracing::error!(attempt, "Giving up on the event stream");
            break;
        }

        let delay = policy.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        tracing::info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting event stream"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("Stream supervisor finished");
}

