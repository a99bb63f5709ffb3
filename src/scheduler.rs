// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic per-device logging.
//!
//! Every managed device gets one task that polls its variables, writes them
//! to the sink, then sleeps for the logging interval. Tasks are cancelled
//! cooperatively: the poll and the sleep both race the task's cancellation
//! token, so a stop request is honoured at the next await point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cloud::CloudApi;
use crate::device::DeviceId;
use crate::error::{Error, LogStartError, LogStopError};
use crate::registry::DeviceRegistry;
use crate::sink::{LogSink, write_reading};

/// Default time between two polls of a device.
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Default bounded wait for a task to exit after cancellation.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

struct LogTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of the per-device logging tasks.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use particlehub::DeviceId;
/// use particlehub::cloud::CloudConfig;
/// use particlehub::registry::DeviceRegistry;
/// use particlehub::scheduler::LogScheduler;
/// use particlehub::sink::MemorySink;
///
/// # async fn example() -> particlehub::Result<()> {
/// let cloud = Arc::new(CloudConfig::new("token").into_client()?);
/// let registry = Arc::new(DeviceRegistry::new(cloud));
/// registry.refresh().await?;
///
/// let scheduler = LogScheduler::new(registry, Some(Arc::new(MemorySink::new())));
/// scheduler.start(&DeviceId::new("abc")).await?;
/// scheduler.stop(&DeviceId::new("abc")).await?;
/// # Ok(())
/// # }
/// ```
pub struct LogScheduler<C, S> {
    registry: Arc<DeviceRegistry<C>>,
    sink: Option<Arc<S>>,
    interval: Duration,
    stop_timeout: Duration,
    cancel: CancellationToken,
    tasks: Mutex<HashMap<DeviceId, LogTask>>,
}

impl<C: CloudApi, S: LogSink> LogScheduler<C, S> {
    /// Creates a scheduler with the default interval and stop timeout.
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry<C>>, sink: Option<Arc<S>>) -> Self {
        Self {
            registry,
            sink,
            interval: DEFAULT_LOG_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the time between two polls.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the bounded wait used by [`stop`](Self::stop).
    #[must_use]
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Derives task tokens from `parent`, so cancelling it stops every task.
    #[must_use]
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Returns the polling interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts logging a managed device.
    ///
    /// Starting a device that is already being logged does nothing. A task
    /// that exited on its own is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`LogStartError::NotManaged`] if the device is absent or not
    /// managed.
    pub async fn start(&self, device_id: &DeviceId) -> Result<(), LogStartError> {
        if !self.registry.is_managed(device_id).await {
            return Err(LogStartError::NotManaged(device_id.clone()));
        }

        let mut tasks = self.tasks.lock();
        if tasks
            .get(device_id)
            .is_some_and(|task| !task.handle.is_finished())
        {
            tracing::debug!(%device_id, "Logging already running");
            return Ok(());
        }

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(log_loop(
            Arc::clone(&self.registry),
            self.sink.clone(),
            device_id.clone(),
            self.interval,
            cancel.clone(),
        ));
        tasks.insert(device_id.clone(), LogTask { cancel, handle });

        tracing::info!(%device_id, interval_secs = self.interval.as_secs(), "Logging started");
        Ok(())
    }

    /// Stops logging a device and waits for its task to exit.
    ///
    /// Stopping a device that is not being logged does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`LogStopError::Timeout`] if the task did not exit within the
    /// stop timeout (it is then aborted), or [`LogStopError::Panicked`] if it
    /// panicked.
    pub async fn stop(&self, device_id: &DeviceId) -> Result<(), LogStopError> {
        let Some(task) = self.tasks.lock().remove(device_id) else {
            return Ok(());
        };

        task.cancel.cancel();
        let result = self.join(device_id, task.handle).await;
        if result.is_ok() {
            tracing::info!(%device_id, "Logging stopped");
        }
        result
    }

    async fn join(&self, device_id: &DeviceId, mut handle: JoinHandle<()>) -> Result<(), LogStopError> {
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_panic() => {
                tracing::error!(%device_id, "Logging task panicked");
                Err(LogStopError::Panicked(device_id.clone()))
            }
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                handle.abort();
                tracing::warn!(%device_id, "Logging task did not stop in time, aborted");
                Err(LogStopError::Timeout {
                    device_id: device_id.clone(),
                    timeout_ms: u64::try_from(self.stop_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Returns `true` if a live task logs this device.
    #[must_use]
    pub fn is_running(&self, device_id: &DeviceId) -> bool {
        self.tasks
            .lock()
            .get(device_id)
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Returns the devices with a live logging task, ordered by id.
    #[must_use]
    pub fn running(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .tasks
            .lock()
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stops every task, each with its own bounded wait.
    ///
    /// Returns the failures; every task is gone either way.
    pub async fn shutdown(&self) -> Vec<LogStopError> {
        let tasks: Vec<(DeviceId, LogTask)> = self.tasks.lock().drain().collect();
        if tasks.is_empty() {
            return Vec::new();
        }

        for (_, task) in &tasks {
            task.cancel.cancel();
        }

        let mut failures = Vec::new();
        for (device_id, task) in tasks {
            if let Err(e) = self.join(&device_id, task.handle).await {
                failures.push(e);
            }
        }

        tracing::info!(failures = failures.len(), "Logging scheduler shut down");
        failures
    }
}

impl<C, S> std::fmt::Debug for LogScheduler<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogScheduler")
            .field("interval", &self.interval)
            .field("stop_timeout", &self.stop_timeout)
            .field("tasks", &self.tasks.lock().len())
            .finish_non_exhaustive()
    }
}

/// Polls and writes one device once. Returns the number of points written.
async fn log_once<C: CloudApi, S: LogSink>(
    registry: &DeviceRegistry<C>,
    sink: Option<&S>,
    device_id: &DeviceId,
) -> crate::Result<usize> {
    let poll = registry.poll_device(device_id).await?;
    Ok(match sink {
        Some(sink) => write_reading(sink, &poll.values, &poll.tags).await,
        None => 0,
    })
}

async fn log_loop<C: CloudApi, S: LogSink>(
    registry: Arc<DeviceRegistry<C>>,
    sink: Option<Arc<S>>,
    device_id: DeviceId,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        if !registry.is_managed(&device_id).await {
            tracing::info!(%device_id, "Device no longer managed, logging task exits");
            break;
        }

        let logged = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            logged = log_once(&registry, sink.as_deref(), &device_id) => logged,
        };

        match logged {
            Ok(written) => tracing::debug!(%device_id, written, "Device logged"),
            Err(Error::DeviceNotFound(_)) => {
                tracing::info!(%device_id, "Device left the registry, logging task exits");
                break;
            }
            Err(e) => tracing::warn!(%device_id, error = %e, "Device logging failed"),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(%device_id, "Logging task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::fake::FakeCloud;
    use crate::device::DeviceSummary;
    use crate::sink::MemorySink;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s)
    }

    async fn setup() -> (
        Arc<FakeCloud>,
        Arc<DeviceRegistry<FakeCloud>>,
        MemorySink,
        LogScheduler<FakeCloud, MemorySink>,
    ) {
        let cloud = Arc::new(FakeCloud::with_devices(vec![
            DeviceSummary::new("a").with_variable("temp", "double"),
            DeviceSummary::new("b"),
        ]));
        cloud.set_variable("a", "temp", 21.5);

        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&cloud)));
        registry.refresh().await.unwrap();
        registry.set_managed(&id("a"), true).await.unwrap();

        let sink = MemorySink::new();
        let scheduler = LogScheduler::new(Arc::clone(&registry), Some(Arc::new(sink.clone())))
            .with_interval(Duration::from_secs(10));

        (cloud, registry, sink, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn start_polls_periodically() {
        let (_, _, sink, scheduler) = setup().await;

        scheduler.start(&id("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(sink.len(), 3);
        assert!(sink.points().iter().all(|p| p.measurement == "temp"));

        scheduler.stop(&id("a")).await.unwrap();
        assert!(!scheduler.is_running(&id("a")));
    }

    #[tokio::test]
    async fn start_requires_managed_device() {
        let (_, _, _, scheduler) = setup().await;

        assert_eq!(
            scheduler.start(&id("b")).await,
            Err(LogStartError::NotManaged(id("b")))
        );
        assert_eq!(
            scheduler.start(&id("missing")).await,
            Err(LogStartError::NotManaged(id("missing")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let (cloud, _, _, scheduler) = setup().await;

        scheduler.start(&id("a")).await.unwrap();
        scheduler.start(&id("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(scheduler.running(), vec![id("a")]);
        // one task, one poll
        assert_eq!(cloud.variable_reads(), 1);

        scheduler.stop(&id("a")).await.unwrap();
        scheduler.stop(&id("a")).await.unwrap();
        assert!(scheduler.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn task_exits_when_device_unmanaged() {
        let (_, registry, _, scheduler) = setup().await;

        scheduler.start(&id("a")).await.unwrap();
        registry.set_managed(&id("a"), false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert!(!scheduler.is_running(&id("a")));

        // a finished task is replaced on the next start
        registry.set_managed(&id("a"), true).await.unwrap();
        scheduler.start(&id("a")).await.unwrap();
        assert!(scheduler.is_running(&id("a")));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_times_out_on_stuck_task() {
        let (_, _, _, scheduler) = setup().await;
        let scheduler = scheduler.with_stop_timeout(Duration::from_millis(500));

        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        scheduler.tasks.lock().insert(
            id("a"),
            LogTask {
                cancel: CancellationToken::new(),
                handle: stuck,
            },
        );

        assert_eq!(
            scheduler.stop(&id("a")).await,
            Err(LogStopError::Timeout {
                device_id: id("a"),
                timeout_ms: 500
            })
        );
        assert!(!scheduler.is_running(&id("a")));
    }

    #[tokio::test]
    async fn stop_reports_panicked_task() {
        let (_, _, _, scheduler) = setup().await;

        let handle = tokio::spawn(async { panic!("boom") });
        scheduler.tasks.lock().insert(
            id("a"),
            LogTask {
                cancel: CancellationToken::new(),
                handle,
            },
        );

        assert_eq!(
            scheduler.stop(&id("a")).await,
            Err(LogStopError::Panicked(id("a")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_task() {
        let (_, registry, _, scheduler) = setup().await;
        registry.set_managed(&id("b"), true).await.unwrap();

        scheduler.start(&id("a")).await.unwrap();
        scheduler.start(&id("b")).await.unwrap();

        assert!(scheduler.shutdown().await.is_empty());
        assert!(scheduler.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_token_cancels_tasks() {
        let (_, _, _, scheduler) = setup().await;
        let parent = CancellationToken::new();
        let scheduler = scheduler.with_parent_token(&parent);

        scheduler.start(&id("a")).await.unwrap();
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!scheduler.is_running(&id("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn logs_without_sink() {
        let (cloud, registry, _, _) = setup().await;
        let scheduler: LogScheduler<FakeCloud, MemorySink> = LogScheduler::new(registry, None);

        scheduler.start(&id("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(cloud.variable_reads(), 1);
        scheduler.shutdown().await;
    }
}
