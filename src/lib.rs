// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `ParticleHub` - a device registry and telemetry logger for Particle
//! cloud devices.
//!
//! The hub keeps a registry of the devices on a Particle account, follows the
//! account's server-sent event stream, and periodically polls the variables
//! of the devices it manages. Readings from both paths are written to a
//! time-series sink such as `InfluxDB`, tagged with per-device tags.
//!
//! # Components
//!
//! - **Registry** ([`registry`]): device records, the managed flag, tags and
//!   their persistence across restarts
//! - **Stream dispatcher** ([`stream`]): decodes stream events, filters them
//!   by kind and managed device, writes them to the sink and notifies
//!   observers
//! - **Log scheduler** ([`scheduler`]): one periodic polling task per
//!   managed device
//! - **Sinks** ([`sink`]): `InfluxDB` line protocol and an in-memory sink
//!
//! # Quick Start
//!
//! ## Running a hub
//!
//! ```no_run
//! use particlehub::{DeviceId, Hub, HubConfig};
//!
//! #[tokio::main]
//! async fn main() -> particlehub::Result<()> {
//!     let config = HubConfig::from_env()?;
//!     let hub = Hub::from_config(&config)?;
//!     hub.start(Hub::stream_source(&config)?).await?;
//!
//!     let device = DeviceId::new("0123456789abcdef01234567");
//!     hub.add_device(&device).await?;
//!     hub.add_tag(&device, "location").await?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     hub.shutdown().await
//! }
//! ```
//!
//! ## Observing stream events
//!
//! ```no_run
//! use particlehub::Hub;
//! use particlehub::cloud::CloudClient;
//! use particlehub::sink::AnySink;
//!
//! # fn example(hub: &Hub<CloudClient, AnySink>) {
//! let id = hub.on_event(|event| {
//!     println!("{}: {}", event.event, event.data);
//! });
//!
//! hub.unsubscribe(id);
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```
//! use std::time::Duration;
//! use particlehub::{HubConfig, ReconnectionPolicy};
//! use particlehub::sink::SinkConfig;
//!
//! let config = HubConfig::new("token")
//!     .with_log_interval(Duration::from_secs(30))
//!     .with_sink("influx", SinkConfig::influx("localhost", "particle"))
//!     .with_reconnection(ReconnectionPolicy::new().with_max_retries(5));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.default_sink(), Some("influx"));
//! ```

pub mod cloud;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
mod hub;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod stream;
pub mod subscription;

pub use cloud::{CloudApi, CloudClient, CloudConfig};
pub use config::{HubConfig, ReconnectionPolicy};
pub use device::{Device, DeviceId, DeviceSummary, Tags};
pub use error::{
    CloudError, ConfigError, Error, LogStartError, LogStopError, PersistenceError, Result,
    SinkError, StreamError,
};
pub use event::{EventBus, HubEvent};
pub use hub::Hub;
pub use registry::{DeviceListing, DeviceRegistry, RefreshReport, SyncState};
pub use scheduler::LogScheduler;
pub use sink::{LogSink, Point, Reading};
pub use stream::{EventKind, RawEvent, StreamDispatcher, StreamState};
pub use subscription::{ObserverRegistry, SubscriptionId};
