// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry notifications.
//!
//! The registry publishes a [`HubEvent`] whenever the device set or locally
//! owned device data changes. The [`EventBus`] uses tokio's broadcast channel
//! so any number of subscribers (a UI, a metrics exporter) can follow along.
//!
//! # Examples
//!
//! ```
//! use particlehub::DeviceId;
//! use particlehub::event::{EventBus, HubEvent};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(HubEvent::ManagedChanged {
//!     device_id: DeviceId::new("abc"),
//!     managed: true,
//! });
//! ```

mod event_bus;
mod hub_event;

pub use event_bus::EventBus;
pub use hub_event::HubEvent;
