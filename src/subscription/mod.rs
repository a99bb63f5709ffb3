// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback subscriptions to the raw event stream.
//!
//! - [`SubscriptionId`] - A unique identifier for a registration, used to unsubscribe
//! - [`ObserverRegistry`] - Stores callbacks and dispatches events to them
//!
//! Observers see every event the dispatcher handled, after the sink write,
//! in the raw form it arrived on the stream:
//!
//! ```
//! use particlehub::subscription::ObserverRegistry;
//! use particlehub::stream::RawEvent;
//!
//! let observers = ObserverRegistry::new();
//! let id = observers.subscribe(|event| println!("{}: {}", event.event, event.data));
//!
//! observers.dispatch(&RawEvent::new("LOG", "{}"));
//! observers.unsubscribe(id);
//! ```

mod callback;

pub use callback::{ObserverRegistry, SubscriptionId};
