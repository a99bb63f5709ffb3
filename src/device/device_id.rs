// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identifier type.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a cloud device.
///
/// The cloud assigns the identifier (the `id` of a device record and the
/// `coreid` of a stream event); it never changes for the lifetime of a
/// device. This wrapper keeps identifiers from being confused with device
/// names, variable names or tag keys.
///
/// # Examples
///
/// ```
/// use particlehub::DeviceId;
///
/// let id = DeviceId::new("0123456789abcdef");
/// assert_eq!(id.as_str(), "0123456789abcdef");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier from its cloud representation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality() {
        assert_eq!(DeviceId::new("abc"), DeviceId::from("abc"));
        assert_ne!(DeviceId::new("abc"), DeviceId::new("abd"));
    }

    #[test]
    fn debug_format() {
        let id = DeviceId::new("abc123");
        assert_eq!(format!("{id:?}"), "DeviceId(abc123)");
    }

    #[test]
    fn display_format() {
        let id = DeviceId::new("abc123");
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn hash_lookup_by_str() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(DeviceId::new("abc"), 1);
        assert_eq!(map.get("abc"), Some(&1));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = DeviceId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: DeviceId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}
