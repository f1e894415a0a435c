// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The device registry (C3): a fixed-key table of logical devices, the one
//! piece of state shared across the orchestrator thread and every link
//! worker thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::link::Link;

/// Binding state of a logical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    NotConnected,
    InProgress,
    Connected,
}

struct DeviceEntry {
    expected_id: u8,
    status: DeviceStatus,
    bound_port: Option<String>,
    bound_link: Option<Arc<Link>>,
}

/// A read-only snapshot of a device's state, safe to hold outside the
/// registry lock.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub name: String,
    pub expected_id: u8,
    pub status: DeviceStatus,
    pub bound_port: Option<String>,
}

struct Inner {
    devices: HashMap<String, DeviceEntry>,
}

/// The device registry (C3). All mutations to a device's `status`,
/// `bound_port`, and `bound_link` go through the single mutex guarding the
/// whole table, per the spec's "registry-wide mutex" requirement.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Registry {
            inner: Mutex::new(Inner {
                devices: HashMap::new(),
            }),
        }
    }

    /// Register a logical device. Rejects a repeated name or an `expected_id`
    /// already used by another entry: both are precondition violations this
    /// crate catches at setup rather than leaving undefined at runtime.
    pub fn register(&self, name: &str, expected_id: u8) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.devices.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        if inner.devices.values().any(|d| d.expected_id == expected_id) {
            return Err(Error::AlreadyRegistered(format!(
                "device id {:#X} is already in use",
                expected_id
            )));
        }

        inner.devices.insert(
            name.to_string(),
            DeviceEntry {
                expected_id,
                status: DeviceStatus::NotConnected,
                bound_port: None,
                bound_link: None,
            },
        );
        log::debug!("registered device `{}` with id {:#X}", name, expected_id);
        Ok(())
    }

    /// Snapshot a single device's current state.
    pub fn get(&self, name: &str) -> Option<DeviceSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.devices.get(name).map(|d| DeviceSnapshot {
            name: name.to_string(),
            expected_id: d.expected_id,
            status: d.status,
            bound_port: d.bound_port.clone(),
        })
    }

    /// Snapshot every currently `CONNECTED` device.
    pub fn connected(&self) -> Vec<DeviceSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .devices
            .iter()
            .filter(|(_, d)| d.status == DeviceStatus::Connected)
            .map(|(name, d)| DeviceSnapshot {
                name: name.clone(),
                expected_id: d.expected_id,
                status: d.status,
                bound_port: d.bound_port.clone(),
            })
            .collect()
    }

    /// Whether every registered device is currently `CONNECTED`.
    pub fn all_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.devices.is_empty()
            && inner
                .devices
                .values()
                .all(|d| d.status == DeviceStatus::Connected)
    }

    /// All registered names, with no ordering guarantee.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.devices.keys().cloned().collect()
    }

    /// Reset a device to `NOT_CONNECTED` and clear its binding.
    pub fn reset(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .devices
            .get_mut(name)
            .ok_or_else(|| Error::UnknownDevice(name.to_string()))?;
        entry.status = DeviceStatus::NotConnected;
        entry.bound_port = None;
        entry.bound_link = None;
        Ok(())
    }

    /// Reset every registered device. Used at the start of discovery.
    pub fn reset_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for entry in inner.devices.values_mut() {
            entry.status = DeviceStatus::NotConnected;
            entry.bound_port = None;
            entry.bound_link = None;
        }
    }

    /// Phase 2 of the handshake: if `expected_id` matches a device currently
    /// `NOT_CONNECTED`, bind it to `port_name`/`link` and advance it to
    /// `IN_PROGRESS`, returning its name. Devices already `IN_PROGRESS` or
    /// `CONNECTED` are left untouched — the first link to reach phase 2
    /// wins.
    pub fn try_bind(
        &self,
        expected_id: u8,
        port_name: &str,
        link: Arc<Link>,
    ) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let (name, entry) = inner
            .devices
            .iter_mut()
            .find(|(_, d)| d.expected_id == expected_id)?;
        if entry.status != DeviceStatus::NotConnected {
            return None;
        }
        entry.status = DeviceStatus::InProgress;
        entry.bound_port = Some(port_name.to_string());
        entry.bound_link = Some(link);
        Some(name.clone())
    }

    /// Phase 4 success: advance `name` from `IN_PROGRESS` to `CONNECTED`.
    /// No-op if the device isn't currently `IN_PROGRESS`.
    pub fn confirm(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.devices.get_mut(name) {
            if entry.status == DeviceStatus::InProgress {
                entry.status = DeviceStatus::Connected;
            }
        }
    }

    /// Phase 4 failure, or any link error on a bound device: return `name`
    /// to `NOT_CONNECTED` and clear its binding.
    pub fn release(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.devices.get_mut(name) {
            entry.status = DeviceStatus::NotConnected;
            entry.bound_port = None;
            entry.bound_link = None;
        }
    }

    /// Release a device only if it is currently in `IN_PROGRESS`. Used by the
    /// handshake controller, which must not clobber an already-`CONNECTED`
    /// device on a stray phase-4 failure from a different link.
    pub fn release_if_in_progress(&self, name: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.devices.get_mut(name) {
            if entry.status == DeviceStatus::InProgress {
                entry.status = DeviceStatus::NotConnected;
                entry.bound_port = None;
                entry.bound_link = None;
                return true;
            }
        }
        false
    }

    /// The bound link for `name`, if any.
    pub fn bound_link(&self, name: &str) -> Option<Arc<Link>> {
        let inner = self.inner.lock().unwrap();
        inner.devices.get(name)?.bound_link.clone()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_rejects_duplicate_name() {
        let registry = Registry::new();
        registry.register("led", 0x03).unwrap();
        let err = registry.register("led", 0x04).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(_)));
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let registry = Registry::new();
        registry.register("led", 0x03).unwrap();
        let err = registry.register("gpio", 0x03).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(_)));
    }

    #[test]
    fn try_bind_ignores_second_match_once_in_progress() {
        let registry = Registry::new();
        registry.register("led", 0x03).unwrap();

        let link = Arc::new(Link::for_test());
        let first = registry.try_bind(0x03, "/dev/ttyUSB0", link.clone());
        assert_eq!(first, Some("led".to_string()));

        let second = registry.try_bind(0x03, "/dev/ttyUSB1", link);
        assert_eq!(second, None);
        assert_eq!(
            registry.get("led").unwrap().bound_port,
            Some("/dev/ttyUSB0".to_string())
        );
    }

    #[test]
    fn confirm_then_release_cycle() {
        let registry = Registry::new();
        registry.register("led", 0x03).unwrap();
        let link = Arc::new(Link::for_test());

        registry.try_bind(0x03, "/dev/ttyUSB0", link);
        assert_eq!(registry.get("led").unwrap().status, DeviceStatus::InProgress);

        registry.confirm("led");
        assert_eq!(registry.get("led").unwrap().status, DeviceStatus::Connected);

        registry.release("led");
        let snap = registry.get("led").unwrap();
        assert_eq!(snap.status, DeviceStatus::NotConnected);
        assert!(snap.bound_port.is_none());
    }
}
