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

//! The discovery / bind orchestrator (C5): enumerates ports, spins up a
//! link per port, reprobes until every device binds or a timeout elapses,
//! then tears down whatever never bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DiscoveryConfig;
use crate::constants::{CMD_HANDSHAKE, HANDSHAKE_PROBE};
use crate::handshake;
use crate::link::Link;
use crate::registry::{DeviceSnapshot, Registry};

/// Capability that lists currently available serial port names. Real
/// enumeration (`serialport::available_ports`) lives in
/// [`SystemPortEnumerator`]; tests inject a fixed list instead.
pub trait PortEnumerator: Send + Sync {
    fn available_ports(&self) -> Vec<String>;
}

/// The production [`PortEnumerator`], backed by `serialport::available_ports`.
pub struct SystemPortEnumerator;

impl PortEnumerator for SystemPortEnumerator {
    fn available_ports(&self) -> Vec<String> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                log::warn!("port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Drives discovery and binding over a fixed [`Registry`] and
/// [`PortEnumerator`].
pub struct Orchestrator {
    registry: Arc<Registry>,
    enumerator: Arc<dyn PortEnumerator>,
    config: DiscoveryConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, enumerator: Arc<dyn PortEnumerator>, config: DiscoveryConfig) -> Self {
        Orchestrator {
            registry,
            enumerator,
            config,
        }
    }

    fn spawn_links(&self) -> Vec<Arc<Link>> {
        let ports = self.enumerator.available_ports();
        log::info!("discovery found {} candidate port(s)", ports.len());
        ports
            .into_iter()
            .map(|port_name| {
                let mut dispatch = std::collections::HashMap::new();
                dispatch.insert(CMD_HANDSHAKE, handshake::make_handler(Arc::clone(&self.registry)));
                Link::open_with_handlers(&port_name, self.config.link.clone(), Some(Arc::clone(&self.registry)), dispatch)
            })
            .collect()
    }

    fn probe_all(&self, links: &[Arc<Link>]) {
        let probe = [HANDSHAKE_PROBE];
        for link in links {
            if !self.already_connected_on(link) {
                if let Err(e) = link.send(CMD_HANDSHAKE, &probe) {
                    log::debug!("probe on `{}` failed: {}", link.port_name(), e);
                }
            }
        }
    }

    fn already_connected_on(&self, link: &Arc<Link>) -> bool {
        self.registry
            .connected()
            .iter()
            .any(|d| d.bound_port.as_deref() == Some(link.port_name()))
    }

    /// Tear down every link that isn't the bound link of a connected device.
    /// Done only after the probe loop exits, never mid-iteration, to avoid
    /// mutating the link set while still walking it.
    fn teardown_unbound(&self, links: Vec<Arc<Link>>, keep: impl Fn(&Arc<Link>) -> bool) {
        for link in links {
            if !keep(&link) {
                link.stop(Duration::from_secs(5));
            }
        }
    }

    /// Reset every device, discover all available ports, and probe until
    /// every registered device is `CONNECTED` or `timeout` elapses.
    pub fn discover_all(&self, timeout: Duration) -> Vec<DeviceSnapshot> {
        self.registry.reset_all();
        let links = self.spawn_links();

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline && !self.registry.all_connected() {
            self.probe_all(&links);
            std::thread::sleep(self.config.discovery_tick);
        }

        let connected = self.registry.connected();
        self.teardown_unbound(links, |link| {
            connected
                .iter()
                .any(|d| d.bound_port.as_deref() == Some(link.port_name()))
        });

        if connected.len() < self.registry.names().len() {
            log::warn!(
                "discover_all timed out after {:?} with {}/{} devices bound",
                timeout,
                connected.len(),
                self.registry.names().len()
            );
        }
        connected
    }

    /// Like [`Orchestrator::discover_all`], but exits as soon as `name`
    /// binds, and tears down every other link regardless of its state.
    pub fn connect_one(&self, name: &str, timeout: Duration) -> Option<DeviceSnapshot> {
        self.registry.reset(name).ok();
        let links = self.spawn_links();

        let deadline = Instant::now() + timeout;
        let is_bound = || {
            self.registry
                .get(name)
                .map(|d| d.status == crate::registry::DeviceStatus::Connected)
                .unwrap_or(false)
        };
        while Instant::now() < deadline && !is_bound() {
            self.probe_all(&links);
            std::thread::sleep(self.config.discovery_tick);
        }

        let snapshot = self.registry.get(name).filter(|d| d.status == crate::registry::DeviceStatus::Connected);
        self.teardown_unbound(links, |link| {
            snapshot
                .as_ref()
                .map(|d| d.bound_port.as_deref() == Some(link.port_name()))
                .unwrap_or(false)
        });

        if snapshot.is_none() {
            log::warn!("connect_one(\"{}\") timed out after {:?}", name, timeout);
        }
        snapshot
    }

    /// Stop `name`'s bound link (if connected) and return it to
    /// `NOT_CONNECTED`.
    pub fn disconnect(&self, name: &str) -> bool {
        let snapshot = match self.registry.get(name) {
            Some(s) => s,
            None => return false,
        };
        if snapshot.status != crate::registry::DeviceStatus::Connected {
            return false;
        }
        if let Some(link) = self.registry.bound_link(name) {
            link.stop(Duration::from_secs(5));
        }
        self.registry.release(name);
        true
    }

    /// Disconnect every registered device. Returns whether all of them
    /// succeeded.
    pub fn disconnect_all(&self) -> bool {
        self.registry
            .names()
            .iter()
            .map(|name| self.disconnect(name))
            .fold(true, |acc, ok| acc && ok)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::LinkConfig;

    struct FixedEnumerator(Vec<String>);

    impl PortEnumerator for FixedEnumerator {
        fn available_ports(&self) -> Vec<String> {
            self.0.clone()
        }
    }

    #[test]
    fn discover_all_times_out_with_no_replies() {
        let registry = Arc::new(Registry::new());
        registry.register("led", 0x03).unwrap();

        let mut config = DiscoveryConfig::default();
        config.discovery_tick = Duration::from_millis(50);
        config.link = LinkConfig {
            read_timeout: Duration::from_millis(20),
            ..LinkConfig::default()
        };

        let enumerator = Arc::new(FixedEnumerator(vec![]));
        let orchestrator = Orchestrator::new(Arc::clone(&registry), enumerator, config);

        let connected = orchestrator.discover_all(Duration::from_millis(150));
        assert!(connected.is_empty());
        assert_eq!(
            registry.get("led").unwrap().status,
            crate::registry::DeviceStatus::NotConnected
        );
    }
}
