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

//! The handshake controller (C4): the handler registered for `0xFF` on every
//! link, reacting to phases 2 and 4 of the binding protocol. Phase 1 (the
//! probe) is emitted by the discovery orchestrator (C5), not from here.

use std::sync::Arc;

use crate::constants::{CMD_HANDSHAKE, HANDSHAKE_FAILURE, HANDSHAKE_SUCCESS};
use crate::link::Link;
use crate::registry::{DeviceStatus, Registry};

/// Build the handshake handler for a link, closing over `registry`.
///
/// Install with `link.register_command(CMD_HANDSHAKE, make_handler(registry))`
/// before the link's worker sees any traffic.
pub fn make_handler(registry: Arc<Registry>) -> crate::link::Handler {
    Arc::new(move |link: &Arc<Link>, payload: &[u8]| {
        handle(&registry, link, payload);
    })
}

fn handle(registry: &Arc<Registry>, link: &Arc<Link>, payload: &[u8]) {
    let v = match payload.first() {
        Some(v) => *v,
        None => {
            log::warn!("handshake frame on `{}` carried no payload", link.port_name());
            return;
        }
    };

    if let Some(name) = registry.names().into_iter().find(|n| {
        registry
            .get(n)
            .map(|d| d.expected_id == v)
            .unwrap_or(false)
    }) {
        // Phase 2: a device declares its id. `try_bind` re-checks the
        // NOT_CONNECTED precondition under the registry mutex, so a stray
        // duplicate from a second port is silently ignored.
        if let Some(bound_name) = registry.try_bind(v, link.port_name(), Arc::clone(link)) {
            debug_assert_eq!(bound_name, name);
            link.set_device(bound_name.clone());
            log::info!(
                "`{}` declared id {:#X}, binding to `{}`",
                link.port_name(),
                v,
                bound_name
            );
            if let Err(e) = link.send(CMD_HANDSHAKE, &[v]) {
                log::warn!("failed to echo phase-3 to `{}`: {}", link.port_name(), e);
            }
        } else {
            log::debug!(
                "`{}` declared id {:#X} but a device with that id is already bound",
                link.port_name(),
                v
            );
        }
        return;
    }

    match v {
        HANDSHAKE_SUCCESS => {
            if let Some(name) = bound_device_name(registry, link) {
                if registry.get(&name).map(|d| d.status) == Some(DeviceStatus::InProgress) {
                    registry.confirm(&name);
                    log::info!("`{}` confirmed as `{}`", link.port_name(), name);
                }
            }
        }
        HANDSHAKE_FAILURE => {
            if let Some(name) = bound_device_name(registry, link) {
                if registry.release_if_in_progress(&name) {
                    log::warn!(
                        "`{}` rejected binding as `{}`, releasing",
                        link.port_name(),
                        name
                    );
                }
            }
        }
        other => {
            log::debug!(
                "`{}` sent unrecognized handshake payload {:#X}",
                link.port_name(),
                other
            );
        }
    }
}

/// The device name this link is currently bound to, if any, by scanning the
/// registry rather than trusting a cyclic back-reference on the link.
fn bound_device_name(registry: &Arc<Registry>, link: &Arc<Link>) -> Option<String> {
    registry
        .names()
        .into_iter()
        .find(|n| registry.bound_link(n).map(|l| Arc::ptr_eq(&l, link)) == Some(true))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::HANDSHAKE_PROBE;
    use crate::port::test_support::MockPort;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn spawn_scripted(inbound: &[u8], registry: &Arc<Registry>) -> Arc<Link> {
        let port = Arc::new(Mutex::new(Some(MockPort::with_inbound(inbound))));
        let opener = {
            let port = Arc::clone(&port);
            Box::new(move || {
                port.lock()
                    .unwrap()
                    .take()
                    .map(|p| Box::new(p) as Box<dyn crate::port::LinkPort>)
                    .ok_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::Other, "already taken")
                    })
            })
        };
        let mut dispatch = std::collections::HashMap::new();
        dispatch.insert(CMD_HANDSHAKE, make_handler(Arc::clone(registry)));
        crate::link::Link::spawn_for_test_with_handlers("scripted".to_string(), opener, dispatch)
    }

    fn wait_until(mut pred: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !pred() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn full_handshake_binds_device() {
        let registry = Arc::new(Registry::new());
        registry.register("led", 0x03).unwrap();

        let phase2 = crate::frame::encode(CMD_HANDSHAKE, &[0x03], 64).unwrap();
        let phase4 = crate::frame::encode(CMD_HANDSHAKE, &[HANDSHAKE_SUCCESS], 64).unwrap();
        let mut inbound = phase2;
        inbound.extend_from_slice(&phase4);

        let link = spawn_scripted(&inbound, &registry);

        wait_until(|| registry.get("led").unwrap().status == DeviceStatus::Connected);
        let snap = registry.get("led").unwrap();
        assert_eq!(snap.status, DeviceStatus::Connected);
        assert_eq!(snap.bound_port, Some("scripted".to_string()));

        link.stop(Duration::from_secs(2));
    }

    #[test]
    fn phase4_failure_releases_device() {
        let registry = Arc::new(Registry::new());
        registry.register("led", 0x03).unwrap();

        let phase2 = crate::frame::encode(CMD_HANDSHAKE, &[0x03], 64).unwrap();
        let phase4 = crate::frame::encode(CMD_HANDSHAKE, &[HANDSHAKE_FAILURE], 64).unwrap();
        let mut inbound = phase2;
        inbound.extend_from_slice(&phase4);

        let link = spawn_scripted(&inbound, &registry);

        wait_until(|| registry.get("led").unwrap().status == DeviceStatus::NotConnected && registry.get("led").unwrap().bound_port.is_none());
        let snap = registry.get("led").unwrap();
        assert_eq!(snap.status, DeviceStatus::NotConnected);
        assert!(snap.bound_port.is_none());

        link.stop(Duration::from_secs(2));
    }

    #[test]
    fn unrelated_probe_payload_is_ignored() {
        let registry = Arc::new(Registry::new());
        registry.register("led", 0x03).unwrap();
        let probe = crate::frame::encode(CMD_HANDSHAKE, &[HANDSHAKE_PROBE], 64).unwrap();

        let link = spawn_scripted(&probe, &registry);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(registry.get("led").unwrap().status, DeviceStatus::NotConnected);
        link.stop(Duration::from_secs(2));
    }
}
