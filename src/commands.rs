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

//! Thin typed wrappers over the frame encoder for the well-known command
//! catalog (§6). Only the shape is specified; application-level range
//! validation is the caller's responsibility, not the core's.

use crate::constants::{CMD_GPIO, CMD_LED, CMD_TURRET};
use crate::error::Result;
use crate::link::Link;

/// Logical pin state for [`gpio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Low,
    High,
}

impl From<PinState> for u8 {
    fn from(s: PinState) -> u8 {
        match s {
            PinState::Low => 0,
            PinState::High => 1,
        }
    }
}

/// Set `pin` to `state` on the device bound to `link`.
pub fn gpio(link: &Link, pin: u8, state: PinState) -> Result<()> {
    link.send(CMD_GPIO, &[pin, state.into()])
}

/// Set LED brightness (0..255) on the device bound to `link`.
pub fn led(link: &Link, brightness: u8) -> Result<()> {
    link.send(CMD_LED, &[brightness])
}

/// Drive the turret to `angle` (0..180) at `power` (0..100) on the device
/// bound to `link`.
pub fn turret(link: &Link, angle: u8, power: u8) -> Result<()> {
    link.send(CMD_TURRET, &[angle, power])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::port::test_support::{MockPort, SharedMockPort};

    fn make_link() -> (std::sync::Arc<Link>, SharedMockPort) {
        let shared = SharedMockPort::new(MockPort::default());
        let opener_port = shared.clone();
        let link = crate::link::Link::spawn_for_test(
            "mock".to_string(),
            Box::new(move || -> std::io::Result<Box<dyn crate::port::LinkPort>> {
                Ok(Box::new(opener_port.clone()))
            }),
        );
        (link, shared)
    }

    #[test]
    fn led_encodes_single_byte_payload() {
        let (link, shared) = make_link();
        std::thread::sleep(std::time::Duration::from_millis(50));
        led(&link, 200).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(shared.outbound(), crate::frame::encode(CMD_LED, &[200], 64).unwrap());
        link.stop(std::time::Duration::from_secs(2));
    }

    #[test]
    fn gpio_encodes_pin_and_state() {
        let (link, shared) = make_link();
        std::thread::sleep(std::time::Duration::from_millis(50));
        gpio(&link, 7, PinState::High).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(shared.outbound(), crate::frame::encode(CMD_GPIO, &[7, 1], 64).unwrap());
        link.stop(std::time::Duration::from_secs(2));
    }

    #[test]
    fn turret_encodes_angle_and_power() {
        let (link, shared) = make_link();
        std::thread::sleep(std::time::Duration::from_millis(50));
        turret(&link, 90, 50).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(shared.outbound(), crate::frame::encode(CMD_TURRET, &[90, 50], 64).unwrap());
        link.stop(std::time::Duration::from_secs(2));
    }
}
