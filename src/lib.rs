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

//! # linkbind
//!
//! A host-side driver for discovering, identifying, and binding
//! microcontroller peripherals attached over serial ports.
//!
//! Peripherals speak a small framed binary protocol ([`frame`]) over each
//! serial link ([`link`]). A four-phase handshake ([`handshake`]) binds a
//! logical device name — `"gpio"`, `"led"`, `"turret"`, or whatever a caller
//! registers — to whichever physical port the device actually answers on.
//! The [`discovery`] orchestrator drives that handshake across every
//! enumerated port until every registered device ([`registry`]) is bound or
//! a timeout elapses.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use linkbind::config::DiscoveryConfig;
//! use linkbind::discovery::{Orchestrator, SystemPortEnumerator};
//! use linkbind::registry::Registry;
//!
//! let registry = Arc::new(Registry::new());
//! registry.register("led", 0x03).unwrap();
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::clone(&registry),
//!     Arc::new(SystemPortEnumerator),
//!     DiscoveryConfig::default(),
//! );
//! let connected = orchestrator.discover_all(Duration::from_secs(15));
//! for device in connected {
//!     println!("{} bound on {:?}", device.name, device.bound_port);
//! }
//! ```

#[rustfmt::skip]
pub mod constants;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod link;
pub mod port;
pub mod registry;

pub use error::{Error, Result};
