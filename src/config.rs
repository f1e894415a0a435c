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

//! Configuration surfaces for links and discovery.
//!
//! Mirrors the shape of the teacher crate's `port_settings()`: a small
//! defaults-returning struct rather than a sprawling builder, since every
//! option here has a sane, documented default and callers only ever need to
//! override the baud rate and occasionally the reconnect policy.

use std::time::Duration;

use crate::constants::{
    DEFAULT_BAUD, DEFAULT_DISCOVERY_TICK_SECS, DEFAULT_MAX_BUFFER_SIZE,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_SECS,
};

/// Per-link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial baud rate.
    pub baud: u32,
    /// Upper bound on frame length, in `[64, 255]`.
    pub max_buffer_size: usize,
    /// How many consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Read timeout used on the underlying port; bounds how long `stop`
    /// blocks before the worker notices cancellation.
    pub read_timeout: Duration,
    /// When set, per-link worker traces are tagged with the port name.
    pub debug: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            baud: DEFAULT_BAUD,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            read_timeout: Duration::from_millis(200),
            debug: false,
        }
    }
}

/// Discovery / bind orchestrator configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Configuration applied to every link the orchestrator spawns.
    pub link: LinkConfig,
    /// Interval between phase-1 probe rounds.
    pub discovery_tick: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            link: LinkConfig::default(),
            discovery_tick: Duration::from_secs(DEFAULT_DISCOVERY_TICK_SECS),
        }
    }
}
