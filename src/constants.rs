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

/// Byte that opens every frame on the wire.
pub const START_BYTE: u8                      = 0xAA;

/// Minimum legal value of the `length` field: start + length + command + checksum.
pub const MIN_FRAME_LEN: u8                   = 4;

/// Default bound on frame length. An implementer may choose any value in
/// `[64, 255]`; this is the protocol's recommended default.
pub const DEFAULT_MAX_BUFFER_SIZE: usize      = 64;

/// Command id used for the four-phase device-binding handshake.
pub const CMD_HANDSHAKE: u8                   = 0xFF;
/// GPIO command: payload `[pin, state]`.
pub const CMD_GPIO: u8                        = 0x01;
/// LED command: payload `[brightness]`.
pub const CMD_LED: u8                         = 0x02;
/// Turret command: payload `[angle, power]`.
pub const CMD_TURRET: u8                      = 0x03;

/// Phase 1 payload: the host's initial probe.
pub const HANDSHAKE_PROBE: u8                 = 0x00;
/// Phase 4 payload meaning the device accepted the binding.
pub const HANDSHAKE_SUCCESS: u8               = 0xAA;
/// Phase 4 payload meaning the device rejected the binding.
pub const HANDSHAKE_FAILURE: u8               = 0xFF;

/// Default serial baud rate.
pub const DEFAULT_BAUD: u32                   = 115200;
/// Default reconnect attempt cap.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default delay between reconnect attempts, in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64   = 2;
/// Default interval between phase-1 probes during discovery, in seconds.
pub const DEFAULT_DISCOVERY_TICK_SECS: u64    = 1;
