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

//! The framed-protocol codec.
//!
//! A frame on the wire is `START | length | command_id | payload | checksum`,
//! where `length` counts every field including itself, and `checksum` is the
//! XOR of every preceding byte (including `START`). [`encode`] builds one;
//! [`Decoder`] consumes an arbitrary byte stream and emits them back out.

use crate::constants::{MIN_FRAME_LEN, START_BYTE};
use crate::error::{Error, Result};

/// A fully decoded frame: a command id and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// The command id carried by the frame.
    pub command_id: u8,
    /// The frame's payload, `length - 4` bytes.
    pub payload: Vec<u8>,
}

fn xor_checksum<'a, I: IntoIterator<Item = &'a u8>>(bytes: I) -> u8 {
    bytes.into_iter().fold(0u8, |acc, b| acc ^ b)
}

/// Encode `command_id` and `payload` into a complete frame.
///
/// Fails with [`Error::PayloadTooLarge`] if `payload.len() + 4` would exceed
/// `max_buffer_size`.
pub fn encode(command_id: u8, payload: &[u8], max_buffer_size: usize) -> Result<Vec<u8>> {
    let len = MIN_FRAME_LEN as usize + payload.len();
    if len > max_buffer_size {
        return Err(Error::PayloadTooLarge {
            len: payload.len(),
            max: max_buffer_size - MIN_FRAME_LEN as usize,
        });
    }

    let mut frame = Vec::with_capacity(len);
    frame.push(START_BYTE);
    frame.push(len as u8);
    frame.push(command_id);
    frame.extend_from_slice(payload);

    let checksum = xor_checksum(frame.iter());
    frame.push(checksum);

    log::trace!(
        "encoded cmd {:#X}, {} byte payload -> {:?}",
        command_id,
        payload.len(),
        frame
    );

    Ok(frame)
}

/// Internal decoder state. See [`Decoder`] for the driving automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingForStart,
    WaitingForLength,
    CollectingData,
}

/// A stateful frame decoder.
///
/// Feed it arbitrary byte slices with [`Decoder::feed`]; it emits zero or
/// more [`DecodedFrame`]s (or decode errors for malformed-but-checksummed
/// frames) per call, and always leaves itself ready for the next byte.
pub struct Decoder {
    max_buffer_size: usize,
    state: State,
    buffer: Vec<u8>,
    expected_length: usize,
}

/// One outcome of feeding bytes into a [`Decoder`]: either a frame was
/// decoded, or a framing/checksum error was observed and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete, checksum-valid frame.
    Frame(DecodedFrame),
    /// A complete frame whose checksum didn't match.
    ChecksumMismatch { received: u8, calculated: u8 },
}

impl Decoder {
    /// Create a decoder bounded by `max_buffer_size` (must be in `[4, 255]`,
    /// per the protocol's constraint that `length` is a single byte).
    pub fn new(max_buffer_size: usize) -> Self {
        Decoder {
            max_buffer_size,
            state: State::WaitingForStart,
            buffer: Vec::with_capacity(max_buffer_size),
            expected_length: 0,
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForStart;
        self.expected_length = 0;
    }

    fn is_valid_length(&self, len: u8) -> bool {
        (MIN_FRAME_LEN..=self.max_buffer_size as u8).contains(&len)
    }

    /// Feed a chunk of newly-received bytes, appending any decoded outcomes
    /// to `out` in arrival order.
    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<DecodeOutcome>) {
        for &byte in bytes {
            self.feed_one(byte, out);
        }
    }

    fn feed_one(&mut self, byte: u8, out: &mut Vec<DecodeOutcome>) {
        match self.state {
            State::WaitingForStart => {
                if byte == START_BYTE {
                    self.reset();
                    self.buffer.push(byte);
                    self.state = State::WaitingForLength;
                    log::trace!("start byte received");
                }
            }
            State::WaitingForLength => {
                if self.is_valid_length(byte) {
                    self.buffer.push(byte);
                    self.expected_length = byte as usize;
                    self.state = State::CollectingData;
                    log::trace!("valid length received: {}", byte);
                } else {
                    log::trace!("invalid length received: {}", byte);
                    self.reset();
                }
            }
            State::CollectingData => {
                self.buffer.push(byte);
                if self.buffer.len() >= self.expected_length {
                    self.finish_frame(out);
                    self.reset();
                }
            }
        }

        // Overflow safety net: unreachable in correctly-framed traffic
        // since expected_length <= max_buffer_size, but protects against a
        // corrupted length field slipping past `is_valid_length`.
        if self.buffer.len() >= self.max_buffer_size {
            self.reset();
        }
    }

    fn finish_frame(&mut self, out: &mut Vec<DecodeOutcome>) {
        let len = self.expected_length;
        let received_checksum = self.buffer[len - 1];
        let calculated = xor_checksum(&self.buffer[..len - 1]);

        if received_checksum == calculated {
            let command_id = self.buffer[2];
            let payload = self.buffer[3..len - 1].to_vec();
            log::trace!(
                "complete frame: cmd {:#X}, {} byte payload",
                command_id,
                payload.len()
            );
            out.push(DecodeOutcome::Frame(DecodedFrame {
                command_id,
                payload,
            }));
        } else {
            log::trace!(
                "checksum mismatch: received {:#X}, calculated {:#X}",
                received_checksum,
                calculated
            );
            out.push(DecodeOutcome::ChecksumMismatch {
                received: received_checksum,
                calculated,
            });
        }
    }
}
