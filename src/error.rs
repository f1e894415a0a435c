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

//! Error types shared across the frame codec, link worker, registry, and
//! discovery orchestrator.

use std::{error::Error as StdError, fmt, io};

/// Errors produced anywhere in this crate.
#[derive(Debug)]
pub enum Error {
    /// Opening the underlying serial port failed.
    PortOpenFailure(String, io::Error),
    /// A read or write on an open port failed.
    PortIoError(io::Error),
    /// A payload was too large to fit in a frame.
    PayloadTooLarge {
        /// The payload length that was rejected.
        len: usize,
        /// The maximum payload length allowed.
        max: usize,
    },
    /// A decoded `length` byte was outside `[MIN_FRAME_LEN, max_buffer_size]`.
    InvalidLength(u8),
    /// A frame's trailing checksum byte didn't match the computed checksum.
    ChecksumMismatch {
        /// The checksum byte found in the frame.
        received: u8,
        /// The checksum computed over the frame's other bytes.
        calculated: u8,
    },
    /// No handler is registered for a decoded command id.
    UnknownCommand(u8),
    /// A handshake or dispatch step happened out of sequence.
    ProtocolViolation(String),
    /// An operation did not complete within its wall-clock budget.
    Timeout,
    /// A name or id was already present in the registry.
    AlreadyRegistered(String),
    /// A name was not found in the registry.
    UnknownDevice(String),
    /// The link is not open.
    NotOpen,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PortOpenFailure(port, e) => {
                write!(f, "couldn't open port `{}`: {}", port, e)
            }
            Error::PortIoError(e) => write!(f, "port I/O error: {}", e),
            Error::PayloadTooLarge { len, max } => write!(
                f,
                "payload of {} bytes exceeds the maximum of {} bytes",
                len, max
            ),
            Error::InvalidLength(len) => {
                write!(f, "invalid frame length byte: {}", len)
            }
            Error::ChecksumMismatch {
                received,
                calculated,
            } => write!(
                f,
                "checksum mismatch: received {:#X}, calculated {:#X}",
                received, calculated
            ),
            Error::UnknownCommand(cmd) => {
                write!(f, "no handler registered for command {:#X}", cmd)
            }
            Error::ProtocolViolation(msg) => {
                write!(f, "protocol violation: {}", msg)
            }
            Error::Timeout => write!(f, "operation timed out"),
            Error::AlreadyRegistered(name) => {
                write!(f, "`{}` is already registered", name)
            }
            Error::UnknownDevice(name) => {
                write!(f, "unknown device `{}`", name)
            }
            Error::NotOpen => write!(f, "link is not open"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::PortOpenFailure(_, e) => Some(e),
            Error::PortIoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::PortIoError(e)
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
