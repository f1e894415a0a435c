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

//! The minimal port abstraction a [`crate::link::Link`] worker needs.
//!
//! Real links are backed by `Box<dyn serialport::SerialPort>`; tests inject a
//! small in-memory double instead. Neither needs the full `serialport::SerialPort`
//! surface, so the worker is written against this narrower trait.

use std::io::{Read, Write};
use std::time::Duration;

/// What a [`crate::link::Link`] worker needs from an open port.
pub trait LinkPort: Read + Write + Send {
    /// Number of bytes currently buffered and ready to read, without blocking.
    fn bytes_to_read(&self) -> std::io::Result<u32>;

    /// Change the port's read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> std::io::Result<()>;
}

impl LinkPort for Box<dyn serialport::SerialPort> {
    fn bytes_to_read(&self) -> std::io::Result<u32> {
        (**self)
            .bytes_to_read()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    fn set_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        (**self)
            .set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

/// Opens `port_name` at `baud`, configured the way this crate's links expect:
/// 8N1, no flow control, and a short read timeout so the worker loop can poll
/// for cancellation between reads.
pub fn open_system_port(
    port_name: &str,
    baud: u32,
    read_timeout: Duration,
) -> std::io::Result<Box<dyn serialport::SerialPort>> {
    serialport::new(port_name, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(read_timeout)
        .open()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
pub mod test_support {
    use super::LinkPort;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    /// An in-memory loopback-style test double for [`LinkPort`].
    ///
    /// `inbound` holds bytes waiting to be read (as if received from the
    /// device); writes are appended to `outbound` for assertions.
    #[derive(Default)]
    pub struct MockPort {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        pub fail_reads: bool,
        pub fail_writes: bool,
    }

    impl MockPort {
        pub fn with_inbound(bytes: &[u8]) -> Self {
            MockPort {
                inbound: bytes.iter().copied().collect(),
                ..Default::default()
            }
        }

        pub fn push_inbound(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes.iter().copied());
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::Other, "mock read failure"));
            }
            if self.inbound.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let mut n = 0;
            while n < buf.len() {
                match self.inbound.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::Other, "mock write failure"));
            }
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LinkPort for MockPort {
        fn bytes_to_read(&self) -> io::Result<u32> {
            Ok(self.inbound.len() as u32)
        }

        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    /// A [`MockPort`] behind a shared handle, so a test can keep a clone for
    /// inspecting `outbound` after handing the other end to a [`crate::link::Link`].
    #[derive(Clone, Default)]
    pub struct SharedMockPort(std::sync::Arc<std::sync::Mutex<MockPort>>);

    impl SharedMockPort {
        pub fn new(port: MockPort) -> Self {
            SharedMockPort(std::sync::Arc::new(std::sync::Mutex::new(port)))
        }

        pub fn outbound(&self) -> Vec<u8> {
            self.0.lock().unwrap().outbound.clone()
        }

        pub fn push_inbound(&self, bytes: &[u8]) {
            self.0.lock().unwrap().push_inbound(bytes);
        }
    }

    impl Read for SharedMockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.lock().unwrap().read(buf)
        }
    }

    impl Write for SharedMockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.lock().unwrap().flush()
        }
    }

    impl LinkPort for SharedMockPort {
        fn bytes_to_read(&self) -> io::Result<u32> {
            self.0.lock().unwrap().bytes_to_read()
        }

        fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            LinkPort::set_timeout(&mut *self.0.lock().unwrap(), timeout)
        }
    }
}
