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

//! The link worker (C2): one OS thread per serial port, decoding frames off
//! the wire and dispatching them to registered command handlers.
//!
//! A [`Link`] is always held behind an `Arc`, since both its own worker
//! thread and the handlers it invokes need to share ownership of it — a
//! handshake handler calls back into `registry.try_bind(..., link.clone())`
//! to let the registry hold the very link it was invoked from.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::frame::{self, DecodeOutcome, Decoder};
use crate::port::{open_system_port, LinkPort};
use crate::registry::Registry;

/// A command handler: invoked with the link it arrived on (so it can reply
/// or bind itself into the registry) and the frame's payload.
pub type Handler = Arc<dyn Fn(&Arc<Link>, &[u8]) + Send + Sync>;

pub(crate) type Opener = Box<dyn Fn() -> std::io::Result<Box<dyn LinkPort>> + Send + Sync>;

/// A single serial link and its worker thread.
pub struct Link {
    port_name: String,
    config: LinkConfig,
    registry: Option<Arc<Registry>>,
    opener: Opener,

    cancel: AtomicBool,
    forced_disconnect: AtomicBool,
    open: AtomicBool,

    port: Mutex<Option<Box<dyn LinkPort>>>,
    dispatch: Mutex<HashMap<u8, Handler>>,
    device_name: Mutex<Option<String>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    done_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Link {
    /// Open `port_name` at the baud rate and policy in `config`, and spawn
    /// its worker thread. `registry`, when given, lets the worker release a
    /// bound device on a connection error without the caller having to wire
    /// that up by hand.
    pub fn open(port_name: &str, config: LinkConfig, registry: Option<Arc<Registry>>) -> Arc<Link> {
        Link::open_with_handlers(port_name, config, registry, HashMap::new())
    }

    /// Like [`Link::open`], but installs `initial_dispatch` before the
    /// worker thread starts, so a handler for e.g. the handshake command is
    /// guaranteed to be in place before the first byte can possibly arrive.
    /// Calling [`Link::register_command`] after the link is already running
    /// races the worker's first read.
    pub fn open_with_handlers(
        port_name: &str,
        config: LinkConfig,
        registry: Option<Arc<Registry>>,
        initial_dispatch: HashMap<u8, Handler>,
    ) -> Arc<Link> {
        let opener = {
            let port_name = port_name.to_string();
            let baud = config.baud;
            let read_timeout = config.read_timeout;
            Box::new(move || open_system_port(&port_name, baud, read_timeout))
        };
        Link::spawn(port_name.to_string(), config, registry, opener, initial_dispatch)
    }

    fn spawn(
        port_name: String,
        config: LinkConfig,
        registry: Option<Arc<Registry>>,
        opener: Opener,
        initial_dispatch: HashMap<u8, Handler>,
    ) -> Arc<Link> {
        let link = Arc::new(Link {
            port_name,
            config,
            registry,
            opener,
            cancel: AtomicBool::new(false),
            forced_disconnect: AtomicBool::new(false),
            open: AtomicBool::new(false),
            port: Mutex::new(None),
            dispatch: Mutex::new(initial_dispatch),
            device_name: Mutex::new(None),
            worker: Mutex::new(None),
            done_rx: Mutex::new(None),
        });

        let (done_tx, done_rx) = mpsc::channel();
        *link.done_rx.lock().unwrap() = Some(done_rx);

        let worker_link = Arc::clone(&link);
        let handle = thread::spawn(move || {
            worker_link.run(done_tx);
        });
        *link.worker.lock().unwrap() = Some(handle);

        link
    }

    /// Spawn a `Link` backed by a caller-supplied opener, for tests across
    /// this crate that need a running worker over a scripted [`LinkPort`]
    /// double rather than a real serial port.
    #[cfg(test)]
    pub(crate) fn spawn_for_test(port_name: String, opener: Opener) -> Arc<Link> {
        Link::spawn(port_name, LinkConfig::default(), None, opener, HashMap::new())
    }

    /// Like [`Link::spawn_for_test`], but installs `initial_dispatch` before
    /// the worker thread starts, mirroring [`Link::open_with_handlers`] so
    /// tests that script inbound bytes up front aren't racing the worker's
    /// first read against a later [`Link::register_command`] call.
    #[cfg(test)]
    pub(crate) fn spawn_for_test_with_handlers(
        port_name: String,
        opener: Opener,
        initial_dispatch: HashMap<u8, Handler>,
    ) -> Arc<Link> {
        Link::spawn(port_name, LinkConfig::default(), None, opener, initial_dispatch)
    }

    /// Build a `Link` for unit tests that only need registry bookkeeping
    /// (binding, status transitions) and never touch a real port or a
    /// worker thread.
    #[cfg(test)]
    pub fn for_test() -> Link {
        Link {
            port_name: "test".to_string(),
            config: LinkConfig::default(),
            registry: None,
            opener: Box::new(|| Err(std::io::Error::new(std::io::ErrorKind::Other, "no port"))),
            cancel: AtomicBool::new(false),
            forced_disconnect: AtomicBool::new(false),
            open: AtomicBool::new(false),
            port: Mutex::new(None),
            dispatch: Mutex::new(HashMap::new()),
            device_name: Mutex::new(None),
            worker: Mutex::new(None),
            done_rx: Mutex::new(None),
        }
    }

    /// The port name this link was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Whether the underlying port is currently open (i.e. not mid-reconnect
    /// or permanently disconnected).
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Record the logical device name this link has been bound to, so a
    /// connection error can release it from the registry. The link does not
    /// hold a reference back to the device; only its name.
    pub fn set_device(&self, name: impl Into<String>) {
        *self.device_name.lock().unwrap() = Some(name.into());
    }

    /// Register a handler for `command_id`. Replaces any previous handler
    /// for the same id.
    pub fn register_command(&self, command_id: u8, handler: Handler) {
        self.dispatch.lock().unwrap().insert(command_id, handler);
    }

    /// Encode and send `payload` under `command_id`. May be called
    /// reentrantly from within a handler running on this link's own worker
    /// thread, since it only ever touches the port mutex, never the
    /// dispatch mutex.
    pub fn send(&self, command_id: u8, payload: &[u8]) -> Result<()> {
        let frame = frame::encode(command_id, payload, self.config.max_buffer_size)?;
        self.send_raw(&frame)
    }

    /// Write an already-encoded frame (or any raw bytes) straight to the
    /// port.
    pub fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        if self.config.debug {
            log::debug!("`{}`: writing {} byte(s): {:?}", self.port_name, bytes.len(), bytes);
        }
        let mut guard = self.port.lock().unwrap();
        let port = guard.as_mut().ok_or(Error::NotOpen)?;
        match port.write_all(bytes).and_then(|_| port.flush()) {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(guard);
                self.handle_connection_error();
                Err(Error::PortIoError(e))
            }
        }
    }

    /// Signal the worker to stop and wait up to `timeout` for it to exit.
    /// An idle, already-open link returns well within a single read
    /// timeout; a link stuck mid-reconnect-sleep returns as soon as its
    /// current sleep slice elapses.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.cancel.store(true, Ordering::SeqCst);
        self.forced_disconnect.store(true, Ordering::SeqCst);

        let rx = self.done_rx.lock().unwrap().take();
        let joined = match rx {
            Some(rx) => match rx.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            },
            // Already stopped (or a `for_test` link with no worker at all).
            None => true,
        };

        if joined {
            if let Some(handle) = self.worker.lock().unwrap().take() {
                let _ = handle.join();
            }
            self.open.store(false, Ordering::SeqCst);
            *self.port.lock().unwrap() = None;
        }
        joined
    }

    fn handle_connection_error(&self) {
        self.open.store(false, Ordering::SeqCst);
        *self.port.lock().unwrap() = None;
        if let Some(name) = self.device_name.lock().unwrap().take() {
            if let Some(registry) = &self.registry {
                log::warn!("link `{}` lost device `{}`, releasing", self.port_name, name);
                registry.release(&name);
            }
        }
    }

    fn sleep_cancellable(&self, total: Duration) {
        let step = Duration::from_millis(10);
        let start = Instant::now();
        while start.elapsed() < total {
            if self.cancel.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(step.min(total - start.elapsed()));
        }
    }

    fn dispatch_outcomes(self: &Arc<Self>, outcomes: Vec<DecodeOutcome>) {
        for outcome in outcomes {
            match outcome {
                DecodeOutcome::Frame(f) => {
                    let handler = self.dispatch.lock().unwrap().get(&f.command_id).cloned();
                    match handler {
                        Some(handler) => {
                            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                                handler(self, &f.payload);
                            }));
                            if result.is_err() {
                                log::error!(
                                    "handler for command {:#X} on `{}` panicked",
                                    f.command_id,
                                    self.port_name
                                );
                            }
                        }
                        None => {
                            log::debug!(
                                "no handler registered for command {:#X} on `{}`",
                                f.command_id,
                                self.port_name
                            );
                        }
                    }
                }
                DecodeOutcome::ChecksumMismatch {
                    received,
                    calculated,
                } => {
                    log::warn!(
                        "checksum mismatch on `{}`: received {:#X}, calculated {:#X}",
                        self.port_name,
                        received,
                        calculated
                    );
                }
            }
        }
    }

    fn run(self: Arc<Self>, done_tx: mpsc::Sender<()>) {
        let mut decoder = Decoder::new(self.config.max_buffer_size);
        let mut buf = [0u8; 256];
        let mut reconnect_attempts = 0u32;

        match (self.opener)() {
            Ok(port) => {
                *self.port.lock().unwrap() = Some(port);
                self.open.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                log::warn!("initial open of `{}` failed: {}", self.port_name, e);
            }
        }

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }

            if self.is_open() {
                let read_result = {
                    let mut guard = self.port.lock().unwrap();
                    guard.as_mut().map(|p| p.read(&mut buf))
                };
                match read_result {
                    Some(Ok(0)) => thread::sleep(Duration::from_millis(10)),
                    Some(Ok(n)) => {
                        if self.config.debug {
                            log::debug!("`{}`: read {} byte(s): {:?}", self.port_name, n, &buf[..n]);
                        }
                        let mut outcomes = Vec::new();
                        decoder.feed(&buf[..n], &mut outcomes);
                        self.dispatch_outcomes(outcomes);
                    }
                    Some(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Some(Err(e)) => {
                        log::warn!("read error on `{}`: {}", self.port_name, e);
                        self.handle_connection_error();
                    }
                    None => {
                        // Port vanished between the is_open check and the
                        // lock (closed concurrently by handle_connection_error).
                    }
                }
            } else if self.forced_disconnect.load(Ordering::SeqCst) {
                self.sleep_cancellable(Duration::from_millis(100));
            } else if reconnect_attempts >= self.config.max_reconnect_attempts {
                log::error!(
                    "`{}` exhausted {} reconnect attempts, giving up",
                    self.port_name,
                    self.config.max_reconnect_attempts
                );
                self.sleep_cancellable(Duration::from_secs(3600));
            } else {
                self.sleep_cancellable(self.config.reconnect_delay);
                if self.cancel.load(Ordering::SeqCst) {
                    break;
                }
                match (self.opener)() {
                    Ok(port) => {
                        log::info!("reconnected `{}`", self.port_name);
                        *self.port.lock().unwrap() = Some(port);
                        self.open.store(true, Ordering::SeqCst);
                        reconnect_attempts = 0;
                    }
                    Err(e) => {
                        reconnect_attempts += 1;
                        log::warn!(
                            "reconnect attempt {}/{} for `{}` failed: {}",
                            reconnect_attempts,
                            self.config.max_reconnect_attempts,
                            self.port_name,
                            e
                        );
                    }
                }
            }
        }

        *self.port.lock().unwrap() = None;
        self.open.store(false, Ordering::SeqCst);
        let _ = done_tx.send(());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::port::test_support::MockPort;
    use std::sync::atomic::AtomicUsize;

    fn spawn_with_port(port: MockPort) -> Arc<Link> {
        spawn_with_port_and_handlers(port, HashMap::new())
    }

    /// Like `spawn_with_port`, but installs `dispatch` before the worker
    /// thread starts. Needed whenever the port is preloaded with inbound
    /// bytes, since registering a handler after spawning races the worker's
    /// first read.
    fn spawn_with_port_and_handlers(port: MockPort, dispatch: HashMap<u8, Handler>) -> Arc<Link> {
        let port = Arc::new(Mutex::new(Some(port)));
        let opener: Opener = {
            let port = Arc::clone(&port);
            Box::new(move || {
                port.lock()
                    .unwrap()
                    .take()
                    .map(|p| Box::new(p) as Box<dyn LinkPort>)
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "already taken"))
            })
        };
        Link::spawn_for_test_with_handlers("mock".to_string(), opener, dispatch)
    }

    #[test]
    fn idle_open_link_stops_within_one_read_timeout() {
        let link = spawn_with_port(MockPort::default());
        thread::sleep(Duration::from_millis(50));
        assert!(link.is_open());
        let stopped = link.stop(Duration::from_secs(2));
        assert!(stopped);
    }

    #[test]
    fn dispatches_decoded_frame_to_registered_handler() {
        let frame = frame::encode(0x02, &[0xC8], 64).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let mut dispatch = HashMap::new();
        {
            let seen = Arc::clone(&seen);
            dispatch.insert(
                0x02,
                Arc::new(move |_link: &Arc<Link>, payload: &[u8]| {
                    assert_eq!(payload, &[0xC8]);
                    seen.fetch_add(1, Ordering::SeqCst);
                }) as Handler,
            );
        }
        let link = spawn_with_port_and_handlers(MockPort::with_inbound(&frame), dispatch);

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        link.stop(Duration::from_secs(2));
    }

    #[test]
    fn send_without_open_port_returns_not_open() {
        let link = Link::for_test();
        let err = link.send(0x02, &[1]).unwrap_err();
        assert!(matches!(err, Error::NotOpen));
    }

    #[test]
    fn handler_panic_does_not_kill_worker() {
        let frame_a = frame::encode(0x02, &[], 64).unwrap();
        let frame_b = frame::encode(0x03, &[], 64).unwrap();
        let mut inbound = frame_a;
        inbound.extend_from_slice(&frame_b);

        let seen = Arc::new(AtomicUsize::new(0));
        let mut dispatch = HashMap::new();
        dispatch.insert(0x02, Arc::new(|_: &Arc<Link>, _: &[u8]| panic!("boom")) as Handler);
        {
            let seen = Arc::clone(&seen);
            dispatch.insert(
                0x03,
                Arc::new(move |_: &Arc<Link>, _: &[u8]| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }) as Handler,
            );
        }
        let link = spawn_with_port_and_handlers(MockPort::with_inbound(&inbound), dispatch);

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        link.stop(Duration::from_secs(2));
    }
}
