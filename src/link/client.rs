//! Client-side connection manager.
//!
//! Keeps exactly one session connected to the counterpart device for the
//! lifetime of the client: enumerate bonded candidates, narrow by device
//! class (leniently), try connection strategies in priority order, then
//! block on the receive loop and dispatch messages. When the session dies
//! the loop marks the link down, waits a fixed backoff and starts over.

use crate::error::{Error, Result};
use crate::protocol::{self, Message};
use crate::transport::{LineReader, LinkStream, SerialLinkStream, Session, TcpLinkStream};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Fixed reconnect backoff. Not exponential: the peer is physically nearby,
/// failures are usually transient and short.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Major device class of a handheld counterpart (phone)
pub const HANDHELD_DEVICE_CLASS: u32 = 0x0200;

/// One candidate peer known to the platform (already bonded/paired;
/// discovery and pairing are not this crate's job).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    /// Strategy-interpreted address: `host` for TCP, device path for serial
    pub address: String,
    pub name: Option<String>,
    /// Platform major device class, when known
    pub device_class: Option<u32>,
}

impl PeerAddr {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Supplies the current set of bonded candidate peers.
pub trait PeerDirectory: Send + Sync {
    fn bonded_peers(&self) -> Vec<PeerAddr>;
}

/// One way of opening a stream to a peer. Strategies are tried in priority
/// order; the first success wins, each failure is logged and non-fatal.
pub trait ConnectStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn connect(&self, peer: &PeerAddr) -> Result<Box<dyn LinkStream>>;
}

/// Dial `peer.address:port` over TCP.
pub struct TcpStrategy {
    label: String,
    port: u16,
}

impl TcpStrategy {
    pub fn new(label: &str, port: u16) -> Self {
        Self {
            label: label.to_string(),
            port,
        }
    }
}

impl ConnectStrategy for TcpStrategy {
    fn name(&self) -> &str {
        &self.label
    }

    fn connect(&self, peer: &PeerAddr) -> Result<Box<dyn LinkStream>> {
        let addr = format!("{}:{}", peer.address, self.port);
        Ok(Box::new(TcpLinkStream::connect(&addr)?))
    }
}

/// Open `peer.address` as a serial device.
pub struct SerialStrategy {
    baud_rate: u32,
}

impl SerialStrategy {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl ConnectStrategy for SerialStrategy {
    fn name(&self) -> &str {
        "serial"
    }

    fn connect(&self, peer: &PeerAddr) -> Result<Box<dyn LinkStream>> {
        Ok(Box::new(SerialLinkStream::open(
            &peer.address,
            self.baud_rate,
        )?))
    }
}

/// Receives connectivity changes and decoded inbound messages.
///
/// Callbacks run on the client's loop thread and must not block it for
/// long; hand work off if it is slow.
pub trait ClientHandler: Send + Sync {
    fn on_connectivity(&self, _connected: bool) {}
    fn on_message(&self, msg: Message);
}

struct ClientInner {
    directory: Box<dyn PeerDirectory>,
    strategies: Vec<Box<dyn ConnectStrategy>>,
    handler: Box<dyn ClientHandler>,
    running: AtomicBool,
    current: Mutex<Option<Arc<Session>>>,
    retry_delay: Duration,
}

/// Client-side connection manager. `start` spawns the loop thread; `stop`
/// cancels it and closes any live stream so blocked reads unblock.
pub struct LinkClient {
    inner: Arc<ClientInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LinkClient {
    pub fn new(
        directory: Box<dyn PeerDirectory>,
        strategies: Vec<Box<dyn ConnectStrategy>>,
        handler: Box<dyn ClientHandler>,
    ) -> Self {
        Self::with_retry_delay(directory, strategies, handler, RECONNECT_DELAY)
    }

    /// As [`new`](Self::new) with a custom backoff (tests use a short one).
    pub fn with_retry_delay(
        directory: Box<dyn PeerDirectory>,
        strategies: Vec<Box<dyn ConnectStrategy>>,
        handler: Box<dyn ClientHandler>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                directory,
                strategies,
                handler,
                running: AtomicBool::new(false),
                current: Mutex::new(None),
                retry_delay,
            }),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the connect-and-receive loop. No-op if already running.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("link-client".to_string())
            .spawn(move || {
                run_loop(&inner);
                log::info!("Link client loop exited");
            })?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Cancel the loop, close the live stream, join the thread.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(session) = self.inner.current.lock().as_ref() {
            session.close();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .current
            .lock()
            .as_ref()
            .is_some_and(|s| s.is_alive())
    }

    /// Send one message over the current session.
    pub fn send(&self, msg: &Message) -> Result<()> {
        let session = self
            .inner
            .current
            .lock()
            .clone()
            .ok_or(Error::NotConnected)?;
        session.send(msg)
    }
}

impl Drop for LinkClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(inner: &ClientInner) {
    while inner.running.load(Ordering::Relaxed) {
        let candidates = inner.directory.bonded_peers();
        if candidates.is_empty() {
            log::warn!(
                "No bonded peers available, retrying in {:?}",
                inner.retry_delay
            );
            sleep_while_running(inner, inner.retry_delay);
            continue;
        }

        let filtered = filter_candidates(candidates);
        let mut connected_any = false;

        for peer in &filtered {
            if !inner.running.load(Ordering::Relaxed) {
                break;
            }
            let Some(stream) = try_connect(inner, peer) else {
                continue;
            };
            connected_any = true;
            match Session::open(stream) {
                Ok((session, reader)) => run_session(inner, peer, session, reader),
                Err(e) => log::warn!("Failed to open session to {}: {}", peer.label(), e),
            }
        }

        if !connected_any {
            log::info!(
                "No peer accepted a connection, retrying in {:?}",
                inner.retry_delay
            );
        }
        sleep_while_running(inner, inner.retry_delay);
    }

    // Never leave a stream open behind a cancelled loop
    if let Some(session) = inner.current.lock().take() {
        session.close();
    }
}

/// Prefer peers matching the handheld device class; fall back to the full
/// list when the filter empties it (lenient degradation over strictness).
fn filter_candidates(candidates: Vec<PeerAddr>) -> Vec<PeerAddr> {
    let matching: Vec<PeerAddr> = candidates
        .iter()
        .filter(|p| p.device_class == Some(HANDHELD_DEVICE_CLASS))
        .cloned()
        .collect();
    if matching.is_empty() {
        candidates
    } else {
        matching
    }
}

fn try_connect(inner: &ClientInner, peer: &PeerAddr) -> Option<Box<dyn LinkStream>> {
    for strategy in &inner.strategies {
        match strategy.connect(peer) {
            Ok(stream) => {
                log::info!("Connected to {} via {}", peer.label(), strategy.name());
                return Some(stream);
            }
            Err(e) => {
                log::warn!("{} to {} failed: {}", strategy.name(), peer.label(), e);
            }
        }
    }
    None
}

fn run_session(inner: &ClientInner, peer: &PeerAddr, session: Arc<Session>, reader: LineReader) {
    *inner.current.lock() = Some(Arc::clone(&session));
    inner.handler.on_connectivity(true);

    for line in reader {
        match protocol::decode(&line) {
            Message::Unknown(raw) => log::warn!("Unknown message from {}: {}", peer.label(), raw),
            msg => inner.handler.on_message(msg),
        }
    }

    session.close();
    *inner.current.lock() = None;
    inner.handler.on_connectivity(false);
    log::info!("Disconnected from {}", peer.label());
}

/// Fixed backoff in short slices so `stop` stays responsive.
fn sleep_while_running(inner: &ClientInner, total: Duration) {
    let deadline = Instant::now() + total;
    while inner.running.load(Ordering::Relaxed) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50).min(total));
    }
}
