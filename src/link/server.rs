//! Server-side connection manager.
//!
//! Accepts any number of inbound sessions on parallel acceptors (primary
//! and fallback endpoints), broadcasts outbound traffic to every live
//! session and prunes the ones whose send fails. The latest display
//! settings and wifi credentials are cached and replayed to each newly
//! joined session so a reconnecting display resumes with current state.

use crate::error::Result;
use crate::protocol::{self, Message, TileResponse};
use crate::tiles::{TileCache, TileKey};
use crate::transport::{LineReader, LinkStream, Session, TcpAcceptor};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Accept poll interval; short enough that shutdown stays responsive
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// A listening endpoint the server polls for inbound connections.
pub trait Acceptor: Send {
    fn name(&self) -> &str;
    /// Try to accept one pending connection; `Ok(None)` when there is none.
    fn poll_accept(&mut self) -> Result<Option<Box<dyn LinkStream>>>;
}

impl Acceptor for TcpAcceptor {
    fn name(&self) -> &str {
        self.name()
    }

    fn poll_accept(&mut self) -> Result<Option<Box<dyn LinkStream>>> {
        TcpAcceptor::poll_accept(self)
    }
}

/// Receives session count changes and inbound messages.
///
/// Callbacks run on per-session reader threads; slow work must be handed
/// off so the session's receive loop keeps draining.
pub trait ServerHandler: Send + Sync {
    fn on_session_count(&self, _count: usize) {}
    fn on_message(&self, msg: Message, session: &Arc<Session>);
}

struct ServerInner {
    handler: Box<dyn ServerHandler>,
    running: AtomicBool,
    sessions: Mutex<Vec<Arc<Session>>>,
    /// Replayed to newly joined sessions
    cached_settings: Mutex<Option<Message>>,
    cached_wifi: Mutex<Option<Message>>,
    /// When set, inbound `TileRequest`s are answered from here instead of
    /// reaching the handler.
    tile_cache: Mutex<Option<Arc<TileCache>>>,
    session_seq: AtomicU64,
}

/// Server-side connection manager. `start` spawns one accept thread per
/// acceptor; each accepted stream gets its own reader thread.
pub struct LinkServer {
    inner: Arc<ServerInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl LinkServer {
    pub fn new(handler: Box<dyn ServerHandler>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                handler,
                running: AtomicBool::new(false),
                sessions: Mutex::new(Vec::new()),
                cached_settings: Mutex::new(None),
                cached_wifi: Mutex::new(None),
                tile_cache: Mutex::new(None),
                session_seq: AtomicU64::new(0),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Serve inbound tile requests from this cache.
    pub fn set_tile_cache(&self, cache: Arc<TileCache>) {
        *self.inner.tile_cache.lock() = Some(cache);
    }

    /// Spawn one accept thread per acceptor. No-op if already running.
    pub fn start(&self, acceptors: Vec<Box<dyn Acceptor>>) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut threads = self.threads.lock();
        for mut acceptor in acceptors {
            let inner = Arc::clone(&self.inner);
            let name = format!("accept-{}", acceptor.name());
            let handle = thread::Builder::new().name(name.clone()).spawn(move || {
                while inner.running.load(Ordering::Relaxed) {
                    match acceptor.poll_accept() {
                        Ok(Some(stream)) => accept_session(&inner, stream),
                        Ok(None) => thread::sleep(ACCEPT_POLL),
                        Err(e) => {
                            log::warn!("{} acceptor error: {}", acceptor.name(), e);
                            thread::sleep(ACCEPT_POLL);
                        }
                    }
                }
                log::info!("{} loop exited", name);
            })?;
            threads.push(handle);
        }
        Ok(())
    }

    /// Stop accepting, close every session, join all threads.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        for session in self.inner.sessions.lock().iter() {
            session.close();
        }
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_connected(&self) -> bool {
        self.session_count() > 0
    }

    /// Send one message to every live session, dropping the ones whose
    /// send fails. Settings and wifi credentials are also cached for
    /// replay to future sessions.
    pub fn broadcast(&self, msg: &Message) {
        match msg {
            Message::Settings(_) => *self.inner.cached_settings.lock() = Some(msg.clone()),
            Message::WifiCredentials(_) => *self.inner.cached_wifi.lock() = Some(msg.clone()),
            _ => {}
        }
        broadcast_line(&self.inner, &protocol::encode(msg));
    }
}

impl Drop for LinkServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn broadcast_line(inner: &ServerInner, line: &str) {
    let targets: Vec<Arc<Session>> = inner.sessions.lock().clone();
    let mut pruned = false;
    for session in &targets {
        if let Err(e) = session.send_line(line) {
            log::warn!("Dropping session {}: {}", session.peer(), e);
            session.close();
            pruned = true;
        }
    }
    if pruned {
        let count = {
            let mut sessions = inner.sessions.lock();
            sessions.retain(|s| s.is_alive());
            sessions.len()
        };
        inner.handler.on_session_count(count);
    }
}

fn accept_session(inner: &Arc<ServerInner>, stream: Box<dyn LinkStream>) {
    let (session, reader) = match Session::open(stream) {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("Failed to open inbound session: {}", e);
            return;
        }
    };

    let count = {
        let mut sessions = inner.sessions.lock();
        sessions.retain(|s| s.is_alive());
        sessions.push(Arc::clone(&session));
        sessions.len()
    };
    inner.handler.on_session_count(count);

    resync_cached_state(inner, &session);

    let seq = inner.session_seq.fetch_add(1, Ordering::Relaxed);
    let inner = Arc::clone(inner);
    let spawn = thread::Builder::new()
        .name(format!("link-session-{}", seq))
        .spawn(move || run_session(&inner, &session, reader));
    if let Err(e) = spawn {
        log::error!("Failed to spawn session thread: {}", e);
    }
}

/// A session that joins mid-run still needs the current settings and wifi
/// credentials; replay whatever was last broadcast.
fn resync_cached_state(inner: &ServerInner, session: &Arc<Session>) {
    for cached in [
        inner.cached_settings.lock().clone(),
        inner.cached_wifi.lock().clone(),
    ]
    .into_iter()
    .flatten()
    {
        if let Err(e) = session.send(&cached) {
            log::warn!("State resync to {} failed: {}", session.peer(), e);
            return;
        }
    }
}

fn run_session(inner: &Arc<ServerInner>, session: &Arc<Session>, reader: LineReader) {
    for line in reader {
        match protocol::decode(&line) {
            Message::Unknown(raw) => {
                log::warn!("Unknown message from {}: {}", session.peer(), raw)
            }
            Message::TileRequest(req) => {
                let served = {
                    let cache = inner.tile_cache.lock().clone();
                    match cache {
                        Some(cache) => {
                            serve_tile_request(&cache, session, &req.id, req.z, req.x, req.y);
                            true
                        }
                        None => false,
                    }
                };
                if !served {
                    inner.handler.on_message(Message::TileRequest(req), session);
                }
            }
            msg => inner.handler.on_message(msg, session),
        }
    }

    session.close();
    let count = {
        let mut sessions = inner.sessions.lock();
        sessions.retain(|s| !Arc::ptr_eq(s, session) && s.is_alive());
        sessions.len()
    };
    inner.handler.on_session_count(count);
    log::info!("Session {} ended", session.peer());
}

/// Answer a tile request from the cache, fetching on a miss. The response
/// always goes back with the request's correlation id, with an absent
/// payload on failure so the display can retry later.
fn serve_tile_request(cache: &Arc<TileCache>, session: &Arc<Session>, id: &str, z: u32, x: u32, y: u32) {
    let key = TileKey::new(z, x, y);
    let responder = Arc::clone(session);
    let id = id.to_string();
    cache.fetch_and_respond(key, move |image| {
        let data = image.map(|bytes| BASE64.encode(bytes.as_slice()));
        let resp = Message::TileResponse(TileResponse { id, data });
        if let Err(e) = responder.send(&resp) {
            log::warn!("Tile response to {} failed: {}", responder.peer(), e);
        }
    });
}
