//! Integration tests wiring the client and server connection managers
//! together over in-memory link streams.
//!
//! These cover the cross-module paths: reconnect discovery, tile
//! request/response over a live link, the proxied tile cache on the
//! display side, and a bulk package transfer end to end.

use crossbeam_channel::{Receiver, Sender, unbounded};
use drishti_link::bulk::{self, PackageReceiver};
use drishti_link::error::{Error, Result};
use drishti_link::link::{
    Acceptor, ClientHandler, ConnectStrategy, LinkClient, LinkServer, PeerAddr, PeerDirectory,
    ServerHandler,
};
use drishti_link::protocol::Message;
use drishti_link::tiles::{TileCache, TileFetcher, TileKey, TileRequester};
use drishti_link::transport::{LinkStream, MemoryLinkStream, Session};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const RECV_TIMEOUT: Duration = Duration::from_secs(3);
const RETRY_DELAY: Duration = Duration::from_millis(30);

const PNG_STUB: &[u8] = b"\x89PNG\r\n\x1a\nstub";

/// Candidate list the test can mutate while the client loop runs.
#[derive(Clone)]
struct TestDirectory {
    peers: Arc<Mutex<Vec<PeerAddr>>>,
}

impl TestDirectory {
    fn empty() -> Self {
        Self {
            peers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn add(&self, address: &str) {
        self.peers.lock().push(PeerAddr {
            address: address.to_string(),
            name: None,
            device_class: None,
        });
    }
}

impl PeerDirectory for TestDirectory {
    fn bonded_peers(&self) -> Vec<PeerAddr> {
        self.peers.lock().clone()
    }
}

/// Hands out pre-arranged streams; empty queue means connection refused.
#[derive(Clone)]
struct TestStrategy {
    streams: Arc<Mutex<Vec<Box<dyn LinkStream>>>>,
}

impl TestStrategy {
    fn new() -> Self {
        Self {
            streams: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn push(&self, stream: Box<dyn LinkStream>) {
        self.streams.lock().push(stream);
    }
}

impl ConnectStrategy for TestStrategy {
    fn name(&self) -> &str {
        "test"
    }

    fn connect(&self, _peer: &PeerAddr) -> Result<Box<dyn LinkStream>> {
        self.streams.lock().pop().ok_or(Error::NotConnected)
    }
}

/// Acceptor fed by the test over a channel.
struct TestAcceptor {
    rx: Receiver<Box<dyn LinkStream>>,
}

impl TestAcceptor {
    fn pair() -> (Self, Sender<Box<dyn LinkStream>>) {
        let (tx, rx) = unbounded();
        (Self { rx }, tx)
    }
}

impl Acceptor for TestAcceptor {
    fn name(&self) -> &str {
        "test"
    }

    fn poll_accept(&mut self) -> Result<Option<Box<dyn LinkStream>>> {
        Ok(self.rx.try_recv().ok())
    }
}

#[derive(Debug, PartialEq)]
enum ClientEvent {
    Connectivity(bool),
    Inbound(Message),
}

struct RecordingHandler {
    tx: Sender<ClientEvent>,
}

impl ClientHandler for RecordingHandler {
    fn on_connectivity(&self, connected: bool) {
        let _ = self.tx.send(ClientEvent::Connectivity(connected));
    }

    fn on_message(&self, msg: Message) {
        let _ = self.tx.send(ClientEvent::Inbound(msg));
    }
}

struct NullServerHandler;

impl ServerHandler for NullServerHandler {
    fn on_message(&self, _msg: Message, _session: &Arc<Session>) {}
}

struct StubFetcher;

impl TileFetcher for StubFetcher {
    fn fetch(&self, _key: TileKey) -> Option<Vec<u8>> {
        Some(PNG_STUB.to_vec())
    }
}

fn wait_for_sessions(server: &LinkServer, expected: usize) {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while server.session_count() != expected && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.session_count(), expected);
}

#[test]
fn client_retries_until_a_peer_appears() {
    let directory = TestDirectory::empty();
    let strategy = TestStrategy::new();
    let (tx, rx) = unbounded();

    let client = LinkClient::with_retry_delay(
        Box::new(directory.clone()),
        vec![Box::new(strategy.clone())],
        Box::new(RecordingHandler { tx }),
        RETRY_DELAY,
    );
    client.start().unwrap();

    // Nothing to connect to yet; the loop must keep retrying quietly
    std::thread::sleep(RETRY_DELAY * 3);
    assert!(rx.try_recv().is_err());
    assert!(!client.is_connected());

    // A bonded peer appears with a connectable stream
    let (local, _remote) = MemoryLinkStream::pair();
    strategy.push(Box::new(local));
    directory.add("peer-1");

    assert_eq!(
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        ClientEvent::Connectivity(true)
    );
    assert!(client.is_connected());

    client.stop();
}

#[test]
fn tile_request_is_answered_on_the_requesting_session() {
    let server = LinkServer::new(Box::new(NullServerHandler));
    server.set_tile_cache(TileCache::direct(
        Arc::new(StubFetcher),
        Arc::new(drishti_link::workers::WorkerPool::new("test-fetch", 2).unwrap()),
        16,
    ));
    let (acceptor, accept_tx) = TestAcceptor::pair();
    server.start(vec![Box::new(acceptor)]).unwrap();

    // Client end of the link
    let directory = TestDirectory::empty();
    let strategy = TestStrategy::new();
    let (tx, rx) = unbounded();
    let client = LinkClient::with_retry_delay(
        Box::new(directory.clone()),
        vec![Box::new(strategy.clone())],
        Box::new(RecordingHandler { tx }),
        RETRY_DELAY,
    );

    let (client_end, server_end) = MemoryLinkStream::pair();
    strategy.push(Box::new(client_end));
    accept_tx.send(Box::new(server_end)).unwrap();
    directory.add("handheld");
    client.start().unwrap();

    assert_eq!(
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        ClientEvent::Connectivity(true)
    );
    wait_for_sessions(&server, 1);

    let key = TileKey::new(15, 16368, 10893);
    client
        .send(&Message::TileRequest(key.to_request()))
        .unwrap();

    match rx.recv_timeout(RECV_TIMEOUT).unwrap() {
        ClientEvent::Inbound(Message::TileResponse(resp)) => {
            assert_eq!(resp.id, key.correlation_id());
            assert!(resp.data.is_some());
        }
        other => panic!("expected tile response, got {:?}", other),
    }

    client.stop();
    server.stop();
}

#[test]
fn proxied_cache_round_trip_over_the_link() {
    let server = LinkServer::new(Box::new(NullServerHandler));
    server.set_tile_cache(TileCache::direct(
        Arc::new(StubFetcher),
        Arc::new(drishti_link::workers::WorkerPool::new("test-fetch", 2).unwrap()),
        16,
    ));
    let (acceptor, accept_tx) = TestAcceptor::pair();
    server.start(vec![Box::new(acceptor)]).unwrap();

    // Display side: a proxied cache that sends requests over the client
    // and receives responses through the client handler.
    struct ClientRequester {
        client: Arc<LinkClient>,
    }
    impl TileRequester for ClientRequester {
        fn request_tile(&self, request: drishti_link::protocol::TileRequest) -> Result<()> {
            self.client.send(&Message::TileRequest(request))
        }
    }

    struct CacheFeeder {
        cache: Mutex<Option<Arc<TileCache>>>,
        connectivity: Sender<bool>,
    }
    impl ClientHandler for CacheFeeder {
        fn on_connectivity(&self, connected: bool) {
            let _ = self.connectivity.send(connected);
        }
        fn on_message(&self, msg: Message) {
            if let Message::TileResponse(resp) = msg {
                if let Some(cache) = self.cache.lock().as_ref() {
                    cache.deliver_encoded(&resp.id, resp.data.as_deref());
                }
            }
        }
    }

    let directory = TestDirectory::empty();
    let strategy = TestStrategy::new();
    let (conn_tx, conn_rx) = unbounded();
    let feeder = Arc::new(CacheFeeder {
        cache: Mutex::new(None),
        connectivity: conn_tx,
    });

    struct SharedHandler(Arc<CacheFeeder>);
    impl ClientHandler for SharedHandler {
        fn on_connectivity(&self, connected: bool) {
            self.0.on_connectivity(connected);
        }
        fn on_message(&self, msg: Message) {
            self.0.on_message(msg);
        }
    }

    let client = Arc::new(LinkClient::with_retry_delay(
        Box::new(directory.clone()),
        vec![Box::new(strategy.clone())],
        Box::new(SharedHandler(Arc::clone(&feeder))),
        RETRY_DELAY,
    ));
    let cache = TileCache::proxied(
        Arc::new(ClientRequester {
            client: Arc::clone(&client),
        }),
        16,
    );
    *feeder.cache.lock() = Some(Arc::clone(&cache));

    let (updated_tx, updated_rx) = unbounded();
    cache.set_update_observer(move |key| {
        let _ = updated_tx.send(key);
    });

    let (client_end, server_end) = MemoryLinkStream::pair();
    strategy.push(Box::new(client_end));
    accept_tx.send(Box::new(server_end)).unwrap();
    directory.add("handheld");
    client.start().unwrap();

    assert_eq!(conn_rx.recv_timeout(RECV_TIMEOUT).unwrap(), true);
    wait_for_sessions(&server, 1);

    let key = TileKey::new(12, 2199, 1343);
    // First lookup misses and goes over the link
    assert!(cache.get(key).is_none());
    assert_eq!(updated_rx.recv_timeout(RECV_TIMEOUT).unwrap(), key);
    // Now a local hit
    let tile = cache.get(key).expect("tile cached after response");
    assert_eq!(tile.as_slice(), PNG_STUB);

    client.stop();
    server.stop();
}

#[test]
fn package_transfer_end_to_end() {
    let server = LinkServer::new(Box::new(NullServerHandler));
    let (acceptor, accept_tx) = TestAcceptor::pair();
    server.start(vec![Box::new(acceptor)]).unwrap();

    let directory = TestDirectory::empty();
    let strategy = TestStrategy::new();
    let (tx, rx) = unbounded();
    let client = LinkClient::with_retry_delay(
        Box::new(directory.clone()),
        vec![Box::new(strategy.clone())],
        Box::new(RecordingHandler { tx }),
        RETRY_DELAY,
    );

    let (client_end, server_end) = MemoryLinkStream::pair();
    strategy.push(Box::new(client_end));
    accept_tx.send(Box::new(server_end)).unwrap();
    directory.add("handheld");
    client.start().unwrap();

    assert_eq!(
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        ClientEvent::Connectivity(true)
    );
    wait_for_sessions(&server, 1);

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    bulk::send_package(
        std::io::Cursor::new(payload.clone()),
        payload.len() as u64,
        |msg| {
            server.broadcast(msg);
            Ok(())
        },
        |_, _| {},
    )
    .unwrap();

    let mut receiver = PackageReceiver::new();
    let mut complete = None;
    let deadline = Instant::now() + RECV_TIMEOUT;
    while complete.is_none() && Instant::now() < deadline {
        match rx.recv_timeout(RECV_TIMEOUT).unwrap() {
            ClientEvent::Inbound(msg) => {
                if let Some(bytes) = receiver.handle(&msg) {
                    complete = Some(bytes);
                }
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(complete.as_deref(), Some(payload.as_slice()));

    client.stop();
    server.stop();
}
