//! Bounded LRU tile cache with single-flight fetch dispatch.

use crate::error::Result;
use crate::protocol::TileRequest;
use crate::tiles::is_decodable_image;
use crate::workers::WorkerPool;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Tile address: zoom level plus tile column/row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Correlation id used on the wire (`z/x/y`, opaque to the peer)
    pub fn correlation_id(&self) -> String {
        format!("{}/{}/{}", self.z, self.x, self.y)
    }

    /// Parse a correlation id produced by [`correlation_id`](Self::correlation_id)
    pub fn from_correlation_id(id: &str) -> Option<Self> {
        let mut parts = id.split('/');
        let z = parts.next()?.parse().ok()?;
        let x = parts.next()?.parse().ok()?;
        let y = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { z, x, y })
    }

    pub fn to_request(self) -> TileRequest {
        TileRequest {
            id: self.correlation_id(),
            z: self.z,
            x: self.x,
            y: self.y,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Synchronous upstream fetch (HTTP); runs on the worker pool.
pub trait TileFetcher: Send + Sync {
    /// Returns decodable image bytes, or `None` when every source failed.
    fn fetch(&self, key: TileKey) -> Option<Vec<u8>>;
}

/// Proxied fetch: emit a `TileRequest` over the link. The response arrives
/// asynchronously via [`TileCache::deliver_encoded`].
pub trait TileRequester: Send + Sync {
    fn request_tile(&self, request: TileRequest) -> Result<()>;
}

type Waiter = Box<dyn FnOnce(Option<Arc<Vec<u8>>>) + Send>;
type UpdateObserver = Box<dyn Fn(TileKey) + Send + Sync>;

enum FetchMode {
    Direct {
        fetcher: Arc<dyn TileFetcher>,
        pool: Arc<WorkerPool>,
    },
    Proxy(Arc<dyn TileRequester>),
}

struct CacheState {
    images: LruCache<TileKey, Arc<Vec<u8>>>,
    /// Keys with an in-flight fetch; insert-if-absent under the state lock
    /// guarantees at most one fetch per key.
    pending: HashSet<TileKey>,
    /// Per-key callbacks answered on delivery (peer request path)
    waiters: HashMap<TileKey, Vec<Waiter>>,
}

/// Bounded tile cache; see module docs.
pub struct TileCache {
    state: Mutex<CacheState>,
    mode: FetchMode,
    observer: Mutex<Option<UpdateObserver>>,
}

impl TileCache {
    /// Cache that fetches misses itself over HTTP on the worker pool.
    pub fn direct(fetcher: Arc<dyn TileFetcher>, pool: Arc<WorkerPool>, capacity: usize) -> Arc<Self> {
        Self::with_mode(FetchMode::Direct { fetcher, pool }, capacity)
    }

    /// Cache that forwards misses over the link as `TileRequest`s.
    pub fn proxied(requester: Arc<dyn TileRequester>, capacity: usize) -> Arc<Self> {
        Self::with_mode(FetchMode::Proxy(requester), capacity)
    }

    fn with_mode(mode: FetchMode, capacity: usize) -> Arc<Self> {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Arc::new(Self {
            state: Mutex::new(CacheState {
                images: LruCache::new(capacity),
                pending: HashSet::new(),
                waiters: HashMap::new(),
            }),
            mode,
            observer: Mutex::new(None),
        })
    }

    /// Notified after every successful insert (e.g. to redraw the map).
    pub fn set_update_observer<F: Fn(TileKey) + Send + Sync + 'static>(&self, observer: F) {
        *self.observer.lock() = Some(Box::new(observer));
    }

    /// Cache lookup. A miss dispatches at most one fetch for the key and
    /// returns `None` ("not yet available"); poll again or wait for the
    /// update observer.
    pub fn get(self: &Arc<Self>, key: TileKey) -> Option<Arc<Vec<u8>>> {
        {
            let mut state = self.state.lock();
            if let Some(image) = state.images.get(&key) {
                return Some(Arc::clone(image));
            }
            if !state.pending.insert(key) {
                return None; // fetch already in flight
            }
        }
        self.dispatch(key);
        None
    }

    /// Serve a peer's request: answer from cache immediately, otherwise
    /// join the in-flight fetch (or start one) and answer on delivery.
    pub fn fetch_and_respond<F>(self: &Arc<Self>, key: TileKey, respond: F)
    where
        F: FnOnce(Option<Arc<Vec<u8>>>) + Send + 'static,
    {
        let newly_pending = {
            let mut state = self.state.lock();
            if let Some(image) = state.images.get(&key) {
                let image = Arc::clone(image);
                drop(state);
                respond(Some(image));
                return;
            }
            let newly_pending = state.pending.insert(key);
            state.waiters.entry(key).or_default().push(Box::new(respond));
            newly_pending
        };
        if newly_pending {
            self.dispatch(key);
        }
    }

    /// Completion hook for both fetch paths. Success inserts and notifies;
    /// absence or a non-decodable payload just clears the pending marker so
    /// a later request retries (no negative caching).
    pub fn deliver(&self, key: TileKey, bytes: Option<Vec<u8>>) {
        let (image, waiters) = {
            let mut state = self.state.lock();
            state.pending.remove(&key);
            let waiters = state.waiters.remove(&key).unwrap_or_default();
            match bytes {
                Some(data) if is_decodable_image(&data) => {
                    let image = Arc::new(data);
                    state.images.put(key, Arc::clone(&image));
                    (Some(image), waiters)
                }
                Some(_) => {
                    log::warn!("Tile {} payload is not a decodable image", key);
                    (None, waiters)
                }
                None => (None, waiters),
            }
        };

        for waiter in waiters {
            waiter(image.clone());
        }
        if image.is_some() {
            if let Some(observer) = self.observer.lock().as_ref() {
                observer(key);
            }
        }
    }

    /// Completion hook for proxied responses: parse the correlation id and
    /// base64 payload from a `TileResponse`.
    pub fn deliver_encoded(&self, id: &str, data: Option<&str>) {
        let Some(key) = TileKey::from_correlation_id(id) else {
            log::warn!("Tile response with unparseable id: {}", id);
            return;
        };
        let bytes = data.and_then(|b64| match BASE64.decode(b64) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("Tile {} base64 decode failed: {}", key, e);
                None
            }
        });
        self.deliver(key, bytes);
    }

    fn dispatch(self: &Arc<Self>, key: TileKey) {
        match &self.mode {
            FetchMode::Direct { fetcher, pool } => {
                let fetcher = Arc::clone(fetcher);
                let cache = Arc::clone(self);
                pool.execute(move || {
                    let result = fetcher.fetch(key);
                    cache.deliver(key, result);
                });
            }
            FetchMode::Proxy(requester) => {
                if let Err(e) = requester.request_tile(key.to_request()) {
                    log::warn!("Tile request {} failed: {}", key, e);
                    // Clear the marker so the next lookup retries
                    self.deliver(key, None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PNG_STUB: &[u8] = b"\x89PNG\r\n\x1a\nstub";

    struct CountingRequester {
        requests: AtomicUsize,
    }

    impl CountingRequester {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    impl TileRequester for CountingRequester {
        fn request_tile(&self, _request: TileRequest) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn correlation_id_roundtrip() {
        let key = TileKey::new(15, 16368, 10893);
        assert_eq!(key.correlation_id(), "15/16368/10893");
        assert_eq!(TileKey::from_correlation_id("15/16368/10893"), Some(key));
        assert_eq!(TileKey::from_correlation_id("15/16368"), None);
        assert_eq!(TileKey::from_correlation_id("a/b/c"), None);
        assert_eq!(TileKey::from_correlation_id("1/2/3/4"), None);
    }

    #[test]
    fn repeated_get_dispatches_one_fetch() {
        let requester = CountingRequester::new();
        let cache = TileCache::proxied(requester.clone(), 16);
        let key = TileKey::new(12, 1, 2);

        assert!(cache.get(key).is_none());
        assert!(cache.get(key).is_none());
        assert!(cache.get(key).is_none());
        assert_eq!(requester.count(), 1);
    }

    #[test]
    fn failed_delivery_allows_retry() {
        let requester = CountingRequester::new();
        let cache = TileCache::proxied(requester.clone(), 16);
        let key = TileKey::new(12, 1, 2);

        assert!(cache.get(key).is_none());
        cache.deliver(key, None);
        assert!(cache.get(key).is_none());
        assert_eq!(requester.count(), 2);
    }

    #[test]
    fn successful_delivery_is_cached() {
        let requester = CountingRequester::new();
        let cache = TileCache::proxied(requester.clone(), 16);
        let key = TileKey::new(12, 1, 2);

        assert!(cache.get(key).is_none());
        cache.deliver(key, Some(PNG_STUB.to_vec()));

        let hit = cache.get(key).expect("cached tile");
        assert_eq!(hit.as_slice(), PNG_STUB);
        assert_eq!(requester.count(), 1);
    }

    #[test]
    fn undecodable_payload_is_not_cached() {
        let requester = CountingRequester::new();
        let cache = TileCache::proxied(requester.clone(), 16);
        let key = TileKey::new(12, 1, 2);

        assert!(cache.get(key).is_none());
        cache.deliver(key, Some(b"<html>error</html>".to_vec()));
        assert!(cache.get(key).is_none());
        assert_eq!(requester.count(), 2);
    }

    #[test]
    fn lru_eviction_respects_capacity() {
        let requester = CountingRequester::new();
        let cache = TileCache::proxied(requester, 2);
        let keys = [TileKey::new(1, 0, 0), TileKey::new(1, 0, 1), TileKey::new(1, 1, 0)];
        for key in keys {
            cache.deliver(key, Some(PNG_STUB.to_vec()));
        }
        // Oldest evicted; eviction never triggers a fetch by itself, but a
        // later get for the evicted key dispatches one again.
        assert!(cache.get(keys[1]).is_some());
        assert!(cache.get(keys[2]).is_some());
        assert!(cache.get(keys[0]).is_none());
    }

    #[test]
    fn fetch_and_respond_coalesces_waiters() {
        let requester = CountingRequester::new();
        let cache = TileCache::proxied(requester.clone(), 16);
        let key = TileKey::new(9, 3, 4);

        let answered = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let answered = Arc::clone(&answered);
            cache.fetch_and_respond(key, move |image| {
                assert!(image.is_some());
                answered.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(requester.count(), 1);

        cache.deliver(key, Some(PNG_STUB.to_vec()));
        assert_eq!(answered.load(Ordering::SeqCst), 3);

        // Now a hit: answered synchronously, no new request
        let answered_hit = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&answered_hit);
        cache.fetch_and_respond(key, move |image| {
            assert!(image.is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(answered_hit.load(Ordering::SeqCst), 1);
        assert_eq!(requester.count(), 1);
    }

    #[test]
    fn deliver_encoded_parses_id_and_base64() {
        let requester = CountingRequester::new();
        let cache = TileCache::proxied(requester, 16);
        let key = TileKey::new(12, 1, 2);

        assert!(cache.get(key).is_none());
        let b64 = BASE64.encode(PNG_STUB);
        cache.deliver_encoded(&key.correlation_id(), Some(&b64));
        assert!(cache.get(key).is_some());
    }
}
