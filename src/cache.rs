use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Shared key/value cache with per-entry TTL and an optional
/// stale-while-revalidate window.
///
/// Entries inside their TTL are fresh. Entries between TTL and
/// TTL + stale window are still served, but [`Cache::is_stale`] reports them
/// so the caller can kick a background refresh. Entries past the stale window
/// read as absent.
#[derive(Debug)]
pub struct Cache {
    name: &'static str,
    entries: DashMap<String, Entry>,
}

#[derive(Debug)]
struct Entry {
    value: serde_json::Value,
    inserted: Instant,
    ttl: Duration,
    stale_while_revalidate: Duration,
}

impl Entry {
    fn age(&self) -> Duration {
        self.inserted.elapsed()
    }

    fn is_dead(&self) -> bool {
        self.age() > self.ttl + self.stale_while_revalidate
    }
}

impl Cache {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.is_dead() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        match serde_json::from_value(entry.value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(cache = self.name, key, "Cached value has wrong shape: {e}");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl: Duration) {
        self.set_with_stale(key, value, ttl, Duration::ZERO)
    }

    pub fn set_with_stale<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Duration,
        stale_while_revalidate: Duration,
    ) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(cache = self.name, "Failed to serialize cache value: {e}");
                return;
            }
        };
        self.entries.insert(
            key.into(),
            Entry {
                value,
                inserted: Instant::now(),
                ttl,
                stale_while_revalidate,
            },
        );
    }

    /// Remaining fresh lifetime. `None` when absent, zero when already stale.
    pub fn get_ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        if entry.is_dead() {
            return None;
        }
        Some(entry.ttl.saturating_sub(entry.age()))
    }

    /// An entry is stale once its age passed TTL (it is still served from the
    /// stale window) or once it got older than `threshold`.
    pub fn is_stale(&self, key: &str, threshold: Duration) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return true;
        };
        if entry.is_dead() {
            return true;
        }
        entry.age() > entry.ttl || entry.age() > threshold
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Caps the wait for the lock.
    pub timeout: Duration,
    /// Caps the held duration; the body is aborted and the lock released when
    /// it runs out.
    pub ttl: Duration,
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            ttl: Duration::from_secs(60),
            retry_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LockError {
    /// Could not acquire the lock within `timeout`.
    Timeout,
    /// Acquired, but the body outlived `ttl` and was aborted.
    TtlExceeded,
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Timeout => write!(f, "lock wait timed out"),
            LockError::TtlExceeded => write!(f, "lock holder exceeded ttl"),
        }
    }
}

impl std::error::Error for LockError {}

#[derive(Debug, Default)]
struct LockState {
    gate: tokio::sync::Mutex<()>,
    generation: Mutex<u64>,
}

/// Named mutex registry used to coalesce duplicate concurrent work (library
/// listings, resolve calls, metadata fetches).
///
/// Process-wide: one holder per name. Followers retry until `timeout`, so a
/// caller that re-checks its cache after acquisition sees the leader's
/// result.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<String, Arc<LockState>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, name: &str) -> Arc<LockState> {
        self.locks
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    /// Current lock generation: bumped on every release.
    pub fn generation(&self, name: &str) -> u64 {
        *self.state(name).generation.lock().unwrap()
    }

    pub async fn with_lock<T, F, Fut>(
        &self,
        name: &str,
        opts: LockOptions,
        body: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let state = self.state(name);
        let deadline = Instant::now() + opts.timeout;

        let guard = loop {
            match state.gate.try_lock() {
                Ok(guard) => break guard,
                Err(_) => {
                    if Instant::now() >= deadline {
                        tracing::debug!(lock = name, "Lock wait timed out");
                        return Err(LockError::Timeout);
                    }
                    // jitter keeps parked followers from stampeding together
                    let jitter = Duration::from_millis(rand::random_range(0..25));
                    tokio::time::sleep(opts.retry_interval + jitter).await;
                }
            }
        };

        let result = tokio::time::timeout(opts.ttl, body()).await;
        *state.generation.lock().unwrap() += 1;
        drop(guard);
        result.map_err(|_| LockError::TtlExceeded)
    }
}

/// Process-wide cache registry. Initialised lazily; `teardown` empties every
/// cache on shutdown.
#[derive(Debug)]
pub struct CacheRegistry {
    pub metadata: Cache,
    pub library: Cache,
    pub availability: Cache,
    pub resolve: Cache,
    /// Bounded playback-link cache: links expire server-side, keep only the
    /// hot set.
    pub playback_links: Mutex<lru::LruCache<String, (String, Instant)>>,
}

impl CacheRegistry {
    const PLAYBACK_LINK_CAPACITY: usize = 4096;

    fn construct() -> Self {
        Self {
            metadata: Cache::new("metadata"),
            library: Cache::new("library"),
            availability: Cache::new("availability"),
            resolve: Cache::new("resolve"),
            playback_links: Mutex::new(lru::LruCache::new(
                NonZeroUsize::new(Self::PLAYBACK_LINK_CAPACITY).unwrap(),
            )),
        }
    }

    pub fn get_playback_link(&self, key: &str, validity: Duration) -> Option<String> {
        let mut links = self.playback_links.lock().unwrap();
        match links.get(key) {
            Some((url, inserted)) if inserted.elapsed() < validity => Some(url.clone()),
            Some(_) => {
                links.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put_playback_link(&self, key: impl Into<String>, url: impl Into<String>) {
        self.playback_links
            .lock()
            .unwrap()
            .put(key.into(), (url.into(), Instant::now()));
    }

    pub fn teardown(&self) {
        self.metadata.clear();
        self.library.clear();
        self.availability.clear();
        self.resolve.clear();
        self.playback_links.lock().unwrap().clear();
    }
}

pub static CACHES: LazyLock<CacheRegistry> = LazyLock::new(CacheRegistry::construct);
pub static LOCKS: LazyLock<LockManager> = LazyLock::new(LockManager::new);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ttl_and_stale_window() {
        let cache = Cache::new("test");
        cache.set_with_stale(
            "k",
            &42u32,
            Duration::from_secs(10),
            Duration::from_secs(20),
        );
        assert_eq!(cache.get::<u32>("k"), Some(42));
        assert!(!cache.is_stale("k", Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(15)).await;
        // within the stale window: still served, flagged stale
        assert_eq!(cache.get::<u32>("k"), Some(42));
        assert!(cache.is_stale("k", Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_threshold_is_independent_of_ttl() {
        let cache = Cache::new("test");
        cache.set("k", &1u32, Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.is_stale("k", Duration::from_secs(5)));
        assert!(!cache.is_stale("k", Duration::from_secs(50)));
    }

    #[tokio::test]
    async fn lock_runs_body_once_per_holder() {
        let manager = LockManager::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = tokio::task::JoinSet::new();
        let manager = Arc::new(manager);
        for _ in 0..8 {
            let manager = manager.clone();
            let calls = calls.clone();
            handles.spawn(async move {
                manager
                    .with_lock("k", LockOptions::default(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    })
                    .await
            });
        }
        while let Some(res) = handles.join_next().await {
            assert!(res.unwrap().is_ok());
        }
        // every caller got the lock eventually, strictly serialized
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn lock_timeout_fails_waiters() {
        let manager = Arc::new(LockManager::new());
        let holder = manager.clone();
        let hold = tokio::spawn(async move {
            holder
                .with_lock("busy", LockOptions::default(), || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let opts = LockOptions {
            timeout: Duration::from_millis(50),
            retry_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let waiter = manager.with_lock("busy", opts, || async {}).await;
        assert_eq!(waiter.unwrap_err(), LockError::Timeout);
        hold.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lock_ttl_aborts_body() {
        let manager = LockManager::new();
        let opts = LockOptions {
            ttl: Duration::from_millis(20),
            ..Default::default()
        };
        let res = manager
            .with_lock("slow", opts, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await;
        assert_eq!(res.unwrap_err(), LockError::TtlExceeded);
    }

    #[tokio::test]
    async fn generation_bumps_on_release() {
        let manager = LockManager::new();
        assert_eq!(manager.generation("g"), 0);
        manager
            .with_lock("g", LockOptions::default(), || async {})
            .await
            .unwrap();
        assert_eq!(manager.generation("g"), 1);
    }
}
