//! Multi-level result cache: a bounded in-process LRU+TTL tier in front of
//! an optional SQLite-backed shared tier. Keys are content-addressed blake3
//! hashes; entries are only ever looked up by key, never enumerated.

pub mod sqlite;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::task::TierName;
pub use sqlite::SharedCache;

/// Content-addressed identity of a (text, srcLang, tgtLang, tier) tuple.
/// Texts differing only in leading/trailing whitespace or case derive the
/// same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn derive(text: &str, src_lang: &str, tgt_lang: &str, tier: TierName) -> Self {
        let normalized = text.trim().to_lowercase();
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b"|");
        hasher.update(src_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(tgt_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(tier.as_str().as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A cached translation value.
#[derive(Debug, Clone)]
pub struct CachedTranslation {
    pub text: String,
    pub confidence: f32,
    pub tier: TierName,
}

struct LocalEntry {
    value: CachedTranslation,
    created_at: Instant,
    hits: u64,
}

/// Bounded in-process tier. The LRU is kept unbounded internally so that
/// size pressure can be relieved in one amortized batch instead of
/// entry-at-a-time churn: TTL-expired entries go first, then the coldest
/// fraction is dropped in bulk.
pub struct LocalCache {
    inner: Mutex<LruCache<[u8; 32], LocalEntry>>,
    capacity: usize,
    ttl: Duration,
    evict_fraction: f32,
}

impl LocalCache {
    pub fn new(capacity: usize, ttl: Duration, evict_fraction: f32) -> Self {
        Self {
            inner: Mutex::new(LruCache::unbounded()),
            capacity,
            ttl,
            evict_fraction,
        }
    }

    /// Look up and touch an entry. Expired entries are dropped on sight.
    pub fn get(&self, key: &CacheKey) -> Option<CachedTranslation> {
        let mut cache = self.inner.lock();
        let expired = match cache.get_mut(key.as_bytes()) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => {
                entry.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key.as_bytes());
        }
        None
    }

    pub fn put(&self, key: CacheKey, value: CachedTranslation) {
        let mut cache = self.inner.lock();
        if !cache.contains(key.as_bytes()) && cache.len() >= self.capacity {
            let purged = Self::purge_expired(&mut cache, self.ttl);
            if cache.len() >= self.capacity {
                let drop_n =
                    ((self.capacity as f32 * self.evict_fraction).ceil() as usize).max(1);
                for _ in 0..drop_n {
                    if cache.pop_lru().is_none() {
                        break;
                    }
                }
                debug!(purged, dropped = drop_n, "local cache batch eviction");
            }
        }
        cache.put(
            *key.as_bytes(),
            LocalEntry {
                value,
                created_at: Instant::now(),
                hits: 0,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit count of one entry, without touching LRU order.
    pub fn entry_hits(&self, key: &CacheKey) -> Option<u64> {
        self.inner.lock().peek(key.as_bytes()).map(|e| e.hits)
    }

    fn purge_expired(cache: &mut LruCache<[u8; 32], LocalEntry>, ttl: Duration) -> usize {
        let expired: Vec<[u8; 32]> = cache
            .iter()
            .filter(|(_, entry)| entry.created_at.elapsed() >= ttl)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }
}

/// Counters for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub local_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub local_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f32 {
        let hits = self.local_hits + self.shared_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}

/// Two-tier cache manager. Shared-tier unavailability is never a hard
/// failure: the manager silently degrades to local-only.
pub struct CacheManager {
    local: LocalCache,
    shared: Option<std::sync::Arc<SharedCache>>,
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl CacheManager {
    pub fn new(settings: &CacheSettings) -> Self {
        let shared = settings.shared_path.as_ref().and_then(|path| {
            match SharedCache::open(path, settings.shared_ttl, settings.shared_busy_timeout) {
                Ok(cache) => Some(std::sync::Arc::new(cache)),
                Err(e) => {
                    warn!(error = %e, "shared cache unavailable, local-only caching");
                    None
                }
            }
        });

        Self {
            local: LocalCache::new(
                settings.local_capacity,
                settings.ttl,
                settings.evict_fraction,
            ),
            shared,
            local_hits: AtomicU64::new(0),
            shared_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    /// Local tier first; on miss, the shared tier is consulted and a shared
    /// hit is promoted into the local tier.
    pub fn get(&self, key: &CacheKey) -> Option<CachedTranslation> {
        if let Some(value) = self.local.get(key) {
            self.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }
        if let Some(shared) = &self.shared {
            if let Some(value) = shared.get(key.as_bytes()) {
                self.shared_hits.fetch_add(1, Ordering::Relaxed);
                self.local.put(*key, value.clone());
                return Some(value);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write-through: always the local tier, plus the shared tier when
    /// available.
    pub fn put(&self, key: CacheKey, value: CachedTranslation, src_lang: &str, tgt_lang: &str) {
        if let Some(shared) = &self.shared {
            shared.insert(key.as_bytes(), &value, src_lang, tgt_lang);
        }
        self.local.put(key, value);
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f32 {
        self.stats().hit_rate()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            local_entries: self.local.len(),
        }
    }

    pub fn shared(&self) -> Option<std::sync::Arc<SharedCache>> {
        self.shared.clone()
    }
}
