//! Size-bounded payload cache with LRU eviction and max-age expiry

use crate::Clock;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Ceiling for the summed payload size (bytes)
    pub max_size: u64,
    /// Entries idle for longer than this are dropped on read
    #[serde(with = "crate::config::duration_ms")]
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 256 * 1024 * 1024, // 256MB
            max_age: Duration::from_secs(30 * 60),
        }
    }
}

/// Provenance recorded alongside a cached payload
#[derive(Debug, Clone, Default)]
pub struct CacheMeta {
    /// Candidate endpoint that served the payload
    pub source_used: String,
    /// Whether the payload arrived with a compressed transfer encoding
    pub compressed: bool,
}

impl CacheMeta {
    /// Create metadata for a payload served by `source`
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source_used: source.into(),
            compressed: false,
        }
    }

    /// Mark as compressed
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }
}

/// Cached payload plus access bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Payload bytes
    pub payload: Bytes,
    /// Size in bytes
    pub size_bytes: u64,
    /// Insertion time
    pub created_at: Instant,
    /// Last hit (or insertion) time
    pub last_accessed_at: Instant,
    /// Number of hits plus the insertion
    pub access_count: u64,
    /// Candidate endpoint that served it
    pub source_used: String,
    /// Compressed transfer encoding
    pub compressed: bool,
    /// Position in the recency index
    recency: (Instant, u64),
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total entries
    pub entries: usize,
    /// Summed payload size (bytes)
    pub total_size: u64,
    /// Configured ceiling (bytes)
    pub max_size: u64,
    /// Reads answered from the cache
    pub hits: u64,
    /// Entries removed to respect the ceiling
    pub evictions: u64,
    /// Entries dropped on read because they exceeded max age
    pub expirations: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// (last_accessed_at, sequence) -> id, oldest first
    recency: BTreeMap<(Instant, u64), String>,
    total_size: u64,
    sequence: u64,
}

impl CacheState {
    fn next_key(&mut self, at: Instant) -> (Instant, u64) {
        self.sequence += 1;
        (at, self.sequence)
    }

    fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.recency.remove(&entry.recency);
        self.total_size -= entry.size_bytes;
        Some(entry)
    }

    /// Evict least recently accessed entries until `incoming` more bytes fit
    fn evict_for(&mut self, incoming: u64, max_size: u64) -> (usize, u64) {
        let mut evicted = 0;
        let mut freed = 0;

        while self.total_size + incoming > max_size {
            let Some((_, id)) = self.recency.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&id) {
                self.total_size -= entry.size_bytes;
                freed += entry.size_bytes;
                evicted += 1;
            }
        }

        (evicted, freed)
    }
}

/// In-memory payload cache
pub struct CacheStore {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStore {
    /// Create an empty cache
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a payload, refreshing its access bookkeeping on a hit
    pub fn get(&self, id: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut state = self.lock();

        let last_accessed = state.entries.get(id)?.last_accessed_at;
        if now.saturating_duration_since(last_accessed) > self.config.max_age {
            state.remove(id);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            debug!("Cache entry expired: {}", id);
            return None;
        }

        let key = state.next_key(now);
        let entry = state.entries.get_mut(id)?;
        let old_key = std::mem::replace(&mut entry.recency, key);
        entry.last_accessed_at = now;
        entry.access_count += 1;
        let hit = entry.clone();

        state.recency.remove(&old_key);
        state.recency.insert(key, id.to_string());
        self.hits.fetch_add(1, Ordering::Relaxed);

        Some(hit)
    }

    /// Insert a payload, evicting older entries first if the ceiling requires it
    ///
    /// Returns `false` when the payload alone exceeds the ceiling and was not cached.
    pub fn put(&self, id: &str, payload: Bytes, meta: CacheMeta) -> bool {
        let size = payload.len() as u64;
        let now = self.clock.now();
        let mut state = self.lock();

        // Replacing an id must not count its old size twice
        state.remove(id);

        if size > self.config.max_size {
            debug!(
                "Payload for {} ({} bytes) exceeds cache ceiling {}, not cached",
                id, size, self.config.max_size
            );
            return false;
        }

        let (evicted, freed) = state.evict_for(size, self.config.max_size);
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!("Evicted {} entries ({} bytes) from cache", evicted, freed);
        }

        let key = state.next_key(now);
        state.recency.insert(key, id.to_string());
        state.total_size += size;
        state.entries.insert(
            id.to_string(),
            CacheEntry {
                payload,
                size_bytes: size,
                created_at: now,
                last_accessed_at: now,
                access_count: 1,
                source_used: meta.source_used,
                compressed: meta.compressed,
                recency: key,
            },
        );

        true
    }

    /// Evict until `incoming` more bytes fit under the ceiling; returns entries evicted
    pub fn evict_if_needed(&self, incoming: u64) -> usize {
        let (evicted, _) = self.lock().evict_for(incoming, self.config.max_size);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Remove a single entry; returns whether it was present
    pub fn invalidate(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
        state.total_size = 0;
    }

    /// Check presence without touching access bookkeeping
    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Read entry metadata without touching access bookkeeping
    pub fn peek(&self, id: &str) -> Option<CacheEntry> {
        self.lock().entries.get(id).cloned()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed payload size (bytes)
    pub fn total_size(&self) -> u64 {
        self.lock().total_size
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            total_size: state.total_size,
            max_size: self.config.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}
