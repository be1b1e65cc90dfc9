//! Time-bounded path resolution cache
//!
//! Maps normalized paths to the node they last resolved to. Entries expire
//! after a fixed TTL; expired entries are dropped when looked up and swept
//! from the whole map at most once per TTL period on insert. Mutating
//! adapter operations invalidate entries explicitly before they return, so
//! a lookup that starts after a mutation completes never sees the
//! pre-mutation node.
//!
//! Every invalidation bumps a generation counter. A resolution that read
//! the store before an invalidation inserts with [`ResolutionCache::put_if_current`]
//! and is discarded, so it cannot write a pre-mutation node back.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::path;
use crate::resolver::ResolvedNode;

/// Default time-to-live for cached resolutions
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry {
    node: ResolvedNode,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

struct Entries {
    map: HashMap<String, CacheEntry>,
    generation: u64,
    last_sweep: Instant,
}

/// Thread-safe TTL cache from path to resolved node.
///
/// One lock guards the map; every critical section is a plain map
/// operation, no remote calls happen while it is held.
pub struct ResolutionCache {
    ttl: Duration,
    entries: Mutex<Entries>,
}

impl ResolutionCache {
    /// Create a cache. A zero `ttl` disables caching entirely.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                generation: 0,
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Create a cache that never holds anything
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Current invalidation generation. Capture it before reading the
    /// store and hand it to [`ResolutionCache::put_if_current`].
    pub fn generation(&self) -> u64 {
        self.entries.lock().generation
    }

    /// Look up a path, evicting the entry if it has expired
    pub fn get(&self, path: &str) -> Option<ResolvedNode> {
        if !self.is_enabled() {
            return None;
        }

        let key = path::normalize(path);
        let mut entries = self.entries.lock();
        match entries.map.get(&key) {
            Some(entry) if entry.is_fresh(self.ttl) => Some(entry.node.clone()),
            Some(_) => {
                trace!("cache expired: {}", key);
                entries.map.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Insert unconditionally
    pub fn put(&self, path: &str, node: ResolvedNode) {
        self.insert(path, node, Instant::now(), None);
    }

    /// Insert only if nothing was invalidated since `generation` was read.
    /// Returns whether the entry was stored.
    pub fn put_if_current(&self, path: &str, node: ResolvedNode, generation: u64) -> bool {
        self.insert(path, node, Instant::now(), Some(generation))
    }

    fn insert(
        &self,
        path: &str,
        node: ResolvedNode,
        inserted_at: Instant,
        generation: Option<u64>,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let key = path::normalize(path);
        let mut entries = self.entries.lock();
        if generation.is_some_and(|g| g != entries.generation) {
            trace!("cache insert dropped, invalidated meanwhile: {}", key);
            return false;
        }

        if entries.last_sweep.elapsed() >= self.ttl {
            let ttl = self.ttl;
            let before = entries.map.len();
            entries.map.retain(|_, entry| entry.is_fresh(ttl));
            entries.last_sweep = Instant::now();
            trace!("cache sweep: {} -> {} entries", before, entries.map.len());
        }

        entries.map.insert(key, CacheEntry { node, inserted_at });
        true
    }

    /// Drop the entry for exactly this path
    pub fn invalidate(&self, path: &str) {
        let key = path::normalize(path);
        let mut entries = self.entries.lock();
        entries.generation += 1;
        if entries.map.remove(&key).is_some() {
            trace!("cache invalidated: {}", key);
        }
    }

    /// Drop the entry for this path and every path underneath it
    pub fn invalidate_prefix(&self, path: &str) {
        let prefix = path::normalize(path);
        let mut entries = self.entries.lock();
        entries.generation += 1;
        entries.map.retain(|key, _| !path::is_within(key, &prefix));
        trace!("cache invalidated recursively: {}", prefix);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.generation += 1;
        entries.map.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
