//! Keyspace Engine with Expiry, Memory Accounting and LFU Eviction
//!
//! This module implements the core storage engine for sparkkv: a
//! string-valued keyspace with optional per-key TTL, an expiry index
//! mirroring the keys that can expire, approximate memory accounting and
//! least-frequently-used eviction against a configurable ceiling.
//!
//! ## Design Decisions
//!
//! 1. **Single-threaded ownership**: the engine is exclusively owned by the
//!    event-loop thread. Every operation takes `&mut self`; there are no
//!    locks, no atomics and no shared state.
//! 2. **Lazy + active expiry**: keys are checked for expiry on access
//!    (lazy) plus a periodic sweep over the expiry index.
//! 3. **Wall-clock milliseconds**: expiry timestamps are absolute 64-bit
//!    millisecond epochs so they survive append-only-file replay across
//!    process restarts.
//!
//! ## Expiry index invariant
//!
//! A key appears in the expiry index if and only if its entry carries a
//! finite `expires_at_ms`, and the two timestamps agree. The index lets
//! the sweep walk only the keys that can actually expire.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Default memory ceiling: 100 MiB.
pub const DEFAULT_MEMORY_LIMIT: usize = 100 * 1024 * 1024;

/// Fixed per-entry overhead used by the memory estimator.
///
/// Covers the Entry struct, the key handle and hash-table bookkeeping.
/// The estimate is deliberately approximate; it drives eviction triggers
/// and INFO reporting, not correctness.
pub const ENTRY_OVERHEAD: usize = 40;

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// Absolute expiry in ms since the Unix epoch (None = never expires)
    pub expires_at_ms: Option<u64>,
    /// LFU frequency counter; starts at 1, bumped on every GET hit
    pub access_count: u32,
    /// When this entry was last read, in ms since the Unix epoch
    pub last_access_ms: u64,
}

impl Entry {
    fn new(value: Bytes, expires_at_ms: Option<u64>, now: u64) -> Self {
        Self {
            value,
            expires_at_ms,
            access_count: 1,
            last_access_ms: now,
        }
    }
}

/// Estimated memory usage and eviction accounting.
#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    /// Estimated bytes held by live entries
    pub estimated_bytes: usize,
    /// Configured ceiling in bytes
    pub limit_bytes: usize,
    /// Total entries removed by eviction since startup
    pub evictions_total: u64,
}

/// The keyspace engine.
///
/// Owned by the event loop; all operations run on the loop thread.
///
/// # Example
///
/// ```
/// use sparkkv::storage::{now_ms, StorageEngine};
/// use bytes::Bytes;
///
/// let mut engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("value"), None);
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("value")));
///
/// // Set with a 60 second TTL
/// let deadline = now_ms() + 60_000;
/// engine.set(Bytes::from("session"), Bytes::from("abc123"), Some(deadline));
/// ```
#[derive(Debug)]
pub struct StorageEngine {
    /// The primary map: a key exists iff it is present here
    entries: HashMap<Bytes, Entry>,

    /// Mirror of the finite-TTL subset: key -> expires_at_ms
    expiry_index: HashMap<Bytes, u64>,

    /// Memory estimate, ceiling and eviction counter
    memory: MemoryStats,

    /// Keys removed because their TTL elapsed (lazy or swept)
    expired_total: u64,
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new engine with the default 100 MiB memory limit.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MEMORY_LIMIT)
    }

    /// Creates a new engine with an explicit memory limit in bytes.
    pub fn with_limit(limit_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            expiry_index: HashMap::new(),
            memory: MemoryStats {
                estimated_bytes: 0,
                limit_bytes,
                evictions_total: 0,
            },
            expired_total: 0,
        }
    }

    /// Estimated footprint of one entry: key + value + fixed overhead.
    #[inline]
    fn footprint(key: &[u8], value: &[u8]) -> usize {
        key.len() + value.len() + ENTRY_OVERHEAD
    }

    /// Inserts or replaces an entry.
    ///
    /// `expires_at_ms` of `None` stores the key without a TTL; a previous
    /// TTL on the same key does not carry over. When the insert would push
    /// the memory estimate over the limit, lowest-frequency entries are
    /// evicted first; the incoming key itself is never an eviction victim
    /// because it is inserted only after eviction completes.
    pub fn set(&mut self, key: Bytes, value: Bytes, expires_at_ms: Option<u64>) {
        let now = now_ms();
        let new_footprint = Self::footprint(&key, &value);

        // Drop the old entry's contribution before sizing the insert.
        if let Some(old) = self.entries.remove(&key) {
            self.memory.estimated_bytes = self
                .memory
                .estimated_bytes
                .saturating_sub(Self::footprint(&key, &old.value));
            self.expiry_index.remove(&key);
        }

        if self.memory.estimated_bytes + new_footprint > self.memory.limit_bytes {
            // Low watermark at 80% of the limit, clamped so the new entry
            // still fits under the limit whenever it can.
            let watermark = self.memory.limit_bytes - self.memory.limit_bytes / 5;
            let target =
                watermark.min(self.memory.limit_bytes.saturating_sub(new_footprint));
            self.evict_to(target);
        }

        if let Some(deadline) = expires_at_ms {
            self.expiry_index.insert(key.clone(), deadline);
        }
        self.memory.estimated_bytes += new_footprint;
        self.entries
            .insert(key, Entry::new(value, expires_at_ms, now));

        self.debug_check_invariants();
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired
    /// key is removed on the spot (lazy expiry). A hit bumps the LFU
    /// counter and refreshes the last-access time.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        let now = now_ms();
        if self.expire_if_due(key, now) {
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.access_count = entry.access_count.saturating_add(1);
        entry.last_access_ms = now;
        Some(entry.value.clone())
    }

    /// Deletes the given keys, returning how many were live.
    ///
    /// A key that was present but already expired is removed as well, yet
    /// does not contribute to the returned count.
    pub fn del(&mut self, keys: &[Bytes]) -> u64 {
        let now = now_ms();
        let mut removed = 0;
        for key in keys {
            if self.expire_if_due(key, now) {
                continue;
            }
            if let Some(entry) = self.entries.remove(key) {
                self.memory.estimated_bytes = self
                    .memory
                    .estimated_bytes
                    .saturating_sub(Self::footprint(key, &entry.value));
                self.expiry_index.remove(key);
                removed += 1;
            }
        }
        self.debug_check_invariants();
        removed
    }

    /// Removes every entry whose deadline has passed.
    ///
    /// Walks only the expiry index, so persistent keys cost nothing.
    /// Returns the number of entries removed.
    pub fn sweep(&mut self) -> usize {
        let now = now_ms();
        let due: Vec<Bytes> = self
            .expiry_index
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &due {
            self.remove_expired(key);
        }

        if !due.is_empty() {
            debug!(expired = due.len(), "sweep removed expired keys");
        }
        self.debug_check_invariants();
        due.len()
    }

    /// Evicts lowest-frequency entries until the estimate is at or below
    /// `target_bytes`.
    ///
    /// Victims are taken in ascending `access_count` order, ties broken
    /// stably; every removal counts toward `evictions_total`.
    pub fn evict_to(&mut self, target_bytes: usize) {
        if self.memory.estimated_bytes <= target_bytes {
            return;
        }

        let mut candidates: Vec<(u32, Bytes)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.access_count, key.clone()))
            .collect();
        candidates.sort_by_key(|(count, _)| *count);

        let mut evicted = 0u64;
        for (_, key) in candidates {
            if self.memory.estimated_bytes <= target_bytes {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                self.memory.estimated_bytes = self
                    .memory
                    .estimated_bytes
                    .saturating_sub(Self::footprint(&key, &entry.value));
                self.expiry_index.remove(&key);
                evicted += 1;
            }
        }

        self.memory.evictions_total += evicted;
        if evicted > 0 {
            debug!(
                evicted,
                estimated_bytes = self.memory.estimated_bytes,
                target_bytes,
                "evicted low-frequency keys"
            );
        }
    }

    /// If the key's TTL has elapsed, removes it from both maps.
    ///
    /// Returns true when the key was expired (and is now gone).
    fn expire_if_due(&mut self, key: &[u8], now: u64) -> bool {
        match self.expiry_index.get(key) {
            Some(&deadline) if deadline <= now => {
                self.remove_expired(key);
                true
            }
            _ => false,
        }
    }

    fn remove_expired(&mut self, key: &[u8]) {
        self.expiry_index.remove(key);
        if let Some(entry) = self.entries.remove(key) {
            self.memory.estimated_bytes = self
                .memory
                .estimated_bytes
                .saturating_sub(Self::footprint(key, &entry.value));
            self.expired_total += 1;
        }
    }

    /// Returns the number of live entries (expired-but-unswept included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the keyspace holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys carrying a finite TTL.
    pub fn expiring_len(&self) -> usize {
        self.expiry_index.len()
    }

    /// Keys removed because their TTL elapsed, since startup.
    pub fn expired_total(&self) -> u64 {
        self.expired_total
    }

    /// Current memory accounting.
    pub fn memory(&self) -> MemoryStats {
        self.memory
    }

    /// Updates the memory ceiling. Takes effect on the next insert; no
    /// eager eviction happens here.
    pub fn set_memory_limit(&mut self, limit_bytes: usize) {
        self.memory.limit_bytes = limit_bytes;
    }

    /// Cross-checks the expiry index against the keyspace.
    ///
    /// An inconsistency here is a programming bug, so it fails loudly in
    /// debug builds and compiles to nothing in release builds.
    #[inline]
    fn debug_check_invariants(&self) {
        #[cfg(debug_assertions)]
        {
            for (key, &deadline) in &self.expiry_index {
                debug_assert_eq!(
                    self.entries.get(key).and_then(|e| e.expires_at_ms),
                    Some(deadline),
                    "expiry index out of sync for key {:?}",
                    key
                );
            }
            let with_ttl = self
                .entries
                .values()
                .filter(|e| e.expires_at_ms.is_some())
                .count();
            debug_assert_eq!(with_ttl, self.expiry_index.len());
        }
    }
}
