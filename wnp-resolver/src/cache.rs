//! Sharded TTL + LRU cache with per-key single-flight
//!
//! Each shard is an `LruCache` behind its own mutex, so lookups for
//! different keys rarely contend. Entries expire after their TTL and are
//! evicted least-recently-used when a shard is full.
//!
//! `get_or_try_insert_with` serializes work per key: the first caller runs the
//! loader, concurrent callers for the same key await its result. Only
//! successful results are cached.
//!
//! `CacheStore` persists entries to SQLite; expired rows are discarded on load.

use crate::error::ResolveError;
use chrono::{DateTime, TimeZone, Utc};
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use wnp_common::time::is_expired;

/// A cached value with its TTL metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    pub inserted_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<K, V> CacheEntry<K, V> {
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        is_expired(self.inserted_at, self.ttl, at)
    }
}

struct Slot<V> {
    value: V,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
}

type InFlight<V> = Arc<OnceCell<Result<V, ResolveError>>>;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
}

/// Sharded TTL/LRU cache
pub struct ShardedCache<K, V> {
    shards: Vec<Mutex<LruCache<K, Slot<V>>>>,
    in_flight: Vec<Mutex<HashMap<K, InFlight<V>>>>,
    hasher: RandomState,
    ttl: Duration,
    stats: Mutex<CacheStats>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding a shard lock leaves the shard usable
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K, V> ShardedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding about `capacity` entries over `shards` shards
    pub fn new(capacity: usize, shards: usize, ttl: Duration) -> Self {
        let shards = shards.max(1);
        let per_shard = NonZeroUsize::new(capacity.div_ceil(shards).max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shards).map(|_| Mutex::new(LruCache::new(per_shard))).collect(),
            in_flight: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            ttl,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn shard_index(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) % self.shards.len()
    }

    /// Fresh value for `key`; expired entries are removed on access
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// `get` evaluated at an explicit instant
    pub fn get_at(&self, key: &K, at: DateTime<Utc>) -> Option<V> {
        let idx = self.shard_index(key);
        let mut shard = lock(&self.shards[idx]);

        let lookup = shard
            .get(key)
            .map(|slot| (!is_expired(slot.inserted_at, slot.ttl, at)).then(|| slot.value.clone()));

        let result = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                shard.pop(key);
                None
            }
            None => None,
        };
        drop(shard);

        let mut stats = lock(&self.stats);
        if result.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        result
    }

    /// Insert with the cache's default TTL
    pub fn insert(&self, key: K, value: V) {
        self.insert_entry(key, value, Utc::now(), self.ttl);
    }

    /// Insert with explicit TTL metadata (used when restoring persisted entries)
    pub fn insert_entry(&self, key: K, value: V, inserted_at: DateTime<Utc>, ttl: Duration) {
        let idx = self.shard_index(&key);
        lock(&self.shards[idx]).put(
            key,
            Slot {
                value,
                inserted_at,
                ttl,
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let idx = self.shard_index(key);
        lock(&self.shards[idx]).pop(key).map(|slot| slot.value)
    }

    /// Number of stored entries, expired ones included until touched
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| lock(s).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        *lock(&self.stats)
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut purged = 0;
        for shard in &self.shards {
            let mut shard = lock(shard);
            let expired: Vec<K> = shard
                .iter()
                .filter(|(_, slot)| is_expired(slot.inserted_at, slot.ttl, now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                shard.pop(&key);
                purged += 1;
            }
        }
        purged
    }

    /// Copy of every fresh entry, for persistence
    pub fn snapshot(&self) -> Vec<CacheEntry<K, V>> {
        let now = Utc::now();
        let mut entries = Vec::new();
        for shard in &self.shards {
            let shard = lock(shard);
            for (key, slot) in shard.iter() {
                if !is_expired(slot.inserted_at, slot.ttl, now) {
                    entries.push(CacheEntry {
                        key: key.clone(),
                        value: slot.value.clone(),
                        inserted_at: slot.inserted_at,
                        ttl: slot.ttl,
                    });
                }
            }
        }
        entries
    }

    /// Load previously persisted entries, skipping expired ones
    pub fn restore(&self, entries: Vec<CacheEntry<K, V>>) -> usize {
        let now = Utc::now();
        let mut restored = 0;
        for entry in entries {
            if entry.is_expired(now) {
                continue;
            }
            self.insert_entry(entry.key, entry.value, entry.inserted_at, entry.ttl);
            restored += 1;
        }
        restored
    }

    /// Cached value, or the result of `load`, running `load` at most once per
    /// key at a time. Concurrent callers share the in-flight result.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, load: F) -> Result<V, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ResolveError>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let idx = self.shard_index(&key);
        let cell = {
            let mut in_flight = lock(&self.in_flight[idx]);
            in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let key_ref = &key;
        let result = cell
            .get_or_init(|| async move {
                // A previous leader may have finished between our miss and here
                if let Some(value) = self.get(key_ref) {
                    return Ok(value);
                }
                lock(&self.stats).loads += 1;
                debug!("Cache miss, loading");
                let loaded = load().await;
                if let Ok(value) = &loaded {
                    self.insert(key_ref.clone(), value.clone());
                }
                loaded
            })
            .await
            .clone();

        {
            let mut in_flight = lock(&self.in_flight[idx]);
            if let Some(current) = in_flight.get(&key) {
                if Arc::ptr_eq(current, &cell) {
                    in_flight.remove(&key);
                }
            }
        }

        result
    }
}

/// Persisted TTL in milliseconds; zero means "never expires", so a non-zero
/// TTL never rounds down to it
fn ttl_millis(ttl: Duration) -> i64 {
    if ttl.is_zero() {
        0
    } else {
        i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
    }
}

/// SQLite persistence for cache contents
///
/// One table holds every cache; `namespace` separates them. Keys and values
/// are stored as JSON.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Open or create the cache database
    pub async fn open(path: &Path) -> wnp_common::Result<Self> {
        let pool = wnp_common::db::open_database(path).await?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool, creating the table if needed
    pub async fn with_pool(pool: SqlitePool) -> wnp_common::Result<Self> {
        // Tables written before TTLs were kept in milliseconds hold only
        // disposable cache rows; drop them rather than misread the TTLs.
        let legacy: Option<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('cache_entries') WHERE name = 'ttl_secs'")
                .fetch_optional(&pool)
                .await?;
        if legacy.is_some() {
            info!("Dropping cache table with second-resolution TTLs");
            sqlx::query("DROP TABLE cache_entries").execute(&pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                inserted_at INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Replace a namespace's rows with `entries`
    pub async fn save<K, V>(&self, namespace: &str, entries: &[CacheEntry<K, V>]) -> wnp_common::Result<usize>
    where
        K: Serialize,
        V: Serialize,
    {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cache_entries WHERE namespace = ?")
            .bind(namespace)
            .execute(&mut *tx)
            .await?;

        let mut saved = 0;
        for entry in entries {
            let (key, value) = match (serde_json::to_string(&entry.key), serde_json::to_string(&entry.value)) {
                (Ok(k), Ok(v)) => (k, v),
                _ => {
                    warn!(namespace, "Skipping unserializable cache entry");
                    continue;
                }
            };
            sqlx::query(
                "INSERT OR REPLACE INTO cache_entries (namespace, key, value, inserted_at, ttl_ms)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(namespace)
            .bind(key)
            .bind(value)
            .bind(entry.inserted_at.timestamp_millis())
            .bind(ttl_millis(entry.ttl))
            .execute(&mut *tx)
            .await?;
            saved += 1;
        }
        tx.commit().await?;

        info!(namespace, saved, "Persisted cache entries");
        Ok(saved)
    }

    /// Load a namespace, dropping expired and undecodable rows
    pub async fn load<K, V>(&self, namespace: &str) -> wnp_common::Result<Vec<CacheEntry<K, V>>>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let rows = sqlx::query_as::<_, (String, String, i64, i64)>(
            "SELECT key, value, inserted_at, ttl_ms FROM cache_entries WHERE namespace = ?",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut entries = Vec::with_capacity(rows.len());
        let mut discarded = 0usize;
        for (key, value, inserted_at, ttl_ms) in rows {
            let inserted_at = match Utc.timestamp_millis_opt(inserted_at).single() {
                Some(t) => t,
                None => {
                    discarded += 1;
                    continue;
                }
            };
            let ttl = Duration::from_millis(ttl_ms.max(0) as u64);
            if is_expired(inserted_at, ttl, now) {
                discarded += 1;
                continue;
            }
            match (serde_json::from_str(&key), serde_json::from_str(&value)) {
                (Ok(key), Ok(value)) => entries.push(CacheEntry {
                    key,
                    value,
                    inserted_at,
                    ttl,
                }),
                _ => discarded += 1,
            }
        }

        if discarded > 0 {
            // Expired rows would be dropped on the next save anyway
            sqlx::query(
                "DELETE FROM cache_entries
                 WHERE namespace = ? AND ttl_ms > 0 AND inserted_at + ttl_ms <= ?",
            )
            .bind(namespace)
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        }

        info!(namespace, loaded = entries.len(), discarded, "Loaded persisted cache entries");
        Ok(entries)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
