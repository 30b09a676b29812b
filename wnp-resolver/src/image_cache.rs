//! Cover art cache
//!
//! Cover images referenced by published records are downloaded in the
//! background by a bounded pool of tokio tasks and stored in SQLite keyed by
//! URL, so the overlay can serve them without a live fetch. Stored bytes are
//! bounded: the least recently used images are evicted first. A URL that
//! fails `MAX_STRIKES` times is not requested again.

use crate::error::SinkError;
use crate::remote::http_client;
use crate::sinks::Sink;
use crate::types::ResolvedRecord;
use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Failed downloads after which a URL is given up on
pub const MAX_STRIKES: i64 = 3;

/// Image bytes as served to the overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Stored images by recency, with their total size
struct Usage {
    images: LruCache<String, u64>,
    total_bytes: u64,
}

struct Inner {
    pool: SqlitePool,
    http_client: reqwest::Client,
    max_bytes: u64,
    usage: Mutex<Usage>,
    in_flight: Mutex<HashSet<String>>,
    workers: Arc<Semaphore>,
}

/// SQLite-backed image cache with background downloads
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Inner>,
}

impl ImageCache {
    /// Open or create the image database
    pub async fn open(path: &Path, max_bytes: u64, workers: usize, timeout: Duration) -> Result<Self, SinkError> {
        let pool = wnp_common::db::open_database(path).await.map_err(|e| match e {
            wnp_common::Error::Database(e) => SinkError::Database(e),
            wnp_common::Error::Io(e) => SinkError::Io(e),
            other => SinkError::Io(std::io::Error::other(other.to_string())),
        })?;
        Self::with_pool(pool, max_bytes, workers, timeout).await
    }

    pub async fn with_pool(
        pool: SqlitePool,
        max_bytes: u64,
        workers: usize,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                url TEXT PRIMARY KEY,
                content_type TEXT,
                data BLOB,
                size INTEGER NOT NULL DEFAULT 0,
                strikes INTEGER NOT NULL DEFAULT 0,
                last_used TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let rows = sqlx::query("SELECT url, size FROM images WHERE data IS NOT NULL ORDER BY last_used ASC")
            .fetch_all(&pool)
            .await?;

        let mut usage = Usage {
            images: LruCache::unbounded(),
            total_bytes: 0,
        };
        for row in rows {
            let size: i64 = row.get("size");
            let size = size.max(0) as u64;
            usage.images.put(row.get("url"), size);
            usage.total_bytes += size;
        }

        let cache = Self {
            inner: Arc::new(Inner {
                pool,
                http_client: http_client(timeout).map_err(|e| SinkError::Http(e.to_string()))?,
                max_bytes,
                usage: Mutex::new(usage),
                in_flight: Mutex::new(HashSet::new()),
                workers: Arc::new(Semaphore::new(workers.max(1))),
            }),
        };

        let (images, bytes) = {
            let usage = cache.usage();
            (usage.images.len(), usage.total_bytes)
        };
        let evicted = cache.evict_over_budget();
        cache.delete(&evicted).await?;
        info!(images, bytes, evicted = evicted.len(), "Image cache ready");
        Ok(cache)
    }

    fn usage(&self) -> MutexGuard<'_, Usage> {
        self.inner.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether `url` is stored
    pub fn contains(&self, url: &str) -> bool {
        self.usage().images.contains(url)
    }

    /// Total bytes of stored images
    pub fn total_bytes(&self) -> u64 {
        self.usage().total_bytes
    }

    /// Queue a background download of `url` unless it is stored or already
    /// being fetched. The handle completes when the download settles.
    pub fn request(&self, url: &str) -> Option<JoinHandle<()>> {
        if !(url.starts_with("http://") || url.starts_with("https://")) || self.contains(url) {
            return None;
        }
        if !self.in_flight().insert(url.to_string()) {
            return None;
        }

        let cache = self.clone();
        let url = url.to_string();
        Some(tokio::spawn(async move {
            let permit = Arc::clone(&cache.inner.workers).acquire_owned().await;
            if permit.is_ok() {
                cache.fetch(&url).await;
            }
            cache.in_flight().remove(&url);
        }))
    }

    async fn fetch(&self, url: &str) {
        match self.strikes(url).await {
            Ok(strikes) if strikes >= MAX_STRIKES => {
                debug!(url, strikes, "Skipping image that failed too often");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(url, "Image cache lookup failed: {}", e);
                return;
            }
        }

        debug!(url, "Downloading image");
        let result = match self.download(url).await {
            Ok(image) => self.store(url, image).await,
            Err(e) => {
                debug!(url, "Image download failed: {}", e);
                self.strike(url).await
            }
        };
        if let Err(e) = result {
            warn!(url, "Image cache write failed: {}", e);
        }
    }

    async fn download(&self, url: &str) -> Result<CachedImage, SinkError> {
        let response = self.inner.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Http(format!("HTTP {}", status.as_u16())));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = response.bytes().await?.to_vec();
        if data.is_empty() {
            return Err(SinkError::Http("empty image body".to_string()));
        }
        Ok(CachedImage { content_type, data })
    }

    async fn strikes(&self, url: &str) -> Result<i64, SinkError> {
        let row = sqlx::query("SELECT strikes FROM images WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.inner.pool)
            .await?;
        Ok(row.map(|r| r.get("strikes")).unwrap_or(0))
    }

    async fn strike(&self, url: &str) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO images (url, strikes, last_used) VALUES (?, 1, ?)
             ON CONFLICT(url) DO UPDATE SET strikes = strikes + 1",
        )
        .bind(url)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.inner.pool)
        .await?;
        Ok(())
    }

    /// Store an image and evict older ones past the byte budget
    pub async fn store(&self, url: &str, image: CachedImage) -> Result<(), SinkError> {
        let size = image.data.len() as u64;
        if size > self.inner.max_bytes {
            debug!(url, size, "Image larger than the whole cache, not stored");
            return Ok(());
        }

        sqlx::query(
            "INSERT OR REPLACE INTO images (url, content_type, data, size, strikes, last_used)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(url)
        .bind(&image.content_type)
        .bind(&image.data)
        .bind(size as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.inner.pool)
        .await?;

        {
            let mut usage = self.usage();
            if let Some(previous) = usage.images.put(url.to_string(), size) {
                usage.total_bytes -= previous;
            }
            usage.total_bytes += size;
        }
        let evicted = self.evict_over_budget();
        self.delete(&evicted).await?;
        debug!(url, size, evicted = evicted.len(), "Image cached");
        Ok(())
    }

    fn evict_over_budget(&self) -> Vec<String> {
        let mut usage = self.usage();
        let mut evicted = Vec::new();
        while usage.total_bytes > self.inner.max_bytes {
            let Some((url, size)) = usage.images.pop_lru() else {
                break;
            };
            usage.total_bytes -= size;
            evicted.push(url);
        }
        evicted
    }

    async fn delete(&self, urls: &[String]) -> Result<(), SinkError> {
        for url in urls {
            sqlx::query("DELETE FROM images WHERE url = ?")
                .bind(url)
                .execute(&self.inner.pool)
                .await?;
        }
        Ok(())
    }

    /// Stored image for `url`, marking it recently used
    pub async fn get(&self, url: &str) -> Result<Option<CachedImage>, SinkError> {
        let row = sqlx::query("SELECT content_type, data FROM images WHERE url = ? AND data IS NOT NULL")
            .bind(url)
            .fetch_optional(&self.inner.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        self.usage().images.promote(url);
        sqlx::query("UPDATE images SET last_used = ? WHERE url = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(url)
            .execute(&self.inner.pool)
            .await?;

        let content_type: Option<String> = row.get("content_type");
        Ok(Some(CachedImage {
            content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            data: row.get("data"),
        }))
    }

    pub async fn close(&self) {
        self.inner.pool.close().await;
    }
}

/// Published records queue their cover art for download
#[async_trait]
impl Sink for ImageCache {
    async fn accept(&self, record: &ResolvedRecord) -> Result<(), SinkError> {
        if let Some(url) = &record.cover_art_ref {
            self.request(url);
        }
        Ok(())
    }
}
