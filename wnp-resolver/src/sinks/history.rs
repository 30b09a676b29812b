//! History database sink
//!
//! Appends every published record to the `currentmeta` table. `read_last`
//! returns the most recent row, which is how other tools pick up the last
//! track after a restart.

use super::Sink;
use crate::error::SinkError;
use crate::types::{Provenance, ResolvedRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, warn};

pub struct HistorySink {
    pool: SqlitePool,
}

impl HistorySink {
    /// Open or create the history database
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        let pool = wnp_common::db::open_database(path).await.map_err(|e| match e {
            wnp_common::Error::Database(e) => SinkError::Database(e),
            wnp_common::Error::Io(e) => SinkError::Io(e),
            other => SinkError::Io(std::io::Error::other(other.to_string())),
        })?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, SinkError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS currentmeta (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                artist TEXT NOT NULL,
                title TEXT NOT NULL,
                album TEXT,
                release_year INTEGER,
                cover_art_ref TEXT,
                confidence REAL NOT NULL,
                provenance TEXT NOT NULL,
                resolved_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Most recently written record
    pub async fn read_last(&self) -> Result<Option<ResolvedRecord>, SinkError> {
        let row = sqlx::query(
            "SELECT source_id, artist, title, album, release_year, cover_art_ref, confidence, provenance, resolved_at
             FROM currentmeta ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let resolved_at: String = row.get("resolved_at");
        let resolved_at = DateTime::parse_from_rfc3339(&resolved_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                warn!("Invalid resolved_at in history row: {}", e);
                Utc::now()
            });
        let provenance: String = row.get("provenance");

        Ok(Some(ResolvedRecord {
            source_id: row.get("source_id"),
            artist: row.get("artist"),
            title: row.get("title"),
            album: row.get("album"),
            release_year: row.get("release_year"),
            cover_art_ref: row.get("cover_art_ref"),
            source_confidence: row.get("confidence"),
            provenance: match provenance.as_str() {
                "fallback" => Provenance::Fallback,
                _ => Provenance::Registry(provenance),
            },
            resolved_at,
        }))
    }
}

#[async_trait]
impl Sink for HistorySink {
    async fn accept(&self, record: &ResolvedRecord) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO currentmeta
             (source_id, artist, title, album, release_year, cover_art_ref, confidence, provenance, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.source_id)
        .bind(&record.artist)
        .bind(&record.title)
        .bind(record.album.as_deref().filter(|a| !a.is_empty()))
        .bind(record.release_year)
        .bind(record.cover_art_ref.as_deref())
        .bind(record.source_confidence)
        .bind(record.provenance.to_string())
        .bind(record.resolved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(artist = %record.artist, title = %record.title, "Added history record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(title: &str) -> ResolvedRecord {
        ResolvedRecord {
            source_id: "deck".to_string(),
            artist: "Daft Punk".to_string(),
            title: title.to_string(),
            album: Some("Discovery".to_string()),
            release_year: Some(2000),
            cover_art_ref: None,
            source_confidence: 0.9,
            provenance: Provenance::Registry("musicbrainz".to_string()),
            resolved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_read_last_empty() {
        let dir = TempDir::new().unwrap();
        let sink = HistorySink::open(&dir.path().join("history.db")).await.unwrap();
        assert!(sink.read_last().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_last_returns_latest() {
        let dir = TempDir::new().unwrap();
        let sink = HistorySink::open(&dir.path().join("history.db")).await.unwrap();

        sink.accept(&record("One More Time")).await.unwrap();
        sink.accept(&record("Aerodynamic")).await.unwrap();

        let last = sink.read_last().await.unwrap().unwrap();
        assert_eq!(last.title, "Aerodynamic");
        assert_eq!(last.album.as_deref(), Some("Discovery"));
        assert_eq!(last.release_year, Some(2000));
        assert_eq!(last.provenance, Provenance::Registry("musicbrainz".to_string()));
    }
}
