//! Webhook sink: POSTs the record as JSON (chat announcers, bots)

use super::Sink;
use crate::error::SinkError;
use crate::remote::user_agent;
use crate::types::ResolvedRecord;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct WebhookSink {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SinkError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn accept(&self, record: &ResolvedRecord) -> Result<(), SinkError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&record.to_now_playing())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Http(format!("webhook returned HTTP {}", status.as_u16())));
        }
        debug!(url = %self.url, "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provenance;
    use axum::{routing::post, Json, Router};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    fn record() -> ResolvedRecord {
        ResolvedRecord {
            source_id: "deck".to_string(),
            artist: "Daft Punk".to_string(),
            title: "One More Time".to_string(),
            album: Some("Discovery".to_string()),
            release_year: Some(2000),
            cover_art_ref: None,
            source_confidence: 0.9,
            provenance: Provenance::Registry("musicbrainz".to_string()),
            resolved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_posts_json() {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let store = received.clone();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<serde_json::Value>| {
                let store = store.clone();
                async move {
                    store.lock().unwrap().push(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let sink = WebhookSink::new(format!("http://{}/hook", addr), Duration::from_secs(2)).unwrap();
        sink.accept(&record()).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["artist"], "Daft Punk");
        assert_eq!(received[0]["album"], "Discovery");
    }

    #[tokio::test]
    async fn test_unreachable_url_fails() {
        let sink = WebhookSink::new("http://127.0.0.1:9/hook".to_string(), Duration::from_millis(500)).unwrap();
        assert!(matches!(sink.accept(&record()).await, Err(SinkError::Http(_))));
    }
}
