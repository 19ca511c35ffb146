//! Market data refresh collaborators
//!
//! The scheduler only knows the [`DataRefresh`] trait. [`HttpSnapshotRefresh`]
//! is the stock implementation: it pulls a JSON snapshot from an HTTP
//! endpoint and keeps the latest one in memory.

use crate::config::RefreshEndpoint;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;
use url::Url;

/// Fetches and stores the latest market data
#[async_trait]
pub trait DataRefresh: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// Latest fetched market data
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Refresh that GETs a JSON document
pub struct HttpSnapshotRefresh {
    client: reqwest::Client,
    url: Url,
    latest: RwLock<Option<MarketSnapshot>>,
}

impl HttpSnapshotRefresh {
    pub fn new(endpoint: &RefreshEndpoint) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()?;

        Ok(Self {
            client,
            url: endpoint.url.clone(),
            latest: RwLock::new(None),
        })
    }

    /// Most recent snapshot, if any fetch has succeeded
    pub fn latest(&self) -> Option<MarketSnapshot> {
        self.latest.read().clone()
    }
}

#[async_trait]
impl DataRefresh for HttpSnapshotRefresh {
    async fn refresh(&self) -> Result<()> {
        let response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Refresh(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }

        let data: serde_json::Value = response.json().await?;
        debug!("Fetched snapshot from {}", self.url);

        *self.latest.write() = Some(MarketSnapshot {
            fetched_at: Utc::now(),
            data,
        });
        Ok(())
    }
}

/// Refresh that does nothing; used when no endpoint is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRefresh;

#[async_trait]
impl DataRefresh for NoopRefresh {
    async fn refresh(&self) -> Result<()> {
        debug!("No refresh endpoint configured, skipping fetch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn endpoint(base: &str) -> RefreshEndpoint {
        RefreshEndpoint {
            url: Url::parse(&format!("{}/snapshot", base)).unwrap(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_http_refresh_stores_snapshot() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/snapshot")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"nifty":24500.5}"#)
            .create_async()
            .await;

        let refresh = HttpSnapshotRefresh::new(&endpoint(&server.url())).unwrap();
        assert!(refresh.latest().is_none());
        refresh.refresh().await.unwrap();

        let snapshot = refresh.latest().unwrap();
        assert_eq!(snapshot.data["nifty"], 24500.5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_refresh_reports_status_errors() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/snapshot")
            .with_status(503)
            .with_body("Service Unavailable")
            .create_async()
            .await;

        let refresh = HttpSnapshotRefresh::new(&endpoint(&server.url())).unwrap();
        let err = refresh.refresh().await.unwrap_err();

        assert!(matches!(err, AppError::Refresh(_)));
        assert!(refresh.latest().is_none());
        mock.assert_async().await;
    }
}
