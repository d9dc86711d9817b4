//! Radarr and Sonarr adapter over the v3 queue API.

use std::time::Duration;

use async_trait::async_trait;
use ferry_core::{
    ManagerError, ManagerResult, MediaManagerAdapter, MediaManagerKind, QueueEntry, TorrentId,
};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const API_KEY_HEADER: &str = "X-Api-Key";
const PAGE_SIZE: u32 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueuePage {
    #[serde(default)]
    total_records: u64,
    #[serde(default)]
    records: Vec<QueueRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueRecord {
    #[serde(default)]
    download_id: Option<String>,
    #[serde(default)]
    title: String,
}

/// Media manager backed by a Radarr or Sonarr instance.
pub struct ArrClient {
    name: String,
    kind: MediaManagerKind,
    base_url: String,
    api_key: String,
    http: Client,
}

impl ArrClient {
    /// Build an adapter for the instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        name: impl Into<String>,
        kind: MediaManagerKind,
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> ManagerResult<Self> {
        let name = name.into();
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ManagerError::Unreachable {
                manager: name.clone(),
                operation: "arr.build",
                source: Box::new(err),
            })?;
        Ok(Self {
            name,
            kind,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            http,
        })
    }

    const fn unknown_items_param(&self) -> &'static str {
        match self.kind {
            MediaManagerKind::Radarr => "includeUnknownMovieItems",
            MediaManagerKind::Sonarr => "includeUnknownSeriesItems",
        }
    }

    async fn fetch_page(&self, page: u32) -> ManagerResult<QueuePage> {
        let url = format!("{}/api/v3/queue", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[
                ("page", page.to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
                (self.unknown_items_param(), "true".to_owned()),
            ])
            .send()
            .await
            .map_err(|err| ManagerError::Unreachable {
                manager: self.name.clone(),
                operation: "list_queue",
                source: Box::new(err),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ManagerError::Status {
                manager: self.name.clone(),
                operation: "list_queue",
                status: status.as_u16(),
            });
        }
        response
            .json::<QueuePage>()
            .await
            .map_err(|err| ManagerError::Malformed {
                manager: self.name.clone(),
                operation: "list_queue",
                source: Box::new(err),
            })
    }
}

#[async_trait]
impl MediaManagerAdapter for ArrClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MediaManagerKind {
        self.kind
    }

    async fn list_queue(&self) -> ManagerResult<Vec<QueueEntry>> {
        let mut entries = Vec::new();
        let mut seen: u64 = 0;
        let mut page = 1;
        loop {
            let batch = self.fetch_page(page).await?;
            let fetched = u64::try_from(batch.records.len()).unwrap_or(u64::MAX);
            seen += fetched;
            entries.extend(batch.records.into_iter().filter_map(|record| {
                record.download_id.map(|id| QueueEntry {
                    download_id: TorrentId::new(id),
                    title: record.title,
                })
            }));
            if fetched == 0 || seen >= batch.total_records {
                break;
            }
            page += 1;
        }
        debug!(manager = %self.name, entries = entries.len(), pages = page, "queue fetched");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn radarr(server: &MockServer) -> anyhow::Result<ArrClient> {
        Ok(ArrClient::new(
            "radarr",
            MediaManagerKind::Radarr,
            &server.base_url(),
            "secret",
            Duration::from_secs(5),
        )?)
    }

    #[tokio::test]
    async fn list_queue_follows_pagination() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v3/queue")
                .header("X-Api-Key", "secret")
                .query_param("page", "1")
                .query_param("includeUnknownMovieItems", "true");
            then.status(200).json_body(json!({
                "page": 1,
                "pageSize": 200,
                "totalRecords": 3,
                "records": [
                    {"downloadId": "AAA", "title": "One"},
                    {"title": "No download id"}
                ]
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v3/queue")
                .query_param("page", "2");
            then.status(200).json_body(json!({
                "page": 2,
                "pageSize": 200,
                "totalRecords": 3,
                "records": [{"downloadId": "bbb", "title": "Two"}]
            }));
        });

        let queue = radarr(&server)?.list_queue().await?;
        first.assert();
        second.assert();
        let ids: Vec<_> = queue.iter().map(|entry| entry.download_id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "bbb"]);
        Ok(())
    }

    #[tokio::test]
    async fn sonarr_uses_series_flag() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v3/queue")
                .query_param("includeUnknownSeriesItems", "true");
            then.status(200)
                .json_body(json!({"totalRecords": 0, "records": []}));
        });
        let sonarr = ArrClient::new(
            "sonarr",
            MediaManagerKind::Sonarr,
            &server.base_url(),
            "secret",
            Duration::from_secs(5),
        )?;
        assert!(sonarr.list_queue().await?.is_empty());
        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn job_cleared_once_download_leaves_queue() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/v3/queue");
            then.status(200).json_body(json!({
                "totalRecords": 1,
                "records": [{"downloadId": "ABC", "title": "Still importing"}]
            }));
        });
        let client = radarr(&server)?;
        assert!(!client.is_job_cleared(&TorrentId::new("abc")).await?);
        assert!(client.is_job_cleared(&TorrentId::new("def")).await?);
        Ok(())
    }

    #[tokio::test]
    async fn error_status_is_reported() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/v3/queue");
            then.status(401);
        });
        let err = radarr(&server)?.list_queue().await;
        assert!(matches!(err, Err(ManagerError::Status { status: 401, .. })));
        Ok(())
    }
}
