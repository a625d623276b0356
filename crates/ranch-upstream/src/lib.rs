//! Upstream registration API client: cursor pagination + per-record detail lookups.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ranch_core::{parse_loose_timestamp, RawForm, RawMembership, RawRegistrant};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "ranch-upstream";

pub const DEFAULT_BASE_URL: &str = "https://api.webconnex.com/v2/public";
pub const DEFAULT_PRODUCT: &str = "regfox.com";
pub const PAGE_SIZE: u64 = 50;

const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(12);
const DEFAULT_DETAIL_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub product: String,
    pub user_agent: String,
    pub page_timeout: Duration,
    pub detail_timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            product: DEFAULT_PRODUCT.to_string(),
            user_agent: "ranch-sync/0.1".to_string(),
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            detail_timeout: DEFAULT_DETAIL_TIMEOUT,
        }
    }
}

/// Fatal upstream failure: the whole run aborts, no partial page is kept.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One page of a paginated response. The "more data follows" indicator has
/// two historical spellings; they are combined with logical OR.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub is_more: Option<bool>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

impl<T> Page<T> {
    pub fn more(&self) -> bool {
        self.has_more.unwrap_or(false) || self.is_more.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DetailEnvelope {
    #[serde(default)]
    data: Option<FormDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormDetail {
    #[serde(default)]
    event_start: Option<String>,
}

/// Secondary per-form lookup used when a scheduled date cannot be derived
/// from the summary record. Failures are swallowed, never propagated.
#[async_trait]
pub trait DetailLookup: Send + Sync {
    async fn form_event_start(&self, id: i64) -> Option<DateTime<Utc>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Fetch every page of `resource`, advancing an offset cursor by the
    /// fixed page size until the upstream stops signalling more data. Any
    /// non-success status or transport failure is fatal; pages are never
    /// partially kept.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        resource: &str,
        extra: &[(&str, &str)],
    ) -> Result<Vec<T>, UpstreamError> {
        let mut out = Vec::new();
        let mut starting_after = 0u64;

        loop {
            let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), resource);
            let limit = PAGE_SIZE.to_string();
            let mut query: Vec<(&str, &str)> = vec![
                ("product", self.config.product.as_str()),
                ("limit", limit.as_str()),
                ("sort", "desc"),
            ];
            query.extend_from_slice(extra);
            let cursor = starting_after.to_string();
            if starting_after > 0 {
                query.push(("startingAfter", cursor.as_str()));
            }

            let response = self
                .http
                .get(&url)
                .query(&query)
                .header("apiKey", &self.config.api_key)
                .header(reqwest::header::ACCEPT, "application/json")
                .timeout(self.config.page_timeout)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(UpstreamError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: Page<T> = response.json().await?;
            let more = page.more();
            debug!(resource, starting_after, batch = page.data.len(), more, "fetched page");
            out.extend(page.data);

            if more {
                starting_after += PAGE_SIZE;
                continue;
            }
            break;
        }

        Ok(out)
    }

    pub async fn fetch_open_forms(&self) -> Result<Vec<RawForm>, UpstreamError> {
        self.fetch_all("forms", &[("status", "open")]).await
    }

    pub async fn fetch_memberships(&self) -> Result<Vec<RawMembership>, UpstreamError> {
        self.fetch_all("search/memberships", &[]).await
    }

    pub async fn fetch_registrants(
        &self,
        form_id: &str,
    ) -> Result<Vec<RawRegistrant>, UpstreamError> {
        self.fetch_all("search/registrants", &[("formId", form_id)])
            .await
    }
}

#[async_trait]
impl DetailLookup for UpstreamClient {
    async fn form_event_start(&self, id: i64) -> Option<DateTime<Utc>> {
        let url = format!(
            "{}/forms/{id}",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .query(&[("product", self.config.product.as_str())])
            .header("apiKey", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.detail_timeout)
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(id, status = %response.status(), "detail lookup rejected; treating as no date");
                return None;
            }
            Err(err) => {
                debug!(id, %err, "detail lookup failed; treating as no date");
                return None;
            }
        };

        let envelope: DetailEnvelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(id, %err, "detail body unreadable; treating as no date");
                return None;
            }
        };

        envelope
            .data
            .and_then(|detail| detail.event_start)
            .as_deref()
            .and_then(parse_loose_timestamp)
    }
}
