//! Draw sources: the upstream HTTP feed, static lists and offline files.
//!
//! Payloads are untrusted. Two shapes are accepted:
//!
//! ```json
//! [{"issueId": "20240101001", "winningValue": 7}]
//! {"data": {"list": [{"issueNumber": "20240101001", "winNumber": "7"}]}}
//! ```
//!
//! Items with an empty id or a missing or out-of-range value are skipped.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use crate::error::{FetchError, RecordError};
use crate::history::OutcomeRecord;

/// One validated draw from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawItem {
    pub issue_id: String,
    pub winning_value: u8,
}

impl DrawItem {
    pub fn new(issue_id: impl Into<String>, winning_value: u8) -> Self {
        Self {
            issue_id: issue_id.into(),
            winning_value,
        }
    }

    pub fn into_record(self, observed_at: DateTime<Utc>) -> Result<OutcomeRecord, RecordError> {
        OutcomeRecord::new(self.issue_id, self.winning_value, observed_at)
    }
}

/// Something that yields the latest batch of draws.
#[async_trait]
pub trait DrawSource: Send + Sync {
    fn name(&self) -> &str;

    /// Latest draws in any order, possibly with duplicates.
    async fn fetch_latest(&self) -> Result<Vec<DrawItem>, FetchError>;
}

/// Polls a JSON endpoint over HTTP.
pub struct HttpDrawSource {
    url: Url,
    client: reqwest::Client,
}

impl HttpDrawSource {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("drawcast/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DrawSource for HttpDrawSource {
    fn name(&self) -> &str {
        self.url.host_str().unwrap_or("http")
    }

    async fn fetch_latest(&self) -> Result<Vec<DrawItem>, FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                source_name: self.name().to_string(),
                status,
                body: body.chars().take(200).collect(),
            });
        }

        let body = response.text().await?;
        let items = parse_draws(&body)?;
        tracing::debug!(source = self.name(), items = items.len(), "Fetched draws");
        Ok(items)
    }
}

/// Serves a fixed list; used for offline import and tests.
#[derive(Debug, Default)]
pub struct StaticDrawSource {
    name: String,
    items: RwLock<Vec<DrawItem>>,
}

impl StaticDrawSource {
    pub fn new(name: impl Into<String>, items: Vec<DrawItem>) -> Self {
        Self {
            name: name.into(),
            items: RwLock::new(items),
        }
    }

    /// Read a draw file in either accepted shape.
    pub async fn from_file(path: &Path) -> Result<Self, FetchError> {
        let body = tokio::fs::read_to_string(path).await?;
        let items = parse_draws(&body)?;
        Ok(Self::new(path.display().to_string(), items))
    }

    pub async fn replace(&self, items: Vec<DrawItem>) {
        *self.items.write().await = items;
    }

    pub async fn push(&self, item: DrawItem) {
        self.items.write().await.push(item);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl DrawSource for StaticDrawSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_latest(&self) -> Result<Vec<DrawItem>, FetchError> {
        Ok(self.items.read().await.clone())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    List(Vec<Value>),
    Envelope { data: EnvelopeData },
}

#[derive(Deserialize)]
struct EnvelopeData {
    list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDraw {
    #[serde(alias = "issueNumber", default)]
    issue_id: Value,
    #[serde(default)]
    winning_value: Value,
    #[serde(default)]
    win_number: Value,
    #[serde(default)]
    number: Value,
}

impl RawDraw {
    fn validate(self) -> Result<DrawItem, RecordError> {
        let issue_id = match &self.issue_id {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        if issue_id.is_empty() {
            return Err(RecordError::EmptyIssueId);
        }

        let raw = [self.winning_value, self.win_number, self.number]
            .into_iter()
            .find(|v| !v.is_null())
            .ok_or_else(|| RecordError::MissingValue {
                issue_id: issue_id.clone(),
            })?;

        let parsed = match &raw {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v <= 9 => Ok(DrawItem {
                issue_id,
                winning_value: v as u8,
            }),
            _ => Err(RecordError::ValueOutOfRange {
                issue_id,
                value: raw.to_string(),
            }),
        }
    }
}

/// Parse a draw payload, dropping items that do not validate.
pub fn parse_draws(body: &str) -> Result<Vec<DrawItem>, FetchError> {
    let payload: Payload = serde_json::from_str(body)?;
    let raw_items = match payload {
        Payload::List(items) => items,
        Payload::Envelope { data } => data.list,
    };

    let mut items = Vec::with_capacity(raw_items.len());
    for (index, raw) in raw_items.into_iter().enumerate() {
        let draw = serde_json::from_value::<RawDraw>(raw)
            .map_err(|e| e.to_string())
            .and_then(|d| d.validate().map_err(|e| e.to_string()));
        match draw {
            Ok(item) => items.push(item),
            Err(reason) => tracing::warn!(index, reason = %reason, "Skipping invalid draw"),
        }
    }
    Ok(items)
}
