//! Forecast and resolution notifications.
//!
//! Delivery is best effort: the cycles log notifier failures and carry on.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::error::NotifyError;
use crate::history::{ForecastRecord, SessionStat};

/// Receives fully populated forecast records.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A new pending forecast was stored.
    async fn forecast_created(&self, record: &ForecastRecord) -> Result<(), NotifyError>;

    /// A forecast was resolved; `stats` are the totals after this resolution.
    async fn forecast_resolved(
        &self,
        record: &ForecastRecord,
        stats: &SessionStat,
    ) -> Result<(), NotifyError>;
}

/// Message text for a new forecast.
pub fn format_forecast(record: &ForecastRecord) -> String {
    format!(
        "PREDICTION {}\nValue: {} ({})\nConfidence: {:.2}%\nSource: {}",
        record.issue_id,
        record.predicted_value,
        record.predicted_category.as_str(),
        record.confidence * 100.0,
        record.model_tier
    )
}

/// Message text for a resolved forecast.
pub fn format_resolution(record: &ForecastRecord, stats: &SessionStat) -> String {
    let actual = match (record.actual_value, record.actual_category) {
        (Some(value), Some(category)) => format!("{} ({})", value, category.as_str()),
        _ => "--".to_string(),
    };
    format!(
        "RESULT {}\nPredicted: {} ({})\nActual: {}\nResult: {}\nSession: {}W / {}L",
        record.issue_id,
        record.predicted_value,
        record.predicted_category.as_str(),
        actual,
        record.outcome.as_str(),
        stats.wins,
        stats.losses
    )
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn forecast_created(&self, record: &ForecastRecord) -> Result<(), NotifyError> {
        tracing::info!(
            issue_id = %record.issue_id,
            message = %format_forecast(record),
            "Forecast created"
        );
        Ok(())
    }

    async fn forecast_resolved(
        &self,
        record: &ForecastRecord,
        stats: &SessionStat,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            issue_id = %record.issue_id,
            message = %format_resolution(record, stats),
            "Forecast resolved"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'a str,
    timestamp: String,
    text: String,
    forecast: &'a ForecastRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a SessionStat>,
}

/// Posts JSON payloads to an HTTP endpoint.
pub struct WebhookNotifier {
    url: Url,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("drawcast/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { url, client })
    }

    async fn post(&self, payload: &WebhookPayload<'_>) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("X-Drawcast-Event", payload.event)
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn forecast_created(&self, record: &ForecastRecord) -> Result<(), NotifyError> {
        self.post(&WebhookPayload {
            event: "forecast.created",
            timestamp: chrono::Utc::now().to_rfc3339(),
            text: format_forecast(record),
            forecast: record,
            stats: None,
        })
        .await
    }

    async fn forecast_resolved(
        &self,
        record: &ForecastRecord,
        stats: &SessionStat,
    ) -> Result<(), NotifyError> {
        self.post(&WebhookPayload {
            event: "forecast.resolved",
            timestamp: chrono::Utc::now().to_rfc3339(),
            text: format_resolution(record, stats),
            forecast: record,
            stats: Some(stats),
        })
        .await
    }
}
