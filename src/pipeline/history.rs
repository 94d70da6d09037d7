//! Historical snapshot fetch
//!
//! Endpoints (relative to the server URL):
//! - `GET /api/logs?limit=N` - most recent raw records, newest first
//! - `GET /api/logs/stats` - hourly `StatsPoint` series
//! - `GET /api/logs/count` - `{all, errors}` trend snapshot
//! - `GET /api/speedtest?from=MS&to=MS` - raw speed-test samples
//! - `GET /api/speedtest/tranding` - speed-test headline metrics
//!
//! Responses arrive wrapped as `{"req_id", "timestamp", "status", "data"}`;
//! a bare payload is accepted too.

use super::engine::HistoricalSeed;
use super::speedtest::{SpeedtestSample, SpeedtestTrend};
use super::trend::TrendSnapshot;
use super::types::{EventRecord, StatsPoint};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const LOGS_PATH: &str = "/api/logs";
pub const STATS_PATH: &str = "/api/logs/stats";
pub const COUNT_PATH: &str = "/api/logs/count";
pub const SPEEDTEST_PATH: &str = "/api/speedtest";
pub const SPEEDTEST_TREND_PATH: &str = "/api/speedtest/tranding";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}")]
    Status { endpoint: String, status: StatusCode },

    #[error("undecodable body from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(data) => data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryClient {
    client: reqwest::Client,
    base_url: Url,
    authorization: Option<String>,
}

impl HistoryClient {
    pub fn new(
        server_url: &str,
        authorization: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HistoryError> {
        let base_url = Url::parse(server_url)
            .map_err(|e| HistoryError::InvalidUrl(format!("{}: {}", server_url, e)))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            authorization,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, HistoryError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| HistoryError::InvalidUrl(format!("{}: {}", path, e)))?;

        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(HistoryError::Status {
                endpoint: path.to_string(),
                status: response.status(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<Envelope<T>>(&body)
            .map(Envelope::into_inner)
            .map_err(|source| HistoryError::Decode {
                endpoint: path.to_string(),
                source,
            })
    }

    /// Most recent `limit` records; individually malformed records are skipped
    pub async fn fetch_recent_logs(&self, limit: usize) -> Result<Vec<EventRecord>, HistoryError> {
        let raw: Vec<serde_json::Value> = self
            .get_json(LOGS_PATH, &[("limit", limit.to_string())])
            .await?;

        let total = raw.len();
        let records: Vec<EventRecord> = raw
            .into_iter()
            .filter_map(|value| {
                serde_json::from_value::<EventRecord>(value)
                    .ok()
                    .filter(|r| r.validate().is_ok())
            })
            .collect();

        if records.len() < total {
            log::warn!(
                "⚠️  Skipped {} malformed records from {}",
                total - records.len(),
                LOGS_PATH
            );
        }
        Ok(records)
    }

    pub async fn fetch_stats(&self) -> Result<Vec<StatsPoint>, HistoryError> {
        self.get_json(STATS_PATH, &[]).await
    }

    pub async fn fetch_trend(&self) -> Result<TrendSnapshot, HistoryError> {
        self.get_json(COUNT_PATH, &[]).await
    }

    pub async fn fetch_speedtest_trend(&self) -> Result<SpeedtestTrend, HistoryError> {
        self.get_json(SPEEDTEST_TREND_PATH, &[]).await
    }

    /// Raw samples, optionally bounded by epoch-millisecond `from`/`to`
    pub async fn fetch_speedtest_samples(
        &self,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<SpeedtestSample>, HistoryError> {
        let mut query = Vec::new();
        if let Some(from) = from {
            query.push(("from", from.to_string()));
        }
        if let Some(to) = to {
            query.push(("to", to.to_string()));
        }
        self.get_json(SPEEDTEST_PATH, &query).await
    }

    /// Headline metrics from the server, or computed locally from the raw
    /// samples when the trend endpoint is unavailable
    pub async fn speedtest_headline(&self, now: i64) -> Result<SpeedtestTrend, HistoryError> {
        match self.fetch_speedtest_trend().await {
            Ok(trend) => Ok(trend),
            Err(e) => {
                log::warn!(
                    "⚠️  {} unavailable, computing from {}: {}",
                    SPEEDTEST_TREND_PATH,
                    SPEEDTEST_PATH,
                    e
                );
                let samples = self.fetch_speedtest_samples(None, Some(now)).await?;
                Ok(SpeedtestTrend::compute(&samples, now))
            }
        }
    }

    /// Run the three log fetches concurrently; each failure degrades independently
    pub async fn fetch_seed(&self, limit: usize) -> HistoricalSeed {
        let (records, points, trend) = tokio::join!(
            self.fetch_recent_logs(limit),
            self.fetch_stats(),
            self.fetch_trend(),
        );

        let records = records.unwrap_or_else(|e| {
            log::warn!("⚠️  {} unavailable, starting with empty window: {}", LOGS_PATH, e);
            Vec::new()
        });
        let points = points
            .map_err(|e| {
                log::warn!("⚠️  {} unavailable, deriving buckets from records: {}", STATS_PATH, e);
            })
            .ok();
        let trend = trend
            .map_err(|e| {
                log::warn!("⚠️  {} unavailable, starting with zero trend: {}", COUNT_PATH, e);
            })
            .ok();

        log::info!(
            "📥 History: {} records, {} stats points, trend {}",
            records.len(),
            points.as_ref().map_or(0, |p| p.len()),
            if trend.is_some() { "loaded" } else { "empty" }
        );

        HistoricalSeed {
            records,
            points,
            trend,
        }
    }
}
