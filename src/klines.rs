use chrono::DateTime;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use crate::bar::{Bar, Interval};
use crate::error::PipelineError;
use crate::storage_utils::KlineConfig;

/// Positional layout of one kline row:
/// openTime, open, high, low, close, volume, closeTime, quoteAssetVolume,
/// numberOfTrades, takerBuyBaseAssetVolume, takerBuyQuoteAssetVolume, ignore
const KLINE_FIELDS: usize = 12;

/// Spot REQUEST_WEIGHT budget per minute.
const WEIGHT_PER_MINUTE: u32 = 6000;

static BAN_UNTIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"until\s+(\d+)").expect("ban pattern is valid"));

fn calculate_request_weight(limit: u32) -> u32 {
    match limit {
        0..=100 => 1,
        101..=500 => 2,
        501..=1000 => 5,
        _ => 10,
    }
}

fn price_field(row: &[Value], idx: usize) -> Option<f64> {
    let value: Option<f64> = match &row[idx] {
        Value::String(s) => s.parse().ok(),
        v => v.as_f64(),
    };
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Converts one positional kline row into a `Bar`.
pub fn parse_kline_row(symbol: &str, row: &[Value]) -> Option<Bar> {
    if row.len() < KLINE_FIELDS {
        return None;
    }
    let open_time = row[0].as_i64()?;

    Some(Bar {
        instrument: symbol.to_string(),
        timestamp: DateTime::from_timestamp_millis(open_time)?,
        open: Some(price_field(row, 1)?),
        high: price_field(row, 2)?,
        low: price_field(row, 3)?,
        close: price_field(row, 4)?,
        volume: price_field(row, 5)?,
        trades: row[8].as_u64()?,
    })
}

/// Parses a full klines response body, rejecting malformed rows and empty payloads.
pub fn parse_klines(symbol: &str, rows: &[Vec<Value>]) -> Result<Vec<Bar>, PipelineError> {
    if rows.is_empty() {
        return Err(PipelineError::unavailable(symbol, "empty klines response"));
    }
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            parse_kline_row(symbol, row).ok_or_else(|| {
                PipelineError::unavailable(symbol, format!("malformed kline at index {idx}"))
            })
        })
        .collect()
}

fn ban_reason(status: StatusCode, body: &str) -> String {
    let until = BAN_UNTIL
        .captures(body)
        .and_then(|caps| caps[1].parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);
    match until {
        Some(ts) => format!("rate limited ({status}) until {ts}"),
        None => format!("rate limited ({status})"),
    }
}

/// Remote kline source. TLS certificates are verified and every request is bounded
/// by the configured timeout.
pub struct KlineClient {
    client: Client,
    base_url: String,
}

impl KlineClient {
    pub fn new(config: &KlineConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(50)
            .build()
            .map_err(|e| PipelineError::unavailable(&config.base_url, e))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Bar>, PipelineError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];

        tracing::debug!(symbol, %interval, limit, "fetching klines");
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(symbol, e))?;

        let status = response.status();
        if status == StatusCode::IM_A_TEAPOT || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::unavailable(symbol, ban_reason(status, &body)));
        }
        if !status.is_success() {
            return Err(PipelineError::unavailable(symbol, format!("HTTP {status}")));
        }

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|e| PipelineError::unavailable(symbol, e))?;
        let bars = parse_klines(symbol, &rows)?;

        tracing::info!(symbol, %interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }

    /// Fetches every symbol concurrently, in batches that stay under the per-minute
    /// request weight. Any failed symbol fails the whole call.
    pub async fn fetch_universe(
        &self,
        symbols: &[String],
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Vec<Bar>>, PipelineError> {
        if symbols.is_empty() {
            return Err(PipelineError::unavailable("klines", "no symbols configured"));
        }

        let safe_capacity = (WEIGHT_PER_MINUTE as f64 * 0.90) as u32;
        let batch_size = std::cmp::max(1, safe_capacity / calculate_request_weight(limit)) as usize;

        let mut all_results = Vec::with_capacity(symbols.len());
        for (i, batch) in symbols.chunks(batch_size).enumerate() {
            let start_time = Instant::now();

            let tasks = batch.iter().map(|s| self.fetch(s, interval, limit));
            all_results.extend(futures::future::try_join_all(tasks).await?);

            if i * batch_size + batch.len() < symbols.len() {
                let elapsed = start_time.elapsed();
                if elapsed < Duration::from_secs(60) {
                    tokio::time::sleep(Duration::from_secs(62) - elapsed).await;
                }
            }
        }

        Ok(all_results)
    }
}
