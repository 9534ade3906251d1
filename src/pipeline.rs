//! Composes the stages for one invocation. Every stage receives its inputs
//! explicitly; nothing survives between runs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::bar::{BarTable, Interval};
use crate::equity_files;
use crate::error::{DataQualityWarning, PipelineError};
use crate::klines::KlineClient;
use crate::normalize::{Grid, NormalizedRow, NormalizedSeries, normalize};
use crate::reconcile::{Reconciled, merge_symbol_batches, reconcile_equities};
use crate::screener::{ZScoreRecord, rank_by_anomaly, screen};
use crate::storage_utils::{EquityConfig, KlineConfig};

/// A normalized series plus the display window requested for it.
#[derive(Debug, Serialize)]
pub struct SeriesReport {
    pub instrument: String,
    pub interval: Interval,
    /// Exchange prefix used by chart links, e.g. `IDX` or `BINANCE`.
    pub exchange: &'static str,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[serde(skip)]
    pub series: NormalizedSeries,
    pub warnings: Vec<String>,
}

impl SeriesReport {
    /// Rows inside the requested window, or `None` when the window is empty.
    pub fn visible_rows(&self) -> Option<&[NormalizedRow]> {
        self.series.window(self.from, self.to).ok()
    }
}

#[derive(Debug, Serialize)]
pub struct ScreenReport {
    pub as_of: Option<DateTime<Utc>>,
    pub lookback_days: u32,
    pub universe: usize,
    pub records: Vec<ZScoreRecord>,
    pub warnings: Vec<String>,
}

fn record(warnings: &[DataQualityWarning]) -> Vec<String> {
    warnings
        .iter()
        .map(|w| {
            w.log();
            w.to_string()
        })
        .collect()
}

/// Loads the daily summaries and the correction feed and reconciles them.
pub async fn reconciled_equities(config: &EquityConfig) -> Result<Reconciled, PipelineError> {
    let batches = equity_files::load_batches(&config.data_dir).await?;
    let corrections = equity_files::load_corrections(&config.correction_path()).await?;
    reconcile_equities(&batches, &corrections)
}

/// Fetches `symbols` from the kline feed and merges them into one table.
pub async fn crypto_table(
    config: &KlineConfig,
    symbols: &[String],
    interval: Interval,
    limit: u32,
) -> Result<BarTable, PipelineError> {
    let client = KlineClient::new(config)?;
    let batches = client.fetch_universe(symbols, interval, limit).await?;
    merge_symbol_batches(batches)
}

/// Normalizes one instrument of an already reconciled table.
pub fn series_report(
    table: &BarTable,
    upstream: &[DataQualityWarning],
    instrument: &str,
    grid: Grid,
    interval: Interval,
    exchange: &'static str,
    range: (Option<NaiveDate>, Option<NaiveDate>),
) -> Result<SeriesReport, PipelineError> {
    let (series, mut warnings) = normalize(table, instrument, grid)?;
    if let Err(empty) = series.window(range.0, range.1) {
        warnings.push(empty);
    }

    let mut all = upstream.to_vec();
    all.extend(warnings);

    Ok(SeriesReport {
        instrument: instrument.to_string(),
        interval,
        exchange,
        from: range.0,
        to: range.1,
        series,
        warnings: record(&all),
    })
}

/// Screens a reconciled table and ranks it by anomaly.
pub fn screen_report(
    table: &BarTable,
    upstream: &[DataQualityWarning],
    lookback_days: u32,
) -> ScreenReport {
    let records = rank_by_anomaly(screen(table, lookback_days));
    ScreenReport {
        as_of: table.latest_timestamp(),
        lookback_days,
        universe: table.instruments().len(),
        records,
        warnings: record(upstream),
    }
}
