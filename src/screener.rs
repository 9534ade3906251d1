//! Cross-sectional FA anomaly screen: rolling Z-score of the latest FA against
//! the instrument's own lookback window.

use chrono::TimeDelta;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::bar::BarTable;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 14;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZScoreRecord {
    pub instrument: String,
    pub last_fa: f64,
    pub mean_fa: f64,
    /// Sample standard deviation; `None` with fewer than two defined FA values.
    pub std_fa: Option<f64>,
    pub z_score: f64,
    /// Defined FA values inside the window.
    pub observations: usize,
}

/// Mean and sample standard deviation (n - 1).
fn mean_and_std(values: &[f64]) -> (f64, Option<f64>) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, None);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, Some(variance.sqrt()))
}

fn z_score(latest: f64, mean: f64, std: Option<f64>) -> f64 {
    match std {
        Some(std) if std > 0.0 => (latest - mean) / std,
        _ => 0.0,
    }
}

/// Scores every instrument with at least one defined FA value at or after
/// `latest timestamp in the table - lookback_days`. A lookback reaching past the
/// representable calendar covers the whole table.
pub fn screen(table: &BarTable, lookback_days: u32) -> Vec<ZScoreRecord> {
    let Some(latest) = table.latest_timestamp() else {
        return Vec::new();
    };
    let cutoff = TimeDelta::try_days(i64::from(lookback_days))
        .and_then(|span| latest.checked_sub_signed(span));

    // Table order is ascending in time, so each per-instrument list is too.
    let mut windows: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for bar in table.bars().iter().filter(|b| cutoff.is_none_or(|c| b.timestamp >= c)) {
        let values = windows.entry(bar.instrument.as_str()).or_default();
        if let Some(fa) = bar.frequency_analyzer().filter(|v| v.is_finite()) {
            values.push(fa);
        }
    }

    let records: Vec<ZScoreRecord> = windows
        .into_iter()
        .filter_map(|(instrument, values)| {
            let last_fa = *values.last()?;
            let (mean_fa, std_fa) = mean_and_std(&values);
            Some(ZScoreRecord {
                instrument: instrument.to_string(),
                last_fa,
                mean_fa,
                std_fa,
                z_score: z_score(last_fa, mean_fa, std_fa),
                observations: values.len(),
            })
        })
        .collect();

    tracing::info!(
        ?cutoff,
        lookback_days,
        scored = records.len(),
        instruments = table.instruments().len(),
        "screen complete"
    );
    records
}

/// Most anomalous first; ties broken by instrument code.
pub fn rank_by_anomaly(mut records: Vec<ZScoreRecord>) -> Vec<ZScoreRecord> {
    records.sort_by(|a, b| {
        b.z_score
            .total_cmp(&a.z_score)
            .then_with(|| a.instrument.cmp(&b.instrument))
    });
    records
}
