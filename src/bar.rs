use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// One sampling interval for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    /// Equity summaries sometimes ship without an open price; see `reconcile`.
    pub open: Option<f64>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u64,
}

impl Bar {
    /// Frequency Analyzer: `(volume / trades)^3`, undefined when no trades happened.
    pub fn frequency_analyzer(&self) -> Option<f64> {
        if self.trades == 0 {
            return None;
        }
        Some((self.volume / self.trades as f64).powi(3))
    }
}

/// Open price backfill for one `(instrument, date)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionRecord {
    pub instrument: String,
    pub date: NaiveDate,
    pub open: f64,
}

/// Equity rows carry a calendar date; they are pinned to midnight UTC.
pub fn date_to_timestamp(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Reconciled bars for any number of instruments, ordered by `(timestamp, instrument)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarTable {
    bars: Vec<Bar>,
}

impl BarTable {
    /// Sorts the bars and rejects repeated `(instrument, timestamp)` pairs.
    pub fn new(mut bars: Vec<Bar>) -> Result<Self, PipelineError> {
        bars.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.instrument.cmp(&b.instrument))
        });

        if let Some(pair) = bars.windows(2).find(|w| {
            w[0].timestamp == w[1].timestamp && w[0].instrument == w[1].instrument
        }) {
            return Err(PipelineError::DuplicateObservation {
                instrument: pair[1].instrument.clone(),
                timestamp: pair[1].timestamp,
            });
        }

        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Sorted, de-duplicated instrument identifiers.
    pub fn instruments(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.bars.iter().map(|b| b.instrument.clone()).collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }

    /// One instrument's bars in ascending time order.
    pub fn bars_for(&self, instrument: &str) -> Vec<Bar> {
        self.bars
            .iter()
            .filter(|b| b.instrument == instrument)
            .cloned()
            .collect()
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }
}

/// Kline intervals offered for crypto charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "15m")]
    FifteenMinutes,
}

impl Interval {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::FourHours => "4h",
            Self::OneHour => "1h",
            Self::FifteenMinutes => "15m",
        }
    }

    /// Interval code understood by the TradingView chart widget.
    pub const fn chart_code(self) -> &'static str {
        match self {
            Self::OneDay => "D",
            Self::FourHours => "240",
            Self::OneHour => "60",
            Self::FifteenMinutes => "15",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1d" => Ok(Self::OneDay),
            "4h" => Ok(Self::FourHours),
            "1h" => Ok(Self::OneHour),
            "15m" => Ok(Self::FifteenMinutes),
            other => Err(PipelineError::InvalidInterval(other.to_owned())),
        }
    }
}
