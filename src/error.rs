use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Conditions that abort the current pipeline invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable ({origin}): {reason}")]
    SourceUnavailable { origin: String, reason: String },

    #[error("schema violation in {origin}: {detail}")]
    SchemaViolation { origin: String, detail: String },

    #[error("duplicate bar for {instrument} at {timestamp}")]
    DuplicateObservation {
        instrument: String,
        timestamp: DateTime<Utc>,
    },

    #[error("instrument '{0}' has no bars in the reconciled table")]
    UnknownInstrument(String),

    #[error("invalid interval '{0}', expected one of 1d, 4h, 1h, 15m")]
    InvalidInterval(String),
}

impl PipelineError {
    pub fn unavailable(origin: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(origin: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            origin: origin.into(),
            detail: detail.into(),
        }
    }
}

/// Non-fatal findings. Processing continues on the remaining data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataQualityWarning {
    #[error("{rows} rows still have no open price after applying corrections")]
    MissingOpen { rows: usize },

    #[error("no {instrument} data between {from:?} and {to:?}")]
    EmptyDateRange {
        instrument: String,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },

    #[error("FA is flat for {instrument}; scaled FA left undefined")]
    DegenerateScale { instrument: String },

    #[error("duplicate correction for {instrument} on {date}; keeping the first")]
    DuplicateCorrection { instrument: String, date: NaiveDate },
}

impl DataQualityWarning {
    pub fn log(&self) {
        tracing::warn!(warning = %self, "data quality");
    }
}
