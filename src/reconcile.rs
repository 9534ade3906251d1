//! Merges raw batches into one canonical `BarTable`.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::bar::{Bar, BarTable, CorrectionRecord, date_to_timestamp};
use crate::equity_files::{EquityBatch, deserialize_f64_lenient};
use crate::error::{DataQualityWarning, PipelineError};

/// Columns every daily summary must carry.
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "Kode Saham",
    "Open Price",
    "Tertinggi",
    "Terendah",
    "Penutupan",
    "Volume",
    "Frekuensi",
];

#[derive(Deserialize, Debug)]
struct SummaryRow {
    #[serde(rename = "Kode Saham")]
    code: String,
    #[serde(rename = "Open Price", deserialize_with = "deserialize_f64_lenient")]
    open: Option<f64>,
    #[serde(rename = "Tertinggi", deserialize_with = "deserialize_f64_lenient")]
    high: Option<f64>,
    #[serde(rename = "Terendah", deserialize_with = "deserialize_f64_lenient")]
    low: Option<f64>,
    #[serde(rename = "Penutupan", deserialize_with = "deserialize_f64_lenient")]
    close: Option<f64>,
    #[serde(rename = "Volume", deserialize_with = "deserialize_f64_lenient")]
    volume: Option<f64>,
    #[serde(rename = "Frekuensi", deserialize_with = "deserialize_f64_lenient")]
    trades: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub table: BarTable,
    pub warnings: Vec<DataQualityWarning>,
}

fn validate_columns(batch: &EquityBatch) -> Result<(), PipelineError> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !batch.headers.iter().any(|h| h == *col))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::schema(
            &batch.origin,
            format!("missing columns: {}", missing.join(", ")),
        ))
    }
}

fn required(value: Option<f64>, column: &str, origin: &str, line: usize) -> Result<f64, PipelineError> {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
        Some(v) => Err(PipelineError::schema(
            origin,
            format!("row {line}: '{column}' must be a non-negative number, got {v}"),
        )),
        None => Err(PipelineError::schema(
            origin,
            format!("row {line}: '{column}' is empty"),
        )),
    }
}

fn parse_row(batch: &EquityBatch, line: usize, row: SummaryRow) -> Result<Bar, PipelineError> {
    let origin = batch.origin.as_str();
    let trades = required(row.trades, "Frekuensi", origin, line)?;
    if trades.fract() != 0.0 {
        return Err(PipelineError::schema(
            origin,
            format!("row {line}: 'Frekuensi' must be a whole number, got {trades}"),
        ));
    }
    let open = match row.open {
        Some(v) => Some(required(Some(v), "Open Price", origin, line)?),
        None => None,
    };

    Ok(Bar {
        instrument: row.code,
        timestamp: date_to_timestamp(batch.date),
        open,
        high: required(row.high, "Tertinggi", origin, line)?,
        low: required(row.low, "Terendah", origin, line)?,
        close: required(row.close, "Penutupan", origin, line)?,
        volume: required(row.volume, "Volume", origin, line)?,
        trades: trades as u64,
    })
}

fn index_corrections(
    corrections: &[CorrectionRecord],
    warnings: &mut Vec<DataQualityWarning>,
) -> HashMap<(String, NaiveDate), f64> {
    let mut index = HashMap::with_capacity(corrections.len());
    for record in corrections {
        match index.entry((record.instrument.clone(), record.date)) {
            Entry::Vacant(slot) => {
                slot.insert(record.open);
            }
            Entry::Occupied(_) => warnings.push(DataQualityWarning::DuplicateCorrection {
                instrument: record.instrument.clone(),
                date: record.date,
            }),
        }
    }
    index
}

/// Concatenates the daily batches, validates their columns and backfills missing
/// open prices from the correction feed. A present open price always wins.
pub fn reconcile_equities(
    batches: &[EquityBatch],
    corrections: &[CorrectionRecord],
) -> Result<Reconciled, PipelineError> {
    if batches.is_empty() {
        return Err(PipelineError::unavailable("equities", "no batches to reconcile"));
    }

    let mut warnings = Vec::new();
    let corrections = index_corrections(corrections, &mut warnings);

    let mut bars = Vec::new();
    for batch in batches {
        validate_columns(batch)?;
        for (idx, record) in batch.records.iter().enumerate() {
            // Line 1 is the header.
            let line = idx + 2;
            let row: SummaryRow = record
                .deserialize(Some(&batch.headers))
                .map_err(|e| PipelineError::schema(&batch.origin, format!("row {line}: {e}")))?;
            bars.push(parse_row(batch, line, row)?);
        }
    }
    if bars.is_empty() {
        return Err(PipelineError::unavailable("equities", "daily summaries contain no rows"));
    }

    let mut backfilled = 0usize;
    for bar in bars.iter_mut().filter(|b| b.open.is_none()) {
        let key = (bar.instrument.clone(), bar.timestamp.date_naive());
        if let Some(&open) = corrections.get(&key) {
            bar.open = Some(open);
            backfilled += 1;
        }
    }

    let missing = bars.iter().filter(|b| b.open.is_none()).count();
    if missing > 0 {
        warnings.push(DataQualityWarning::MissingOpen { rows: missing });
    }

    let table = BarTable::new(bars)?;
    tracing::info!(
        rows = table.len(),
        instruments = table.instruments().len(),
        backfilled,
        missing_open = missing,
        "equities reconciled"
    );

    Ok(Reconciled { table, warnings })
}

/// Concatenates per-symbol kline fetches into one table.
pub fn merge_symbol_batches(batches: Vec<Vec<Bar>>) -> Result<BarTable, PipelineError> {
    let bars: Vec<Bar> = batches.into_iter().flatten().collect();
    if bars.is_empty() {
        return Err(PipelineError::unavailable("klines", "no bars fetched"));
    }
    let table = BarTable::new(bars)?;
    tracing::info!(rows = table.len(), instruments = table.instruments().len(), "klines merged");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::StringRecord;

    const HEADER: [&str; 8] = [
        "No",
        "Kode Saham",
        "Open Price",
        "Tertinggi",
        "Terendah",
        "Penutupan",
        "Volume",
        "Frekuensi",
    ];

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
    }

    fn batch(day: &str, rows: &[&[&str]]) -> EquityBatch {
        EquityBatch {
            date: date(day),
            origin: format!("Ringkasan Saham-{}.csv", day.replace('-', "")),
            headers: StringRecord::from(HEADER.to_vec()),
            records: rows.iter().map(|r| StringRecord::from(r.to_vec())).collect(),
        }
    }

    fn correction(instrument: &str, day: &str, open: f64) -> CorrectionRecord {
        CorrectionRecord {
            instrument: instrument.to_string(),
            date: date(day),
            open,
        }
    }

    #[test]
    fn backfills_genuinely_missing_open() {
        let batches = [batch(
            "2024-01-05",
            &[&["1", "BBB", "", "55", "45", "52", "500", "5"]],
        )];
        let corrections = [correction("BBB", "2024-01-05", 49.75)];

        let reconciled = reconcile_equities(&batches, &corrections).expect("reconcile");
        assert_eq!(reconciled.table.bars()[0].open, Some(49.75));
        assert!(reconciled.warnings.is_empty());
    }

    #[test]
    fn present_open_is_never_overridden() {
        let batches = [batch(
            "2024-01-05",
            &[&["1", "BBB", "50", "55", "45", "52", "500", "5"]],
        )];
        let corrections = [correction("BBB", "2024-01-05", 49.75)];

        let reconciled = reconcile_equities(&batches, &corrections).expect("reconcile");
        assert_eq!(reconciled.table.bars()[0].open, Some(50.0));
    }

    #[test]
    fn residual_missing_open_is_a_warning() {
        let batches = [
            batch("2024-01-04", &[&["1", "AAA", "", "11", "9", "10", "100", "4"]]),
            batch("2024-01-05", &[&["1", "AAA", "", "11", "9", "10", "100", "4"]]),
        ];
        let corrections = [correction("AAA", "2024-01-04", 10.0)];

        let reconciled = reconcile_equities(&batches, &corrections).expect("reconcile");
        assert_eq!(reconciled.table.len(), 2);
        assert_eq!(
            reconciled.warnings,
            vec![DataQualityWarning::MissingOpen { rows: 1 }]
        );
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let mut broken = batch("2024-01-05", &[&["1", "BBB", "50", "55", "45", "52", "500"]]);
        broken.headers = StringRecord::from(HEADER[..7].to_vec());

        let err = reconcile_equities(&[broken], &[]).expect_err("must fail");
        match err {
            PipelineError::SchemaViolation { detail, .. } => assert!(detail.contains("Frekuensi")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unparsable_row_aborts_ingestion() {
        let batches = [batch(
            "2024-01-05",
            &[&["1", "BBB", "50", "abc", "45", "52", "500", "5"]],
        )];
        let err = reconcile_equities(&batches, &[]).expect_err("must fail");
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
    }

    #[test]
    fn first_duplicate_correction_wins() {
        let batches = [batch(
            "2024-01-05",
            &[&["1", "BBB", "", "55", "45", "52", "500", "5"]],
        )];
        let corrections = [
            correction("BBB", "2024-01-05", 49.0),
            correction("BBB", "2024-01-05", 60.0),
        ];

        let reconciled = reconcile_equities(&batches, &corrections).expect("reconcile");
        assert_eq!(reconciled.table.bars()[0].open, Some(49.0));
        assert!(matches!(
            reconciled.warnings[0],
            DataQualityWarning::DuplicateCorrection { .. }
        ));
    }

    #[test]
    fn header_only_summaries_are_source_unavailable() {
        let batches = [batch("2024-01-04", &[]), batch("2024-01-05", &[])];
        let err = reconcile_equities(&batches, &[]).expect_err("must fail");
        match err {
            PipelineError::SourceUnavailable { origin, .. } => assert_eq!(origin, "equities"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn merging_nothing_is_source_unavailable() {
        let err = merge_symbol_batches(vec![Vec::new()]).expect_err("must fail");
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    }
}
