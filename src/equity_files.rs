//! Local equity drops: one daily-summary file (CSV or XLSX) per trading date
//! plus the adjusted-open correction feed.

use calamine::{Data, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;

use crate::bar::CorrectionRecord;
use crate::error::PipelineError;

static SUMMARY_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Ringkasan Saham-(\d+)\.(csv|xlsx)$").expect("summary file pattern is valid")
});

/// Container format of one daily summary, taken from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SummaryFormat {
    Csv,
    Xlsx,
}

/// Rows of one daily-summary file, every one tagged with the file's date.
#[derive(Debug, Clone)]
pub struct EquityBatch {
    pub date: NaiveDate,
    pub origin: String,
    pub headers: StringRecord,
    pub records: Vec<StringRecord>,
}

// --- Lenient numeric cells ---

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v).filter(|v| !v.is_nan()))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let v = v.trim();
        if v.is_empty() || v.eq_ignore_ascii_case("nan") {
            Ok(None)
        } else {
            v.parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

/// Accepts ints, floats and numeric strings; an empty cell is `None`.
pub fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

// --- Daily summaries ---

/// Extracts the trading date and format from a `Ringkasan Saham-YYYYMMDD.{csv,xlsx}` name.
/// Returns `Ok(None)` for files that are not daily summaries.
pub fn summary_file(file_name: &str) -> Result<Option<(NaiveDate, SummaryFormat)>, PipelineError> {
    let Some(caps) = SUMMARY_FILE.captures(file_name) else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(&caps[1], "%Y%m%d")
        .map_err(|e| PipelineError::schema(file_name, format!("bad date in file name: {e}")))?;
    let format = match &caps[2] {
        "xlsx" => SummaryFormat::Xlsx,
        _ => SummaryFormat::Csv,
    };
    Ok(Some((date, format)))
}

fn read_csv(origin: &str, bytes: &[u8]) -> Result<(StringRecord, Vec<StringRecord>), PipelineError> {
    let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::schema(origin, e.to_string()))?
        .clone();
    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PipelineError::schema(origin, e.to_string()))?;
    Ok((headers, records))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

/// Reads the first worksheet; its first row is the header. Blank rows are dropped.
fn read_xlsx(origin: &str, bytes: Vec<u8>) -> Result<(StringRecord, Vec<StringRecord>), PipelineError> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| PipelineError::schema(origin, e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| PipelineError::schema(origin, "workbook has no worksheets"))?
        .map_err(|e| PipelineError::schema(origin, e.to_string()))?;

    let mut rows = range
        .rows()
        .filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)))
        .map(|row| row.iter().map(cell_text).collect::<StringRecord>());
    let headers = rows
        .next()
        .ok_or_else(|| PipelineError::schema(origin, "worksheet has no header row"))?;
    Ok((headers, rows.collect()))
}

/// Loads every daily summary found directly under `data_dir`, oldest first.
pub async fn load_batches(data_dir: &Path) -> Result<Vec<EquityBatch>, PipelineError> {
    let origin = data_dir.display().to_string();
    let mut entries = fs::read_dir(data_dir)
        .await
        .map_err(|e| PipelineError::unavailable(&origin, e))?;

    let mut files: Vec<(NaiveDate, SummaryFormat, PathBuf)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::unavailable(&origin, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some((date, format)) = summary_file(&name)? {
            files.push((date, format, entry.path()));
        }
    }

    if files.is_empty() {
        return Err(PipelineError::unavailable(
            origin,
            "no 'Ringkasan Saham-*.csv' or '*.xlsx' files found",
        ));
    }
    files.sort();

    let mut batches = Vec::with_capacity(files.len());
    for (date, format, path) in files {
        let file_origin = path.display().to_string();
        let bytes = fs::read(&path)
            .await
            .map_err(|e| PipelineError::unavailable(&file_origin, e))?;
        let (headers, records) = match format {
            SummaryFormat::Csv => read_csv(&file_origin, &bytes)?,
            SummaryFormat::Xlsx => read_xlsx(&file_origin, bytes)?,
        };

        tracing::debug!(file = %file_origin, %date, ?format, rows = records.len(), "loaded daily summary");
        batches.push(EquityBatch {
            date,
            origin: file_origin,
            headers,
            records,
        });
    }

    tracing::info!(files = batches.len(), dir = %origin, "equity batches loaded");
    Ok(batches)
}

// --- Correction feed ---

#[derive(Deserialize, Debug)]
struct CorrectionRow {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "AdjustedOpenPrice", deserialize_with = "deserialize_f64_lenient")]
    adjusted_open: Option<f64>,
}

fn parse_feed_date(value: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Parses the adjusted-open feed. Rows without a price carry no correction and are skipped.
pub fn parse_corrections(origin: &str, bytes: &[u8]) -> Result<Vec<CorrectionRecord>, PipelineError> {
    let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(bytes);
    let mut corrections = Vec::new();

    for (idx, row) in reader.deserialize::<CorrectionRow>().enumerate() {
        let row = row.map_err(|e| PipelineError::schema(origin, e.to_string()))?;
        let date = parse_feed_date(&row.date).ok_or_else(|| {
            PipelineError::schema(origin, format!("row {}: bad date '{}'", idx + 1, row.date))
        })?;
        if let Some(open) = row.adjusted_open {
            corrections.push(CorrectionRecord {
                instrument: row.code,
                date,
                open,
            });
        }
    }
    Ok(corrections)
}

pub async fn load_corrections(path: &Path) -> Result<Vec<CorrectionRecord>, PipelineError> {
    let origin = path.display().to_string();
    let bytes = fs::read(path)
        .await
        .map_err(|e| PipelineError::unavailable(&origin, e))?;
    let corrections = parse_corrections(&origin, &bytes)?;
    tracing::info!(records = corrections.len(), file = %origin, "correction feed loaded");
    Ok(corrections)
}
