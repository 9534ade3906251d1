use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};
use reqwest::Url;
use serde::Serialize;

use crate::bar::Interval;
use crate::normalize::NormalizedRow;
use crate::pipeline::{ScreenReport, SeriesReport};

const SERIES_TAIL: usize = 30;
const CHART_WIDGET: &str = "https://s.tradingview.com/widgetembed/";

fn get_visibility_ratio(current: f64, top: f64) -> f64 {
    if top <= 0.0 {
        1.0
    } else {
        (0.4 + 0.6 * (current / top)).max(0.4)
    }
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown Time".to_string())
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.abs() >= 1e6 => format!("{v:.3e}"),
        Some(v) => format!("{v:.2}"),
        None => "-".to_string(),
    }
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().enumerate().map(|(i, h)| {
            let cell = Cell::new(h).add_attribute(Attribute::Bold);
            if i == 0 {
                cell
            } else {
                cell.set_alignment(CellAlignment::Right)
            }
        }));
    table
}

/// TradingView chart for the instrument, e.g. `IDX:BBCA` or `BINANCE:BTCUSDT`.
/// Query values are form-encoded, so codes with reserved characters stay one parameter.
pub fn chart_link(exchange: &str, instrument: &str, interval: Interval) -> Result<String> {
    let symbol = format!("{exchange}:{instrument}");
    let url = Url::parse_with_params(
        CHART_WIDGET,
        &[
            ("symbol", symbol.as_str()),
            ("interval", interval.chart_code()),
            ("theme", "dark"),
            ("style", "1"),
            ("locale", "id"),
        ],
    )?;
    Ok(url.into())
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("⚠️  {warning}");
    }
}

pub fn render_screen(report: &ScreenReport, top: usize) -> Table {
    let mut table = new_table(&["Rank", "Asset", "Latest FA", "Mean FA", "Std FA", "Z-Score"]);

    let top_z = report.records.first().map_or(1.0, |r| r.z_score);
    let safe_top_z = if top_z == 0.0 { 1.0 } else { top_z };

    for (i, record) in report.records.iter().take(top).enumerate() {
        let ratio = get_visibility_ratio(record.z_score, safe_top_z);
        let cyan_val = (255.0 * ratio) as u8;
        let green_val = (255.0 * ratio) as u8;
        let gray_val = (150.0 * ratio) as u8;
        let gray = Color::Rgb {
            r: gray_val,
            g: gray_val,
            b: gray_val,
        };

        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&record.instrument).fg(Color::Rgb {
                r: 0,
                g: cyan_val,
                b: cyan_val,
            }),
            Cell::new(format_value(Some(record.last_fa)))
                .fg(gray)
                .set_alignment(CellAlignment::Right),
            Cell::new(format_value(Some(record.mean_fa)))
                .fg(gray)
                .set_alignment(CellAlignment::Right),
            Cell::new(format_value(record.std_fa))
                .fg(gray)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", record.z_score))
                .fg(Color::Rgb {
                    r: 0,
                    g: green_val,
                    b: 0,
                })
                .set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn render_series(rows: &[NormalizedRow]) -> Table {
    let mut table = new_table(&["Date", "Close", "Volume", "Trades", "FA", "FA Scaled"]);
    let tail = rows.len().saturating_sub(SERIES_TAIL);

    for row in &rows[tail..] {
        let bar = &row.bar;
        let date = if row.observed {
            Cell::new(bar.timestamp.format("%Y-%m-%d %H:%M"))
        } else {
            // Forward-filled day.
            Cell::new(format!("{} *", bar.timestamp.format("%Y-%m-%d %H:%M"))).fg(Color::DarkGrey)
        };
        table.add_row(vec![
            date,
            Cell::new(format_value(Some(bar.close))).set_alignment(CellAlignment::Right),
            Cell::new(format_value(Some(bar.volume))).set_alignment(CellAlignment::Right),
            Cell::new(bar.trades).set_alignment(CellAlignment::Right),
            Cell::new(format_value(row.fa)).set_alignment(CellAlignment::Right),
            Cell::new(format_value(row.fa_scaled)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

#[derive(Serialize)]
struct SeriesJson<'a> {
    #[serde(flatten)]
    report: &'a SeriesReport,
    chart: String,
    rows: &'a [NormalizedRow],
}

pub fn print_series(report: &SeriesReport, json: bool) -> Result<()> {
    let rows = report.visible_rows().unwrap_or_default();
    let chart = chart_link(report.exchange, &report.instrument, report.interval)?;

    if json {
        let out = SeriesJson {
            report,
            chart,
            rows,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_warnings(&report.warnings);
    if rows.is_empty() {
        println!("No data in the selected date range.");
        return Ok(());
    }

    let (min_price, max_price) = report.series.price_range;
    println!(
        "\nFrequency Analyzer for {} ({}) | price range {:.2} - {:.2} | * = carried forward",
        report.instrument, report.interval, min_price, max_price
    );
    println!("{}", render_series(rows));
    println!("Chart: {chart}");
    Ok(())
}

pub fn print_screen(report: &ScreenReport, top: usize, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    print_warnings(&report.warnings);
    if report.records.is_empty() {
        println!("No data found.");
        return Ok(());
    }

    let title = format!(
        "(FA anomalies over {} days, data up to {} UTC, {} of {} instruments scored)",
        report.lookback_days,
        format_timestamp(report.as_of),
        report.records.len(),
        report.universe
    );
    println!("\n{}\n{}", title, render_screen(report, top));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screener::ZScoreRecord;

    #[test]
    fn chart_link_uses_exchange_and_interval_code() {
        let link = chart_link("BINANCE", "BTCUSDT", Interval::OneHour).expect("link");
        assert!(link.starts_with(CHART_WIDGET));
        assert!(link.contains("symbol=BINANCE%3ABTCUSDT"));
        assert!(link.contains("interval=60"));
        let daily = chart_link("IDX", "BBCA", Interval::OneDay).expect("link");
        assert!(daily.contains("interval=D"));
    }

    #[test]
    fn chart_link_encodes_reserved_characters() {
        let link = chart_link("IDX", "A&B C", Interval::OneDay).expect("link");
        assert!(link.contains("symbol=IDX%3AA%26B+C&"));

        let url = Url::parse(&link).expect("valid url");
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(params.len(), 5);
        assert_eq!(params[0], ("symbol".to_string(), "IDX:A&B C".to_string()));
        assert_eq!(params[1], ("interval".to_string(), "D".to_string()));
    }

    #[test]
    fn visibility_ratio_is_floored() {
        assert_eq!(get_visibility_ratio(2.0, 2.0), 1.0);
        assert_eq!(get_visibility_ratio(-3.0, 2.0), 0.4);
        assert_eq!(get_visibility_ratio(1.0, 0.0), 1.0);
    }

    #[test]
    fn screen_table_honours_top() {
        let record = |name: &str, z: f64| ZScoreRecord {
            instrument: name.to_string(),
            last_fa: 10.0,
            mean_fa: 5.0,
            std_fa: Some(2.0),
            z_score: z,
            observations: 4,
        };
        let report = ScreenReport {
            as_of: None,
            lookback_days: 14,
            universe: 3,
            records: vec![record("AAA", 2.5), record("BBB", 1.0), record("CCC", -1.0)],
            warnings: Vec::new(),
        };

        let table = render_screen(&report, 2);
        assert_eq!(table.row_iter().count(), 2);
        assert!(table.to_string().contains("AAA"));
        assert!(!table.to_string().contains("CCC"));
    }

    #[test]
    fn formats_undefined_values_as_dash() {
        assert_eq!(format_value(None), "-");
        assert_eq!(format_value(Some(12.346)), "12.35");
        assert_eq!(format_value(Some(8_000_000.0)), "8.000e6");
    }
}
