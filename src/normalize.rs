//! Per-instrument series: calendar reindexing, forward fill, FA and its
//! projection onto the price axis.

use chrono::NaiveDate;
use serde::Serialize;

use crate::bar::{Bar, BarTable, date_to_timestamp};
use crate::error::{DataQualityWarning, PipelineError};

/// How a series is laid out in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grid {
    /// Every calendar day between the first and last observation; gaps carry the
    /// previous observation forward.
    Calendar,
    /// Observations only, as delivered by the source.
    Observed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRow {
    pub bar: Bar,
    /// `false` for days synthesized by forward fill.
    pub observed: bool,
    pub fa: Option<f64>,
    pub fa_scaled: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSeries {
    pub instrument: String,
    pub rows: Vec<NormalizedRow>,
    /// `(min low, max high)` over the whole series.
    pub price_range: (f64, f64),
    /// `(min, max)` over defined FA values, if any.
    pub fa_range: Option<(f64, f64)>,
}

fn fill_calendar(bars: Vec<Bar>) -> Vec<(Bar, bool)> {
    let mut filled = Vec::with_capacity(bars.len());
    let mut iter = bars.into_iter();
    let Some(first) = iter.next() else {
        return filled;
    };

    let mut last = first.clone();
    filled.push((first, true));

    for bar in iter {
        let target = bar.timestamp.date_naive();
        for day in last
            .timestamp
            .date_naive()
            .iter_days()
            .skip(1)
            .take_while(|d| *d < target)
        {
            let mut carried = last.clone();
            carried.timestamp = date_to_timestamp(day);
            filled.push((carried, false));
        }
        last = bar.clone();
        filled.push((bar, true));
    }
    filled
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Builds the normalized series for `instrument`.
///
/// FA_scaled uses the FA and price extremes of the entire series, never of a
/// later display window. When every defined FA is equal the projection has no
/// slope; FA_scaled is left `None` for the whole series and a
/// `DegenerateScale` warning is returned.
pub fn normalize(
    table: &BarTable,
    instrument: &str,
    grid: Grid,
) -> Result<(NormalizedSeries, Vec<DataQualityWarning>), PipelineError> {
    let mut bars = table.bars_for(instrument);
    if bars.is_empty() {
        return Err(PipelineError::UnknownInstrument(instrument.to_string()));
    }
    bars.sort_by_key(|b| b.timestamp);

    let laid_out: Vec<(Bar, bool)> = match grid {
        Grid::Calendar => fill_calendar(bars),
        Grid::Observed => bars.into_iter().map(|b| (b, true)).collect(),
    };

    let fas: Vec<Option<f64>> = laid_out
        .iter()
        .map(|(bar, _)| bar.frequency_analyzer().filter(|v| v.is_finite()))
        .collect();

    let min_price = laid_out.iter().map(|(b, _)| b.low).fold(f64::INFINITY, f64::min);
    let max_price = laid_out
        .iter()
        .map(|(b, _)| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let fa_range = min_max(fas.iter().flatten().copied());

    let mut warnings = Vec::new();
    let slope = match fa_range {
        Some((lo, hi)) if hi > lo => Some((lo, hi - lo)),
        Some(_) => {
            warnings.push(DataQualityWarning::DegenerateScale {
                instrument: instrument.to_string(),
            });
            None
        }
        None => None,
    };

    let rows = laid_out
        .into_iter()
        .zip(fas)
        .map(|((bar, observed), fa)| {
            let fa_scaled = match (fa, slope) {
                (Some(fa), Some((lo, span))) => {
                    Some(min_price + (fa - lo) / span * (max_price - min_price))
                }
                _ => None,
            };
            NormalizedRow {
                bar,
                observed,
                fa,
                fa_scaled,
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        instrument,
        rows = rows.len(),
        filled = rows.iter().filter(|r| !r.observed).count(),
        "series normalized"
    );

    Ok((
        NormalizedSeries {
            instrument: instrument.to_string(),
            rows,
            price_range: (min_price, max_price),
            fa_range,
        },
        warnings,
    ))
}

impl NormalizedSeries {
    /// Rows whose calendar date falls within `[from, to]`; open bounds are unbounded.
    /// An empty selection is reported as a warning rather than an error.
    pub fn window(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<&[NormalizedRow], DataQualityWarning> {
        let start = from.map_or(0, |from| {
            self.rows
                .partition_point(|r| r.bar.timestamp.date_naive() < from)
        });
        let end = to.map_or(self.rows.len(), |to| {
            self.rows
                .partition_point(|r| r.bar.timestamp.date_naive() <= to)
        });

        if start >= end {
            return Err(DataQualityWarning::EmptyDateRange {
                instrument: self.instrument.clone(),
                from,
                to,
            });
        }
        Ok(&self.rows[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::tests::bar;
    use approx::assert_abs_diff_eq;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
    }

    fn priced(instrument: &str, day: &str, low: f64, high: f64, volume: f64, trades: u64) -> Bar {
        let mut b = bar(instrument, day, volume, trades);
        b.low = low;
        b.high = high;
        b.close = (low + high) / 2.0;
        b
    }

    #[test]
    fn single_observation_has_undefined_scale() {
        let table = BarTable::new(vec![bar("AAA", "2024-01-02", 100.0, 10)]).expect("table");
        let (series, warnings) = normalize(&table, "AAA", Grid::Calendar).expect("normalize");

        assert_eq!(series.rows.len(), 1);
        assert_eq!(series.rows[0].fa, Some(1000.0));
        assert_eq!(series.rows[0].fa_scaled, None);
        assert_eq!(
            warnings,
            vec![DataQualityWarning::DegenerateScale {
                instrument: "AAA".to_string()
            }]
        );
    }

    #[test]
    fn calendar_grid_covers_every_day_once() {
        let table = BarTable::new(vec![
            bar("AAA", "2024-01-06", 30.0, 3),
            bar("AAA", "2024-01-02", 10.0, 1),
            bar("AAA", "2024-01-05", 20.0, 2),
            bar("BBB", "2024-01-03", 5.0, 1),
        ])
        .expect("table");
        let (series, _) = normalize(&table, "AAA", Grid::Calendar).expect("normalize");

        let days: Vec<NaiveDate> = series.rows.iter().map(|r| r.bar.timestamp.date_naive()).collect();
        let expected: Vec<NaiveDate> = date("2024-01-02").iter_days().take(5).collect();
        assert_eq!(days, expected);

        let observed: Vec<bool> = series.rows.iter().map(|r| r.observed).collect();
        assert_eq!(observed, vec![true, false, false, true, true]);
        assert!(series.rows.iter().all(|r| r.bar.instrument == "AAA"));
    }

    #[test]
    fn gaps_carry_previous_observation_forward() {
        let mut first = priced("AAA", "2024-01-02", 90.0, 120.0, 50.0, 5);
        first.open = None;
        let table = BarTable::new(vec![first.clone(), bar("AAA", "2024-01-05", 20.0, 2)])
            .expect("table");
        let (series, _) = normalize(&table, "AAA", Grid::Calendar).expect("normalize");

        for row in &series.rows[1..3] {
            assert!(!row.observed);
            assert_eq!(row.bar.open, first.open);
            assert_eq!(row.bar.high, first.high);
            assert_eq!(row.bar.low, first.low);
            assert_eq!(row.bar.close, first.close);
            assert_eq!(row.bar.volume, first.volume);
            assert_eq!(row.bar.trades, first.trades);
            assert_eq!(row.fa, series.rows[0].fa);
        }
    }

    #[test]
    fn constant_fa_with_zero_trade_row_has_undefined_scale() {
        // Every traded day has volume / trades = 10, so FA is 1000 throughout.
        let table = BarTable::new(vec![
            bar("AAA", "2024-01-02", 100.0, 10),
            bar("AAA", "2024-01-03", 200.0, 20),
            bar("AAA", "2024-01-04", 50.0, 0),
            bar("AAA", "2024-01-05", 300.0, 30),
        ])
        .expect("table");
        let (series, warnings) = normalize(&table, "AAA", Grid::Calendar).expect("normalize");

        assert_eq!(series.rows.len(), 4);
        let fa: Vec<Option<f64>> = series.rows.iter().map(|r| r.fa).collect();
        assert_eq!(fa, vec![Some(1000.0), Some(1000.0), None, Some(1000.0)]);
        assert!(series.rows.iter().all(|r| r.fa_scaled.is_none()));
        assert_eq!(
            warnings,
            vec![DataQualityWarning::DegenerateScale {
                instrument: "AAA".to_string()
            }]
        );
    }

    #[test]
    fn observed_grid_keeps_only_source_rows() {
        let table = BarTable::new(vec![
            bar("BTCUSDT", "2024-01-02", 10.0, 1),
            bar("BTCUSDT", "2024-01-09", 20.0, 1),
        ])
        .expect("table");
        let (series, _) = normalize(&table, "BTCUSDT", Grid::Observed).expect("normalize");
        assert_eq!(series.rows.len(), 2);
    }

    #[test]
    fn scaled_fa_spans_price_range_monotonically() {
        let table = BarTable::new(vec![
            priced("AAA", "2024-01-01", 80.0, 100.0, 30.0, 10),
            priced("AAA", "2024-01-02", 85.0, 130.0, 10.0, 10),
            priced("AAA", "2024-01-03", 90.0, 110.0, 20.0, 10),
            priced("AAA", "2024-01-04", 95.0, 105.0, 50.0, 10),
        ])
        .expect("table");
        let (series, warnings) = normalize(&table, "AAA", Grid::Calendar).expect("normalize");
        assert!(warnings.is_empty());
        assert_eq!(series.price_range, (80.0, 130.0));

        let mut pairs: Vec<(f64, f64)> = series
            .rows
            .iter()
            .map(|r| (r.fa.expect("fa"), r.fa_scaled.expect("scaled")))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert!(pairs.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_abs_diff_eq!(pairs[0].1, 80.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pairs[3].1, 130.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_trade_rows_stay_but_are_excluded_from_scale() {
        let table = BarTable::new(vec![
            priced("AAA", "2024-01-01", 10.0, 20.0, 10.0, 10),
            priced("AAA", "2024-01-02", 10.0, 20.0, 0.0, 0),
            priced("AAA", "2024-01-03", 10.0, 20.0, 20.0, 10),
        ])
        .expect("table");
        let (series, _) = normalize(&table, "AAA", Grid::Calendar).expect("normalize");

        assert_eq!(series.rows.len(), 3);
        assert_eq!(series.rows[1].fa, None);
        assert_eq!(series.rows[1].fa_scaled, None);
        assert_eq!(series.fa_range, Some((1.0, 8.0)));
    }

    #[test]
    fn window_filters_inclusively_and_reports_empty_ranges() {
        let table = BarTable::new(vec![
            bar("AAA", "2024-01-01", 10.0, 1),
            bar("AAA", "2024-01-05", 20.0, 1),
        ])
        .expect("table");
        let (series, _) = normalize(&table, "AAA", Grid::Calendar).expect("normalize");

        let rows = series
            .window(Some(date("2024-01-02")), Some(date("2024-01-04")))
            .expect("rows");
        assert_eq!(rows.len(), 3);
        assert_eq!(series.window(None, None).expect("rows").len(), 5);

        let warning = series
            .window(Some(date("2024-02-01")), None)
            .expect_err("empty");
        assert!(matches!(warning, DataQualityWarning::EmptyDateRange { .. }));
    }

    #[test]
    fn unknown_instrument_is_an_error() {
        let table = BarTable::new(vec![bar("AAA", "2024-01-01", 10.0, 1)]).expect("table");
        let err = normalize(&table, "ZZZ", Grid::Calendar).expect_err("must fail");
        assert!(matches!(err, PipelineError::UnknownInstrument(_)));
    }
}
