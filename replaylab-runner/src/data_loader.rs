//! CSV bar loading.
//!
//! Expected columns (header row required):
//! `time,open,high,low,close,volume[,vwap][,trade_count]`
//!
//! `time` is either RFC 3339 (`2024-01-02T14:30:00Z`) or a plain date
//! (`2024-01-02`, taken as midnight UTC). Rows must be strictly increasing
//! in time and, when a bar size is set, spaced by a whole number of bars
//! (gaps for weekends and holidays are fine). A row that fails to parse,
//! fails the OHLC sanity check, or breaks the spacing is an error at its
//! position in the stream.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use replaylab_core::domain::{Bar, Contract};
use replaylab_core::{BarSize, BarSource, SourceError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct CsvRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: u64,
    #[serde(default)]
    vwap: Option<f64>,
    #[serde(default)]
    trade_count: Option<u64>,
}

impl CsvRow {
    fn into_bar(self, line: usize) -> Result<Bar, SourceError> {
        let time = parse_time(&self.time).ok_or_else(|| SourceError::Parse {
            line,
            message: format!("unrecognized time '{}'", self.time),
        })?;
        let bar = Bar {
            time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap: self.vwap.unwrap_or((self.high + self.low + self.close) / 3.0),
            trade_count: self.trade_count.unwrap_or(0),
        };
        if !bar.is_sane() {
            return Err(SourceError::InvalidBar {
                time,
                reason: format!(
                    "line {line}: OHLC out of order (o={} h={} l={} c={})",
                    bar.open, bar.high, bar.low, bar.close
                ),
            });
        }
        Ok(bar)
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

fn csv_error(err: csv::Error) -> SourceError {
    let line = err
        .position()
        .and_then(|p| usize::try_from(p.line()).ok())
        .unwrap_or(0);
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(e) => SourceError::Io(e),
        _ => SourceError::Parse { line, message },
    }
}

/// Reject a bar that does not move forward from `last`, or that is off the
/// `bar_size` grid.
fn check_spacing(
    last: Option<DateTime<Utc>>,
    bar: &Bar,
    bar_size: Option<BarSize>,
    line: usize,
) -> Result<(), SourceError> {
    let Some(last) = last else {
        return Ok(());
    };
    let gap = bar.time - last;
    if gap <= Duration::zero() {
        return Err(SourceError::InvalidBar {
            time: bar.time,
            reason: format!("line {line}: not after the previous bar at {last}"),
        });
    }
    if let Some(size) = bar_size {
        let step = size.duration().num_seconds();
        if gap.num_seconds() % step != 0 {
            return Err(SourceError::InvalidBar {
                time: bar.time,
                reason: format!(
                    "line {line}: {} min after the previous bar, not a multiple of {size}",
                    gap.num_minutes()
                ),
            });
        }
    }
    Ok(())
}

/// Bars from one CSV file. The file is re-read on every request.
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    path: PathBuf,
    bar_size: Option<BarSize>,
}

impl CsvBarSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bar_size: None,
        }
    }

    /// Require consecutive rows to be a whole number of `bar_size` apart.
    pub fn with_bar_size(mut self, bar_size: BarSize) -> Self {
        self.bar_size = Some(bar_size);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily stream bars in `[from, to)`. Rows are parsed and checked as
    /// they are pulled, so a bad row surfaces as an `Err` item at its
    /// position. Ordering is checked across the whole file, not just the
    /// window.
    pub fn stream(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<impl Iterator<Item = Result<Bar, SourceError>>, SourceError> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(csv_error)?;

        let bar_size = self.bar_size;
        let mut last = None;
        Ok(reader
            .into_deserialize::<CsvRow>()
            .enumerate()
            .map(move |(i, row)| -> Result<Bar, SourceError> {
                // Header is line 1.
                let line = i + 2;
                let bar = row.map_err(csv_error).and_then(|r| r.into_bar(line))?;
                check_spacing(last, &bar, bar_size, line)?;
                last = Some(bar.time);
                Ok(bar)
            })
            .filter(move |bar| match bar {
                Ok(b) => b.time >= from && b.time < to,
                Err(_) => true,
            }))
    }

    /// Read every bar in `[from, to)`, failing on the first bad row.
    pub fn load(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Bar>, SourceError> {
        self.stream(from, to)?.collect()
    }
}

impl BarSource for CsvBarSource {
    fn next_bars(
        &mut self,
        _contract: &Contract,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bar_size: BarSize,
    ) -> Result<Vec<Bar>, SourceError> {
        self.clone().with_bar_size(bar_size).load(from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn all() -> (DateTime<Utc>, DateTime<Utc>) {
        (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }

    #[test]
    fn loads_dates_and_timestamps() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-02,10.0,10.5,9.5,10.2,1000\n\
             2024-01-03T14:30:00Z,10.2,10.8,10.0,10.6,1200\n",
        );
        let (from, to) = all();
        let bars = CsvBarSource::new(file.path()).load(from, to).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time.to_rfc3339(), "2024-01-02T00:00:00+00:00");
        assert_eq!(bars[1].volume, 1200);
        assert!((bars[1].vwap - (10.8 + 10.0 + 10.6) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn filters_to_window() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-02,10,11,9,10,1\n\
             2024-01-03,10,11,9,10,1\n\
             2024-01-04,10,11,9,10,1\n",
        );
        let from = parse_time("2024-01-03").unwrap();
        let to = parse_time("2024-01-04").unwrap();
        let bars = CsvBarSource::new(file.path()).load(from, to).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, from);
    }

    #[test]
    fn insane_bar_is_rejected() {
        let file = write_csv("time,open,high,low,close,volume\n2024-01-02,10,9,11,10,1\n");
        let (from, to) = all();
        let err = CsvBarSource::new(file.path()).load(from, to).unwrap_err();
        assert!(matches!(err, SourceError::InvalidBar { .. }));
    }

    #[test]
    fn bad_time_reports_line() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-02,10,11,9,10,1\n\
             yesterday,10,11,9,10,1\n",
        );
        let (from, to) = all();
        let err = CsvBarSource::new(file.path()).load(from, to).unwrap_err();
        assert!(matches!(err, SourceError::Parse { line: 3, .. }));
    }

    #[test]
    fn stream_yields_good_rows_before_error() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-02,10,11,9,10,1\n\
             2024-01-03,ten,11,9,10,1\n",
        );
        let (from, to) = all();
        let items: Vec<_> = CsvBarSource::new(file.path())
            .stream(from, to)
            .unwrap()
            .collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-03,10,11,9,10,1\n\
             2024-01-02,10,11,9,10,1\n",
        );
        let (from, to) = all();
        assert!(CsvBarSource::new(file.path()).load(from, to).is_err());
    }

    #[test]
    fn stream_stops_order_errors_at_the_offending_row() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-02,10,11,9,10,1\n\
             2024-01-04,10,11,9,10,1\n\
             2024-01-03,10,11,9,10,1\n\
             2024-01-05,10,11,9,10,1\n",
        );
        let (from, to) = all();
        let items: Vec<_> = CsvBarSource::new(file.path())
            .stream(from, to)
            .unwrap()
            .collect();
        assert!(items[0].is_ok() && items[1].is_ok());
        match &items[2] {
            Err(SourceError::InvalidBar { reason, .. }) => assert!(reason.starts_with("line 4:")),
            other => panic!("expected an ordering error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-02,10,11,9,10,1\n\
             2024-01-02,10,11,9,10,1\n",
        );
        let (from, to) = all();
        assert!(matches!(
            CsvBarSource::new(file.path()).load(from, to),
            Err(SourceError::InvalidBar { .. })
        ));
    }

    #[test]
    fn spacing_must_follow_the_bar_size() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-02T14:00:00Z,10,11,9,10,1\n\
             2024-01-02T15:00:00Z,10,11,9,10,1\n\
             2024-01-02T17:00:00Z,10,11,9,10,1\n",
        );
        let (from, to) = all();
        let source = CsvBarSource::new(file.path());

        let hourly = source.clone().with_bar_size(BarSize::Hour1).load(from, to).unwrap();
        assert_eq!(hourly.len(), 3);

        let err = source.with_bar_size(BarSize::Day1).load(from, to).unwrap_err();
        assert!(matches!(err, SourceError::InvalidBar { .. }), "got {err}");
    }

    #[test]
    fn daily_bars_may_skip_weekends() {
        let file = write_csv(
            "time,open,high,low,close,volume\n\
             2024-01-05,10,11,9,10,1\n\
             2024-01-08,10,11,9,10,1\n",
        );
        let (from, to) = all();
        let mut source = CsvBarSource::new(file.path());
        let contract = Contract::new(1, "SPY");
        let bars = source.next_bars(&contract, from, to, BarSize::Day1).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(source
            .next_bars(&contract, from, to, BarSize::Min15)
            .is_ok());
    }

    #[test]
    fn missing_file_is_io_error() {
        let (from, to) = all();
        let err = CsvBarSource::new("/nonexistent/bars.csv").load(from, to).unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
