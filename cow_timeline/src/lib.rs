//! Behavior timeline extraction for cow observation sheets.
//!
//! The pipeline is linear: raw CSV bytes (a local file or a Google Sheets
//! export) are normalized into timestamped [`Observation`]s, consecutive
//! observations become [`Interval`]s, and intervals whose label maps onto the
//! configured [`BehaviorSet`] become a [`Timeline`] that the front ends chart.

pub mod behavior;
pub mod figure;
pub mod interval;
pub mod sheet;
pub mod table;
pub mod timeline;

use thiserror::Error;

pub use behavior::{Behavior, BehaviorSet, Language, Profile, SubjectAlias, MISSING_LABEL};
pub use figure::{plotly_figure, standalone_html, viridis, AxisLabels, FigureOptions, Rgb, Theme};
pub use interval::{derive_intervals, Interval, IntervalStats, TrailingPolicy};
pub use sheet::{export_csv_url, parse_sheet_url, InputSource, SheetRef};
pub use table::{
    parse_table, parse_timestamp, Observation, ParseOptions, SubjectSelector, Table,
    TimestampColumns, DEFAULT_TIME_FORMATS,
};
pub use timeline::{
    build_timeline, day_boundaries, write_intervals_csv, BehaviorInterval, BehaviorTotal,
    Timeline, TimelineParams, TimelineStats,
};

#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("invalid Google Sheets URL: {0}")]
    InvalidSheetUrl(String),
    #[error("failed to fetch sheet: {0}")]
    Fetch(String),
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("missing required column: {0}")]
    MissingColumn(String),
    #[error("unknown subject column: {0}")]
    UnknownSubject(String),
    #[error("insufficient data: at least two timestamped rows are required")]
    InsufficientData,
    #[error("no rows for '{0}' carry a known behavior label")]
    NoKnownBehaviors(String),
    #[error("invalid behavior profile: {0}")]
    InvalidProfile(String),
}

/// Parse `input` and build the timeline for the selected subject in one call.
pub fn timeline_from_csv(
    input: &[u8],
    selector: &SubjectSelector,
    profile: &Profile,
    options: &ParseOptions,
    params: &TimelineParams,
) -> Result<Timeline, TimelineError> {
    let table = parse_table(input, options)?;
    let column = table.resolve_subject(selector, profile)?;
    build_timeline(&table, column, profile, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_from_csv_end_to_end() {
        let csv = "Date,Time,Cow A,Cow B\n\
                   01-03-2024,08.00.00,ยืน,นอน\n\
                   01-03-2024,08.10.00,กิน,นอน\n\
                   01-03-2024,08.25.00,ยืน,ดื่ม\n";
        let timeline = timeline_from_csv(
            csv.as_bytes(),
            &SubjectSelector::Name("cow a".into()),
            &Profile::default(),
            &ParseOptions::default(),
            &TimelineParams::default(),
        )
        .unwrap();
        assert_eq!(timeline.subject, "cow a");
        assert_eq!(timeline.entries.len(), 2);
        assert_eq!(timeline.entries[0].behavior, 0);
        assert_eq!(timeline.entries[1].behavior, 2);
    }

    #[test]
    fn test_timeline_from_csv_reports_missing_subject() {
        let csv = "date,time,cow\n01-03-2024,08.00.00,ยืน\n01-03-2024,08.01.00,ยืน\n";
        let err = timeline_from_csv(
            csv.as_bytes(),
            &SubjectSelector::Name("horse".into()),
            &Profile::default(),
            &ParseOptions::default(),
            &TimelineParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TimelineError::UnknownSubject(_)));
    }
}
