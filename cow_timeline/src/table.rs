//! Row normalization: CSV headers, combined date + time parsing and subject
//! (cow) column resolution.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::behavior::Profile;
use crate::TimelineError;

/// Timestamp layouts tried in order; the first is the one the observation
/// sheets are recorded in.
pub const DEFAULT_TIME_FORMATS: &[&str] = &[
    "%d-%m-%Y %H.%M.%S",
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H.%M.%S",
    "%Y-%m-%d %H:%M:%S",
];

const COMBINED_COLUMNS: &[&str] = &["datetime", "timestamp", "date"];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParseOptions {
    pub time_formats: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            time_formats: DEFAULT_TIME_FORMATS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Which header(s) carry the observation time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimestampColumns {
    DateAndTime { date: usize, time: usize },
    Combined(usize),
}

impl TimestampColumns {
    pub fn contains(&self, column: usize) -> bool {
        match *self {
            TimestampColumns::DateAndTime { date, time } => column == date || column == time,
            TimestampColumns::Combined(idx) => column == idx,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    /// 1-based data row in the source sheet (the header is row 0).
    pub row: usize,
    pub at: NaiveDateTime,
    /// Trimmed cell values aligned with [`Table::columns`]; empty cells are `None`.
    pub values: Vec<Option<String>>,
}

impl Observation {
    pub fn value(&self, column: usize) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Table {
    /// Lowercased, trimmed headers.
    pub columns: Vec<String>,
    pub observations: Vec<Observation>,
    /// Rows discarded because their timestamp could not be parsed.
    pub dropped_rows: usize,
    pub timestamp_columns: TimestampColumns,
}

/// How a caller names the cow column to chart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectSelector {
    /// Positional column index, counting the timestamp columns.
    Index(usize),
    /// Header name or profile alias, matched case-insensitively.
    Name(String),
}

impl SubjectSelector {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.parse::<usize>() {
            Ok(idx) => SubjectSelector::Index(idx),
            Err(_) => SubjectSelector::Name(trimmed.to_string()),
        }
    }
}

impl Table {
    /// Columns that hold behavior labels, i.e. everything except the timestamp.
    pub fn subject_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&idx| !self.timestamp_columns.contains(idx))
            .collect()
    }

    pub fn resolve_subject(
        &self,
        selector: &SubjectSelector,
        profile: &Profile,
    ) -> Result<usize, TimelineError> {
        let column = match selector {
            SubjectSelector::Index(idx) => Some(*idx),
            SubjectSelector::Name(name) => {
                let wanted = name.trim().to_lowercase();
                self.columns
                    .iter()
                    .position(|c| *c == wanted)
                    .or_else(|| profile.alias(&wanted).map(|alias| alias.column))
            }
        };
        match column {
            Some(idx) if idx < self.columns.len() && !self.timestamp_columns.contains(idx) => {
                Ok(idx)
            }
            _ => Err(TimelineError::UnknownSubject(match selector {
                SubjectSelector::Index(idx) => format!("#{idx}"),
                SubjectSelector::Name(name) => name.clone(),
            })),
        }
    }

    /// First subject column, the default when the caller does not pick one.
    pub fn default_subject(&self) -> Result<usize, TimelineError> {
        self.subject_columns()
            .into_iter()
            .next()
            .ok_or_else(|| TimelineError::UnknownSubject("no subject columns".into()))
    }
}

/// Parse CSV bytes into timestamped observations. Rows whose timestamp does
/// not parse are dropped and counted; the remaining rows keep source order.
pub fn parse_table(input: &[u8], options: &ParseOptions) -> Result<Table, TimelineError> {
    let input = input.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(input);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(input);

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let timestamp_columns = locate_timestamp_columns(&columns)?;

    let mut observations = Vec::new();
    let mut dropped_rows = 0usize;
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let row = idx + 1;
        let cell = |col: usize| record.get(col).map(str::trim).filter(|v| !v.is_empty());

        let raw = match timestamp_columns {
            TimestampColumns::DateAndTime { date, time } => match (cell(date), cell(time)) {
                (Some(d), Some(t)) => Some(format!("{d} {t}")),
                _ => None,
            },
            TimestampColumns::Combined(col) => cell(col).map(str::to_string),
        };

        match raw.as_deref().and_then(|s| parse_timestamp(s, &options.time_formats)) {
            Some(at) => {
                let values = (0..columns.len())
                    .map(|col| cell(col).map(str::to_string))
                    .collect();
                observations.push(Observation { row, at, values });
            }
            None => {
                debug!(row, raw = raw.as_deref().unwrap_or(""), "dropping row with unparsable timestamp");
                dropped_rows += 1;
            }
        }
    }

    Ok(Table {
        columns,
        observations,
        dropped_rows,
        timestamp_columns,
    })
}

/// Try each format in order; the first successful parse wins.
pub fn parse_timestamp<S: AsRef<str>>(value: &str, formats: &[S]) -> Option<NaiveDateTime> {
    let value = value.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt.as_ref()).ok())
}

fn locate_timestamp_columns(columns: &[String]) -> Result<TimestampColumns, TimelineError> {
    let find = |name: &str| columns.iter().position(|c| c == name);
    if let (Some(date), Some(time)) = (find("date"), find("time")) {
        return Ok(TimestampColumns::DateAndTime { date, time });
    }
    COMBINED_COLUMNS
        .iter()
        .find_map(|name| find(name))
        .map(TimestampColumns::Combined)
        .ok_or_else(|| TimelineError::MissingColumn("date".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_headers_are_normalized_and_rows_parsed() {
        let csv = "\u{feff} Date , TIME ,Cow-A,Cow-B\n\
                   01-03-2024,08.00.00, ยืน ,\n\
                   01-03-2024,08.05.30,กิน,นอน\n";
        let table = parse_table(csv.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(table.columns, vec!["date", "time", "cow-a", "cow-b"]);
        assert_eq!(
            table.timestamp_columns,
            TimestampColumns::DateAndTime { date: 0, time: 1 }
        );
        assert_eq!(table.observations.len(), 2);
        assert_eq!(table.observations[0].at, at(1, 8, 0, 0));
        assert_eq!(table.observations[0].value(2), Some("ยืน"));
        assert_eq!(table.observations[0].value(3), None);
        assert_eq!(table.observations[1].at, at(1, 8, 5, 30));
        assert_eq!(table.subject_columns(), vec![2, 3]);
    }

    #[test]
    fn test_unparsable_rows_are_dropped_in_order() {
        let csv = "date,time,cow\n\
                   01-03-2024,08.00.00,ยืน\n\
                   not a date,08.01.00,ยืน\n\
                   01-03-2024,,นอน\n\
                   01-03-2024,07.00.00,กิน\n";
        let table = parse_table(csv.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(table.dropped_rows, 2);
        let rows: Vec<usize> = table.observations.iter().map(|o| o.row).collect();
        assert_eq!(rows, vec![1, 4]);
        // Source order is kept even when timestamps go backwards.
        assert!(table.observations[1].at < table.observations[0].at);
    }

    #[test]
    fn test_fallback_formats_and_combined_column() {
        let csv = "Timestamp,cow\n\
                   01/03/2024 09:15:00,นอน\n\
                   2024-03-01 09:20:00,ยืน\n";
        let table = parse_table(csv.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(table.timestamp_columns, TimestampColumns::Combined(0));
        assert_eq!(table.observations.len(), 2);
        assert_eq!(table.observations[1].at, at(1, 9, 20, 0));
    }

    #[test]
    fn test_custom_formats_replace_defaults() {
        let csv = "date,time,cow\n01-03-2024,08.00.00,ยืน\n01-03-2024,08:00:00,ยืน\n";
        let options = ParseOptions {
            time_formats: vec!["%d-%m-%Y %H:%M:%S".into()],
        };
        let table = parse_table(csv.as_bytes(), &options).unwrap();
        assert_eq!(table.observations.len(), 1);
        assert_eq!(table.observations[0].row, 2);
    }

    #[test]
    fn test_missing_timestamp_column() {
        let err = parse_table(b"when,cow\nx,y\n", &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, TimelineError::MissingColumn(_)));
    }

    #[test]
    fn test_resolve_subject_by_name_index_and_alias() {
        let csv = "date,time,a,b,c\n01-03-2024,08.00.00,ยืน,นอน,กิน\n";
        let table = parse_table(csv.as_bytes(), &ParseOptions::default()).unwrap();
        let profile = Profile::default();
        assert_eq!(
            table.resolve_subject(&SubjectSelector::Name("B".into()), &profile).unwrap(),
            3
        );
        assert_eq!(
            table.resolve_subject(&SubjectSelector::parse("4"), &profile).unwrap(),
            4
        );
        assert_eq!(
            table
                .resolve_subject(&SubjectSelector::Name("Cow-A (black)".into()), &profile)
                .unwrap(),
            2
        );
        assert!(table
            .resolve_subject(&SubjectSelector::Index(1), &profile)
            .is_err());
        assert!(table
            .resolve_subject(&SubjectSelector::Index(9), &profile)
            .is_err());
        assert_eq!(table.default_subject().unwrap(), 2);
    }
}
