//! Interval derivation: each observation lasts until the next one.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::table::Table;
use crate::TimelineError;

/// What to do with the final observation, which has no successor to end it.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrailingPolicy {
    #[default]
    Drop,
    /// Give the last observation a fixed length.
    Extend { seconds: i64 },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Source row of the observation that opened the interval.
    pub row: usize,
    pub label: Option<String>,
}

impl Interval {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntervalStats {
    pub intervals: usize,
    pub trailing_dropped: usize,
    /// Intervals whose successor was not strictly later (duplicate or
    /// out-of-order timestamps).
    pub non_positive_dropped: usize,
}

/// Pair every observation with the next one. Durations are taken over all
/// parsed rows, so a row with an unrecognized label still closes the interval
/// before it.
pub fn derive_intervals(
    table: &Table,
    subject_col: usize,
    policy: TrailingPolicy,
) -> Result<(Vec<Interval>, IntervalStats), TimelineError> {
    let observations = &table.observations;
    if observations.len() < 2 {
        return Err(TimelineError::InsufficientData);
    }

    let mut stats = IntervalStats::default();
    let mut intervals = Vec::with_capacity(observations.len());
    for pair in observations.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        if next.at <= current.at {
            stats.non_positive_dropped += 1;
            continue;
        }
        intervals.push(Interval {
            start: current.at,
            end: next.at,
            row: current.row,
            label: current.value(subject_col).map(str::to_string),
        });
    }

    let trailing = match (policy, observations.last()) {
        (TrailingPolicy::Extend { seconds }, Some(last)) if seconds > 0 => {
            Duration::try_seconds(seconds)
                .and_then(|length| last.at.checked_add_signed(length))
                .map(|end| Interval {
                    start: last.at,
                    end,
                    row: last.row,
                    label: last.value(subject_col).map(str::to_string),
                })
        }
        _ => None,
    };
    match trailing {
        Some(interval) => intervals.push(interval),
        None => stats.trailing_dropped = 1,
    }

    stats.intervals = intervals.len();
    Ok((intervals, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{parse_table, ParseOptions};

    fn table(csv: &str) -> Table {
        parse_table(csv.as_bytes(), &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_durations_come_from_next_row() {
        let t = table(
            "date,time,cow\n\
             01-03-2024,08.00.00,ยืน\n\
             01-03-2024,08.10.00,\n\
             01-03-2024,08.40.00,นอน\n",
        );
        let (intervals, stats) = derive_intervals(&t, 2, TrailingPolicy::Drop).unwrap();
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].duration(), Duration::minutes(10));
        assert_eq!(intervals[0].label.as_deref(), Some("ยืน"));
        assert_eq!(intervals[1].duration(), Duration::minutes(30));
        assert_eq!(intervals[1].label, None);
        assert_eq!(stats.trailing_dropped, 1);
        assert_eq!(stats.intervals, 2);
    }

    #[test]
    fn test_extend_trailing_row() {
        let t = table("date,time,cow\n01-03-2024,08.00.00,ยืน\n01-03-2024,08.10.00,นอน\n");
        let (intervals, stats) =
            derive_intervals(&t, 2, TrailingPolicy::Extend { seconds: 300 }).unwrap();
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[1].label.as_deref(), Some("นอน"));
        assert_eq!(intervals[1].duration(), Duration::minutes(5));
        assert_eq!(stats.trailing_dropped, 0);
    }

    #[test]
    fn test_out_of_order_rows_are_skipped() {
        let t = table(
            "date,time,cow\n\
             01-03-2024,08.00.00,ยืน\n\
             01-03-2024,07.00.00,นอน\n\
             01-03-2024,07.00.00,กิน\n\
             01-03-2024,07.30.00,กิน\n",
        );
        let (intervals, stats) = derive_intervals(&t, 2, TrailingPolicy::Drop).unwrap();
        assert_eq!(stats.non_positive_dropped, 2);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].row, 3);
    }

    #[test]
    fn test_single_row_is_insufficient() {
        let t = table("date,time,cow\n01-03-2024,08.00.00,ยืน\n");
        assert!(matches!(
            derive_intervals(&t, 2, TrailingPolicy::Drop),
            Err(TimelineError::InsufficientData)
        ));
    }
}
