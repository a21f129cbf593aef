//! Behavior timeline construction for a single subject column.

use std::io::Write;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::behavior::{BehaviorSet, Language, Profile};
use crate::interval::{derive_intervals, TrailingPolicy};
use crate::table::Table;
use crate::TimelineError;

/// One charted bar: a span of time during which the cow showed `behavior`
/// (an ordinal into the profile's [`BehaviorSet`]).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BehaviorInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub behavior: usize,
}

impl BehaviorInterval {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineStats {
    pub rows_parsed: usize,
    pub rows_dropped: usize,
    /// Intervals whose label was missing or not in the behavior set.
    pub unknown_intervals: usize,
    pub trailing_dropped: usize,
    pub non_positive_dropped: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimelineParams {
    pub trailing: TrailingPolicy,
    /// Only give axis rows to behaviors that occur in the data.
    pub present_only: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeline {
    /// Header of the subject column.
    pub subject: String,
    pub entries: Vec<BehaviorInterval>,
    /// Behavior ordinals in axis order, bottom row first.
    pub axis: Vec<usize>,
    pub day_boundaries: Vec<NaiveDateTime>,
    pub stats: TimelineStats,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BehaviorTotal {
    pub behavior: usize,
    pub total_seconds: i64,
    pub count: usize,
    /// Fraction of the charted time, 0..=1.
    pub share: f64,
}

impl BehaviorTotal {
    pub fn total(&self) -> Duration {
        Duration::seconds(self.total_seconds)
    }
}

pub fn build_timeline(
    table: &Table,
    subject_col: usize,
    profile: &Profile,
    params: &TimelineParams,
) -> Result<Timeline, TimelineError> {
    let subject = table
        .columns
        .get(subject_col)
        .cloned()
        .ok_or_else(|| TimelineError::UnknownSubject(format!("#{subject_col}")))?;
    let (intervals, interval_stats) = derive_intervals(table, subject_col, params.trailing)?;

    let behaviors = &profile.behaviors;
    let mut unknown_intervals = 0usize;
    let entries: Vec<BehaviorInterval> = intervals
        .iter()
        .filter_map(|interval| match behaviors.ordinal(interval.label.as_deref()) {
            Some(behavior) => Some(BehaviorInterval {
                start: interval.start,
                end: interval.end,
                behavior,
            }),
            None => {
                unknown_intervals += 1;
                None
            }
        })
        .collect();

    if entries.is_empty() {
        return Err(TimelineError::NoKnownBehaviors(subject));
    }
    debug!(
        subject = %subject,
        entries = entries.len(),
        unknown = unknown_intervals,
        "built behavior timeline"
    );

    let axis = axis_ordinals(&entries, behaviors, params.present_only);
    let day_boundaries = match span_of(&entries) {
        Some((start, end)) => day_boundaries(start, end),
        None => Vec::new(),
    };

    Ok(Timeline {
        subject,
        entries,
        axis,
        day_boundaries,
        stats: TimelineStats {
            rows_parsed: table.observations.len(),
            rows_dropped: table.dropped_rows,
            unknown_intervals,
            trailing_dropped: interval_stats.trailing_dropped,
            non_positive_dropped: interval_stats.non_positive_dropped,
        },
    })
}

impl Timeline {
    /// Earliest start and latest end over all entries.
    pub fn span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        span_of(&self.entries)
    }

    /// Axis row for a behavior ordinal, if the behavior has a row.
    pub fn axis_position(&self, behavior: usize) -> Option<usize> {
        self.axis.iter().position(|&b| b == behavior)
    }

    /// Per-behavior time budget in ordinal order; absent behaviors are skipped.
    pub fn totals(&self) -> Vec<BehaviorTotal> {
        let mut by_behavior: Vec<(i64, usize)> = Vec::new();
        for entry in &self.entries {
            if by_behavior.len() <= entry.behavior {
                by_behavior.resize(entry.behavior + 1, (0, 0));
            }
            let slot = &mut by_behavior[entry.behavior];
            slot.0 += entry.duration().num_seconds();
            slot.1 += 1;
        }
        let charted: i64 = by_behavior.iter().map(|(secs, _)| secs).sum();
        by_behavior
            .into_iter()
            .enumerate()
            .filter(|(_, (_, count))| *count > 0)
            .map(|(behavior, (total_seconds, count))| BehaviorTotal {
                behavior,
                total_seconds,
                count,
                share: if charted > 0 {
                    total_seconds as f64 / charted as f64
                } else {
                    0.0
                },
            })
            .collect()
    }
}

/// Midnights strictly inside `(start, end)`.
pub fn day_boundaries(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
    let mut out = Vec::new();
    let mut day = start.date();
    while let Some(next) = day.succ_opt() {
        let midnight = next.and_time(NaiveTime::MIN);
        if midnight >= end {
            break;
        }
        out.push(midnight);
        day = next;
    }
    out
}

/// Write one CSV row per charted interval.
pub fn write_intervals_csv<W: Write>(
    timeline: &Timeline,
    behaviors: &BehaviorSet,
    writer: W,
) -> Result<(), TimelineError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record([
        "start",
        "end",
        "duration_s",
        "behavior_index",
        "behavior",
        "behavior_en",
    ])?;
    for entry in &timeline.entries {
        writer.write_record([
            entry.start.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.end.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.duration().num_seconds().to_string(),
            entry.behavior.to_string(),
            behaviors.display(entry.behavior, Language::Thai).to_string(),
            behaviors
                .display(entry.behavior, Language::English)
                .to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn axis_ordinals(
    entries: &[BehaviorInterval],
    behaviors: &BehaviorSet,
    present_only: bool,
) -> Vec<usize> {
    if present_only {
        let mut present: Vec<usize> = entries.iter().map(|e| e.behavior).collect();
        present.sort_unstable();
        present.dedup();
        present
    } else {
        (0..behaviors.len()).collect()
    }
}

fn span_of(entries: &[BehaviorInterval]) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = entries.iter().map(|e| e.start).min()?;
    let end = entries.iter().map(|e| e.end).max()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{parse_table, ParseOptions};
    use chrono::NaiveDate;

    const SHEET: &str = "date,time,cow-a,cow-b\n\
        01-03-2024,22.00.00,ยืน,นอน\n\
        01-03-2024,23.00.00,เดิน,นอน\n\
        02-03-2024,01.00.00,ดื่ม,\n\
        02-03-2024,01.30.00,ยืน,กิน\n\
        02-03-2024,02.00.00,นอน,กิน\n";

    fn sheet() -> Table {
        parse_table(SHEET.as_bytes(), &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_unknown_labels_are_excluded_but_close_intervals() {
        let timeline =
            build_timeline(&sheet(), 2, &Profile::default(), &TimelineParams::default()).unwrap();
        let behaviors: Vec<usize> = timeline.entries.iter().map(|e| e.behavior).collect();
        assert_eq!(behaviors, vec![0, 3, 0]);
        assert_eq!(timeline.entries[0].duration(), Duration::hours(1));
        // "เดิน" spans 23:00..01:00 and is dropped; "ดื่ม" starts at 01:00.
        assert_eq!(
            timeline.entries[1].start,
            NaiveDate::from_ymd_opt(2024, 3, 2)
                .unwrap()
                .and_hms_opt(1, 0, 0)
                .unwrap()
        );
        assert_eq!(timeline.stats.unknown_intervals, 1);
        assert_eq!(timeline.stats.trailing_dropped, 1);
        assert_eq!(timeline.axis, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_present_only_axis_keeps_stable_ordinals() {
        let params = TimelineParams {
            present_only: true,
            ..TimelineParams::default()
        };
        let timeline = build_timeline(&sheet(), 3, &Profile::default(), &params).unwrap();
        assert_eq!(timeline.axis, vec![1, 2]);
        assert_eq!(timeline.axis_position(2), Some(1));
        assert_eq!(timeline.axis_position(0), None);
        assert!(timeline.entries.iter().all(|e| e.behavior == 1 || e.behavior == 2));
    }

    #[test]
    fn test_day_boundaries_inside_span() {
        let timeline =
            build_timeline(&sheet(), 2, &Profile::default(), &TimelineParams::default()).unwrap();
        let midnight = NaiveDate::from_ymd_opt(2024, 3, 2)
            .unwrap()
            .and_time(NaiveTime::MIN);
        assert_eq!(timeline.day_boundaries, vec![midnight]);
        // A span that starts exactly at midnight does not repeat it.
        assert!(day_boundaries(midnight, midnight + Duration::hours(5)).is_empty());
        assert_eq!(
            day_boundaries(midnight - Duration::hours(1), midnight + Duration::days(2)).len(),
            2
        );
    }

    #[test]
    fn test_totals_and_shares() {
        let timeline =
            build_timeline(&sheet(), 2, &Profile::default(), &TimelineParams::default()).unwrap();
        let totals = timeline.totals();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].behavior, 0);
        assert_eq!(totals[0].count, 2);
        assert_eq!(totals[0].total(), Duration::minutes(90));
        assert_eq!(totals[1].behavior, 3);
        assert!((totals[0].share - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_no_known_behaviors() {
        let csv = "date,time,cow\n01-03-2024,08.00.00,เดิน\n01-03-2024,09.00.00,เดิน\n";
        let table = parse_table(csv.as_bytes(), &ParseOptions::default()).unwrap();
        let err = build_timeline(&table, 2, &Profile::default(), &TimelineParams::default())
            .unwrap_err();
        assert!(matches!(err, TimelineError::NoKnownBehaviors(ref s) if s == "cow"));
    }

    #[test]
    fn test_intervals_csv_output() {
        let timeline =
            build_timeline(&sheet(), 2, &Profile::default(), &TimelineParams::default()).unwrap();
        let mut buf = Vec::new();
        write_intervals_csv(&timeline, &Profile::default().behaviors, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "start,end,duration_s,behavior_index,behavior,behavior_en"
        );
        assert_eq!(
            lines[1],
            "2024-03-01 22:00:00,2024-03-01 23:00:00,3600,0,ยืน,Standing"
        );
    }
}
