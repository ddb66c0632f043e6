//! Place attribution from a companion place-history sensor.
//!
//! The sensor reports a display name whenever the subject's place changes.
//! Consecutive states become non-overlapping intervals covering the day, and a
//! stay is labeled with the place it overlapped longest.

use chrono::{NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// A single state of the place sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceState {
    /// Unix epoch milliseconds
    pub timestamp: i64,
    pub name: Option<String>,
}

impl PlaceState {
    pub fn new(timestamp: i64, name: Option<&str>) -> Self {
        Self {
            timestamp,
            name: name.map(str::to_string),
        }
    }
}

/// The time span during which the place sensor reported `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceInterval {
    pub start: i64,
    pub end: i64,
    pub name: Option<String>,
}

/// Last millisecond (23:59:59.999) of `date` in `tz`, as Unix epoch milliseconds.
///
/// Returns `None` when that local time does not exist in `tz`.
pub fn end_of_day_ms<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Option<i64> {
    let local = date.and_hms_milli_opt(23, 59, 59, 999)?;
    tz.from_local_datetime(&local)
        .latest()
        .map(|dt| dt.timestamp_millis())
}

/// Turn a day's place states into intervals.
///
/// Each interval runs from its state's timestamp to the next state's timestamp;
/// the last one is clamped to `day_end_ms`. States are sorted first.
pub fn build_place_intervals(states: &[PlaceState], day_end_ms: i64) -> Vec<PlaceInterval> {
    let mut sorted = states.to_vec();
    sorted.sort_by_key(|s| s.timestamp);

    let mut intervals = Vec::with_capacity(sorted.len());
    for (index, state) in sorted.iter().enumerate() {
        let end = sorted
            .get(index + 1)
            .map_or(day_end_ms, |next| next.timestamp);
        intervals.push(PlaceInterval {
            start: state.timestamp,
            end: end.max(state.timestamp),
            name: state.name.clone().filter(|n| !n.is_empty()),
        });
    }
    intervals
}

/// Pick the place overlapping `[start, end]` the longest.
///
/// Overlap is accumulated per name across intervals. Intervals with no positive
/// overlap or no name are ignored. On equal totals the name encountered first in
/// chronological order wins.
///
/// # Example
/// ```
/// use stay_timeline::{pick_place_name, PlaceInterval};
///
/// let intervals = vec![
///     PlaceInterval { start: 0, end: 30, name: Some("Cafe".into()) },
///     PlaceInterval { start: 30, end: 60, name: Some("Park".into()) },
/// ];
/// assert_eq!(pick_place_name(&intervals, 25, 60).as_deref(), Some("Park"));
/// assert_eq!(pick_place_name(&intervals, 20, 40).as_deref(), Some("Cafe"));
/// ```
pub fn pick_place_name(intervals: &[PlaceInterval], start: i64, end: i64) -> Option<String> {
    // Insertion order doubles as the tie-break
    let mut totals: Vec<(&str, i64)> = Vec::new();

    for interval in intervals {
        let overlap_ms = end.min(interval.end) - start.max(interval.start);
        let name = match interval.name.as_deref() {
            Some(name) if overlap_ms > 0 && !name.is_empty() => name,
            _ => continue,
        };
        match totals.iter_mut().find(|(n, _)| *n == name) {
            Some((_, total)) => *total += overlap_ms,
            None => totals.push((name, overlap_ms)),
        }
    }

    let mut best: Option<(&str, i64)> = None;
    for &(name, total) in &totals {
        if best.map_or(true, |(_, best_total)| total > best_total) {
            best = Some((name, total));
        }
    }
    best.map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    const MINUTE: i64 = 60_000;

    fn interval(start: i64, end: i64, name: Option<&str>) -> PlaceInterval {
        PlaceInterval {
            start,
            end,
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_end_of_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let end = end_of_day_ms(date, &Utc).unwrap();
        let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();
        assert_eq!(end - start, 24 * 60 * MINUTE - 1);

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(end_of_day_ms(date, &plus_two).unwrap(), end - 2 * 60 * MINUTE);
    }

    #[test]
    fn test_build_intervals_sorts_and_clamps_last() {
        let states = vec![
            PlaceState::new(30 * MINUTE, Some("Park")),
            PlaceState::new(0, Some("Cafe")),
            PlaceState::new(90 * MINUTE, None),
        ];
        let intervals = build_place_intervals(&states, 120 * MINUTE);
        assert_eq!(
            intervals,
            vec![
                interval(0, 30 * MINUTE, Some("Cafe")),
                interval(30 * MINUTE, 90 * MINUTE, Some("Park")),
                interval(90 * MINUTE, 120 * MINUTE, None),
            ]
        );
    }

    #[test]
    fn test_build_intervals_empty() {
        assert!(build_place_intervals(&[], 1_000).is_empty());
    }

    #[test]
    fn test_majority_overlap_wins() {
        let intervals = vec![
            interval(0, 30 * MINUTE, Some("Cafe")),
            interval(30 * MINUTE, 60 * MINUTE, Some("Park")),
        ];
        let name = pick_place_name(&intervals, 25 * MINUTE, 50 * MINUTE);
        assert_eq!(name.as_deref(), Some("Park"));
    }

    #[test]
    fn test_overlap_accumulates_per_name() {
        let intervals = vec![
            interval(0, 10 * MINUTE, Some("Office")),
            interval(10 * MINUTE, 25 * MINUTE, Some("Canteen")),
            interval(25 * MINUTE, 40 * MINUTE, Some("Office")),
        ];
        // Office 10 + 15 minutes against Canteen 15 minutes
        let name = pick_place_name(&intervals, 0, 40 * MINUTE);
        assert_eq!(name.as_deref(), Some("Office"));
    }

    #[test]
    fn test_tie_goes_to_first_chronological() {
        let intervals = vec![
            interval(0, 30 * MINUTE, Some("Cafe")),
            interval(30 * MINUTE, 60 * MINUTE, Some("Park")),
        ];
        let name = pick_place_name(&intervals, 20 * MINUTE, 40 * MINUTE);
        assert_eq!(name.as_deref(), Some("Cafe"));
    }

    #[test]
    fn test_unnamed_and_disjoint_intervals_ignored() {
        let intervals = vec![
            interval(0, 60 * MINUTE, None),
            interval(60 * MINUTE, 70 * MINUTE, Some("Gym")),
        ];
        assert_eq!(pick_place_name(&intervals, 10 * MINUTE, 50 * MINUTE), None);
        // Touching at a single instant is not an overlap
        assert_eq!(pick_place_name(&intervals, 50 * MINUTE, 60 * MINUTE), None);
    }
}
