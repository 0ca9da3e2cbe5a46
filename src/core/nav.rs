//! NAV points and helpers for working with per-instrument NAV series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single published NAV for an instrument on a date.
///
/// The instrument is implied by the series (or store key) the point lives in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "NAV")]
    pub nav: f64,
}

impl NavPoint {
    pub fn new(date: NaiveDate, nav: f64) -> Self {
        Self { date, nav }
    }

    /// NAV values must be finite and non-negative to be stored.
    pub fn is_valid(&self) -> bool {
        self.nav.is_finite() && self.nav >= 0.0
    }
}

/// Merges `incoming` into `existing`, keeping one point per date.
///
/// Points are applied in order (`existing` first, then `incoming`), so the
/// last write for a date wins. The result is sorted ascending by date.
pub fn merge_keep_last(existing: &[NavPoint], incoming: &[NavPoint]) -> Vec<NavPoint> {
    let mut by_date = BTreeMap::new();
    for point in existing.iter().chain(incoming.iter()) {
        by_date.insert(point.date, point.nav);
    }
    by_date
        .into_iter()
        .map(|(date, nav)| NavPoint { date, nav })
        .collect()
}

/// Sorts and deduplicates a series read from an unordered source.
pub fn normalize(points: Vec<NavPoint>) -> Vec<NavPoint> {
    merge_keep_last(&points, &[])
}

/// Returns the most recent point with `date <= on_or_before`.
///
/// `series` must be sorted ascending by date.
pub fn latest_on_or_before(series: &[NavPoint], on_or_before: NaiveDate) -> Option<&NavPoint> {
    let idx = series.partition_point(|p| p.date <= on_or_before);
    if idx == 0 { None } else { series.get(idx - 1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn later_write_wins_for_same_date() {
        let existing = vec![NavPoint::new(d(2024, 1, 2), 10.0)];
        let incoming = vec![
            NavPoint::new(d(2024, 1, 2), 11.0),
            NavPoint::new(d(2024, 1, 1), 9.5),
        ];

        let merged = merge_keep_last(&existing, &incoming);

        assert_eq!(
            merged,
            vec![
                NavPoint::new(d(2024, 1, 1), 9.5),
                NavPoint::new(d(2024, 1, 2), 11.0)
            ]
        );
    }

    #[test]
    fn normalize_sorts_and_keeps_last_duplicate() {
        let points = vec![
            NavPoint::new(d(2024, 1, 3), 3.0),
            NavPoint::new(d(2024, 1, 1), 1.0),
            NavPoint::new(d(2024, 1, 3), 3.5),
        ];

        let series = normalize(points);

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].date, d(2024, 1, 1));
        assert_eq!(series[1].nav, 3.5);
    }

    #[test]
    fn lookup_picks_most_recent_on_or_before() {
        let series = vec![
            NavPoint::new(d(2024, 1, 1), 1.0),
            NavPoint::new(d(2024, 1, 5), 5.0),
        ];

        assert!(latest_on_or_before(&series, d(2023, 12, 31)).is_none());
        assert_eq!(latest_on_or_before(&series, d(2024, 1, 1)).unwrap().nav, 1.0);
        assert_eq!(latest_on_or_before(&series, d(2024, 1, 4)).unwrap().nav, 1.0);
        assert_eq!(latest_on_or_before(&series, d(2024, 2, 1)).unwrap().nav, 5.0);
    }

    #[test]
    fn rejects_negative_and_non_finite_values() {
        assert!(NavPoint::new(d(2024, 1, 1), 0.0).is_valid());
        assert!(!NavPoint::new(d(2024, 1, 1), -1.0).is_valid());
        assert!(!NavPoint::new(d(2024, 1, 1), f64::NAN).is_valid());
    }
}
