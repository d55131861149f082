use std::collections::HashSet;

use chrono::NaiveDate;

use crate::error::{AttendanceError, Result};
use crate::models::AttendanceRecord;
use crate::table::parse_date;

/// Closed calendar-date range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AttendanceError::DateRange(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Keeps records dated inside the window. Undated records never match.
pub fn filter_window(records: &[AttendanceRecord], window: &DateWindow) -> Vec<AttendanceRecord> {
    records
        .iter()
        .filter(|record| record.date.is_some_and(|date| window.contains(date)))
        .cloned()
        .collect()
}

/// Earliest check-in per (identity, date) wins; equal timestamps keep source order.
pub fn dedup_same_day(records: &[AttendanceRecord]) -> Vec<AttendanceRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|r| (r.date, r.timestamp, r.row));

    let mut seen: HashSet<(String, Option<NaiveDate>)> = HashSet::new();
    sorted
        .into_iter()
        .filter(|record| seen.insert((record.identity.clone(), record.date)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn record(row: usize, identity: &str, timestamp: &str) -> AttendanceRecord {
        let timestamp =
            NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").ok();
        AttendanceRecord {
            row,
            timestamp,
            date: timestamp.map(|ts| ts.date()),
            email: None,
            student_id: Some(identity.to_string()),
            name: None,
            identity: identity.to_string(),
        }
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn inverted_window_is_rejected() {
        let err = DateWindow::new(date("2025-10-10"), date("2025-09-29")).unwrap_err();
        assert!(matches!(err, AttendanceError::DateRange(_)));
        assert!(DateWindow::parse("2025-09-29", "soon").is_err());
    }

    #[test]
    fn window_is_inclusive_and_skips_undated_rows() {
        let window = DateWindow::parse("2025-09-29", "2025-10-01").unwrap();
        let records = vec![
            record(0, "1", "2025-09-28 23:59:59"),
            record(1, "1", "2025-09-29 00:00:00"),
            record(2, "1", "2025-10-01 23:59:59"),
            record(3, "1", "2025-10-02 00:00:00"),
            record(4, "1", "garbage"),
        ];
        let kept: Vec<usize> = filter_window(&records, &window)
            .iter()
            .map(|r| r.row)
            .collect();
        assert_eq!(kept, vec![1, 2]);
    }

    #[test]
    fn earliest_check_in_wins() {
        let records = vec![
            record(0, "1", "2025-09-29 10:30:00"),
            record(1, "1", "2025-09-29 10:05:00"),
            record(2, "2", "2025-09-29 10:10:00"),
            record(3, "1", "2025-10-01 09:00:00"),
        ];
        let deduped = dedup_same_day(&records);
        let rows: Vec<usize> = deduped.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn timestamp_ties_keep_source_order() {
        let records = vec![
            record(0, "1", "2025-09-29 10:00:00"),
            record(1, "1", "2025-09-29 10:00:00"),
        ];
        let deduped = dedup_same_day(&records);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].row, 0);
    }

    #[test]
    fn timestamp_ties_fall_back_to_source_row() {
        let records = vec![
            record(3, "1", "2025-09-29 10:00:00"),
            record(1, "1", "2025-09-29 10:00:00"),
            record(2, "1", "2025-09-29 10:00:00"),
        ];
        let deduped = dedup_same_day(&records);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].row, 1);
    }

    #[test]
    fn dedup_is_idempotent() {
        let records = vec![
            record(0, "1", "2025-09-30 10:30:00"),
            record(1, "2", "2025-09-29 10:05:00"),
            record(2, "1", "2025-09-30 08:00:00"),
            record(3, "2", "2025-09-29 10:05:00"),
        ];
        let once = dedup_same_day(&records);
        let twice = dedup_same_day(&once);
        assert_eq!(once, twice);
        assert_eq!(records.len(), 4);
    }
}
