use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::info;

use crate::models::{
    percentage_of_max, AttendanceRecord, CountsRow, LECTURES_PER_WEEK, MAX_POSSIBLE,
};

/// Distinct lecture dates observed in the window, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LectureCalendar {
    pub dates: Vec<NaiveDate>,
}

impl LectureCalendar {
    pub fn from_records(records: &[AttendanceRecord]) -> Self {
        let dates: BTreeSet<NaiveDate> = records.iter().filter_map(|r| r.date).collect();
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    /// First three dates, or all of them on a short calendar.
    pub fn week1(&self) -> &[NaiveDate] {
        &self.dates[..self.dates.len().min(LECTURES_PER_WEEK)]
    }

    /// Dates four through six, or whatever remains after week one.
    pub fn week2(&self) -> &[NaiveDate] {
        let start = self.dates.len().min(LECTURES_PER_WEEK);
        let end = self.dates.len().min(2 * LECTURES_PER_WEEK);
        &self.dates[start..end]
    }

    /// Week one followed by week two, at most six dates.
    pub fn selected(&self) -> Vec<NaiveDate> {
        self.week1().iter().chain(self.week2()).copied().collect()
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceCounts {
    pub rows: Vec<CountsRow>,
    pub calendar: LectureCalendar,
}

/// Groups deduplicated, windowed records by identity.
///
/// Rows come out in identity order. Display fields are taken from each
/// identity's earliest check-in.
pub fn compute_counts(records: &[AttendanceRecord]) -> AttendanceCounts {
    let calendar = LectureCalendar::from_records(records);
    let week1: HashSet<NaiveDate> = calendar.week1().iter().copied().collect();
    let week2: HashSet<NaiveDate> = calendar.week2().iter().copied().collect();

    let mut attended: BTreeMap<&str, BTreeSet<NaiveDate>> = BTreeMap::new();
    for record in records {
        let dates = attended.entry(record.identity.as_str()).or_default();
        if let Some(date) = record.date {
            dates.insert(date);
        }
    }

    let first_seen: HashMap<&str, &AttendanceRecord> = earliest_per_identity(records)
        .into_iter()
        .map(|r| (r.identity.as_str(), r))
        .collect();

    let rows: Vec<CountsRow> = attended
        .into_iter()
        .map(|(identity, dates)| {
            let week1_count = dates.iter().filter(|d| week1.contains(d)).count() as u32;
            let week2_count = dates.iter().filter(|d| week2.contains(d)).count() as u32;
            let display = first_seen.get(identity);

            CountsRow {
                identity: identity.to_string(),
                total_count: dates.len() as u32,
                attended_dates: dates,
                week1_count,
                week2_count,
                max_possible: MAX_POSSIBLE,
                percentage: percentage_of_max(week1_count + week2_count),
                email: display.and_then(|r| r.email.clone()),
                student_id: display.and_then(|r| r.student_id.clone()),
                name: display.and_then(|r| r.name.clone()),
            }
        })
        .collect();

    info!(
        identities = rows.len(),
        lecture_dates = calendar.dates.len(),
        "computed attendance counts"
    );
    if calendar.dates.len() < MAX_POSSIBLE as usize {
        info!(
            observed = calendar.dates.len(),
            max_possible = MAX_POSSIBLE,
            "fewer lecture dates than max_possible; percentages still use the fixed denominator"
        );
    }

    AttendanceCounts { rows, calendar }
}

/// One record per identity, ordered by its earliest timestamp.
pub fn earliest_per_identity(records: &[AttendanceRecord]) -> Vec<&AttendanceRecord> {
    let mut sorted: Vec<&AttendanceRecord> = records.iter().collect();
    sorted.sort_by_key(|r| (r.timestamp, r.row));

    let mut seen: HashSet<&str> = HashSet::new();
    sorted
        .into_iter()
        .filter(|r| seen.insert(r.identity.as_str()))
        .collect()
}
