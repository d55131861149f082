use std::collections::HashSet;

use chrono::NaiveDate;

use crate::aggregate::earliest_per_identity;
use crate::models::{percentage_of_max, AttendanceMatrix, AttendanceRecord, MatrixRow, MAX_POSSIBLE};

/// Wide 0/1 presence table over `dates`, one row per identity in order of first check-in.
///
/// A date nobody attended still gets a column of zeros.
pub fn build_matrix(records: &[AttendanceRecord], dates: &[NaiveDate]) -> AttendanceMatrix {
    let attended: HashSet<(&str, NaiveDate)> = records
        .iter()
        .filter_map(|r| r.date.map(|date| (r.identity.as_str(), date)))
        .collect();

    let rows = earliest_per_identity(records)
        .into_iter()
        .map(|first| {
            let present: Vec<u8> = dates
                .iter()
                .map(|date| u8::from(attended.contains(&(first.identity.as_str(), *date))))
                .collect();
            let total_count = present.iter().map(|&p| u32::from(p)).sum();

            MatrixRow {
                identity: first.identity.clone(),
                student: first.name.clone(),
                id: first.student_id.clone(),
                email: first.email.clone(),
                present,
                total_count,
                max_possible: MAX_POSSIBLE,
                percentage: percentage_of_max(total_count),
            }
        })
        .collect();

    AttendanceMatrix {
        dates: dates.to_vec(),
        rows,
    }
}
