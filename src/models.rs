use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Two weeks of three lectures each. Percentages are always taken against
/// this, even when fewer lecture dates were observed in the window.
pub const MAX_POSSIBLE: u32 = 6;
pub const LECTURES_PER_WEEK: usize = 3;

/// One check-in row after identity normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    /// Position in the source export; last sort key when timestamps tie.
    pub row: usize,
    pub timestamp: Option<NaiveDateTime>,
    pub date: Option<NaiveDate>,
    /// Normalized email
    pub email: Option<String>,
    pub student_id: Option<String>,
    pub name: Option<String>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterEntry {
    pub display_name: Option<String>,
    pub id: Option<String>,
    pub sis_login_id: Option<String>,
    pub email: Option<String>,
    pub id_str: Option<String>,
    pub email_norm: Option<String>,
    pub sis_login_id_norm: Option<String>,
}

/// Which recognised headers a roster export carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterColumns {
    pub id: bool,
    pub sis_login_id: bool,
    pub email: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub columns: RosterColumns,
    pub entries: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountsRow {
    pub identity: String,
    pub attended_dates: BTreeSet<NaiveDate>,
    pub week1_count: u32,
    pub week2_count: u32,
    pub total_count: u32,
    pub max_possible: u32,
    pub percentage: f64,
    pub email: Option<String>,
    pub student_id: Option<String>,
    pub name: Option<String>,
}

/// A roster row paired with its attendance, if any matched.
#[derive(Debug, Clone)]
pub struct JoinedRow {
    pub roster: RosterEntry,
    pub counts: Option<CountsRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    #[default]
    Auto,
    Id,
    Email,
    None,
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JoinMode::Auto => "auto",
            JoinMode::Id => "id",
            JoinMode::Email => "email",
            JoinMode::None => "none",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JoinSelection {
    pub mode: JoinMode,
    pub coverage_pct: f64,
}

/// Optional columns present in the finalized counts table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputColumns {
    pub id: bool,
    pub sis_login_id: bool,
    pub email: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub student: Option<String>,
    pub id: Option<String>,
    pub sis_login_id: Option<String>,
    pub email: Option<String>,
    pub week1_count: u32,
    pub week2_count: u32,
    pub total_count: u32,
    pub max_possible: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone)]
pub struct OutputTable {
    pub columns: OutputColumns,
    pub rows: Vec<OutputRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub identity: String,
    pub student: Option<String>,
    pub id: Option<String>,
    pub email: Option<String>,
    pub present: Vec<u8>,
    pub total_count: u32,
    pub max_possible: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone)]
pub struct AttendanceMatrix {
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub students_total: usize,
    pub students_with_attendance: usize,
    pub coverage_pct: f64,
    pub lecture_dates: Vec<NaiveDate>,
    pub generated_at: DateTime<Utc>,
}

/// Percentage of [`MAX_POSSIBLE`] lectures.
pub fn percentage_of_max(attended: u32) -> f64 {
    attended as f64 / MAX_POSSIBLE as f64 * 100.0
}
