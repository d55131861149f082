use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::{AttendanceError, Result};
use crate::models::{
    CountsRow, JoinMode, JoinSelection, JoinedRow, OutputColumns, OutputRow, OutputTable, Roster,
    RosterColumns, RosterEntry, MAX_POSSIBLE,
};
use crate::normalize::normalize_email;
use crate::table::{non_empty, RawTable};

pub const STUDENT_HEADER: &str = "Student";
pub const ID_HEADER: &str = "ID";
pub const SIS_LOGIN_HEADER: &str = "SIS Login ID";
pub const EMAIL_HEADER: &str = "Email";

/// Reads a gradebook export. Any subset of the recognised headers may be present.
pub fn load_roster(table: &RawTable) -> Roster {
    let student = table.column(STUDENT_HEADER);
    let id = table.column(ID_HEADER);
    let sis_login_id = table.column(SIS_LOGIN_HEADER);
    let email = table.column(EMAIL_HEADER);

    let entries = table
        .rows
        .iter()
        .map(|cells| {
            let cell = |index: Option<usize>| non_empty(index.and_then(|i| cells.get(i)));
            let sis_login_id = cell(sis_login_id);
            let email = cell(email);
            let id = cell(id);
            RosterEntry {
                display_name: cell(student),
                id_str: id.clone(),
                id,
                sis_login_id_norm: sis_login_id.as_deref().map(normalize_email),
                sis_login_id,
                email_norm: email.as_deref().map(normalize_email),
                email,
            }
        })
        .collect();

    Roster {
        columns: RosterColumns {
            id: id.is_some(),
            sis_login_id: sis_login_id.is_some(),
            email: email.is_some(),
        },
        entries,
    }
}

/// Left join of `counts` onto `roster`. The first counts row per key wins.
fn left_join<'a>(
    roster: &Roster,
    counts: &'a [CountsRow],
    roster_key: impl Fn(&RosterEntry) -> Option<&str>,
    counts_key: impl Fn(&'a CountsRow) -> Option<String>,
) -> Vec<JoinedRow> {
    let mut index: HashMap<String, &CountsRow> = HashMap::new();
    for row in counts {
        if let Some(key) = counts_key(row) {
            index.entry(key).or_insert(row);
        }
    }

    roster
        .entries
        .iter()
        .map(|entry| JoinedRow {
            roster: entry.clone(),
            counts: roster_key(entry)
                .and_then(|key| index.get(key))
                .map(|row| (*row).clone()),
        })
        .collect()
}

/// Joins roster `ID` against the attendance ID. `None` without an ID column.
pub fn join_by_id(roster: &Roster, counts: &[CountsRow]) -> Option<Vec<JoinedRow>> {
    if !roster.columns.id {
        return None;
    }
    Some(left_join(
        roster,
        counts,
        |entry| entry.id_str.as_deref(),
        |row| {
            row.student_id
                .as_deref()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
        },
    ))
}

/// Joins on normalized email, keyed by `SIS Login ID` when the roster has it.
pub fn join_by_email(roster: &Roster, counts: &[CountsRow]) -> Option<Vec<JoinedRow>> {
    let counts_key = |row: &CountsRow| row.email.as_deref().map(normalize_email);
    if roster.columns.sis_login_id {
        Some(left_join(
            roster,
            counts,
            |entry| entry.sis_login_id_norm.as_deref(),
            counts_key,
        ))
    } else if roster.columns.email {
        Some(left_join(
            roster,
            counts,
            |entry| entry.email_norm.as_deref(),
            counts_key,
        ))
    } else {
        None
    }
}

/// Percentage of joined rows that found attendance. Zero for an empty roster.
pub fn coverage(joined: &[JoinedRow]) -> f64 {
    if joined.is_empty() {
        return 0.0;
    }
    let matched = joined.iter().filter(|row| row.counts.is_some()).count();
    matched as f64 / joined.len() as f64 * 100.0
}

fn unmatched(roster: &Roster) -> Vec<JoinedRow> {
    roster
        .entries
        .iter()
        .map(|entry| JoinedRow {
            roster: entry.clone(),
            counts: None,
        })
        .collect()
}

/// Runs both joins and keeps the better-covered one. Ties go to email.
pub fn auto_join(roster: &Roster, counts: &[CountsRow]) -> (Vec<JoinedRow>, JoinSelection) {
    let by_id = join_by_id(roster, counts).unwrap_or_else(|| {
        warn!("roster has no ID column; id join counts as zero coverage");
        unmatched(roster)
    });
    let by_email = join_by_email(roster, counts).unwrap_or_else(|| {
        warn!("roster has neither SIS Login ID nor Email; email join counts as zero coverage");
        unmatched(roster)
    });

    let id_coverage = coverage(&by_id);
    let email_coverage = coverage(&by_email);
    let (joined, selection) = if email_coverage >= id_coverage {
        (
            by_email,
            JoinSelection {
                mode: JoinMode::Email,
                coverage_pct: email_coverage,
            },
        )
    } else {
        (
            by_id,
            JoinSelection {
                mode: JoinMode::Id,
                coverage_pct: id_coverage,
            },
        )
    };

    info!(
        picked = %selection.mode,
        coverage_pct = selection.coverage_pct,
        id_coverage,
        email_coverage,
        "auto-join selected"
    );
    (joined, selection)
}

/// Reconciles counts with an optional roster and produces the output table.
pub fn reconcile(
    counts: &[CountsRow],
    roster: Option<&Roster>,
    mode: JoinMode,
) -> Result<(OutputTable, Option<JoinSelection>)> {
    let Some(roster) = roster else {
        return Ok((counts_table(counts), None));
    };

    let (joined, selection) = match mode {
        JoinMode::None => return Ok((counts_table(counts), None)),
        JoinMode::Auto => auto_join(roster, counts),
        JoinMode::Id => {
            let joined = join_by_id(roster, counts).ok_or_else(|| {
                AttendanceError::Schema(format!("roster has no '{ID_HEADER}' column for id join"))
            })?;
            let coverage_pct = coverage(&joined);
            (joined, JoinSelection { mode, coverage_pct })
        }
        JoinMode::Email => {
            let joined = join_by_email(roster, counts).ok_or_else(|| {
                AttendanceError::Schema(format!(
                    "roster has neither '{SIS_LOGIN_HEADER}' nor '{EMAIL_HEADER}' for email join"
                ))
            })?;
            let coverage_pct = coverage(&joined);
            (joined, JoinSelection { mode, coverage_pct })
        }
    };

    Ok((finalize(&joined, roster.columns), Some(selection)))
}

/// Fills unmatched roster rows with zero attendance and fixes the column set.
pub fn finalize(joined: &[JoinedRow], columns: RosterColumns) -> OutputTable {
    let rows = joined
        .iter()
        .map(|row| {
            let counts = row.counts.as_ref();
            OutputRow {
                student: row.roster.display_name.clone(),
                id: row.roster.id_str.clone(),
                sis_login_id: row.roster.sis_login_id.clone(),
                email: row.roster.email.clone(),
                week1_count: counts.map_or(0, |c| c.week1_count),
                week2_count: counts.map_or(0, |c| c.week2_count),
                total_count: counts.map_or(0, |c| c.total_count),
                max_possible: counts.map_or(MAX_POSSIBLE, |c| c.max_possible),
                percentage: counts.map_or(0.0, |c| c.percentage),
            }
        })
        .collect();

    OutputTable {
        columns: OutputColumns {
            id: columns.id,
            sis_login_id: columns.sis_login_id,
            email: columns.email,
        },
        rows,
    }
}

/// The counts table on its own, labelled with each identity's display fields.
pub fn counts_table(counts: &[CountsRow]) -> OutputTable {
    let rows = counts
        .iter()
        .map(|row| OutputRow {
            student: row.name.clone(),
            id: row.student_id.clone(),
            sis_login_id: None,
            email: row.email.clone(),
            week1_count: row.week1_count,
            week2_count: row.week2_count,
            total_count: row.total_count,
            max_possible: row.max_possible,
            percentage: row.percentage,
        })
        .collect();

    OutputTable {
        columns: OutputColumns {
            id: true,
            sis_login_id: false,
            email: true,
        },
        rows,
    }
}
