use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{AttendanceError, Result};
use crate::models::AttendanceRecord;
use crate::table::{non_empty, parse_timestamp, RawTable};

const DOMAIN_FIXES: &[(&str, &str)] = &[
    (r"@ucscedu$", "@ucsc.edu"),
    (r"@ucsc\.efu$", "@ucsc.edu"),
    (r"@ucsc\.irg$", "@ucsc.edu"),
    (r"@uscs\.edu$", "@ucsc.edu"),
    (r"@gmail\.con$", "@gmail.com"),
];

fn domain_fixes() -> &'static [(Regex, &'static str)] {
    static FIXES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    FIXES.get_or_init(|| {
        DOMAIN_FIXES
            .iter()
            .map(|(pattern, replacement)| {
                (
                    Regex::new(pattern).expect("valid domain fix regex"),
                    *replacement,
                )
            })
            .collect()
    })
}

/// Trim, lowercase, drop whitespace, then repair the first matching domain typo.
pub fn normalize_email(raw: &str) -> String {
    let email: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    match domain_fixes().iter().find(|(re, _)| re.is_match(&email)) {
        Some((re, replacement)) => re.replace(&email, *replacement).into_owned(),
        None => email,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Timestamp,
    Email,
    Id,
    Name,
}

fn is_timestamp(header: &str) -> bool {
    header.contains("timestamp")
}

fn is_email(header: &str) -> bool {
    header.trim() == "email"
}

fn is_id(header: &str) -> bool {
    header.trim() == "id"
}

fn is_name(header: &str) -> bool {
    header.contains("name")
}

/// Header predicates evaluated once per load, in order, against lowercased headers.
const COLUMN_RULES: &[(ColumnRole, fn(&str) -> bool)] = &[
    (ColumnRole::Timestamp, is_timestamp),
    (ColumnRole::Email, is_email),
    (ColumnRole::Id, is_id),
    (ColumnRole::Name, is_name),
];

/// Where each role lives in the attendance export, if anywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceColumns {
    pub timestamp: Option<usize>,
    pub email: Option<usize>,
    pub id: Option<usize>,
    pub name: Option<usize>,
}

impl AttendanceColumns {
    pub fn discover(table: &RawTable) -> Self {
        let mut columns = Self::default();
        for (role, predicate) in COLUMN_RULES {
            let found = table.find_column(*predicate);
            match role {
                ColumnRole::Timestamp => columns.timestamp = found,
                ColumnRole::Email => columns.email = found,
                ColumnRole::Id => columns.id = found,
                ColumnRole::Name => columns.name = found,
            }
        }
        columns
    }

    pub fn validate(&self) -> Result<()> {
        if self.timestamp.is_none() {
            return Err(AttendanceError::Schema(
                "attendance table has no column matching 'timestamp'".to_string(),
            ));
        }
        if self.email.is_none() && self.id.is_none() {
            return Err(AttendanceError::Schema(
                "attendance table needs an 'email' or 'id' column".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builds one record per usable row. ID beats email beats name for identity.
pub fn normalize_attendance(table: &RawTable) -> Result<Vec<AttendanceRecord>> {
    let columns = AttendanceColumns::discover(table);
    columns.validate()?;

    let mut records = Vec::with_capacity(table.rows.len());
    let mut unparsed = 0usize;

    for (row, cells) in table.rows.iter().enumerate() {
        let cell = |index: Option<usize>| index.and_then(|i| cells.get(i));

        let timestamp = cell(columns.timestamp).and_then(|raw| parse_timestamp(raw));
        if timestamp.is_none() {
            unparsed += 1;
        }
        let email = non_empty(cell(columns.email))
            .map(|raw| normalize_email(&raw))
            .filter(|email| !email.is_empty());
        let student_id = non_empty(cell(columns.id));
        let name = non_empty(cell(columns.name));

        let Some(identity) = student_id
            .clone()
            .or_else(|| email.clone())
            .or_else(|| name.clone())
        else {
            warn!(row = row + 2, "skipping attendance row with no id, email or name");
            continue;
        };

        records.push(AttendanceRecord {
            row,
            timestamp,
            date: timestamp.map(|ts| ts.date()),
            email,
            student_id,
            name,
            identity,
        });
    }

    if unparsed > 0 {
        warn!(unparsed, "attendance rows with unparseable timestamps will fall outside the window");
    }
    debug!(records = records.len(), ?columns, "normalized attendance");
    Ok(records)
}
