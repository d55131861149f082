use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{AttendanceError, Result};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// A header row plus string cells, as read from an export.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| AttendanceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_csv_str(&decode(bytes)).map_err(|source| AttendanceError::Csv {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_csv_str(text: &str) -> std::result::Result<Self, csv::Error> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Index of the first header satisfying `predicate` on its lowercased form.
    pub fn find_column(&self, predicate: impl Fn(&str) -> bool) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| predicate(&header.to_lowercase()))
    }

    /// Index of the header equal to `name`, ignoring surrounding whitespace.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header.trim() == name)
    }
}

/// UTF-8 when valid, Latin-1 otherwise.
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Returns the trimmed cell, or `None` when it is blank.
pub fn non_empty(cell: Option<&String>) -> Option<String> {
    cell.map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Lenient timestamp parsing. Unrecognised cells yield `None`.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

/// Parses a window boundary such as `2025-09-29`.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let value = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .ok_or_else(|| AttendanceError::DateRange(format!("unparseable date '{raw}'")))
}
