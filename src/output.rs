use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{AttendanceError, Result};
use crate::models::{AttendanceMatrix, OutputTable};
use crate::roster::{EMAIL_HEADER, ID_HEADER, SIS_LOGIN_HEADER, STUDENT_HEADER};

const DEFAULT_PREFIX: &str = "attendance";
const COUNT_HEADERS: [&str; 5] = [
    "week1_count",
    "week2_count",
    "total_count",
    "max_possible",
    "percentage",
];

/// Where one run writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub counts: PathBuf,
    pub matrix: PathBuf,
}

impl OutputPaths {
    /// `stamp` embeds the run time in both names so concurrent runs never collide.
    pub fn new(dir: &Path, prefix: &str, stamp: Option<DateTime<Utc>>) -> Self {
        let prefix = if prefix.trim().is_empty() {
            DEFAULT_PREFIX
        } else {
            prefix.trim()
        };
        match stamp {
            Some(at) => {
                let at = at.format("%Y%m%d%H%M%S");
                Self {
                    counts: dir.join(format!("{prefix}_{at}_attendance_counts.csv")),
                    matrix: dir.join(format!("{prefix}_{at}_attendance_matrix.csv")),
                }
            }
            None => Self {
                counts: dir.join(format!("{prefix}_attendance_counts_weeks1_2.csv")),
                matrix: dir.join(format!("{prefix}_attendance_matrix_weeks1_2.csv")),
            },
        }
    }
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> AttendanceError + '_ {
    move |source| AttendanceError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn open_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    let file = std::fs::File::create(path).map_err(|source| AttendanceError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::Writer::from_writer(file))
}

pub fn counts_headers(table: &OutputTable) -> Vec<&'static str> {
    let mut headers = vec![STUDENT_HEADER];
    if table.columns.id {
        headers.push(ID_HEADER);
    }
    if table.columns.sis_login_id {
        headers.push(SIS_LOGIN_HEADER);
    }
    if table.columns.email {
        headers.push(EMAIL_HEADER);
    }
    headers.extend(COUNT_HEADERS);
    headers
}

/// Cells in `counts_headers` order. Missing text renders empty.
pub fn counts_record(table: &OutputTable, index: usize) -> Vec<String> {
    let row = &table.rows[index];
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    let mut record = vec![text(&row.student)];
    if table.columns.id {
        record.push(text(&row.id));
    }
    if table.columns.sis_login_id {
        record.push(text(&row.sis_login_id));
    }
    if table.columns.email {
        record.push(text(&row.email));
    }
    record.extend([
        row.week1_count.to_string(),
        row.week2_count.to_string(),
        row.total_count.to_string(),
        row.max_possible.to_string(),
        row.percentage.to_string(),
    ]);
    record
}

/// Create-or-truncate; a crash mid-write can leave a partial file.
pub fn write_counts(table: &OutputTable, path: &Path) -> Result<()> {
    let mut writer = open_writer(path)?;
    writer
        .write_record(counts_headers(table))
        .map_err(csv_error(path))?;
    for index in 0..table.rows.len() {
        writer
            .write_record(counts_record(table, index))
            .map_err(csv_error(path))?;
    }
    writer.flush().map_err(|source| AttendanceError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), rows = table.rows.len(), "wrote attendance counts");
    Ok(())
}

pub fn write_matrix(matrix: &AttendanceMatrix, path: &Path) -> Result<()> {
    let mut writer = open_writer(path)?;

    let mut headers = vec![
        STUDENT_HEADER.to_string(),
        ID_HEADER.to_string(),
        EMAIL_HEADER.to_string(),
    ];
    headers.extend(matrix.dates.iter().map(|d| d.format("%Y-%m-%d").to_string()));
    headers.extend(COUNT_HEADERS[2..].iter().map(|h| h.to_string()));
    writer.write_record(&headers).map_err(csv_error(path))?;

    for row in &matrix.rows {
        let mut record = vec![
            row.student.clone().unwrap_or_default(),
            row.id.clone().unwrap_or_default(),
            row.email.clone().unwrap_or_default(),
        ];
        record.extend(row.present.iter().map(u8::to_string));
        record.extend([
            row.total_count.to_string(),
            row.max_possible.to_string(),
            row.percentage.to_string(),
        ]);
        writer.write_record(&record).map_err(csv_error(path))?;
    }

    writer.flush().map_err(|source| AttendanceError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), rows = matrix.rows.len(), "wrote attendance matrix");
    Ok(())
}
