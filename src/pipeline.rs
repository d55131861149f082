use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::aggregate::compute_counts;
use crate::config::{ProcessOptions, Settings};
use crate::error::Result;
use crate::matrix::build_matrix;
use crate::models::{AttendanceMatrix, JoinSelection, OutputTable, Summary};
use crate::normalize::normalize_attendance;
use crate::output::{write_counts, write_matrix, OutputPaths};
use crate::report::{self, build_preview, build_summary, log_qa, qa_stats};
use crate::roster::{load_roster, reconcile};
use crate::table::RawTable;
use crate::window::{dedup_same_day, filter_window};

/// Everything one run computes, before anything touches disk.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub table: OutputTable,
    pub matrix: Option<AttendanceMatrix>,
    pub lecture_dates: Vec<NaiveDate>,
    pub selected_dates: Vec<NaiveDate>,
    pub selection: Option<JoinSelection>,
    pub roster_len: Option<usize>,
}

/// attendance -> normalize -> window/dedup -> {counts -> join, matrix}
pub fn run_engine(
    attendance: &RawTable,
    roster: Option<&RawTable>,
    options: &ProcessOptions,
) -> Result<EngineOutput> {
    let records = normalize_attendance(attendance)?;
    let windowed = dedup_same_day(&filter_window(&records, &options.window));
    info!(
        loaded = records.len(),
        kept = windowed.len(),
        start = %options.window.start,
        end = %options.window.end,
        "filtered attendance to window"
    );

    let counts = compute_counts(&windowed);
    let selected_dates = counts.calendar.selected();

    let roster = roster.map(load_roster);
    let (table, selection) = reconcile(&counts.rows, roster.as_ref(), options.join_mode)?;

    let matrix = options
        .include_matrix
        .then(|| build_matrix(&windowed, &selected_dates));

    Ok(EngineOutput {
        table,
        matrix,
        lecture_dates: counts.calendar.dates,
        selected_dates,
        selection,
        roster_len: roster.map(|r| r.entries.len()),
    })
}

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub attendance: PathBuf,
    pub gradebook: Option<PathBuf>,
    pub options: ProcessOptions,
    /// Optional markdown QA report destination.
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub summary: Summary,
    pub join: Option<JoinSelection>,
    pub selected_dates: Vec<NaiveDate>,
    pub counts_preview: Vec<Map<String, Value>>,
    pub counts_path: PathBuf,
    pub matrix_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

/// Loads inputs, runs the engine and writes the artifacts.
///
/// The window is validated before this is called, so a bad range never
/// leaves partial output behind.
pub fn process(settings: &Settings, request: &ProcessRequest) -> Result<ProcessOutcome> {
    let attendance = RawTable::from_path(&request.attendance)?;
    let roster = request
        .gradebook
        .as_deref()
        .map(RawTable::from_path)
        .transpose()?;

    let output = run_engine(&attendance, roster.as_ref(), &request.options)?;

    settings.ensure_directories()?;
    let stamp = settings.timestamped_names.then(Utc::now);
    let paths = OutputPaths::new(&settings.output_dir, &request.options.output_prefix, stamp);

    write_counts(&output.table, &paths.counts)?;
    let matrix_path = match &output.matrix {
        Some(matrix) => {
            write_matrix(matrix, &paths.matrix)?;
            Some(paths.matrix.clone())
        }
        None => None,
    };

    log_qa(&qa_stats(&output.table), output.roster_len);

    let report_path = match &request.report {
        Some(path) => {
            write_report(path, &request.options, &output)?;
            Some(path.clone())
        }
        None => None,
    };

    Ok(ProcessOutcome {
        summary: build_summary(&output.table, &output.lecture_dates),
        join: output.selection,
        counts_preview: build_preview(&output.table, settings.preview_limit),
        selected_dates: output.selected_dates,
        counts_path: paths.counts,
        matrix_path,
        report_path,
    })
}

fn write_report(path: &Path, options: &ProcessOptions, output: &EngineOutput) -> Result<()> {
    let markdown = report::build_report(
        &options.output_prefix,
        &options.window,
        &output.lecture_dates,
        output.selection.as_ref(),
        &output.table,
    );
    std::fs::write(path, markdown).map_err(|source| crate::error::AttendanceError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "wrote QA report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttendanceError;
    use crate::models::JoinMode;
    use crate::window::DateWindow;

    const ATTENDANCE: &str = "Timestamp,Email,ID,Name\n\
        9/29/2025 10:01:00,s1@ucsc.edu,1,S1\n\
        9/29/2025 10:40:00,s1@ucsc.edu,1,S1\n\
        10/1/2025 10:02:00,s1@ucsc.edu,1,S1\n\
        10/1/2025 10:05:00,s2@ucscedu,,S2\n\
        10/20/2025 10:05:00,s2@ucsc.edu,,S2\n\
        not-a-time,s3@ucsc.edu,3,S3\n";

    fn options(join_mode: JoinMode, include_matrix: bool) -> ProcessOptions {
        ProcessOptions {
            window: DateWindow::parse("2025-09-29", "2025-10-10").unwrap(),
            join_mode,
            include_matrix,
            output_prefix: "CSE20".to_string(),
        }
    }

    fn attendance() -> RawTable {
        RawTable::from_csv_str(ATTENDANCE).unwrap()
    }

    fn round2(value: f64) -> f64 {
        (value * 100.0).round() / 100.0
    }

    #[test]
    fn counts_only_run_collapses_duplicates() {
        let output = run_engine(&attendance(), None, &options(JoinMode::Auto, false)).unwrap();
        assert!(output.selection.is_none());
        assert!(output.matrix.is_none());
        assert_eq!(output.lecture_dates.len(), 2);

        let s1 = output
            .table
            .rows
            .iter()
            .find(|r| r.id.as_deref() == Some("1"))
            .unwrap();
        assert_eq!((s1.week1_count, s1.total_count), (2, 2));
        assert_eq!(round2(s1.percentage), 33.33);

        let s2 = output
            .table
            .rows
            .iter()
            .find(|r| r.email.as_deref() == Some("s2@ucsc.edu"))
            .unwrap();
        assert_eq!(s2.total_count, 1);
        assert_eq!(output.table.rows.len(), 2);
    }

    #[test]
    fn roster_rows_survive_without_attendance() {
        let roster = RawTable::from_csv_str(
            "Student,ID,SIS Login ID\nStudent One,1,s1@ucsc.edu\nNo Show,99,noshow@ucsc.edu\n",
        )
        .unwrap();
        let output =
            run_engine(&attendance(), Some(&roster), &options(JoinMode::Auto, true)).unwrap();

        assert_eq!(output.roster_len, Some(2));
        assert_eq!(output.table.rows.len(), 2);
        let no_show = &output.table.rows[1];
        assert_eq!(no_show.student.as_deref(), Some("No Show"));
        assert_eq!(
            (no_show.week1_count, no_show.week2_count, no_show.total_count),
            (0, 0, 0)
        );
        assert_eq!(no_show.percentage, 0.0);

        let selection = output.selection.unwrap();
        assert_eq!(selection.mode, JoinMode::Email);
        assert_eq!(selection.coverage_pct, 50.0);

        let matrix = output.matrix.unwrap();
        assert_eq!(matrix.dates, output.selected_dates);
        assert_eq!(matrix.rows[0].identity, "1");
    }

    #[test]
    fn schema_errors_abort_the_run() {
        let table = RawTable::from_csv_str("When,Who\n2025-09-29,x\n").unwrap();
        let err = run_engine(&table, None, &options(JoinMode::Auto, false)).unwrap_err();
        assert!(matches!(err, AttendanceError::Schema(_)));
    }

    #[test]
    fn process_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let attendance_path = dir.path().join("attendance.csv");
        std::fs::write(&attendance_path, ATTENDANCE).unwrap();

        let settings = Settings {
            output_dir: dir.path().join("out"),
            ..Settings::default()
        };
        let request = ProcessRequest {
            attendance: attendance_path,
            gradebook: None,
            options: options(JoinMode::Auto, true),
            report: Some(dir.path().join("qa.md")),
        };

        let outcome = process(&settings, &request).unwrap();
        assert_eq!(
            outcome.counts_path,
            dir.path().join("out/CSE20_attendance_counts_weeks1_2.csv")
        );
        let counts = std::fs::read_to_string(&outcome.counts_path).unwrap();
        assert!(counts.starts_with(
            "Student,ID,Email,week1_count,week2_count,total_count,max_possible,percentage\n"
        ));

        let matrix_path = outcome.matrix_path.unwrap();
        let matrix = std::fs::read_to_string(matrix_path).unwrap();
        assert!(matrix.starts_with("Student,ID,Email,2025-09-29,2025-10-01,"));

        assert_eq!(outcome.summary.students_total, 2);
        assert_eq!(outcome.summary.students_with_attendance, 2);
        assert_eq!(outcome.counts_preview.len(), 2);
        assert!(outcome.report_path.unwrap().exists());
    }

    #[test]
    fn missing_input_is_fatal_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            output_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let request = ProcessRequest {
            attendance: dir.path().join("nope.csv"),
            gradebook: None,
            options: options(JoinMode::Auto, false),
            report: None,
        };
        let err = process(&settings, &request).unwrap_err();
        assert!(matches!(err, AttendanceError::Read { .. }));
        assert!(err.to_string().contains("nope.csv"));
    }
}
