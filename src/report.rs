use std::fmt::Write;

use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::info;

use crate::models::{JoinSelection, OutputTable, Summary, LECTURES_PER_WEEK, MAX_POSSIBLE};
use crate::output::{counts_headers, counts_record};
use crate::window::DateWindow;

pub const PREVIEW_LIMIT: usize = 20;

pub fn build_summary(table: &OutputTable, lecture_dates: &[NaiveDate]) -> Summary {
    let students_total = table.rows.len();
    let students_with_attendance = table.rows.iter().filter(|r| r.total_count > 0).count();
    Summary {
        students_total,
        students_with_attendance,
        coverage_pct: if students_total == 0 {
            0.0
        } else {
            students_with_attendance as f64 / students_total as f64 * 100.0
        },
        lecture_dates: lecture_dates.to_vec(),
        generated_at: Utc::now(),
    }
}

/// First `limit` rows keyed by column name, in counts-file column order.
/// Percentage is rounded to two places and missing text becomes an empty string.
pub fn build_preview(table: &OutputTable, limit: usize) -> Vec<Map<String, Value>> {
    let headers = counts_headers(table);
    table
        .rows
        .iter()
        .take(limit)
        .enumerate()
        .map(|(index, row)| {
            let record = counts_record(table, index);
            headers
                .iter()
                .zip(record)
                .map(|(header, cell)| {
                    let value = match *header {
                        "week1_count" => Value::from(row.week1_count),
                        "week2_count" => Value::from(row.week2_count),
                        "total_count" => Value::from(row.total_count),
                        "max_possible" => Value::from(row.max_possible),
                        "percentage" => Value::from(round2(row.percentage)),
                        _ => Value::from(cell),
                    };
                    (header.to_string(), value)
                })
                .collect()
        })
        .collect()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaStats {
    pub rows: usize,
    pub nonzero: usize,
    pub coverage_pct: f64,
    pub week1_max: u32,
    pub week2_max: u32,
    pub total_max: u32,
    /// Rows whose week counts or percentage break the fixed-denominator rules
    pub violations: usize,
}

pub fn qa_stats(table: &OutputTable) -> QaStats {
    let rows = table.rows.len();
    let nonzero = table.rows.iter().filter(|r| r.total_count > 0).count();
    let violations = table
        .rows
        .iter()
        .filter(|r| {
            let expected = (r.week1_count + r.week2_count) as f64 / MAX_POSSIBLE as f64 * 100.0;
            r.week1_count as usize > LECTURES_PER_WEEK
                || r.week2_count as usize > LECTURES_PER_WEEK
                || (r.percentage - expected).abs() > 1e-9
        })
        .count();

    QaStats {
        rows,
        nonzero,
        coverage_pct: if rows == 0 {
            0.0
        } else {
            nonzero as f64 / rows as f64 * 100.0
        },
        week1_max: table.rows.iter().map(|r| r.week1_count).max().unwrap_or(0),
        week2_max: table.rows.iter().map(|r| r.week2_count).max().unwrap_or(0),
        total_max: table.rows.iter().map(|r| r.total_count).max().unwrap_or(0),
        violations,
    }
}

pub fn log_qa(stats: &QaStats, roster_len: Option<usize>) {
    info!(
        rows = stats.rows,
        roster = roster_len,
        nonzero = stats.nonzero,
        coverage_pct = stats.coverage_pct,
        w1_max = stats.week1_max,
        w2_max = stats.week2_max,
        total_max = stats.total_max,
        violations = stats.violations,
        "QA"
    );
}

pub fn build_report(
    label: &str,
    window: &DateWindow,
    lecture_dates: &[NaiveDate],
    selection: Option<&JoinSelection>,
    table: &OutputTable,
) -> String {
    let stats = qa_stats(table);
    let mut output = String::new();

    let _ = writeln!(output, "# Attendance QA Report");
    let _ = writeln!(
        output,
        "Generated for {} (window {} to {})",
        label, window.start, window.end
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Lecture Dates");

    if lecture_dates.is_empty() {
        let _ = writeln!(output, "No check-ins recorded in this window.");
    } else {
        for (index, date) in lecture_dates.iter().enumerate() {
            let week = if index < LECTURES_PER_WEEK {
                "week 1"
            } else if index < 2 * LECTURES_PER_WEEK {
                "week 2"
            } else {
                "outside weeks 1-2"
            };
            let _ = writeln!(output, "- {} ({})", date, week);
        }
    }
    if lecture_dates.len() < MAX_POSSIBLE as usize {
        let _ = writeln!(
            output,
            "\nOnly {} lecture dates observed; percentages still use max_possible = {}.",
            lecture_dates.len(),
            MAX_POSSIBLE
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Coverage");
    match selection {
        Some(selection) => {
            let _ = writeln!(
                output,
                "- Join: {} ({:.1}% of roster matched)",
                selection.mode, selection.coverage_pct
            );
        }
        None => {
            let _ = writeln!(output, "- Join: none (counts only)");
        }
    }
    let _ = writeln!(
        output,
        "- Rows: {}, with attendance: {} ({:.1}%)",
        stats.rows, stats.nonzero, stats.coverage_pct
    );
    let _ = writeln!(
        output,
        "- Max counts: week1 {}, week2 {}, total {}",
        stats.week1_max, stats.week2_max, stats.total_max
    );
    let _ = writeln!(output, "- Constraint violations: {}", stats.violations);

    let mut ranked: Vec<_> = table.rows.iter().collect();
    ranked.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Attendance");
    if ranked.is_empty() {
        let _ = writeln!(output, "No students in this run.");
    } else {
        for row in ranked.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) {:.2}% across {} lectures",
                row.student.as_deref().unwrap_or("unknown"),
                row.id.as_deref().or(row.email.as_deref()).unwrap_or("-"),
                row.percentage,
                row.total_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Attendance");
    if ranked.is_empty() {
        let _ = writeln!(output, "No students in this run.");
    } else {
        for row in ranked.iter().rev().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) {:.2}% across {} lectures",
                row.student.as_deref().unwrap_or("unknown"),
                row.id.as_deref().or(row.email.as_deref()).unwrap_or("-"),
                row.percentage,
                row.total_count
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{percentage_of_max, OutputColumns, OutputRow};

    fn row(student: &str, week1: u32, week2: u32) -> OutputRow {
        OutputRow {
            student: Some(student.to_string()),
            id: None,
            sis_login_id: None,
            email: None,
            week1_count: week1,
            week2_count: week2,
            total_count: week1 + week2,
            max_possible: 6,
            percentage: percentage_of_max(week1 + week2),
        }
    }

    fn table(rows: Vec<OutputRow>) -> OutputTable {
        OutputTable {
            columns: OutputColumns {
                id: true,
                sis_login_id: false,
                email: true,
            },
            rows,
        }
    }

    #[test]
    fn summary_counts_students_with_attendance() {
        let table = table(vec![row("A", 2, 1), row("B", 0, 0), row("C", 1, 0), row("D", 0, 0)]);
        let dates = vec![NaiveDate::from_ymd_opt(2025, 9, 29).unwrap()];
        let summary = build_summary(&table, &dates);
        assert_eq!(summary.students_total, 4);
        assert_eq!(summary.students_with_attendance, 2);
        assert_eq!(summary.coverage_pct, 50.0);
        assert_eq!(summary.lecture_dates, dates);
    }

    #[test]
    fn empty_summary_has_zero_coverage() {
        let summary = build_summary(&table(vec![]), &[]);
        assert_eq!(summary.coverage_pct, 0.0);
    }

    #[test]
    fn preview_rounds_and_blanks_missing_text() {
        let rows = (0..25).map(|_| row("A", 1, 0)).collect();
        let preview = build_preview(&table(rows), PREVIEW_LIMIT);
        assert_eq!(preview.len(), 20);
        assert_eq!(preview[0]["percentage"], Value::from(16.67));
        assert_eq!(preview[0]["ID"], Value::from(""));
        assert_eq!(preview[0]["Student"], Value::from("A"));
        assert_eq!(preview[0]["week1_count"], Value::from(1));
    }

    #[test]
    fn preview_keys_follow_counts_columns() {
        let preview = build_preview(&table(vec![row("A", 2, 1)]), PREVIEW_LIMIT);
        let keys: Vec<&str> = preview[0].keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "Student",
                "ID",
                "Email",
                "week1_count",
                "week2_count",
                "total_count",
                "max_possible",
                "percentage",
            ]
        );
        let json = serde_json::to_string(&preview[0]).unwrap();
        assert!(json.starts_with("{\"Student\":\"A\",\"ID\":\"\",\"Email\":\"\""));
    }

    #[test]
    fn qa_stats_track_maxima() {
        let stats = qa_stats(&table(vec![row("A", 3, 1), row("B", 1, 2), row("C", 0, 0)]));
        assert_eq!(stats.nonzero, 2);
        assert_eq!((stats.week1_max, stats.week2_max, stats.total_max), (3, 2, 4));
        assert_eq!(stats.violations, 0);
    }

    #[test]
    fn report_flags_short_calendar_and_ranks_students() {
        let window = DateWindow::parse("2025-09-29", "2025-10-10").unwrap();
        let dates: Vec<NaiveDate> = ["2025-09-29", "2025-10-01", "2025-10-03", "2025-10-06"]
            .iter()
            .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap())
            .collect();
        let selection = JoinSelection {
            mode: crate::models::JoinMode::Email,
            coverage_pct: 75.0,
        };
        let report = build_report(
            "CSE20",
            &window,
            &dates,
            Some(&selection),
            &table(vec![row("Low", 1, 0), row("High", 3, 1)]),
        );

        assert!(report.contains("# Attendance QA Report"));
        assert!(report.contains("- 2025-10-06 (week 2)"));
        assert!(report.contains("Only 4 lecture dates observed"));
        assert!(report.contains("- Join: email (75.0% of roster matched)"));
        let high = report.find("- High").unwrap();
        let low = report.find("- Low").unwrap();
        assert!(high < low);
    }
}
