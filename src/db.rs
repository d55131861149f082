use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::JoinMode;
use crate::pipeline::ProcessOutcome;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }
}

/// One row of the run history.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: Uuid,
    pub course: String,
    pub run_at: DateTime<Utc>,
    pub status: String,
    pub join_mode: Option<String>,
    pub students_total: i32,
    pub coverage_pct: f64,
    pub counts_path: Option<String>,
    pub notes: Option<String>,
}

impl RunRecord {
    pub fn succeeded(course: &str, requested_mode: JoinMode, outcome: &ProcessOutcome) -> Self {
        let join_mode = outcome.join.map(|j| j.mode).unwrap_or(requested_mode);
        Self {
            id: Uuid::new_v4(),
            course: course.to_string(),
            run_at: outcome.summary.generated_at,
            status: RunStatus::Success.as_str().to_string(),
            join_mode: Some(join_mode.to_string()),
            students_total: i32::try_from(outcome.summary.students_total).unwrap_or(i32::MAX),
            coverage_pct: outcome.summary.coverage_pct,
            counts_path: Some(outcome.counts_path.display().to_string()),
            notes: None,
        }
    }

    pub fn failed(course: &str, requested_mode: JoinMode, error: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            course: course.to_string(),
            run_at: Utc::now(),
            status: RunStatus::Error.as_str().to_string(),
            join_mode: Some(requested_mode.to_string()),
            students_total: 0,
            coverage_pct: 0.0,
            counts_path: None,
            notes: Some(error.to_string()),
        }
    }
}

pub async fn record_run(pool: &PgPool, run: &RunRecord) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO attendance_automator.runs
        (id, course, run_at, status, join_mode, students_total, coverage_pct, counts_path, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(run.id)
    .bind(&run.course)
    .bind(run.run_at)
    .bind(&run.status)
    .bind(&run.join_mode)
    .bind(run.students_total)
    .bind(run.coverage_pct)
    .bind(&run.counts_path)
    .bind(&run.notes)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn fetch_history(
    pool: &PgPool,
    course: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<RunRecord>> {
    let mut query = String::from(
        "SELECT id, course, run_at, status, join_mode, students_total, coverage_pct, \
         counts_path, notes \
         FROM attendance_automator.runs",
    );

    if course.is_some() {
        query.push_str(" WHERE course = $2");
    }
    query.push_str(" ORDER BY run_at DESC LIMIT $1");

    let mut rows = sqlx::query(&query).bind(limit.max(1));
    if let Some(value) = course {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut runs = Vec::with_capacity(records.len());

    for row in records {
        runs.push(RunRecord {
            id: row.get("id"),
            course: row.get("course"),
            run_at: row.get("run_at"),
            status: row.get("status"),
            join_mode: row.get("join_mode"),
            students_total: row.get("students_total"),
            coverage_pct: row.get("coverage_pct"),
            counts_path: row.get("counts_path"),
            notes: row.get("notes"),
        });
    }

    Ok(runs)
}
