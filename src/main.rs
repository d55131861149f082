use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregate;
mod config;
mod db;
mod error;
mod matrix;
mod models;
mod normalize;
mod output;
mod pipeline;
mod report;
mod roster;
mod table;
mod window;

use config::{ProcessOptions, RunConfig, Settings};
use models::JoinMode;
use pipeline::{ProcessOutcome, ProcessRequest};
use window::DateWindow;

#[derive(Parser)]
#[command(name = "attendance-automator")]
#[command(about = "Lecture attendance counts reconciled against a course roster", long_about = None)]
struct Cli {
    /// Directory for generated CSVs
    #[arg(long, global = true, env = "ATTENDANCE_OUTPUT_DIR", default_value = ".")]
    out_dir: PathBuf,
    /// Embed the run time in output file names
    #[arg(long, global = true)]
    stamp: bool,
    /// Print the run outcome as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the run-history schema
    InitDb,
    /// Process local attendance and gradebook CSVs
    Process {
        #[arg(long)]
        attendance: PathBuf,
        #[arg(long)]
        gradebook: Option<PathBuf>,
        /// Start date YYYY-MM-DD
        #[arg(long)]
        start: String,
        /// End date YYYY-MM-DD
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "attendance")]
        out_prefix: String,
        #[arg(long, value_enum, default_value_t = JoinMode::Auto)]
        join: JoinMode,
        /// Also write a per-lecture matrix CSV
        #[arg(long)]
        matrix: bool,
        /// Write a markdown QA report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Run the pipeline from a TOML config file
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// List recent runs
    History {
        #[arg(long)]
        course: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

/// History is best effort; runs still succeed without a database.
async fn history_pool() -> Option<PgPool> {
    if std::env::var("DATABASE_URL").is_err() {
        debug!("DATABASE_URL not set; run history disabled");
        return None;
    }
    match connect().await {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!("run history unavailable: {err:#}");
            None
        }
    }
}

async fn execute(
    settings: Settings,
    request: ProcessRequest,
    json: bool,
) -> anyhow::Result<()> {
    let course = request.options.output_prefix.clone();
    let requested_mode = request.options.join_mode;
    let pool = history_pool().await;

    let result = tokio::task::spawn_blocking(move || pipeline::process(&settings, &request))
        .await
        .context("attendance pipeline panicked")?;

    if let Some(pool) = &pool {
        let run = match &result {
            Ok(outcome) => db::RunRecord::succeeded(&course, requested_mode, outcome),
            Err(err) => db::RunRecord::failed(&course, requested_mode, &err.to_string()),
        };
        if let Err(err) = db::record_run(pool, &run).await {
            warn!("failed to record run history: {err:#}");
        }
    }

    let outcome = result?;
    print_outcome(&outcome, json)
}

fn print_outcome(outcome: &ProcessOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!("Counts written to {}.", outcome.counts_path.display());
    if let Some(path) = &outcome.matrix_path {
        println!("Matrix written to {}.", path.display());
    }
    if let Some(path) = &outcome.report_path {
        println!("QA report written to {}.", path.display());
    }
    if let Some(join) = &outcome.join {
        println!(
            "Join picked: {} (coverage {:.1}%)",
            join.mode, join.coverage_pct
        );
    }
    let dates: Vec<String> = outcome
        .selected_dates
        .iter()
        .map(|d| d.to_string())
        .collect();
    println!("Detected lecture dates: [{}]", dates.join(", "));
    println!(
        "{} students, {} with attendance ({:.1}%).",
        outcome.summary.students_total,
        outcome.summary.students_with_attendance,
        outcome.summary.coverage_pct
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_automator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings {
        output_dir: cli.out_dir,
        timestamped_names: cli.stamp,
        ..Settings::default()
    };

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Process {
            attendance,
            gradebook,
            start,
            end,
            out_prefix,
            join,
            matrix,
            report,
        } => {
            let options = ProcessOptions {
                window: DateWindow::parse(&start, &end)?,
                join_mode: join,
                include_matrix: matrix,
                output_prefix: out_prefix,
            };
            let request = ProcessRequest {
                attendance,
                gradebook,
                options,
                report,
            };
            execute(settings, request, cli.json).await?;
        }
        Commands::Run { config, report } => {
            let run_config = RunConfig::from_path(&config)?;
            let options = run_config.options()?;
            if let Some(dir) = &run_config.output.dir {
                settings.output_dir = dir.clone();
            }
            let request = ProcessRequest {
                attendance: run_config.local.attendance_csv.clone(),
                gradebook: run_config.gradebook().map(|p| p.to_path_buf()),
                options,
                report,
            };
            execute(settings, request, cli.json).await?;
        }
        Commands::History { course, limit } => {
            let pool = connect().await?;
            let runs = db::fetch_history(&pool, course.as_deref(), limit).await?;

            if runs.is_empty() {
                println!("No runs recorded yet.");
                return Ok(());
            }

            println!("Recent attendance runs:");
            for run in runs {
                println!(
                    "- {} {} [{}] join {} | {} students, {:.1}% with attendance{}",
                    run.run_at.format("%Y-%m-%d %H:%M"),
                    run.course,
                    run.status,
                    run.join_mode.as_deref().unwrap_or("-"),
                    run.students_total,
                    run.coverage_pct,
                    run.notes.map(|n| format!(" ({n})")).unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
