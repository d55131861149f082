use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttendanceError>;

/// Fatal errors raised by the attendance engine.
///
/// Bad individual cells never surface here; they are skipped at load time.
#[derive(Error, Debug)]
pub enum AttendanceError {
    /// A required column is missing from an input table
    #[error("schema error: {0}")]
    Schema(String),

    /// The date window is inverted or unparseable
    #[error("date range error: {0}")]
    DateRange(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid run config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}
