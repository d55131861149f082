use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AttendanceError, Result};
use crate::models::JoinMode;
use crate::report::PREVIEW_LIMIT;
use crate::window::DateWindow;

/// Per-process settings, built once in `main` and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub preview_limit: usize,
    /// Embed the run time in output file names.
    pub timestamped_names: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            preview_limit: PREVIEW_LIMIT,
            timestamped_names: false,
        }
    }
}

impl Settings {
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| AttendanceError::Write {
            path: self.output_dir.clone(),
            source,
        })
    }
}

/// Engine parameters for one run.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub window: DateWindow,
    pub join_mode: JoinMode,
    pub include_matrix: bool,
    pub output_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub local: LocalInputs,
    pub window: WindowConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub join: JoinMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalInputs {
    #[serde(default = "default_attendance_csv")]
    pub attendance_csv: PathBuf,
    #[serde(default = "default_gradebook_csv")]
    pub gradebook_csv: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_matrix")]
    pub matrix: bool,
    pub dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            matrix: default_matrix(),
            dir: None,
        }
    }
}

fn default_attendance_csv() -> PathBuf {
    PathBuf::from("attendance_weeks1_2.csv")
}

fn default_gradebook_csv() -> PathBuf {
    PathBuf::from("canvas_gradebook.csv")
}

fn default_prefix() -> String {
    "attendance".to_string()
}

fn default_matrix() -> bool {
    true
}

impl RunConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| AttendanceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|message| AttendanceError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    pub fn options(&self) -> Result<ProcessOptions> {
        Ok(ProcessOptions {
            window: DateWindow::parse(&self.window.start, &self.window.end)?,
            join_mode: self.join,
            include_matrix: self.output.matrix,
            output_prefix: self.output.prefix.clone(),
        })
    }

    /// The gradebook is optional; a missing file means no roster join.
    pub fn gradebook(&self) -> Option<&Path> {
        let path = self.local.gradebook_csv.as_path();
        path.exists().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = RunConfig::from_toml(
            r#"
            join = "id"

            [local]
            attendance_csv = "att.csv"
            gradebook_csv = "/definitely/missing/gradebook.csv"

            [window]
            start = "2025-09-29"
            end = "2025-10-10"

            [output]
            prefix = "CSE20"
            matrix = false
            dir = "out"
            "#,
        )
        .unwrap();

        assert_eq!(config.join, JoinMode::Id);
        assert_eq!(config.local.attendance_csv, PathBuf::from("att.csv"));
        assert_eq!(config.output.dir, Some(PathBuf::from("out")));
        assert!(config.gradebook().is_none());

        let options = config.options().unwrap();
        assert!(!options.include_matrix);
        assert_eq!(options.output_prefix, "CSE20");
        assert_eq!(options.window.start.to_string(), "2025-09-29");
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let config = RunConfig::from_toml(
            r#"
            [local]
            [window]
            start = "2025-09-29"
            end = "2025-10-10"
            "#,
        )
        .unwrap();
        assert_eq!(config.join, JoinMode::Auto);
        assert!(config.output.matrix);
        assert_eq!(config.output.prefix, "attendance");
        assert_eq!(
            config.local.attendance_csv,
            PathBuf::from("attendance_weeks1_2.csv")
        );
    }

    #[test]
    fn inverted_window_fails_options() {
        let config = RunConfig::from_toml(
            "[local]\n[window]\nstart = \"2025-10-10\"\nend = \"2025-09-29\"\n",
        )
        .unwrap();
        assert!(matches!(
            config.options(),
            Err(AttendanceError::DateRange(_))
        ));
    }

    #[test]
    fn unknown_join_mode_is_rejected() {
        let err = RunConfig::from_toml(
            "join = \"fuzzy\"\n[local]\n[window]\nstart = \"2025-09-29\"\nend = \"2025-10-10\"\n",
        )
        .unwrap_err();
        assert!(err.contains("fuzzy") || err.contains("variant"));
    }

    #[test]
    fn output_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            output_dir: dir.path().join("nested/out"),
            ..Settings::default()
        };
        settings.ensure_directories().unwrap();
        assert!(settings.output_dir.is_dir());
    }
}
