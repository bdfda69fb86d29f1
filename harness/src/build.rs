//! Scanner builds run in-process with their log captured.
//!
//! A build succeeds or fails as a whole; its log is what a person would
//! have seen on the console. Strict execution reports failures as
//! [`BuildFailure`], quiet execution always hands back the [`BuildResult`].
//! [`BuildOutcome`] normalizes both channels.

use crate::error::{io_error, HarnessResult};
use scanner::properties::{self, PROJECT_PROPERTIES_FILE};
use scanner::{log_failure, Properties, Scanner, ScannerResult, ScannerSettings};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::instrument::WithSubscriber;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// A scanner invocation on one project directory.
#[derive(Debug, Clone)]
pub struct ScannerBuild {
    project_dir: PathBuf,
    properties: Properties,
}

impl ScannerBuild {
    /// Starts from the project's `sonar-project.properties` when present.
    pub fn create(project_dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let project_dir = project_dir.into();
        if !project_dir.is_dir() {
            return Err(io_error(&project_dir)(io::Error::new(
                io::ErrorKind::NotFound,
                "project directory does not exist",
            )));
        }

        let file = project_dir.join(PROJECT_PROPERTIES_FILE);
        let mut props = if file.is_file() {
            Properties::load(&file).map_err(io_error(&file))?
        } else {
            Properties::new()
        };
        props.set(
            properties::PROJECT_BASE_DIR,
            project_dir.display().to_string(),
        );

        Ok(Self {
            project_dir,
            properties: props,
        })
    }

    pub fn set_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.set(key, value);
        self
    }

    pub fn set_properties(mut self, overrides: &Properties) -> Self {
        self.properties.merge(overrides);
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    success: bool,
    logs: String,
}

impl BuildResult {
    pub fn new(success: bool, logs: impl Into<String>) -> Self {
        Self {
            success,
            logs: logs.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn logs(&self) -> &str {
        &self.logs
    }
}

/// A strictly executed build that did not succeed.
#[derive(Error, Debug, Clone)]
#[error("Scanner build failed")]
pub struct BuildFailure {
    pub result: BuildResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Success { logs: String },
    Failure { logs: String },
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success { .. })
    }

    pub fn logs(&self) -> &str {
        match self {
            BuildOutcome::Success { logs } | BuildOutcome::Failure { logs } => logs,
        }
    }

    /// Substrings of `expected` that do not appear in the log.
    pub fn missing_logs(&self, expected: &[&str]) -> Vec<String> {
        expected
            .iter()
            .filter(|needle| !self.logs().contains(*needle))
            .map(|needle| needle.to_string())
            .collect()
    }
}

impl From<BuildResult> for BuildOutcome {
    fn from(result: BuildResult) -> Self {
        if result.success {
            BuildOutcome::Success { logs: result.logs }
        } else {
            BuildOutcome::Failure { logs: result.logs }
        }
    }
}

impl From<Result<BuildResult, BuildFailure>> for BuildOutcome {
    fn from(result: Result<BuildResult, BuildFailure>) -> Self {
        match result {
            Ok(result) => result.into(),
            Err(failure) => BuildOutcome::Failure {
                logs: failure.result.logs,
            },
        }
    }
}

/// In-memory sink for formatted log lines.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

pub struct LogWriter {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            bytes: Arc::clone(&self.bytes),
        }
    }
}

/// Runs one analysis with `properties` and captures everything it logs at
/// INFO and above. Failures are logged with their cause chain before the
/// capture ends.
pub async fn run_scanner(properties: &Properties) -> BuildResult {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_target(false)
        .with_max_level(Level::INFO)
        .finish();

    let success = async {
        match analyze(properties).await {
            Ok(()) => true,
            Err(err) => {
                log_failure(&err);
                false
            }
        }
    }
    .with_subscriber(subscriber)
    .await;

    BuildResult::new(success, buffer.contents())
}

async fn analyze(properties: &Properties) -> ScannerResult<()> {
    let settings = ScannerSettings::from_properties(properties)?;
    Scanner::new(settings)?.execute().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_create_reads_project_properties() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_PROPERTIES_FILE),
            "sonar.projectKey=demo\nsonar.sources=src\n",
        )
        .unwrap();

        let build = ScannerBuild::create(dir.path())
            .unwrap()
            .set_property(properties::SOURCES, "lib");

        assert_eq!(build.property(properties::PROJECT_KEY), Some("demo"));
        assert_eq!(build.property(properties::SOURCES), Some("lib"));
        assert_eq!(
            build.property(properties::PROJECT_BASE_DIR),
            Some(dir.path().display().to_string().as_str())
        );
    }

    #[test]
    fn test_create_missing_project() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ScannerBuild::create(dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_outcome_normalizes_both_channels() {
        let quiet: BuildOutcome = BuildResult::new(false, "ERROR boom").into();
        let strict: BuildOutcome = Err::<BuildResult, _>(BuildFailure {
            result: BuildResult::new(false, "ERROR boom"),
        })
        .into();
        assert_eq!(quiet, strict);
        assert!(!strict.is_success());

        let ok: BuildOutcome = Ok::<_, BuildFailure>(BuildResult::new(true, "done")).into();
        assert!(ok.is_success());
        assert_eq!(ok.missing_logs(&["done", "other"]), vec!["other".to_string()]);
    }

    #[test]
    fn test_log_buffer_collects_writes() {
        let buffer = LogBuffer::default();
        buffer.make_writer().write_all(b"first ").unwrap();
        buffer.make_writer().write_all(b"second").unwrap();
        assert_eq!(buffer.contents(), "first second");
    }

    #[tokio::test]
    async fn test_run_scanner_captures_failure_chain() {
        // No project key: settings are rejected before any request is made.
        let result = run_scanner(&Properties::new()).await;

        assert!(!result.is_success());
        assert!(result.logs().contains("Error during scanner execution"));
        assert!(result.logs().contains("Missing mandatory property: sonar.projectKey"));
    }
}
