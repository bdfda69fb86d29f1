use crate::properties::{self, Properties};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST_URL: &str = "http://localhost:9000";
pub const DEFAULT_WORKING_DIRECTORY: &str = ".scannerwork";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Missing mandatory property: {key}")]
    MissingProperty { key: &'static str },

    #[error("Invalid value '{value}' for property {key}: {reason}")]
    InvalidProperty {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Full analysis, results uploaded to the server.
    Publish,
    /// Local issue feedback only, nothing is uploaded.
    Issues,
}

impl AnalysisMode {
    pub fn is_issues(&self) -> bool {
        matches!(self, AnalysisMode::Issues)
    }
}

impl Default for AnalysisMode {
    fn default() -> Self {
        Self::Publish
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Publish => write!(f, "publish"),
            AnalysisMode::Issues => write!(f, "issues"),
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "publish" | "analysis" => Ok(AnalysisMode::Publish),
            "issues" => Ok(AnalysisMode::Issues),
            "preview" | "incremental" => {
                tracing::warn!(
                    "Analysis mode '{}' is deprecated, falling back to 'issues'",
                    s.trim()
                );
                Ok(AnalysisMode::Issues)
            }
            other => Err(SettingsError::InvalidProperty {
                key: properties::ANALYSIS_MODE,
                value: other.to_string(),
                reason: "expected one of publish, issues".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSettings {
    pub host_url: String,
    pub project_key: String,
    pub project_name: String,
    pub project_base_dir: PathBuf,
    pub sources: Vec<String>,
    pub analysis_mode: AnalysisMode,
    pub user_home: PathBuf,
    pub use_ws_cache: bool,
    pub working_directory: PathBuf,
    pub timeout: Duration,
}

impl ScannerSettings {
    pub fn new(project_key: impl Into<String>, project_base_dir: impl Into<PathBuf>) -> Self {
        let project_key = project_key.into();
        let project_base_dir = project_base_dir.into();
        Self {
            host_url: DEFAULT_HOST_URL.to_string(),
            project_name: project_key.clone(),
            project_key,
            working_directory: project_base_dir.join(DEFAULT_WORKING_DIRECTORY),
            project_base_dir,
            sources: vec![".".to_string()],
            analysis_mode: AnalysisMode::default(),
            user_home: default_user_home(),
            use_ws_cache: false,
            timeout: Duration::from_secs(60),
        }
    }

    /// Builds settings from scanner properties, applying the documented defaults.
    pub fn from_properties(props: &Properties) -> Result<Self, SettingsError> {
        let project_key = props
            .get(properties::PROJECT_KEY)
            .filter(|key| !key.trim().is_empty())
            .ok_or(SettingsError::MissingProperty {
                key: properties::PROJECT_KEY,
            })?;

        let base_dir = match props.get(properties::PROJECT_BASE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().map_err(|e| SettingsError::Invalid {
                message: format!("cannot resolve current directory: {}", e),
            })?,
        };

        let mut settings = Self::new(project_key.trim(), base_dir);

        if let Some(name) = props.get(properties::PROJECT_NAME) {
            settings.project_name = name.to_string();
        }
        if let Some(url) = props.get(properties::HOST_URL) {
            settings.host_url = url.trim_end_matches('/').to_string();
        }
        if let Some(sources) = props.get(properties::SOURCES) {
            settings.sources = sources
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(mode) = props.get(properties::ANALYSIS_MODE) {
            settings.analysis_mode = mode.parse()?;
        }
        if let Some(home) = props.get(properties::USER_HOME) {
            settings.user_home = PathBuf::from(home);
        }
        if let Some(flag) = props.get(properties::USE_WS_CACHE) {
            settings.use_ws_cache = parse_bool(properties::USE_WS_CACHE, flag)?;
        }
        if let Some(dir) = props.get(properties::WORKING_DIRECTORY) {
            let dir = Path::new(dir);
            settings.working_directory = if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                settings.project_base_dir.join(dir)
            };
        }
        if let Some(timeout) = props.get(properties::WS_TIMEOUT) {
            let secs: u64 = timeout
                .trim()
                .parse()
                .map_err(|_| SettingsError::InvalidProperty {
                    key: properties::WS_TIMEOUT,
                    value: timeout.to_string(),
                    reason: "expected a number of seconds".to_string(),
                })?;
            settings.timeout = Duration::from_secs(secs);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn with_host_url(mut self, host_url: impl Into<String>) -> Self {
        self.host_url = host_url.into();
        self
    }

    pub fn with_analysis_mode(mut self, mode: AnalysisMode) -> Self {
        self.analysis_mode = mode;
        self
    }

    pub fn with_user_home(mut self, user_home: impl Into<PathBuf>) -> Self {
        self.user_home = user_home.into();
        self
    }

    pub fn with_ws_cache(mut self, use_ws_cache: bool) -> Self {
        self.use_ws_cache = use_ws_cache;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host_url.is_empty() {
            return Err(SettingsError::Invalid {
                message: "Host URL cannot be empty".to_string(),
            });
        }

        if !self.host_url.starts_with("http://") && !self.host_url.starts_with("https://") {
            return Err(SettingsError::InvalidProperty {
                key: properties::HOST_URL,
                value: self.host_url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }

        if self.project_key.contains(char::is_whitespace) {
            return Err(SettingsError::InvalidProperty {
                key: properties::PROJECT_KEY,
                value: self.project_key.clone(),
                reason: "must not contain whitespace".to_string(),
            });
        }

        if self.sources.is_empty() {
            return Err(SettingsError::Invalid {
                message: "At least one source directory is required".to_string(),
            });
        }

        if self.timeout.is_zero() {
            return Err(SettingsError::Invalid {
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        _ => Err(SettingsError::InvalidProperty {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// `$SONAR_USER_HOME`, else `$HOME/.sonar`.
pub fn default_user_home() -> PathBuf {
    if let Some(home) = std::env::var_os("SONAR_USER_HOME") {
        return PathBuf::from(home);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".sonar")
}
