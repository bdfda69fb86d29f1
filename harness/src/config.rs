use crate::error::{io_error, HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use server::ServerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory holding one sub-directory per sample project
    pub projects_dir: PathBuf,
    /// Quality profile backup restored before the scenarios run
    pub profile_resource: PathBuf,
    /// Embedded server settings
    pub server: ServerConfig,
    /// Web service timeout handed to every scanner build, in seconds
    pub ws_timeout_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        Self {
            projects_dir: root.join("projects"),
            profile_resource: root.join("resources").join("sonar-way-profile.json"),
            server: ServerConfig::default(),
            ws_timeout_secs: 10,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path).map_err(io_error(path))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> HarnessResult<Self> {
        toml::from_str(text).map_err(|e| HarnessError::InvalidConfig {
            message: e.to_string(),
        })
    }

    pub fn with_projects_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.projects_dir = dir.into();
        self
    }

    pub fn with_profile_resource(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_resource = path.into();
        self
    }

    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    pub fn with_ws_timeout(mut self, timeout: Duration) -> Self {
        self.ws_timeout_secs = timeout.as_secs();
        self
    }

    pub fn ws_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_timeout_secs)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if !self.projects_dir.is_dir() {
            return Err(HarnessError::InvalidConfig {
                message: format!(
                    "Projects directory {} does not exist",
                    self.projects_dir.display()
                ),
            });
        }

        if !self.profile_resource.is_file() {
            return Err(HarnessError::InvalidConfig {
                message: format!(
                    "Profile resource {} does not exist",
                    self.profile_resource.display()
                ),
            });
        }

        if self.ws_timeout_secs == 0 {
            return Err(HarnessError::InvalidConfig {
                message: "Web service timeout must be greater than 0".to_string(),
            });
        }

        self.server.validate()?;
        Ok(())
    }
}
