use crate::bootstrap::{self, LibraryError};
use crate::cache::{CacheError, LibraryCache, WsCache};
use crate::config::{AnalysisMode, ScannerSettings, SettingsError};
use crate::connector::{request_path, ConnectorError, HttpConnector, ServerConnector};
use crate::loader::{LoadError, LoadStrategy, WsLoader};
use crate::repository::ProjectRepositories;
use crate::rules::{language_of, RuleSet};
use crate::types::{AnalysisReport, Issue, SubmitResponse};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const SUBMIT_PATH: &str = "/api/ce/submit";
pub const ISSUES_REPORT_FILE: &str = "issues-report.json";

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("Fail to download libraries from server")]
    LibrariesDownload {
        #[source]
        source: LibraryError,
    },

    #[error("Fail to load project configuration")]
    Repositories {
        #[source]
        source: LoadError,
    },

    #[error("Fail to submit analysis report")]
    Submit {
        #[source]
        source: ConnectorError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid source directory {path}: {message}")]
    InvalidSources { path: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ScannerResult<T> = Result<T, ScannerError>;

#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    pub project_key: String,
    pub mode: AnalysisMode,
    pub files: usize,
    pub issues: Vec<Issue>,
    pub report_path: Option<PathBuf>,
    pub task_id: Option<String>,
}

pub struct Scanner {
    settings: ScannerSettings,
    connector: Box<dyn ServerConnector>,
}

impl Scanner {
    pub fn new(settings: ScannerSettings) -> ScannerResult<Self> {
        settings.validate()?;
        let connector = HttpConnector::new(settings.host_url.clone(), settings.timeout)?;
        Ok(Self::with_connector(settings, Box::new(connector)))
    }

    pub fn with_connector(settings: ScannerSettings, connector: Box<dyn ServerConnector>) -> Self {
        Self {
            settings,
            connector,
        }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Publish mode always talks to the server. Issues mode keeps the cache
    /// up to date and reads from it only when `sonar.useWsCache` is set.
    pub fn load_strategy(&self) -> LoadStrategy {
        if self.settings.analysis_mode.is_issues() && self.settings.use_ws_cache {
            LoadStrategy::ServerFirst
        } else {
            LoadStrategy::ServerOnly
        }
    }

    fn ws_cache(&self) -> ScannerResult<Option<WsCache>> {
        if !self.settings.analysis_mode.is_issues() {
            if self.settings.use_ws_cache {
                warn!("sonar.useWsCache is ignored in {} mode", self.settings.analysis_mode);
            }
            return Ok(None);
        }
        Ok(Some(WsCache::open(
            &self.settings.user_home,
            self.connector.base_url(),
        )?))
    }

    pub async fn execute(&self) -> ScannerResult<AnalysisSummary> {
        let settings = &self.settings;
        info!("Scanner {}", env!("CARGO_PKG_VERSION"));
        info!("Analysis mode: {}", settings.analysis_mode);
        info!("User home: {}", settings.user_home.display());

        let strategy = self.load_strategy();
        debug!("Web service load strategy: {}", strategy);
        let loader = WsLoader::new(self.connector.as_ref(), self.ws_cache()?, strategy);

        let libraries = LibraryCache::open(&settings.user_home)?;
        bootstrap::download_libraries(&loader, &libraries)
            .await
            .map_err(|source| ScannerError::LibrariesDownload { source })?;

        info!("Project key: {}", settings.project_key);
        let repositories = ProjectRepositories::load(&loader, &settings.project_key)
            .await
            .map_err(|source| ScannerError::Repositories { source })?;
        let rules = repositories.rule_set();

        let files = self.index_files()?;
        info!("{} files indexed", files.len());

        let issues = self.analyze(&files, &rules)?;

        let report = AnalysisReport {
            project_key: settings.project_key.clone(),
            project_name: settings.project_name.clone(),
            analysis_date: Utc::now(),
            files: files.iter().map(|(component, _)| component.clone()).collect(),
            issues,
        };

        let mut summary = AnalysisSummary {
            project_key: settings.project_key.clone(),
            mode: settings.analysis_mode,
            files: files.len(),
            issues: Vec::new(),
            report_path: None,
            task_id: None,
        };

        match settings.analysis_mode {
            AnalysisMode::Issues => {
                summary.report_path = Some(self.write_issues_report(&report)?);
                info!("ANALYSIS SUCCESSFUL: {} issues", report.issues.len());
            }
            AnalysisMode::Publish => {
                let task_id = self.submit(&report).await?;
                info!(
                    "ANALYSIS SUCCESSFUL, you can browse {}/dashboard/index/{}",
                    self.connector.base_url(),
                    settings.project_key
                );
                info!("Analysis report submitted, task {}", task_id);
                summary.task_id = Some(task_id);
            }
        }

        summary.issues = report.issues;
        Ok(summary)
    }

    /// Source files keyed by their path relative to the project base
    /// directory. Hidden entries and the working directory are skipped.
    fn index_files(&self) -> ScannerResult<Vec<(String, PathBuf)>> {
        let base = &self.settings.project_base_dir;
        let mut indexed = BTreeSet::new();

        for source in &self.settings.sources {
            let root = base.join(source);
            if root.is_file() {
                indexed.insert(root);
                continue;
            }
            if !root.is_dir() {
                return Err(ScannerError::InvalidSources {
                    path: root.display().to_string(),
                    message: "not a file or directory".to_string(),
                });
            }

            let root_str = root.to_str().ok_or_else(|| ScannerError::InvalidSources {
                path: root.display().to_string(),
                message: "path is not valid UTF-8".to_string(),
            })?;
            let pattern = format!("{}/**/*", glob::Pattern::escape(root_str));
            let entries = glob::glob(&pattern).map_err(|e| ScannerError::InvalidSources {
                path: root_str.to_string(),
                message: e.to_string(),
            })?;

            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() && !self.is_excluded(&path) => {
                        indexed.insert(path);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping unreadable path: {}", e),
                }
            }
        }

        Ok(indexed
            .into_iter()
            .map(|path| (component_key(base, &path), path))
            .collect())
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if path.starts_with(&self.settings.working_directory) {
            return true;
        }
        let relative = path
            .strip_prefix(&self.settings.project_base_dir)
            .unwrap_or(path);
        relative
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
    }

    fn analyze(&self, files: &[(String, PathBuf)], rules: &RuleSet) -> ScannerResult<Vec<Issue>> {
        let mut issues = Vec::new();
        for (component, path) in files {
            let Some(language) = language_of(component) else {
                continue;
            };
            let content = std::fs::read_to_string(path).map_err(|source| ScannerError::Io {
                path: path.clone(),
                source,
            })?;
            let found = rules.scan(language, component, &content);
            for issue in &found {
                debug!(
                    "{} {}:{} {}",
                    issue.severity,
                    issue.component,
                    issue.line.map(|l| l.to_string()).unwrap_or_default(),
                    issue.message
                );
            }
            issues.extend(found);
        }
        Ok(issues)
    }

    fn write_issues_report(&self, report: &AnalysisReport) -> ScannerResult<PathBuf> {
        let dir = &self.settings.working_directory;
        std::fs::create_dir_all(dir).map_err(|source| ScannerError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(ISSUES_REPORT_FILE);
        let json = serde_json::to_vec_pretty(report)?;
        std::fs::write(&path, json).map_err(|source| ScannerError::Io {
            path: path.clone(),
            source,
        })?;
        info!("Issues report written to {}", path.display());
        Ok(path)
    }

    async fn submit(&self, report: &AnalysisReport) -> ScannerResult<String> {
        let body = serde_json::to_value(report)?;
        let path = request_path(SUBMIT_PATH, &[("projectKey", report.project_key.as_str())]);
        let response = self
            .connector
            .post_json(&path, &body)
            .await
            .map_err(|source| ScannerError::Submit { source })?;
        let response: SubmitResponse = serde_json::from_slice(&response)?;
        Ok(response.task_id)
    }
}

fn component_key(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Logs a failed execution and its whole cause chain at error level.
pub fn log_failure(err: &ScannerError) {
    error!("Error during scanner execution");
    let mut current: Option<&dyn std::error::Error> = Some(err);
    while let Some(cause) = current {
        error!("{}", cause);
        current = cause.source();
    }
}
