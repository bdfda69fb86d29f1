//! Owns the analysis server, tracks whether it is reachable, and runs
//! scanner builds against it.

use crate::build::{run_scanner, BuildFailure, BuildResult, ScannerBuild};
use crate::error::{io_error, HarnessError, HarnessResult};
use scanner::properties;
use scanner::types::{ProfileBackup, QualityProfile};
use server::{AnalysisServer, Project, ServerConfig, StoredAnalysis, Version};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAvailability {
    Running,
    Stopped,
}

impl fmt::Display for ServerAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAvailability::Running => write!(f, "running"),
            ServerAvailability::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Orchestrator {
    server: AnalysisServer,
    availability: ServerAvailability,
    work_dir: TempDir,
    builds: AtomicUsize,
    ws_timeout: Duration,
}

impl Orchestrator {
    /// Creates the server and starts it; a new orchestrator is `Running`.
    pub fn start(config: ServerConfig) -> HarnessResult<Self> {
        let mut server = AnalysisServer::new(config)?;
        server.start()?;
        let work_dir = tempfile::Builder::new()
            .prefix("scanner-builds-")
            .tempdir()
            .map_err(io_error(std::env::temp_dir()))?;

        Ok(Self {
            server,
            availability: ServerAvailability::Running,
            work_dir,
            builds: AtomicUsize::new(0),
            ws_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_ws_timeout(mut self, timeout: Duration) -> Self {
        self.ws_timeout = timeout;
        self
    }

    pub fn availability(&self) -> ServerAvailability {
        self.availability
    }

    pub fn ensure_started(&mut self) -> HarnessResult<()> {
        if self.availability == ServerAvailability::Running {
            return Ok(());
        }
        self.server.start()?;
        self.availability = ServerAvailability::Running;
        info!("Server is back online at {}", self.server_url()?);
        Ok(())
    }

    pub fn ensure_stopped(&mut self) {
        if self.availability == ServerAvailability::Stopped {
            return;
        }
        self.server.stop();
        self.availability = ServerAvailability::Stopped;
        info!("Server is offline");
    }

    /// Restores `Running` when the returned guard goes out of scope.
    pub fn availability_guard(&mut self) -> AvailabilityGuard<'_> {
        AvailabilityGuard { orchestrator: self }
    }

    pub fn server_url(&self) -> HarnessResult<String> {
        self.server.base_url().ok_or(HarnessError::NotStarted)
    }

    pub fn version(&self) -> &Version {
        self.server.version()
    }

    /// Whether the server version is at least `minimum`.
    pub fn is_at_least(&self, minimum: &str) -> bool {
        self.version().is_greater_than_or_equals(minimum)
    }

    pub fn reset_data(&self) {
        self.server.reset_data();
    }

    /// Restores a quality profile from a JSON backup file.
    pub fn restore_profile(&self, path: &Path) -> HarnessResult<QualityProfile> {
        let bytes = std::fs::read(path).map_err(io_error(path))?;
        let backup: ProfileBackup =
            serde_json::from_slice(&bytes).map_err(|source| HarnessError::ProfileBackup {
                path: path.to_path_buf(),
                source,
            })?;
        let profile = self.server.restore_profile(backup)?;
        debug!("Restored profile {} ({})", profile.name, profile.key);
        Ok(profile)
    }

    pub fn provision_project(&self, key: &str, name: &str) -> HarnessResult<Project> {
        Ok(self.server.provision_project(key, name)?)
    }

    pub fn associate_project_to_profile(
        &self,
        project_key: &str,
        language: &str,
        profile_name: &str,
    ) -> HarnessResult<()> {
        Ok(self
            .server
            .associate_project_to_profile(project_key, language, profile_name)?)
    }

    pub fn analyses(&self, project_key: &str) -> Vec<StoredAnalysis> {
        self.server.analyses(project_key)
    }

    /// Points the build at this server and at a fresh working directory.
    fn prepare(&self, build: &ScannerBuild) -> HarnessResult<ScannerBuild> {
        let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        let working_dir = self.work_dir.path().join(format!("build-{}", n));
        let mut prepared = build
            .clone()
            .set_property(properties::HOST_URL, self.server_url()?)
            .set_property(
                properties::WORKING_DIRECTORY,
                working_dir.display().to_string(),
            );
        if build.property(properties::WS_TIMEOUT).is_none() {
            prepared = prepared.set_property(
                properties::WS_TIMEOUT,
                self.ws_timeout.as_secs().max(1).to_string(),
            );
        }
        Ok(prepared)
    }

    /// Runs the build and reports a failed build as [`BuildFailure`].
    pub async fn execute_build(&self, build: &ScannerBuild) -> Result<BuildResult, BuildFailure> {
        let result = self.execute_build_quietly(build).await;
        if result.is_success() {
            Ok(result)
        } else {
            Err(BuildFailure { result })
        }
    }

    /// Runs the build and hands back its result whether or not it succeeded.
    pub async fn execute_build_quietly(&self, build: &ScannerBuild) -> BuildResult {
        let prepared = match self.prepare(build) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Unable to prepare build: {}", e);
                return BuildResult::new(false, e.to_string());
            }
        };
        debug!(
            "Running scanner on {} with server {}",
            build.project_dir().display(),
            self.availability
        );
        run_scanner(prepared.properties()).await
    }
}

/// Scoped access to an [`Orchestrator`] that leaves the server running when
/// dropped, including on unwind.
pub struct AvailabilityGuard<'a> {
    orchestrator: &'a mut Orchestrator,
}

impl Deref for AvailabilityGuard<'_> {
    type Target = Orchestrator;

    fn deref(&self) -> &Self::Target {
        self.orchestrator
    }
}

impl DerefMut for AvailabilityGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.orchestrator
    }
}

impl Drop for AvailabilityGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.orchestrator.ensure_started() {
            warn!("Failed to restart server: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn orchestrator() -> Orchestrator {
        Orchestrator::start(ServerConfig::default()).unwrap()
    }

    #[test]
    #[serial]
    fn test_availability_transitions_are_idempotent() {
        let mut orchestrator = orchestrator();
        assert_eq!(orchestrator.availability(), ServerAvailability::Running);
        let url = orchestrator.server_url().unwrap();

        orchestrator.ensure_started().unwrap();
        assert_eq!(orchestrator.availability(), ServerAvailability::Running);

        orchestrator.ensure_stopped();
        orchestrator.ensure_stopped();
        assert_eq!(orchestrator.availability(), ServerAvailability::Stopped);

        orchestrator.ensure_started().unwrap();
        assert_eq!(orchestrator.availability(), ServerAvailability::Running);
        assert_eq!(orchestrator.server_url().unwrap(), url);
    }

    #[test]
    #[serial]
    fn test_guard_restarts_server() {
        let mut orchestrator = orchestrator();
        {
            let mut guard = orchestrator.availability_guard();
            guard.ensure_stopped();
            assert_eq!(guard.availability(), ServerAvailability::Stopped);
        }
        assert_eq!(orchestrator.availability(), ServerAvailability::Running);
    }

    #[test]
    #[serial]
    fn test_guard_restarts_server_on_panic() {
        let mut orchestrator = orchestrator();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut guard = orchestrator.availability_guard();
            guard.ensure_stopped();
            panic!("scenario blew up");
        }));
        assert!(result.is_err());
        assert_eq!(orchestrator.availability(), ServerAvailability::Running);
    }

    #[test]
    #[serial]
    fn test_version_gate() {
        let orchestrator =
            Orchestrator::start(ServerConfig::default().with_version("5.2")).unwrap();
        assert!(orchestrator.is_at_least("5.2"));
        assert!(!orchestrator.is_at_least("5.3"));
    }

    #[test]
    #[serial]
    fn test_restore_profile_rejects_bad_backup() {
        let orchestrator = orchestrator();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            orchestrator.restore_profile(&path),
            Err(HarnessError::ProfileBackup { .. })
        ));
        assert!(matches!(
            orchestrator.restore_profile(&dir.path().join("missing.json")),
            Err(HarnessError::Io { .. })
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_strict_and_quiet_builds_share_result() {
        let orchestrator = orchestrator();
        let project = tempfile::tempdir().unwrap();
        // No sonar-project.properties, so no project key.
        let build = ScannerBuild::create(project.path()).unwrap();

        let quiet = orchestrator.execute_build_quietly(&build).await;
        assert!(!quiet.is_success());

        let failure = orchestrator.execute_build(&build).await.unwrap_err();
        assert!(failure.result.logs().contains("sonar.projectKey"));
    }
}
