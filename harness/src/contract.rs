//! Cache-fallback contract of the scanner.
//!
//! | server reachable | `sonar.useWsCache` | cache            | outcome                     |
//! |------------------|--------------------|------------------|-----------------------------|
//! | yes              | off                | empty            | success, cache populated    |
//! | no               | off                | any              | failure                     |
//! | no               | on                 | from online run  | success, served from cache  |
//! | no               | on                 | empty            | failure with both messages  |
//!
//! Publish mode never reads the cache, so an offline publish fails while
//! downloading libraries.

use crate::build::{BuildOutcome, ScannerBuild};
use crate::config::HarnessConfig;
use crate::error::{io_error, HarnessResult};
use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Utc};
use scanner::properties;
use scanner::AnalysisMode;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

pub const PROJECT_KEY: &str = "java:sample";
pub const PROJECT_NAME: &str = "Java Sample, with comma";
pub const PROFILE_NAME: &str = "sonar-way";
pub const PROFILE_LANGUAGE: &str = "java";

pub const SAMPLE_PROJECT: &str = "java-sample";
pub const NON_ASSOCIATED_PROJECT: &str = "java-sample-non-associated";

pub const ISSUES_MODE_MIN_VERSION: &str = "5.3";
pub const NON_ASSOCIATED_MIN_VERSION: &str = "5.2";
pub const PUBLISH_OFFLINE_MIN_VERSION: &str = "5.2";

pub const TRYING_CACHE: &str = "can not be reached, trying cache";
pub const NOT_CACHED: &str = "can not be reached and data is not cached";
pub const LIBRARIES_DOWNLOAD_FAILED: &str = "Fail to download libraries from server";

/// Sample projects plus the scanner user homes handed out to builds.
pub struct ContractContext {
    projects_dir: PathBuf,
    homes: TempDir,
    current_home: Option<PathBuf>,
    created: usize,
}

impl ContractContext {
    pub fn new(projects_dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let homes = tempfile::Builder::new()
            .prefix("scanner-homes-")
            .tempdir()
            .map_err(io_error(std::env::temp_dir()))?;
        Ok(Self {
            projects_dir: projects_dir.into(),
            homes,
            current_home: None,
            created: 0,
        })
    }

    pub fn current_home(&self) -> Option<&Path> {
        self.current_home.as_deref()
    }

    /// A build of `project` in `mode`. A new, empty user home is allocated
    /// when `refresh_cache` is set or none exists yet; otherwise the current
    /// one is reused with whatever it has cached.
    pub fn create_runner(
        &mut self,
        mode: AnalysisMode,
        refresh_cache: bool,
        project: &str,
    ) -> HarnessResult<ScannerBuild> {
        let home = match self.current_home.clone() {
            Some(home) if !refresh_cache => home,
            _ => self.new_home()?,
        };

        Ok(ScannerBuild::create(self.projects_dir.join(project))?
            .set_property(properties::ANALYSIS_MODE, mode.to_string())
            .set_property(properties::USER_HOME, home.display().to_string()))
    }

    fn new_home(&mut self) -> HarnessResult<PathBuf> {
        self.created += 1;
        let home = self.homes.path().join(format!("home-{}", self.created));
        std::fs::create_dir_all(&home).map_err(io_error(&home))?;
        self.current_home = Some(home.clone());
        Ok(home)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub description: String,
    pub expected_success: bool,
    pub expected_logs: Vec<String>,
    pub succeeded: bool,
    pub missing_logs: Vec<String>,
    /// Log of the build, kept only when the step did not pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl StepReport {
    pub fn passed(&self) -> bool {
        self.succeeded == self.expected_success && self.missing_logs.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    pub steps: Vec<StepReport>,
}

impl ScenarioReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            skipped: None,
            steps: Vec::new(),
        }
    }

    fn skipped(name: &str, reason: String) -> Self {
        info!("Skipping {}: {}", name, reason);
        Self {
            skipped: Some(reason),
            ..Self::new(name)
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub fn passed(&self) -> bool {
        self.steps.iter().all(StepReport::passed)
    }

    fn expect_success(&mut self, description: &str, outcome: BuildOutcome) {
        self.record(description, outcome, true, &[]);
    }

    fn expect_failure(&mut self, description: &str, outcome: BuildOutcome, logs: &[&str]) {
        self.record(description, outcome, false, logs);
    }

    fn record(
        &mut self,
        description: &str,
        outcome: BuildOutcome,
        expected_success: bool,
        expected_logs: &[&str],
    ) {
        let mut step = StepReport {
            description: description.to_string(),
            expected_success,
            expected_logs: expected_logs.iter().map(|s| s.to_string()).collect(),
            succeeded: outcome.is_success(),
            missing_logs: outcome.missing_logs(expected_logs),
            logs: None,
        };
        if step.passed() {
            info!("{}: {} ok", self.name, description);
        } else {
            warn!("{}: {} FAILED", self.name, description);
            step.logs = Some(outcome.logs().to_string());
        }
        self.steps.push(step);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub started_at: DateTime<Utc>,
    pub server_version: String,
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    /// Every step of every scenario that ran passed.
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(ScenarioReport::passed)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Cache fallback contract against server {} ({})",
            self.server_version,
            self.started_at.to_rfc3339()
        )?;
        for scenario in &self.scenarios {
            if let Some(reason) = &scenario.skipped {
                writeln!(f, "  [skip] {}: {}", scenario.name, reason)?;
                continue;
            }
            let mark = if scenario.passed() { "pass" } else { "FAIL" };
            writeln!(f, "  [{}] {}", mark, scenario.name)?;
            for step in &scenario.steps {
                let mark = if step.passed() { "ok" } else { "FAIL" };
                writeln!(f, "      [{}] {}", mark, step.description)?;
                if !step.passed() {
                    writeln!(
                        f,
                        "          expected {}, got {}",
                        outcome_word(step.expected_success),
                        outcome_word(step.succeeded)
                    )?;
                    for missing in &step.missing_logs {
                        writeln!(f, "          missing log: {}", missing)?;
                    }
                }
            }
        }
        let verdict = if self.passed() { "PASSED" } else { "FAILED" };
        write!(f, "Contract {}", verdict)
    }
}

fn outcome_word(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

fn version_gate(orchestrator: &Orchestrator, name: &str, minimum: &str) -> Option<ScenarioReport> {
    if orchestrator.is_at_least(minimum) {
        return None;
    }
    Some(ScenarioReport::skipped(
        name,
        format!(
            "requires server {} or later, found {}",
            minimum,
            orchestrator.version()
        ),
    ))
}

/// Resets the server and provisions the sample project under the restored
/// profile. Leaves the server running.
pub fn setup(orchestrator: &mut Orchestrator, profile_resource: &Path) -> HarnessResult<()> {
    orchestrator.ensure_started()?;
    orchestrator.reset_data();
    orchestrator.restore_profile(profile_resource)?;
    orchestrator.provision_project(PROJECT_KEY, PROJECT_NAME)?;
    orchestrator.associate_project_to_profile(PROJECT_KEY, PROFILE_LANGUAGE, PROFILE_NAME)?;
    Ok(())
}

pub async fn issues_mode(
    orchestrator: &mut Orchestrator,
    context: &mut ContractContext,
) -> HarnessResult<ScenarioReport> {
    const NAME: &str = "issues mode";
    if let Some(skipped) = version_gate(orchestrator, NAME, ISSUES_MODE_MIN_VERSION) {
        return Ok(skipped);
    }
    let mut report = ScenarioReport::new(NAME);

    orchestrator.ensure_started()?;
    let build = context.create_runner(AnalysisMode::Issues, true, SAMPLE_PROJECT)?;
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    report.expect_success("online analysis fills the cache", outcome);

    orchestrator.ensure_stopped();

    let build = context.create_runner(AnalysisMode::Issues, false, SAMPLE_PROJECT)?;
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    report.expect_failure("offline without cache flag", outcome, &[]);

    let build = context
        .create_runner(AnalysisMode::Issues, false, SAMPLE_PROJECT)?
        .set_property(properties::USE_WS_CACHE, "true");
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    report.expect_success("offline with cache flag and populated cache", outcome);

    let build = context
        .create_runner(AnalysisMode::Issues, true, SAMPLE_PROJECT)?
        .set_property(properties::USE_WS_CACHE, "true");
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    report.expect_failure(
        "offline with cache flag and empty cache",
        outcome,
        &[TRYING_CACHE, NOT_CACHED],
    );

    Ok(report)
}

pub async fn non_associated_mode(
    orchestrator: &mut Orchestrator,
    context: &mut ContractContext,
) -> HarnessResult<ScenarioReport> {
    const NAME: &str = "non associated project";
    if let Some(skipped) = version_gate(orchestrator, NAME, NON_ASSOCIATED_MIN_VERSION) {
        return Ok(skipped);
    }
    let mut report = ScenarioReport::new(NAME);

    orchestrator.ensure_started()?;
    let build = context.create_runner(AnalysisMode::Issues, true, NON_ASSOCIATED_PROJECT)?;
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    report.expect_success("online analysis fills the cache", outcome);

    orchestrator.ensure_stopped();

    let build = context
        .create_runner(AnalysisMode::Issues, false, NON_ASSOCIATED_PROJECT)?
        .set_property(properties::USE_WS_CACHE, "true");
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    report.expect_success("offline with cache flag and populated cache", outcome);

    Ok(report)
}

pub async fn publish_mode_offline(
    orchestrator: &mut Orchestrator,
    context: &mut ContractContext,
) -> HarnessResult<ScenarioReport> {
    const NAME: &str = "publish mode offline";
    if let Some(skipped) = version_gate(orchestrator, NAME, PUBLISH_OFFLINE_MIN_VERSION) {
        return Ok(skipped);
    }
    let mut report = ScenarioReport::new(NAME);

    orchestrator.ensure_started()?;
    let build = context.create_runner(AnalysisMode::Publish, true, SAMPLE_PROJECT)?;
    let outcome: BuildOutcome = orchestrator.execute_build(&build).await.into();
    report.expect_success("online publish", outcome);

    orchestrator.ensure_stopped();

    let build = context.create_runner(AnalysisMode::Publish, false, SAMPLE_PROJECT)?;
    let outcome: BuildOutcome = orchestrator.execute_build(&build).await.into();
    report.expect_failure("offline publish", outcome, &[LIBRARIES_DOWNLOAD_FAILED]);

    Ok(report)
}

/// Runs every scenario once. The server is running again when this returns,
/// whatever happened in between.
pub async fn run_suite(
    orchestrator: &mut Orchestrator,
    config: &HarnessConfig,
) -> HarnessResult<SuiteReport> {
    let started_at = Utc::now();
    setup(orchestrator, &config.profile_resource)?;

    let mut context = ContractContext::new(&config.projects_dir)?;
    let mut guard = orchestrator.availability_guard();
    let scenarios = vec![
        issues_mode(&mut guard, &mut context).await?,
        non_associated_mode(&mut guard, &mut context).await?,
        publish_mode_offline(&mut guard, &mut context).await?,
    ];

    Ok(SuiteReport {
        started_at,
        server_version: guard.version().to_string(),
        scenarios,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projects_dir() -> PathBuf {
        HarnessConfig::default().projects_dir
    }

    #[test]
    fn test_create_runner_reuses_home_until_refreshed() {
        let mut context = ContractContext::new(projects_dir()).unwrap();
        assert!(context.current_home().is_none());

        // First runner always gets a home, even without refresh.
        let first = context
            .create_runner(AnalysisMode::Issues, false, SAMPLE_PROJECT)
            .unwrap();
        let home = first.property(properties::USER_HOME).unwrap().to_string();
        assert!(Path::new(&home).is_dir());
        assert_eq!(first.property(properties::ANALYSIS_MODE), Some("issues"));
        assert_eq!(first.property(properties::PROJECT_KEY), Some(PROJECT_KEY));

        let second = context
            .create_runner(AnalysisMode::Publish, false, SAMPLE_PROJECT)
            .unwrap();
        assert_eq!(second.property(properties::USER_HOME), Some(home.as_str()));
        assert_eq!(second.property(properties::ANALYSIS_MODE), Some("publish"));

        let third = context
            .create_runner(AnalysisMode::Issues, true, SAMPLE_PROJECT)
            .unwrap();
        assert_ne!(third.property(properties::USER_HOME), Some(home.as_str()));
        assert_eq!(
            context.current_home().map(|p| p.display().to_string()),
            third.property(properties::USER_HOME).map(str::to_string)
        );
    }

    #[test]
    fn test_create_runner_unknown_project() {
        let mut context = ContractContext::new(projects_dir()).unwrap();
        assert!(context
            .create_runner(AnalysisMode::Issues, true, "no-such-project")
            .is_err());
    }

    #[test]
    fn test_step_and_suite_verdicts() {
        let mut scenario = ScenarioReport::new("demo");
        scenario.expect_success(
            "ok",
            BuildOutcome::Success {
                logs: String::new(),
            },
        );
        assert!(scenario.passed());

        scenario.expect_failure(
            "needs message",
            BuildOutcome::Failure {
                logs: "Server x can not be reached, trying cache".to_string(),
            },
            &[TRYING_CACHE, NOT_CACHED],
        );
        assert!(!scenario.passed());
        let step = &scenario.steps[1];
        assert_eq!(step.missing_logs, vec![NOT_CACHED.to_string()]);
        assert!(step.logs.is_some());

        let suite = SuiteReport {
            started_at: Utc::now(),
            server_version: "5.6".to_string(),
            scenarios: vec![
                ScenarioReport::skipped("old", "too old".to_string()),
                scenario,
            ],
        };
        assert!(suite.scenarios[0].passed());
        assert!(!suite.passed());
        let text = suite.to_string();
        assert!(text.contains("[skip] old: too old"));
        assert!(text.contains("missing log: can not be reached and data is not cached"));
        assert!(text.ends_with("Contract FAILED"));
    }
}
