use harness::contract::{
    self, ContractContext, LIBRARIES_DOWNLOAD_FAILED, NON_ASSOCIATED_PROJECT, NOT_CACHED,
    PROJECT_KEY, SAMPLE_PROJECT, TRYING_CACHE,
};
use harness::{run_suite, BuildOutcome, HarnessConfig, Orchestrator, ServerAvailability};
use scanner::properties::USE_WS_CACHE;
use scanner::{AnalysisMode, WsCache};
use serial_test::serial;
use server::ServerConfig;
use std::time::Duration;

fn start(version: &str) -> (Orchestrator, ContractContext, HarnessConfig) {
    let config = HarnessConfig::default().with_server(ServerConfig::new().with_version(version));
    let mut orchestrator = Orchestrator::start(config.server.clone())
        .unwrap()
        .with_ws_timeout(Duration::from_secs(5));
    contract::setup(&mut orchestrator, &config.profile_resource).unwrap();
    let context = ContractContext::new(&config.projects_dir).unwrap();
    (orchestrator, context, config)
}

#[tokio::test]
#[serial]
async fn test_issues_mode_falls_back_to_cache() {
    let (mut orchestrator, mut context, _) = start("5.6");

    // Online, fresh user home.
    let build = context
        .create_runner(AnalysisMode::Issues, true, SAMPLE_PROJECT)
        .unwrap();
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    assert!(outcome.is_success(), "{}", outcome.logs());
    assert!(outcome.logs().contains("ANALYSIS SUCCESSFUL"));

    let home = context.current_home().unwrap().to_path_buf();
    let url = orchestrator.server_url().unwrap();
    let cache = WsCache::open(&home, &url).unwrap();
    assert!(!cache.entries().unwrap().is_empty());
    assert!(cache.contains("/batch/index"));

    orchestrator.ensure_stopped();

    // Offline, cache not enabled.
    let build = context
        .create_runner(AnalysisMode::Issues, false, SAMPLE_PROJECT)
        .unwrap();
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    assert!(!outcome.is_success());
    assert!(!outcome.logs().contains(TRYING_CACHE));

    // Offline, cache enabled, same user home.
    let build = context
        .create_runner(AnalysisMode::Issues, false, SAMPLE_PROJECT)
        .unwrap()
        .set_property(USE_WS_CACHE, "true");
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    assert!(outcome.is_success(), "{}", outcome.logs());
    assert!(outcome.logs().contains(TRYING_CACHE));
    assert!(outcome.logs().contains("Using cached data for /batch/index"));

    // Offline, cache enabled, fresh user home.
    let build = context
        .create_runner(AnalysisMode::Issues, true, SAMPLE_PROJECT)
        .unwrap()
        .set_property(USE_WS_CACHE, "true");
    assert_ne!(context.current_home().unwrap(), home.as_path());
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    assert!(!outcome.is_success());
    assert!(outcome.logs().contains(TRYING_CACHE), "{}", outcome.logs());
    assert!(outcome.logs().contains(NOT_CACHED), "{}", outcome.logs());

    orchestrator.ensure_started().unwrap();
}

#[tokio::test]
#[serial]
async fn test_publish_mode_offline_fails_to_download_libraries() {
    let (mut orchestrator, mut context, _) = start("5.6");

    let build = context
        .create_runner(AnalysisMode::Publish, true, SAMPLE_PROJECT)
        .unwrap();
    let result = orchestrator.execute_build(&build).await.unwrap();
    assert!(result.is_success());
    assert_eq!(orchestrator.analyses(PROJECT_KEY).len(), 1);
    // Publish mode leaves the web service cache alone.
    let home = context.current_home().unwrap().to_path_buf();
    assert!(!home.join("ws_cache").exists());

    orchestrator.ensure_stopped();

    let build = context
        .create_runner(AnalysisMode::Publish, false, SAMPLE_PROJECT)
        .unwrap();
    let failure = orchestrator.execute_build(&build).await.unwrap_err();
    assert!(!failure.result.is_success());
    assert!(
        failure.result.logs().contains(LIBRARIES_DOWNLOAD_FAILED),
        "{}",
        failure.result.logs()
    );

    // Asking for the cache changes nothing in publish mode.
    let build = build.set_property(USE_WS_CACHE, "true");
    let result = orchestrator.execute_build_quietly(&build).await;
    assert!(!result.is_success());
    assert!(result.logs().contains(LIBRARIES_DOWNLOAD_FAILED));
    assert!(!result.logs().contains(TRYING_CACHE));

    orchestrator.ensure_started().unwrap();
}

#[tokio::test]
#[serial]
async fn test_non_associated_project_served_from_cache() {
    let (mut orchestrator, mut context, _) = start("5.6");

    let build = context
        .create_runner(AnalysisMode::Issues, true, NON_ASSOCIATED_PROJECT)
        .unwrap();
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    assert!(outcome.is_success(), "{}", outcome.logs());

    orchestrator.ensure_stopped();

    let build = context
        .create_runner(AnalysisMode::Issues, false, NON_ASSOCIATED_PROJECT)
        .unwrap()
        .set_property(USE_WS_CACHE, "true");
    let outcome: BuildOutcome = orchestrator.execute_build_quietly(&build).await.into();
    assert!(outcome.is_success(), "{}", outcome.logs());
}

#[tokio::test]
#[serial]
async fn test_suite_passes_and_leaves_server_running() {
    let (mut orchestrator, _, config) = start("5.6");

    let report = run_suite(&mut orchestrator, &config).await.unwrap();

    assert!(report.passed(), "{}", report);
    assert_eq!(report.scenarios.len(), 3);
    assert!(report.scenarios.iter().all(|s| !s.is_skipped()));
    assert_eq!(orchestrator.availability(), ServerAvailability::Running);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["server_version"], "5.6");
}

#[tokio::test]
#[serial]
async fn test_version_gate_skips_issues_mode() {
    let (mut orchestrator, _, config) = start("5.2");

    let report = run_suite(&mut orchestrator, &config).await.unwrap();

    assert!(report.passed(), "{}", report);
    let skipped: Vec<_> = report
        .scenarios
        .iter()
        .filter(|s| s.is_skipped())
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(skipped, vec!["issues mode"]);
    assert_eq!(orchestrator.availability(), ServerAvailability::Running);
}
