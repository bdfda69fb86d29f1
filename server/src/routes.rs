use crate::error::ServerResult;
use crate::state::ServerData;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use scanner::types::{
    ActiveRules, AnalysisReport, ProfileBackup, QualityProfile, QualityProfiles, SubmitResponse,
};
use serde::Deserialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub data: Arc<RwLock<ServerData>>,
    pub version: String,
}

impl AppState {
    fn read(&self) -> RwLockReadGuard<'_, ServerData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ServerData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/server/version", get(server_version))
        .route("/batch/index", get(batch_index))
        .route("/batch/file", get(batch_file))
        .route("/api/qualityprofiles/search", get(search_profiles))
        .route("/api/rules/search", get(search_rules))
        .route("/api/projects/create", post(create_project))
        .route("/api/qualityprofiles/restore", post(restore_profile))
        .route("/api/qualityprofiles/add_project", post(add_project))
        .route("/api/ce/submit", post(submit))
        .with_state(state)
}

async fn server_version(State(state): State<AppState>) -> String {
    state.version.clone()
}

async fn batch_index(State(state): State<AppState>) -> String {
    state.read().library_index().to_string()
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    name: String,
}

async fn batch_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ServerResult<Vec<u8>> {
    debug!("Serving library {}", query.name);
    state.read().library(&query.name)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileQuery {
    project_key: Option<String>,
}

async fn search_profiles(
    State(state): State<AppState>,
    Query(query): Query<ProfileQuery>,
) -> Json<QualityProfiles> {
    let profiles = state.read().profiles_for(query.project_key.as_deref());
    Json(QualityProfiles { profiles })
}

#[derive(Debug, Deserialize)]
struct RuleQuery {
    qprofile: String,
    #[serde(default)]
    activation: Option<bool>,
}

async fn search_rules(
    State(state): State<AppState>,
    Query(query): Query<RuleQuery>,
) -> ServerResult<Json<ActiveRules>> {
    // Only active rules are known to this server.
    let rules = if query.activation == Some(false) {
        Vec::new()
    } else {
        state.read().active_rules(&query.qprofile)?
    };
    Ok(Json(ActiveRules { rules }))
}

#[derive(Debug, Deserialize)]
struct CreateProjectQuery {
    key: String,
    name: String,
}

async fn create_project(
    State(state): State<AppState>,
    Query(query): Query<CreateProjectQuery>,
) -> ServerResult<StatusCode> {
    state.write().provision_project(&query.key, &query.name)?;
    Ok(StatusCode::CREATED)
}

async fn restore_profile(
    State(state): State<AppState>,
    Json(backup): Json<ProfileBackup>,
) -> ServerResult<Json<QualityProfile>> {
    let profile = state.write().restore_profile(backup)?;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddProjectQuery {
    project_key: String,
    language: String,
    quality_profile: String,
}

async fn add_project(
    State(state): State<AppState>,
    Query(query): Query<AddProjectQuery>,
) -> ServerResult<StatusCode> {
    state.write().associate_project_to_profile(
        &query.project_key,
        &query.language,
        &query.quality_profile,
    )?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitQuery {
    project_key: String,
}

async fn submit(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    Json(report): Json<AnalysisReport>,
) -> ServerResult<Json<SubmitResponse>> {
    let task_id = state.write().submit(&query.project_key, &report)?;
    Ok(Json(SubmitResponse { task_id }))
}
