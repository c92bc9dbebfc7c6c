use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use medmcp_core::OperationOutcome;
use medmcp_schema::{PatientContext, ProviderTag, Session, SessionId, SessionSummary};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub patient: PatientContext,
    #[serde(default)]
    pub provider: Option<ProviderTag>,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Deserialize)]
pub struct SymptomsRequest {
    pub symptoms: Vec<String>,
}

#[derive(Deserialize)]
pub struct DiagnosisRequest {
    pub diagnosis: String,
}

#[derive(Deserialize)]
pub struct InteractionsRequest {
    pub medications: Vec<String>,
}

#[derive(Deserialize)]
pub struct GuidelinesRequest {
    pub condition: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/{id}", get(get_session))
        .route("/{id}/symptoms", post(add_symptoms))
        .route("/{id}/diagnosis", post(set_diagnosis))
        .route("/{id}/prescription", post(generate_prescription))
        .route("/{id}/interactions", post(check_interactions))
        .route("/{id}/guidelines", post(clinical_guidelines))
        .route("/{id}/close", post(close_session))
}

/// Malformed ids can never name a session, so they are reported as missing.
fn parse_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).ok_or_else(|| ApiError::not_found(format!("session not found: {raw}")))
}

async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let Json(body) = body?;
    let provider = body
        .provider
        .unwrap_or_else(|| state.orchestrator.default_provider());
    let session_id = state
        .orchestrator
        .create_session(body.patient, provider)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.orchestrator.list_sessions().await)
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let id = parse_id(&id)?;
    state
        .orchestrator
        .get_session(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("session not found: {id}")))
}

async fn add_symptoms(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SymptomsRequest>, JsonRejection>,
) -> Result<Json<OperationOutcome>, ApiError> {
    let Json(body) = body?;
    let id = parse_id(&id)?;
    let outcome = state.orchestrator.add_symptoms(id, body.symptoms).await?;
    Ok(Json(outcome))
}

async fn set_diagnosis(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<DiagnosisRequest>, JsonRejection>,
) -> Result<Json<OperationOutcome>, ApiError> {
    let Json(body) = body?;
    let id = parse_id(&id)?;
    let outcome = state.orchestrator.set_diagnosis(id, body.diagnosis).await?;
    Ok(Json(outcome))
}

async fn generate_prescription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationOutcome>, ApiError> {
    let id = parse_id(&id)?;
    let outcome = state.orchestrator.generate_prescription(id).await?;
    Ok(Json(outcome))
}

async fn check_interactions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<InteractionsRequest>, JsonRejection>,
) -> Result<Json<OperationOutcome>, ApiError> {
    let Json(body) = body?;
    let id = parse_id(&id)?;
    let outcome = state
        .orchestrator
        .check_drug_interactions(id, body.medications)
        .await?;
    Ok(Json(outcome))
}

async fn clinical_guidelines(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<GuidelinesRequest>, JsonRejection>,
) -> Result<Json<OperationOutcome>, ApiError> {
    let Json(body) = body?;
    let id = parse_id(&id)?;
    let outcome = state
        .orchestrator
        .clinical_guidelines(id, body.condition)
        .await?;
    Ok(Json(outcome))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    let id = parse_id(&id)?;
    let summary = state.orchestrator.close_session(id).await?;
    Ok(Json(summary))
}
