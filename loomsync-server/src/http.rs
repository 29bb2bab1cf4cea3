//! Control HTTP surface of the session host (spec.md §6).

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use loomsync_core::ir::IrDocument;

use crate::error::{Result, ServerError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/session/new", post(create_session))
        .route("/session/:id", get(get_session).delete(terminate_session))
        .route("/session/:id/health", get(session_health))
        .route("/session/:id/extend", post(extend_session))
        .route("/send/:id", post(send_update))
        .route("/stats", get(stats))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    total_devices: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.registry.stats();
    Json(HealthResponse { status: "ok", sessions: stats.session_count, total_devices: stats.total_devices })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewSessionResponse {
    session_id: String,
    ws_url: String,
    expires_at: DateTime<Utc>,
}

async fn create_session(State(state): State<AppState>) -> Json<NewSessionResponse> {
    let session = state.registry.create_session();
    let expires_at = session.expires_at().await;
    Json(NewSessionResponse {
        session_id: session.id.clone(),
        ws_url: format!("/ws?session={}", session.id),
        expires_at,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceSummary {
    connection_id: String,
    device_id: String,
    platform: String,
    device_name: Option<String>,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    session_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    devices: Vec<DeviceSummary>,
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SessionSummary>> {
    let session = state.registry.get_session(&id).ok_or_else(|| ServerError::SessionNotFound(id.clone()))?;
    let devices = session
        .devices
        .iter()
        .map(|d| DeviceSummary {
            connection_id: d.connection_id.clone(),
            device_id: d.device_id.clone(),
            platform: d.platform.clone(),
            device_name: d.device_name.clone(),
            connected_at: d.connected_at,
        })
        .collect();
    Ok(Json(SessionSummary {
        session_id: session.id.clone(),
        created_at: session.created_at,
        expires_at: session.expires_at().await,
        devices,
    }))
}

async fn session_health(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<crate::session::SessionHealth>> {
    state.registry.session_health(&id).await.map(Json).ok_or_else(|| ServerError::SessionNotFound(id))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtendResponse {
    expires_at: DateTime<Utc>,
}

async fn extend_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ExtendResponse>> {
    let expires_at = state.registry.extend_session(&id).await?;
    Ok(Json(ExtendResponse { expires_at }))
}

async fn terminate_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<()> {
    if state.registry.delete_session(&id) {
        Ok(())
    } else {
        Err(ServerError::SessionNotFound(id))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    success: bool,
    clients_updated: usize,
    update_type: &'static str,
}

async fn send_update(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<IrDocument>) -> Result<Json<SendResponse>> {
    let session = state.registry.get_session(&id).ok_or_else(|| ServerError::SessionNotFound(id.clone()))?;
    let prior = session.current_ir.read().await.clone();
    let update_type = match &prior {
        None => "full",
        Some(prior_doc) => {
            let delta = crate::delta::SchemaDelta::compute(prior_doc, &body);
            match crate::delta::DeltaPolicy::default().decide(prior_doc, &body, &delta) {
                crate::delta::UpdateShape::Incremental => "incremental",
                crate::delta::UpdateShape::Full => "full",
            }
        }
    };
    let clients_updated = session.devices.len();
    state.dispatcher.push_update(&id, body);
    Ok(Json(SendResponse { success: true, clients_updated, update_type }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    session_count: usize,
    total_devices: usize,
    devices_per_session: Vec<(String, usize)>,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.registry.stats();
    Json(StatsResponse {
        session_count: stats.session_count,
        total_devices: stats.total_devices,
        devices_per_session: stats.devices_per_session,
    })
}
