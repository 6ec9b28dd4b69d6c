//! HTTP handlers.
//!
//! Thin glue between the axum router and the services; validation and
//! aggregation live in `ingest`, `stats` and `query`.

use crate::{
    error::ApiError,
    ingest,
    models::{Registration, StatsResult},
    query, stats, AppState,
};
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Trimmed, non-empty query parameter or `None`.
fn normalize(param: Option<String>) -> Option<String> {
    param
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
}

/// Issue an opaque session id for a new banner visitor. Nothing is persisted
/// until the client sends events carrying the id.
pub async fn start_session() -> Json<SessionResponse> {
    Json(SessionResponse {
        session_id: Uuid::new_v4().simple().to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub ingested: usize,
}

pub async fn post_events(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<IngestResponse>, ApiError> {
    let ingested = ingest::ingest_events(&state.store, &body)?;
    Ok(Json(IngestResponse {
        ok: true,
        ingested,
    }))
}

pub async fn post_registration(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    ingest::register_entry(&state.store, &body)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct RegistrationsQuery {
    pub q: Option<String>,
    pub campaign_id: Option<String>,
    pub game_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationsResponse {
    pub rows: Vec<Registration>,
}

pub async fn get_registrations(
    State(state): State<AppState>,
    Query(params): Query<RegistrationsQuery>,
) -> Result<Json<RegistrationsResponse>, ApiError> {
    let q = normalize(params.q);
    let campaign = normalize(params.campaign_id);
    let game = normalize(params.game_id);

    let rows = query::query_registrations(
        &state.store,
        q.as_deref(),
        campaign.as_deref(),
        game.as_deref(),
    )?;

    Ok(Json(RegistrationsResponse { rows }))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<String>,
    pub campaign_id: Option<String>,
    pub game_id: Option<String>,
}

pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<Json<StatsResult>, ApiError> {
    let days = normalize(params.days)
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(stats::DEFAULT_WINDOW_DAYS);
    let campaign = normalize(params.campaign_id);
    let game = normalize(params.game_id);

    let result = stats::compute_stats(
        &state.store,
        days,
        campaign.as_deref(),
        game.as_deref(),
        Utc::now(),
    )?;

    Ok(Json(result))
}

#[derive(Debug, Serialize)]
pub struct MetaResponse {
    pub campaigns: Vec<String>,
    pub games: Vec<String>,
}

pub async fn get_meta(State(state): State<AppState>) -> Result<Json<MetaResponse>, ApiError> {
    Ok(Json(MetaResponse {
        campaigns: state.store.distinct_campaigns()?,
        games: state.store.distinct_games()?,
    }))
}
