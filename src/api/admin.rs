use std::collections::BTreeMap;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::diversity::{BulkModeSnapshot, CleanupReport, LedgerStats};

#[derive(Debug, Deserialize)]
pub(crate) struct BulkModeUpdate {
    enabled: bool,
    #[serde(default)]
    estimated_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DiversityStatsResponse {
    ledger: LedgerStats,
    bulk_mode: BulkModeSnapshot,
    fallback_topics: BTreeMap<&'static str, usize>,
}

pub(crate) async fn bulk_mode(State(state): State<AppState>) -> Json<BulkModeSnapshot> {
    Json(state.bulk().snapshot())
}

pub(crate) async fn set_bulk_mode(
    State(state): State<AppState>,
    Json(update): Json<BulkModeUpdate>,
) -> Json<BulkModeSnapshot> {
    state.telemetry().record_bulk_override(update.enabled);
    let snapshot = state.bulk().set_manual(update.enabled, update.estimated_size);
    state
        .telemetry()
        .metrics()
        .bulk_mode_active
        .set(if snapshot.active { 1.0 } else { 0.0 });
    Json(snapshot)
}

pub(crate) async fn diversity_stats(State(state): State<AppState>) -> Json<DiversityStatsResponse> {
    let fallback_topics = state
        .selector()
        .catalog()
        .counts()
        .into_iter()
        .map(|(audience, count)| (audience.as_str(), count))
        .collect();
    Json(DiversityStatsResponse {
        ledger: state.ledger().stats(),
        bulk_mode: state.bulk().snapshot(),
        fallback_topics,
    })
}

pub(crate) async fn cleanup(State(state): State<AppState>) -> Json<CleanupReport> {
    Json(state.ledger().cleanup())
}

pub(crate) async fn clear(State(state): State<AppState>) -> impl IntoResponse {
    state.telemetry().record_ledger_clear();
    state.ledger().clear();
    StatusCode::NO_CONTENT
}
