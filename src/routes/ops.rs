use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::middleware::ops_auth::OpsAuth;
use crate::services::dispatch::DispatchService;
use crate::services::schedule_store::ScheduleStore;
use crate::AppState;

/// GET /ops/stuck — QUEUED rows due longer than the configured threshold.
/// End users never see scheduling failures; this is where operators do.
pub async fn stuck_schedules(
    State(state): State<AppState>,
    _auth: OpsAuth,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let rows = ScheduleStore::stuck(
        &state.db,
        Utc::now(),
        Duration::minutes(state.config.stuck_threshold_mins),
    )
    .await
    .map_err(internal)?;

    Ok(Json(json!({
        "threshold_mins": state.config.stuck_threshold_mins,
        "count": rows.len(),
        "schedules": rows,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerDispatchRequest {
    /// Restrict the run to a single user ("trigger now" from a user page).
    pub user_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// POST /ops/dispatch — run one dispatch batch immediately.
pub async fn trigger_dispatch(
    State(state): State<AppState>,
    _auth: OpsAuth,
    body: Option<Json<TriggerDispatchRequest>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let limit = req.limit.unwrap_or(state.config.dispatch_batch_limit);

    let outcome = DispatchService::run(
        &state.db,
        state.email.as_deref(),
        limit,
        req.user_id,
    )
    .await
    .map_err(internal)?;

    Ok(Json(json!({
        "selected": outcome.selected,
        "sent": outcome.sent,
        "suppressed": outcome.suppressed,
        "failed": outcome.failed,
    })))
}

fn internal(e: anyhow::Error) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}
