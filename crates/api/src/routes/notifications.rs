//! Notification runner trigger and producer routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use courier_common::error::AppError;
use courier_common::types::{NewJob, NotificationJob};
use courier_notifier::runner::RunReport;

use crate::middleware::auth::TriggerAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notifications/process",
            post(process_queue).get(runner_status),
        )
        .route("/api/notifications", post(enqueue))
        .route(
            "/api/notifications/reference/{reference_id}",
            get(history).delete(cancel_pending),
        )
}

/// POST /api/notifications/process: run one pass of the notification queue.
async fn process_queue(
    State(state): State<AppState>,
    auth: TriggerAuth,
) -> Result<Json<RunReport>, AppError> {
    tracing::info!(auth = ?auth, "Notification run triggered");
    let report = state.notifications.run().await?;
    Ok(Json(report))
}

/// GET /api/notifications/process: liveness of the trigger endpoint.
async fn runner_status() -> Json<serde_json::Value> {
    Json(json!({
        "service": "notification-runner",
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}

/// POST /api/notifications: queue a notification for delivery.
async fn enqueue(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    Json(new): Json<NewJob>,
) -> Result<(StatusCode, Json<NotificationJob>), AppError> {
    let job = state.producer.enqueue(new).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/notifications/reference/{reference_id}: jobs for a reference, newest first.
async fn history(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    Path(reference_id): Path<String>,
) -> Result<Json<Vec<NotificationJob>>, AppError> {
    Ok(Json(state.producer.history(&reference_id).await?))
}

/// DELETE /api/notifications/reference/{reference_id}: cancel pending jobs.
async fn cancel_pending(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    Path(reference_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cancelled = state.producer.cancel_pending(&reference_id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}
