//! Alert check trigger.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use courier_engine::alerts::AlertReport;

use crate::middleware::auth::TriggerAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/alerts/check", get(check_alerts))
}

/// GET /api/alerts/check: evaluate alerts and notify the ones outside cooldown.
async fn check_alerts(State(state): State<AppState>, auth: TriggerAuth) -> Json<AlertReport> {
    tracing::info!(auth = ?auth, "Alert check triggered");
    Json(state.alerts.run().await)
}
