use crate::server::GatewayState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<GatewayState>>) -> Json<serde_json::Value> {
    let queue = match state.store.queue_depth().await {
        Ok(depth) => serde_json::json!({
            "pending": depth.pending,
            "processing": depth.processing,
            "error": depth.error,
            "dead": depth.dead,
            "done": depth.done,
        }),
        Err(e) => {
            tracing::warn!(%e, "queue depth unavailable for health probe");
            serde_json::json!({"unavailable": true})
        }
    };

    Json(serde_json::json!({
        "status": "ok",
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "test_mode": state.cfg.billing.test_mode,
        "queue": queue,
    }))
}
