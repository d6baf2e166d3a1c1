//! Observability endpoint over the live-call registry, useful in
//! development for watching sessions come and go without attaching to the
//! stream itself.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /api/v1/calls: summaries of all live call sessions.
pub async fn list_calls(state: web::Data<AppState>) -> HttpResponse {
    let summaries = state.registry.summaries();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_calls": summaries.len(),
        "max_concurrent_calls": state.get_config().performance.max_concurrent_calls,
        "calls": summaries
    }))
}
