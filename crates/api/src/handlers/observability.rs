use actix_web::{web::Data, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub async fn metrics_handler(state: Data<AppState>) -> HttpResponse {
    let body = state.telemetry().render_metrics();
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body)
}

pub async fn health_handler() -> HttpResponse {
    super::ok(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
