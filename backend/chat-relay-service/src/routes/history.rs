use crate::error::AppError;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

/// Upper bound on a single history request
pub const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Recent messages, oldest first
///
/// Endpoint: GET /api/v1/messages?limit=N
#[get("/api/v1/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = query
        .limit
        .unwrap_or(state.config.history_limit)
        .clamp(1, MAX_HISTORY_LIMIT);
    let messages = state.relay.recent_history(limit).await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// Aggregate presence
///
/// Endpoint: GET /api/v1/presence
#[get("/api/v1/presence")]
pub async fn get_presence(state: web::Data<AppState>) -> HttpResponse {
    let status = state.relay.presence().state().await;
    HttpResponse::Ok().json(json!({ "status": status }))
}
