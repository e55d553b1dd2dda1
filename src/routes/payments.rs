use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use crate::{
    dto::payments::{TransferInstructions, TransferRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "x-signature";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/transfer", post(request_transfer))
        .route("/webhook", post(webhook))
}

#[utoipa::path(
    post,
    path = "/api/payments/transfer",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Transfer instructions", body = ApiResponse<TransferInstructions>),
        (status = 404, description = "Order not found or not owned by the caller"),
        (status = 502, description = "Payment provider unreachable or rejected the request"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn request_transfer(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<TransferRequest>,
) -> AppResult<Json<ApiResponse<TransferInstructions>>> {
    let response = payment_service::request_transfer(&state, &user, payload).await?;
    Ok(Json(response))
}

// The webhook is authenticated by its signature alone, so the handler takes
// the raw bytes; any re-serialization would break verification.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Notification applied or replay absorbed"),
        (status = 400, description = "Invalid signature or payload"),
        (status = 404, description = "Unknown provider reference"),
    ),
    tag = "Payments"
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let raw_signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    payment_service::handle_webhook(&state, raw_signature, &body).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
