use crate::{errors::ServiceError, webhooks::SIGNATURE_HEADER, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;

// POST /api/v1/payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // The signature covers the exact bytes received, so the body stays raw here.
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .services
        .reconciler
        .handle_delivery(signature, &body)
        .await?;

    Ok((StatusCode::OK, Json(outcome)))
}
