use crate::handlers::common::{created_response, success_response};
use crate::{
    errors::ServiceError, middleware_helpers::SessionId, services::commerce::CustomerInfo,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/payment-intent", post(create_payment_intent))
        .route("/checkout", post(place_order))
        .route("/checkout/success/:order_number", get(checkout_success))
}

/// Checkout form: customer details plus the client secret of the intent the
/// browser confirmed.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(flatten)]
    pub customer: CustomerInfo,
    #[serde(default)]
    pub client_secret: String,
}

async fn create_payment_intent(
    State(state): State<AppState>,
    session: SessionId,
) -> Result<Response, ServiceError> {
    let intent = state
        .services
        .checkout
        .create_payment_intent(&session)
        .await?;
    Ok(success_response(intent))
}

async fn place_order(
    State(state): State<AppState>,
    session: SessionId,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Response, ServiceError> {
    let placed = state
        .services
        .checkout
        .place_order(&session, &payload.customer, &payload.client_secret)
        .await?;
    let message = placed.message.clone();
    Ok(created_response(placed, message))
}

/// Receipt for a placed order
async fn checkout_success(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Response, ServiceError> {
    let order = state.services.checkout.get_order(&order_number).await?;
    Ok(success_response(order))
}
