use crate::handlers::common::{message_response, success_response, validate_input};
use crate::{errors::ServiceError, middleware_helpers::SessionId, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Size codes are at most two characters once surrounding spaces are dropped.
fn validate_size_code(size: &str) -> Result<(), ValidationError> {
    if size.trim().chars().count() <= 2 {
        Ok(())
    } else {
        Err(ValidationError::new("size"))
    }
}

/// Creates the router for the session bag
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/items", post(add_item))
        .route("/cart/items/:product_id", put(set_item).delete(remove_item))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: u32,
    #[validate(custom = "validate_size_code")]
    pub size: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetItemRequest {
    pub quantity: i64,
    #[validate(custom = "validate_size_code")]
    pub size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemQuery {
    pub size: Option<String>,
}

/// Priced view of the session bag
async fn get_cart(
    State(state): State<AppState>,
    session: SessionId,
) -> Result<Response, ServiceError> {
    let priced = state.services.cart.get_priced_cart(&session).await?;
    Ok(success_response(priced))
}

async fn add_item(
    State(state): State<AppState>,
    session: SessionId,
    Json(payload): Json<AddItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let mutation = state
        .services
        .cart
        .add_item(
            &session,
            payload.product_id,
            payload.quantity,
            payload.size.as_deref(),
        )
        .await?;
    let message = mutation.message.clone();
    Ok(message_response(mutation, message))
}

/// Adjust a line to an exact quantity; zero removes it
async fn set_item(
    State(state): State<AppState>,
    session: SessionId,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<SetItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let mutation = state
        .services
        .cart
        .set_item(&session, product_id, payload.quantity, payload.size.as_deref())
        .await?;
    let message = mutation.message.clone();
    Ok(message_response(mutation, message))
}

async fn remove_item(
    State(state): State<AppState>,
    session: SessionId,
    Path(product_id): Path<Uuid>,
    Query(query): Query<RemoveItemQuery>,
) -> Result<Response, ServiceError> {
    let mutation = state
        .services
        .cart
        .remove_item(&session, product_id, query.size.as_deref())
        .await?;
    let message = mutation.message.clone();
    Ok(message_response(mutation, message))
}

async fn clear_cart(
    State(state): State<AppState>,
    session: SessionId,
) -> Result<Response, ServiceError> {
    state.services.cart.clear(&session).await?;
    Ok(message_response((), "Your bag is now empty.".to_string()))
}
