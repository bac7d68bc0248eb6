use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Offending fields for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Customer input failed validation; carries the offending field names.
    #[error("Validation failed: {}", .fields.join(", "))]
    ValidationFailed { fields: Vec<String> },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The cart references a product that is no longer in the catalog.
    #[error("Product {0} is no longer available")]
    ProductUnavailable(Uuid),

    #[error("There's nothing in your bag at the moment.")]
    EmptyCart,

    /// Sized and unsized usage were mixed for one product.
    #[error("Cart conflict for product {product_id}: {reason}")]
    CartShapeConflict { product_id: Uuid, reason: String },

    /// The checkout does not match the payment started for this bag.
    #[error("Payment mismatch: {0}")]
    PaymentMismatch(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// A verified gateway event names an intent with no local order.
    #[error("No order matches payment intent {0}")]
    ReconciliationOrphan(String),

    #[error("Session store error: {0}")]
    SessionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = err
            .field_errors()
            .keys()
            .map(|field| field.to_string())
            .collect();
        fields.sort();
        ServiceError::ValidationFailed { fields }
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::SessionError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationFailed { .. }
            | Self::InvalidInput(_)
            | Self::EmptyCart
            | Self::InvalidSignature
            | Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::ProductUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CartShapeConflict { .. } | Self::PaymentMismatch(_) => StatusCode::CONFLICT,
            Self::GatewayUnavailable(_) | Self::GatewayRejected(_) => StatusCode::BAD_GATEWAY,
            // Acknowledged so the gateway stops retrying; only the merchant can fix it.
            Self::ReconciliationOrphan(_) => StatusCode::OK,
            Self::DatabaseError(_)
            | Self::SessionError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal and gateway errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SessionError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::GatewayUnavailable(_) | Self::GatewayRejected(_) => {
                "We couldn't start your payment. Please try again in a moment.".to_string()
            }
            Self::PaymentMismatch(_) => {
                "Your bag no longer matches the payment in progress. \
                 Please review your bag and pay again."
                    .to_string()
            }
            Self::ProductUnavailable(_) => {
                "One of the products in your bag wasn't in our database. \
                 Please call us for assistance!"
                    .to_string()
            }
            Self::ValidationFailed { .. } => {
                "There was an error with your form. Please double check your information."
                    .to_string()
            }
            Self::InvalidSignature | Self::InvalidPayload(_) => "Invalid webhook".to_string(),
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<Vec<String>> {
        match self {
            Self::ValidationFailed { fields } => Some(fields.clone()),
            Self::ProductUnavailable(product_id) => Some(vec![product_id.to_string()]),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use validator::Validate;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::ValidationFailed { fields: vec![] }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ProductUnavailable(Uuid::nil()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::GatewayUnavailable("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::GatewayRejected("bad amount".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::InvalidSignature.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ReconciliationOrphan("pi_1".into()).status_code(),
            StatusCode::OK
        );
        assert_eq!(
            ServiceError::CartShapeConflict {
                product_id: Uuid::nil(),
                reason: "x".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PaymentMismatch("pi_1 already used".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::SessionError("redis refused".into()).response_message(),
            "Internal server error"
        );
        let gateway = ServiceError::GatewayRejected("api key sk_live_123 invalid".into());
        assert!(!gateway.response_message().contains("sk_live"));

        assert_eq!(
            ServiceError::NotFound("Order ABC not found".into()).response_message(),
            "Not found: Order ABC not found"
        );
    }

    #[derive(Validate)]
    struct Form {
        #[validate(email)]
        email: String,
        #[validate(length(min = 1))]
        full_name: String,
        #[validate(length(min = 1))]
        country: String,
    }

    #[test]
    fn validation_errors_name_offending_fields() {
        let form = Form {
            email: "not-an-email".into(),
            full_name: String::new(),
            country: "IE".into(),
        };
        let err: ServiceError = form.validate().unwrap_err().into();
        match err {
            ServiceError::ValidationFailed { fields } => {
                assert_eq!(fields, vec!["email".to_string(), "full_name".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
