use crate::tracing::{scope_request_id, RequestId};
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Adopts the caller's `x-request-id` (or mints one), exposes it to handlers
/// as an extension and to error bodies through the task-local, and echoes it
/// on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(RequestId::from_header)
        .unwrap_or_else(RequestId::generate);

    // from_header and generate only yield printable ASCII.
    let header_value = HeaderValue::from_str(request_id.as_str()).ok();
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);
    if let Some(value) = &header_value {
        request.headers_mut().insert(header_name.clone(), value.clone());
    }
    request.extensions_mut().insert(request_id.clone());

    let mut response = scope_request_id(request_id, next.run(request)).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(header_name, value);
    }
    response
}
