//! Request correlation for logs and error bodies.
//!
//! A [`RequestId`] lives in a task-local for the duration of one request so
//! that `ErrorResponse` and `ApiResponse` can quote it without threading it
//! through every service call. [`configure_http_tracing`] opens one span per
//! request carrying the same id and the shopper session, if any.

use axum::http::Request;
use std::{cell::RefCell, fmt, future::Future};
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::{DefaultOnRequest, DefaultOnResponse, MakeSpan, TraceLayer},
    LatencyUnit,
};
use tracing::Level;
use uuid::Uuid;

use crate::middleware_helpers::{REQUEST_ID_HEADER, SESSION_ID_HEADER};

const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        RequestId(value.into())
    }

    /// Fresh id for requests that arrive without one.
    pub fn generate() -> Self {
        RequestId(format!("req_{}", Uuid::new_v4().simple()))
    }

    /// Accepts a caller-supplied id when it is short, printable ASCII.
    pub fn from_header(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let usable = !raw.is_empty()
            && raw.len() <= MAX_REQUEST_ID_LEN
            && raw.bytes().all(|b| b.is_ascii_graphic());
        usable.then(|| RequestId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

tokio::task_local! {
    static CURRENT_REQUEST_ID: RefCell<Option<RequestId>>;
}

/// Runs `future` with `request_id` visible to [`current_request_id`].
pub async fn scope_request_id<Fut, R>(request_id: RequestId, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    CURRENT_REQUEST_ID
        .scope(RefCell::new(Some(request_id)), future)
        .await
}

pub fn current_request_id() -> Option<RequestId> {
    CURRENT_REQUEST_ID
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .flatten()
}

/// Span per request: request id, route, and the shopper session when present.
#[derive(Clone, Default)]
pub struct StorefrontSpan;

impl<B> MakeSpan<B> for StorefrontSpan {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .map(|rid| rid.as_str().to_string())
            .unwrap_or_else(|| header(REQUEST_ID_HEADER));

        tracing::info_span!(
            "storefront.http",
            request_id = %request_id,
            session_id = %header(SESSION_ID_HEADER),
            method = %request.method(),
            path = %request.uri().path(),
        )
    }
}

/// tower-http trace layer; only 5xx responses are recorded as failures.
pub fn configure_http_tracing() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, StorefrontSpan>
{
    TraceLayer::new_for_http()
        .make_span_with(StorefrontSpan)
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_id_is_visible_inside_scope_only() {
        assert!(current_request_id().is_none());

        let seen = scope_request_id(RequestId::new("abc"), async {
            current_request_id().map(|rid| rid.as_str().to_string())
        })
        .await;

        assert_eq!(seen.as_deref(), Some("abc"));
        assert!(current_request_id().is_none());
    }

    #[test]
    fn caller_ids_must_be_short_and_printable() {
        assert_eq!(
            RequestId::from_header(" trace-42 ").map(|r| r.to_string()),
            Some("trace-42".to_string())
        );
        assert!(RequestId::from_header("").is_none());
        assert!(RequestId::from_header("has space").is_none());
        assert!(RequestId::from_header(&"x".repeat(129)).is_none());
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert!(a.as_str().starts_with("req_"));
        assert_eq!(a.as_str().len(), 36);
        assert_ne!(a, b);
    }
}
