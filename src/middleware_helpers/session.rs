use crate::errors::ServiceError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Header carrying the browsing-session identifier that owns the cart.
pub const SESSION_ID_HEADER: &str = "x-session-id";

const MAX_SESSION_ID_LEN: usize = 128;

/// Session identifier extracted from the `x-session-id` header.
///
/// Session establishment (cookies, login) belongs to the outer web layer; the
/// core only needs a stable opaque key per browsing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_SESSION_ID_LEN {
            return Err(ServiceError::InvalidInput(format!(
                "{} must be between 1 and {} characters",
                SESSION_ID_HEADER, MAX_SESSION_ID_LEN
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ServiceError::InvalidInput(format!(
                "{} may only contain letters, digits, '-' and '_'",
                SESSION_ID_HEADER
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!("missing {} header", SESSION_ID_HEADER))
            })?;
        SessionId::parse(raw)
    }
}
