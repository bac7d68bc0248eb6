use crate::errors::ServiceError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `t=<unix seconds>,v1=<hex hmac>[,v1=...]`.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Verifies gateway webhook signatures against the shared secret.
///
/// The signed content is `"{t}.{raw body}"`; any `v1` entry may match, which
/// lets the gateway roll secrets.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

struct ParsedHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Option<ParsedHeader<'_>> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) if !value.is_empty() => signatures.push(value),
            _ => {}
        }
    }
    Some(ParsedHeader {
        timestamp: timestamp?,
        signatures,
    })
    .filter(|parsed| !parsed.signatures.is_empty())
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("HMAC key rejected: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn verify(&self, header: Option<&str>, payload: &[u8]) -> Result<(), ServiceError> {
        self.verify_at(header, payload, chrono::Utc::now().timestamp())
    }

    /// Same as [`Self::verify`] with an explicit clock.
    pub fn verify_at(
        &self,
        header: Option<&str>,
        payload: &[u8],
        now: i64,
    ) -> Result<(), ServiceError> {
        let parsed = header
            .and_then(parse_header)
            .ok_or(ServiceError::InvalidSignature)?;

        if now.abs_diff(parsed.timestamp) > self.tolerance_secs {
            debug!(
                timestamp = parsed.timestamp,
                now, "webhook timestamp outside tolerance"
            );
            return Err(ServiceError::InvalidSignature);
        }

        for candidate in parsed.signatures {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            // verify_slice compares in constant time.
            if mac_for(&self.secret, parsed.timestamp, payload)?
                .verify_slice(&expected)
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(ServiceError::InvalidSignature)
    }
}

/// Builds a header value the way the gateway signs deliveries.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, ServiceError> {
    let mac = mac_for(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}
