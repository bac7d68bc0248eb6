use crate::config::AppConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use metrics::counter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// A gateway-side payment intent. One per checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// Contract with the external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests an intent for `amount_minor` units of `currency`.
    ///
    /// Fails with `GatewayUnavailable` on transport errors or 5xx replies and
    /// `GatewayRejected` on 4xx or unusable replies. Never retries.
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentIntent, ServiceError>;
}

/// Converts a decimal amount to minor units (cents), rounding half-up once.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.is_sign_negative() {
        return Err(ServiceError::InvalidInput(
            "payment amount must not be negative".into(),
        ));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|cents| cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| ServiceError::InvalidInput("payment amount is out of range".into()))
}

/// Client secrets have the form `<intent id>_secret_<random>`.
pub fn intent_id_from_client_secret(client_secret: &str) -> Option<&str> {
    client_secret
        .split_once("_secret")
        .map(|(id, _)| id)
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Stripe PaymentIntents over the REST API.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
}

impl StripeGateway {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        if config.stripe_secret_key.is_none() {
            warn!("stripe_secret_key is not set; payment intents cannot be created");
        }
        Self::new(
            config.stripe_api_base.clone(),
            config.stripe_secret_key.clone(),
            Duration::from_secs(config.stripe_timeout_secs),
        )
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self))]
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let secret_key = self.secret_key.as_deref().ok_or_else(|| {
            ServiceError::GatewayUnavailable("payment gateway is not configured".into())
        })?;

        let amount = amount_minor.to_string();
        let params = [("amount", amount.as_str()), ("currency", currency)];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "payment gateway unreachable");
                counter!("storefront_gateway_requests_total", 1, "outcome" => "unavailable");
                ServiceError::GatewayUnavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "payment gateway error");
            counter!("storefront_gateway_requests_total", 1, "outcome" => "unavailable");
            return Err(ServiceError::GatewayUnavailable(format!(
                "gateway returned {}",
                status
            )));
        }
        if !status.is_success() {
            let detail = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .map(|b| {
                    format!(
                        "{}: {}",
                        b.error.kind.unwrap_or_else(|| "error".into()),
                        b.error.message.unwrap_or_default()
                    )
                })
                .unwrap_or_else(|| status.to_string());
            warn!(status = status.as_u16(), %detail, "payment gateway rejected intent");
            counter!("storefront_gateway_requests_total", 1, "outcome" => "rejected");
            return Err(ServiceError::GatewayRejected(detail));
        }

        let intent = response.json::<PaymentIntent>().await.map_err(|e| {
            counter!("storefront_gateway_requests_total", 1, "outcome" => "rejected");
            ServiceError::GatewayRejected(format!("unusable gateway response: {}", e))
        })?;
        if intent.id.is_empty() || intent.client_secret.is_empty() {
            counter!("storefront_gateway_requests_total", 1, "outcome" => "rejected");
            return Err(ServiceError::GatewayRejected(
                "gateway response is missing the intent id or client secret".into(),
            ));
        }

        counter!("storefront_gateway_requests_total", 1, "outcome" => "created");
        info!(payment_intent_id = %intent.id, "payment intent created");
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_round_half_up_once() {
        assert_eq!(to_minor_units(dec!(33.00)).unwrap(), 3300);
        assert_eq!(to_minor_units(dec!(13.585)).unwrap(), 1359);
        assert_eq!(to_minor_units(dec!(13.584)).unwrap(), 1358);
        assert_eq!(to_minor_units(dec!(0.005)).unwrap(), 1);
        assert_eq!(to_minor_units(Decimal::ZERO).unwrap(), 0);
        assert!(to_minor_units(dec!(-1)).is_err());
    }

    #[test]
    fn intent_id_is_prefix_of_client_secret() {
        assert_eq!(
            intent_id_from_client_secret("pi_3Abc_secret_XyZ"),
            Some("pi_3Abc")
        );
        assert_eq!(intent_id_from_client_secret("no-marker"), None);
        assert_eq!(intent_id_from_client_secret("_secret_x"), None);
    }

    #[tokio::test]
    async fn unconfigured_gateway_is_unavailable() {
        let gateway =
            StripeGateway::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap();
        let err = gateway.create_intent(100, "usd").await.unwrap_err();
        assert!(matches!(err, ServiceError::GatewayUnavailable(_)));
    }
}
