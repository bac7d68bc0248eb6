use crate::errors::ServiceError;
use crate::middleware_helpers::SessionId;
use crate::services::commerce::cart::Cart;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// The payment intent issued for a session's bag, and the amount it was priced at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub payment_intent_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Where a session's cart lives between requests.
///
/// Each cart mutation is one `get_cart` followed by one `put_cart`; the store
/// keeps whichever write lands last.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session's cart, normalized. Unknown sessions get an empty cart.
    async fn get_cart(&self, session: &SessionId) -> Result<Cart, ServiceError>;

    /// Replaces the session's cart. Storing an empty cart clears it.
    async fn put_cart(&self, session: &SessionId, cart: &Cart) -> Result<(), ServiceError>;

    async fn clear_cart(&self, session: &SessionId) -> Result<(), ServiceError>;

    /// The intent most recently issued to this session, if any.
    async fn get_pending_payment(
        &self,
        session: &SessionId,
    ) -> Result<Option<PendingPayment>, ServiceError>;

    /// Records a new intent, replacing any earlier one.
    async fn put_pending_payment(
        &self,
        session: &SessionId,
        payment: &PendingPayment,
    ) -> Result<(), ServiceError>;

    async fn clear_pending_payment(&self, session: &SessionId) -> Result<(), ServiceError>;
}

/// Process-local session store.
#[derive(Debug, Default, Clone)]
pub struct InMemorySessionStore {
    carts: Arc<DashMap<String, Value>>,
    payments: Arc<DashMap<String, PendingPayment>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a raw session value, bypassing cart validation.
    pub fn put_raw(&self, session: &SessionId, value: Value) {
        self.carts.insert(session.as_str().to_string(), value);
    }

    /// Number of sessions currently holding a non-empty bag.
    pub fn len(&self) -> usize {
        self.carts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carts.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_cart(&self, session: &SessionId) -> Result<Cart, ServiceError> {
        Ok(self
            .carts
            .get(session.as_str())
            .map(|value| Cart::from_session_value(value.value()))
            .unwrap_or_default())
    }

    async fn put_cart(&self, session: &SessionId, cart: &Cart) -> Result<(), ServiceError> {
        if cart.is_empty() {
            self.carts.remove(session.as_str());
        } else {
            self.carts
                .insert(session.as_str().to_string(), serde_json::to_value(cart)?);
        }
        Ok(())
    }

    async fn clear_cart(&self, session: &SessionId) -> Result<(), ServiceError> {
        self.carts.remove(session.as_str());
        Ok(())
    }

    async fn get_pending_payment(
        &self,
        session: &SessionId,
    ) -> Result<Option<PendingPayment>, ServiceError> {
        Ok(self
            .payments
            .get(session.as_str())
            .map(|entry| entry.value().clone()))
    }

    async fn put_pending_payment(
        &self,
        session: &SessionId,
        payment: &PendingPayment,
    ) -> Result<(), ServiceError> {
        self.payments
            .insert(session.as_str().to_string(), payment.clone());
        Ok(())
    }

    async fn clear_pending_payment(&self, session: &SessionId) -> Result<(), ServiceError> {
        self.payments.remove(session.as_str());
        Ok(())
    }
}

const REDIS_KEY_PREFIX: &str = "storefront:cart:";
const REDIS_PAYMENT_PREFIX: &str = "storefront:payment:";

/// Redis-backed session store; one JSON value per session with an idle TTL.
#[derive(Clone)]
pub struct RedisSessionStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisSessionStore {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, ServiceError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, ttl })
    }

    fn key(session: &SessionId) -> String {
        format!("{}{}", REDIS_KEY_PREFIX, session.as_str())
    }

    fn payment_key(session: &SessionId) -> String {
        format!("{}{}", REDIS_PAYMENT_PREFIX, session.as_str())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip(self, session), fields(session_id = %session.as_str()))]
    async fn get_cart(&self, session: &SessionId) -> Result<Cart, ServiceError> {
        let mut conn = self.client.get_async_connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(session))
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(Cart::new());
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Ok(Cart::from_session_value(&value)),
            Err(e) => {
                warn!(error = %e, "session cart is not valid JSON; starting a new bag");
                Ok(Cart::new())
            }
        }
    }

    #[instrument(skip(self, session, cart), fields(session_id = %session.as_str()))]
    async fn put_cart(&self, session: &SessionId, cart: &Cart) -> Result<(), ServiceError> {
        if cart.is_empty() {
            return self.clear_cart(session).await;
        }
        let payload = serde_json::to_string(cart)?;
        let mut conn = self.client.get_async_connection().await?;
        let _: () = redis::cmd("SETEX")
            .arg(Self::key(session))
            .arg(self.ttl.as_secs().max(1))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        debug!("session cart stored");
        Ok(())
    }

    async fn clear_cart(&self, session: &SessionId) -> Result<(), ServiceError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = redis::cmd("DEL")
            .arg(Self::key(session))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(session_id = %session.as_str()))]
    async fn get_pending_payment(
        &self,
        session: &SessionId,
    ) -> Result<Option<PendingPayment>, ServiceError> {
        let mut conn = self.client.get_async_connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::payment_key(session))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_pending_payment(
        &self,
        session: &SessionId,
        payment: &PendingPayment,
    ) -> Result<(), ServiceError> {
        let payload = serde_json::to_string(payment)?;
        let mut conn = self.client.get_async_connection().await?;
        let _: () = redis::cmd("SETEX")
            .arg(Self::payment_key(session))
            .arg(self.ttl.as_secs().max(1))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear_pending_payment(&self, session: &SessionId) -> Result<(), ServiceError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = redis::cmd("DEL")
            .arg(Self::payment_key(session))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
