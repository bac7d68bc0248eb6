pub mod carts;
pub mod checkout;
pub mod common;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::commerce::{
        CartService, CheckoutService, InMemorySessionStore, PaymentGateway, RedisSessionStore,
        SessionStore,
    },
    webhooks::{PaymentReconciler, WebhookVerifier},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<PaymentReconciler>,
}

impl AppServices {
    /// Wires every service from explicit collaborators.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Arc<EventSender>,
        sessions: Arc<dyn SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let pricing = config.pricing();

        let cart = Arc::new(CartService::new(
            db_pool.clone(),
            sessions.clone(),
            event_sender.clone(),
            pricing,
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            sessions,
            gateway,
            event_sender.clone(),
            pricing,
            config.currency.to_lowercase(),
            config.stripe_public_key.clone(),
        ));
        let verifier = config
            .stripe_webhook_secret
            .as_ref()
            .map(|secret| WebhookVerifier::new(secret.clone(), config.webhook_tolerance_secs));
        let reconciler = Arc::new(PaymentReconciler::new(db_pool, event_sender, verifier));

        Self {
            cart,
            checkout,
            reconciler,
        }
    }
}

/// Picks the session backend named in the configuration.
pub fn session_store_from_config(config: &AppConfig) -> Result<Arc<dyn SessionStore>, ServiceError> {
    if config.session_backend.eq_ignore_ascii_case("redis") {
        let url = config.redis_url.as_deref().ok_or_else(|| {
            ServiceError::InternalError("redis_url is required for the redis session backend".into())
        })?;
        info!("Using Redis session store");
        Ok(Arc::new(RedisSessionStore::new(
            url,
            Duration::from_secs(config.session_ttl_secs),
        )?))
    } else {
        info!("Using in-memory session store");
        Ok(Arc::new(InMemorySessionStore::new()))
    }
}
