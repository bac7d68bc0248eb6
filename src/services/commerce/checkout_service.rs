use crate::{
    entities::{order, order_line_item},
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::SessionId,
    services::commerce::{
        catalog::DbCatalog,
        order_builder::{CustomerInfo, OrderBuilder, OrderWithLines},
        payment_gateway::{intent_id_from_client_secret, to_minor_units, PaymentGateway},
        pricing_service::{price_cart, PricingConfig},
        session_store::{PendingPayment, SessionStore},
    },
};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What the browser needs to confirm a card payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntentResponse {
    pub payment_intent_id: String,
    pub client_secret: String,
    /// Grand total the intent was created for.
    pub amount: Decimal,
    pub amount_minor: i64,
    pub currency: String,
    pub publishable_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub order: OrderWithLines,
    pub message: String,
}

/// Checkout flow: payment intent creation, order placement and receipts.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<dyn SessionStore>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    pricing: PricingConfig,
    currency: String,
    publishable_key: Option<String>,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<dyn SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        pricing: PricingConfig,
        currency: String,
        publishable_key: Option<String>,
    ) -> Self {
        Self {
            db,
            sessions,
            gateway,
            event_sender,
            pricing,
            currency,
            publishable_key,
        }
    }

    /// Prices the session cart and asks the gateway for a matching intent.
    ///
    /// The intent and its amount are remembered for the session; checkout
    /// only accepts that intent, for a bag that still prices the same.
    #[instrument(skip(self, session), fields(session_id = %session.as_str()))]
    pub async fn create_payment_intent(
        &self,
        session: &SessionId,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        let cart = self.sessions.get_cart(session).await?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let catalog = DbCatalog::new(&*self.db);
        let priced = price_cart(&cart, &catalog, &self.pricing).await?;
        let amount_minor = to_minor_units(priced.grand_total)?;

        let intent = self
            .gateway
            .create_intent(amount_minor, &self.currency)
            .await?;

        self.sessions
            .put_pending_payment(
                session,
                &PendingPayment {
                    payment_intent_id: intent.id.clone(),
                    amount_minor,
                    currency: self.currency.clone(),
                },
            )
            .await?;

        info!(
            payment_intent_id = %intent.id,
            amount_minor,
            "payment intent ready for checkout"
        );
        Ok(PaymentIntentResponse {
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount: priced.grand_total,
            amount_minor,
            currency: self.currency.clone(),
            publishable_key: self.publishable_key.clone(),
        })
    }

    /// Builds the order for the session cart and empties the bag.
    ///
    /// `client_secret` is the secret returned by [`Self::create_payment_intent`]
    /// for this session; the intent id it embeds links the order to later
    /// webhook events. Secrets of other sessions or of already placed orders
    /// are refused.
    #[instrument(skip(self, session, customer, client_secret), fields(session_id = %session.as_str()))]
    pub async fn place_order(
        &self,
        session: &SessionId,
        customer: &CustomerInfo,
        client_secret: &str,
    ) -> Result<PlacedOrder, ServiceError> {
        let cart = self.sessions.get_cart(session).await?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let payment_intent_id = intent_id_from_client_secret(client_secret.trim())
            .ok_or_else(|| ServiceError::InvalidInput("client_secret is malformed".into()))?;
        let payment = self
            .sessions
            .get_pending_payment(session)
            .await?
            .filter(|pending| pending.payment_intent_id == payment_intent_id)
            .ok_or_else(|| {
                warn!(%payment_intent_id, "checkout names an intent not issued to this bag");
                ServiceError::PaymentMismatch(format!(
                    "payment intent {} was not issued for this bag",
                    payment_intent_id
                ))
            })?;

        let built = match OrderBuilder::new(&self.db, self.pricing)
            .build(&cart, customer, &payment)
            .await
        {
            Ok(built) => {
                counter!("storefront_orders_total", 1, "outcome" => "created");
                built
            }
            Err(e) => {
                counter!("storefront_orders_total", 1, "outcome" => "failed");
                return Err(e);
            }
        };

        // The order is committed; a stale bag is recoverable, a lost order is not.
        if let Err(e) = self.sessions.clear_pending_payment(session).await {
            warn!(error = %e, "failed to forget payment intent after checkout");
        }
        match self.sessions.clear_cart(session).await {
            Ok(()) => {
                self.event_sender
                    .send_or_log(Event::CartCleared {
                        session_id: session.as_str().to_string(),
                    })
                    .await;
            }
            Err(e) => warn!(error = %e, "failed to clear bag after checkout"),
        }

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_number: built.order.order_number.clone(),
                grand_total: built.order.grand_total,
            })
            .await;

        let message = format!(
            "Order successfully processed! Your order number is {}. \
             A confirmation email will be sent to {}.",
            built.order.order_number, built.order.email
        );
        Ok(PlacedOrder {
            order: built,
            message,
        })
    }

    /// Receipt lookup by public order number.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_number: &str) -> Result<OrderWithLines, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;

        let line_items = order
            .find_related(order_line_item::Entity)
            .order_by_asc(order_line_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(OrderWithLines { order, line_items })
    }
}
