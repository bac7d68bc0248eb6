use crate::entities::{order, order_line_item};
use crate::errors::ServiceError;
use crate::services::commerce::cart::Cart;
use crate::services::commerce::catalog::{Catalog, DbCatalog};
use crate::services::commerce::payment_gateway::to_minor_units;
use crate::services::commerce::pricing_service::PricingConfig;
use crate::services::commerce::session_store::PendingPayment;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DatabaseTransaction, DbErr, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::{Validate, ValidationError};

/// Digits with optional spaces, dashes, parentheses and a leading `+`.
fn validate_phone_number(phone: &str) -> Result<(), ValidationError> {
    let phone = phone.trim();
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    let allowed = phone.char_indices().all(|(i, c)| {
        c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')') || (c == '+' && i == 0)
    });
    if allowed && digits >= 6 {
        Ok(())
    } else {
        Err(ValidationError::new("phone_number"))
    }
}

/// Contact and shipping details collected at checkout.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct CustomerInfo {
    #[validate(length(min = 1, max = 50))]
    pub full_name: String,
    #[validate(email, length(max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 20), custom = "validate_phone_number")]
    pub phone_number: String,
    #[validate(length(min = 1, max = 40))]
    pub country: String,
    #[validate(length(max = 20))]
    pub postcode: Option<String>,
    #[validate(length(min = 1, max = 40))]
    pub town_or_city: String,
    #[validate(length(min = 1, max = 80))]
    pub street_address1: String,
    #[validate(length(max = 80))]
    pub street_address2: Option<String>,
    #[validate(length(max = 80))]
    pub county: Option<String>,
}

fn trim_optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl CustomerInfo {
    /// Trims every field and drops blank optional ones.
    pub fn normalized(&self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone_number: self.phone_number.trim().to_string(),
            country: self.country.trim().to_string(),
            postcode: trim_optional(&self.postcode),
            town_or_city: self.town_or_city.trim().to_string(),
            street_address1: self.street_address1.trim().to_string(),
            street_address2: trim_optional(&self.street_address2),
            county: trim_optional(&self.county),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithLines {
    pub order: order::Model,
    pub line_items: Vec<order_line_item::Model>,
}

/// Turns a cart plus customer details into a persisted order, all or nothing.
pub struct OrderBuilder<'a> {
    db: &'a DatabaseConnection,
    pricing: PricingConfig,
}

impl<'a> OrderBuilder<'a> {
    pub fn new(db: &'a DatabaseConnection, pricing: PricingConfig) -> Self {
        Self { db, pricing }
    }

    /// Validates `customer`, then persists the order shell, one line item per
    /// cart line with prices frozen now, and the final totals in a single
    /// transaction. The order is only committed when its grand total matches
    /// the amount `payment` was issued for. Any failure leaves nothing behind.
    #[instrument(
        skip(self, cart, customer, payment),
        fields(lines = cart.lines().len(), payment_intent_id = %payment.payment_intent_id)
    )]
    pub async fn build(
        &self,
        cart: &Cart,
        customer: &CustomerInfo,
        payment: &PendingPayment,
    ) -> Result<OrderWithLines, ServiceError> {
        let customer = customer.normalized();
        customer.validate()?;
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let snapshot = serde_json::to_string(cart)?;

        let txn = self.db.begin().await?;
        match self
            .build_in_txn(&txn, cart, &customer, snapshot, payment)
            .await
        {
            Ok(built) => {
                txn.commit().await?;
                info!(
                    order_number = %built.order.order_number,
                    grand_total = %built.order.grand_total,
                    "order persisted"
                );
                Ok(built)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "order transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn build_in_txn(
        &self,
        txn: &DatabaseTransaction,
        cart: &Cart,
        customer: &CustomerInfo,
        snapshot: String,
        payment: &PendingPayment,
    ) -> Result<OrderWithLines, ServiceError> {
        let shell = order::ActiveModel {
            full_name: Set(customer.full_name.clone()),
            email: Set(customer.email.clone()),
            phone_number: Set(customer.phone_number.clone()),
            country: Set(customer.country.clone()),
            postcode: Set(customer.postcode.clone()),
            town_or_city: Set(customer.town_or_city.clone()),
            street_address1: Set(customer.street_address1.clone()),
            street_address2: Set(customer.street_address2.clone()),
            county: Set(customer.county.clone()),
            delivery_cost: Set(Decimal::ZERO),
            order_total: Set(Decimal::ZERO),
            grand_total: Set(Decimal::ZERO),
            original_cart: Set(snapshot),
            payment_intent_id: Set(payment.payment_intent_id.clone()),
            payment_status: Set(order::PaymentStatus::Created),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(|e| intent_already_used(e, &payment.payment_intent_id))?;

        let catalog = DbCatalog::new(txn);
        let mut line_items = Vec::new();
        let mut order_total = Decimal::ZERO;

        for line in cart.lines() {
            let product = match catalog.lookup(line.product_id).await? {
                Some(product) => product,
                None => {
                    warn!(
                        product_id = %line.product_id,
                        "product vanished before checkout; discarding order"
                    );
                    return Err(ServiceError::ProductUnavailable(line.product_id));
                }
            };

            let quantity = i32::try_from(line.quantity).map_err(|_| {
                ServiceError::InvalidInput(format!("quantity {} is too large", line.quantity))
            })?;
            let line_total = product.price * Decimal::from(line.quantity);
            order_total += line_total;

            let inserted = order_line_item::ActiveModel {
                order_id: Set(shell.id),
                product_id: Set(product.id),
                product_size: Set(line.size.clone()),
                quantity: Set(quantity),
                unit_price: Set(product.price),
                line_total: Set(line_total),
                ..Default::default()
            }
            .insert(txn)
            .await?;
            line_items.push(inserted);
        }

        let delivery_cost = self
            .pricing
            .delivery_fee(order_total)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        let grand_total = order_total + delivery_cost;
        let grand_total_minor = to_minor_units(grand_total)?;
        if grand_total_minor != payment.amount_minor {
            warn!(
                grand_total_minor,
                paid_minor = payment.amount_minor,
                "bag total differs from the payment in progress; discarding order"
            );
            return Err(ServiceError::PaymentMismatch(format!(
                "order total of {} minor units does not match payment intent {} for {}",
                grand_total_minor, payment.payment_intent_id, payment.amount_minor
            )));
        }

        let mut totals: order::ActiveModel = shell.into();
        totals.order_total = Set(order_total);
        totals.delivery_cost = Set(delivery_cost);
        totals.grand_total = Set(grand_total);
        let mut order = totals.update(txn).await?;

        // Totals come from the values written above, not the backend's read-back.
        order.order_total = order_total;
        order.delivery_cost = delivery_cost;
        order.grand_total = grand_total;

        Ok(OrderWithLines { order, line_items })
    }
}

/// One order per payment intent; the unique index has the final say.
fn intent_already_used(err: DbErr, payment_intent_id: &str) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::PaymentMismatch(format!(
            "payment intent {} is already attached to an order",
            payment_intent_id
        )),
        _ => err.into(),
    }
}
