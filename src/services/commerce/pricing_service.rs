use crate::errors::ServiceError;
use crate::services::commerce::cart::Cart;
use crate::services::commerce::catalog::Catalog;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Delivery policy: a percentage surcharge below a free-delivery threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PricingConfig {
    pub free_delivery_threshold: Decimal,
    pub standard_delivery_percentage: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            free_delivery_threshold: Decimal::from(50),
            standard_delivery_percentage: Decimal::from(10),
        }
    }
}

impl PricingConfig {
    pub fn delivery_fee(&self, subtotal: Decimal) -> Decimal {
        if subtotal < self.free_delivery_threshold {
            subtotal * self.standard_delivery_percentage / Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    }

    /// How much more the customer must spend for free delivery, never negative.
    pub fn free_delivery_gap(&self, subtotal: Decimal) -> Decimal {
        (self.free_delivery_threshold - subtotal).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub size: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Priced snapshot of a cart. Derived on every read and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub product_count: u64,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub grand_total: Decimal,
    pub free_delivery_gap: Decimal,
    pub free_delivery_threshold: Decimal,
}

impl PricedCart {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Prices every line of `cart` against `catalog`.
///
/// A single missing product fails the whole computation with
/// `ProductUnavailable`; lines are never skipped.
#[instrument(skip_all, fields(lines = cart.lines().len()))]
pub async fn price_cart(
    cart: &Cart,
    catalog: &dyn Catalog,
    config: &PricingConfig,
) -> Result<PricedCart, ServiceError> {
    let mut lines = Vec::new();
    let mut subtotal = Decimal::ZERO;
    let mut product_count: u64 = 0;

    for line in cart.lines() {
        let product = match catalog.lookup(line.product_id).await? {
            Some(product) => product,
            None => {
                warn!(product_id = %line.product_id, "cart references a missing product");
                return Err(ServiceError::ProductUnavailable(line.product_id));
            }
        };

        let line_total = product.price * Decimal::from(line.quantity);
        subtotal += line_total;
        product_count += u64::from(line.quantity);
        lines.push(PricedLine {
            product_id: line.product_id,
            name: product.name,
            size: line.size,
            quantity: line.quantity,
            unit_price: product.price,
            line_total,
        });
    }

    let delivery_fee = config.delivery_fee(subtotal);
    Ok(PricedCart {
        lines,
        product_count,
        subtotal,
        delivery_fee,
        grand_total: subtotal + delivery_fee,
        free_delivery_gap: config.free_delivery_gap(subtotal),
        free_delivery_threshold: config.free_delivery_threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::commerce::catalog::StaticCatalog;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn p(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[tokio::test]
    async fn below_threshold_pays_percentage_delivery() {
        let catalog = StaticCatalog::new().with_product(p(1), "Tee", dec!(10.00));
        let mut cart = Cart::new();
        cart.add(p(1), 3, None).unwrap();

        let priced = price_cart(&cart, &catalog, &PricingConfig::default())
            .await
            .unwrap();

        assert_eq!(priced.subtotal, dec!(30.00));
        assert_eq!(priced.delivery_fee, dec!(3.00));
        assert_eq!(priced.grand_total, dec!(33.00));
        assert_eq!(priced.free_delivery_gap, dec!(20.00));
        assert_eq!(priced.product_count, 3);
        assert_eq!(priced.free_delivery_threshold, dec!(50));
    }

    #[tokio::test]
    async fn at_or_above_threshold_delivers_free() {
        let catalog = StaticCatalog::new().with_product(p(1), "Tee", dec!(10.00));
        let mut cart = Cart::new();
        cart.add(p(1), 6, None).unwrap();

        let priced = price_cart(&cart, &catalog, &PricingConfig::default())
            .await
            .unwrap();

        assert_eq!(priced.subtotal, dec!(60.00));
        assert_eq!(priced.delivery_fee, Decimal::ZERO);
        assert_eq!(priced.grand_total, dec!(60.00));
        assert_eq!(priced.free_delivery_gap, Decimal::ZERO);
    }

    #[tokio::test]
    async fn exactly_at_threshold_is_free() {
        let catalog = StaticCatalog::new().with_product(p(1), "Tee", dec!(25.00));
        let mut cart = Cart::new();
        cart.add(p(1), 2, None).unwrap();

        let priced = price_cart(&cart, &catalog, &PricingConfig::default())
            .await
            .unwrap();
        assert_eq!(priced.delivery_fee, Decimal::ZERO);
        assert_eq!(priced.free_delivery_gap, Decimal::ZERO);
    }

    #[tokio::test]
    async fn sized_lines_are_priced_individually() {
        let catalog = StaticCatalog::new()
            .with_sized_product(p(1), "Hoodie", dec!(12.50))
            .with_product(p(2), "Mug", dec!(4.25));
        let mut cart = Cart::new();
        cart.add(p(1), 1, Some("m")).unwrap();
        cart.add(p(1), 2, Some("l")).unwrap();
        cart.add(p(2), 1, None).unwrap();

        let priced = price_cart(&cart, &catalog, &PricingConfig::default())
            .await
            .unwrap();

        assert_eq!(priced.lines.len(), 3);
        assert_eq!(priced.subtotal, dec!(41.75));
        assert_eq!(priced.delivery_fee, dec!(4.175));
        assert_eq!(priced.grand_total, priced.subtotal + priced.delivery_fee);
        assert_eq!(priced.product_count, 4);
    }

    #[tokio::test]
    async fn missing_product_fails_whole_computation() {
        let catalog = StaticCatalog::new().with_product(p(1), "Tee", dec!(10));
        let mut cart = Cart::new();
        cart.add(p(1), 1, None).unwrap();
        cart.add(p(2), 1, None).unwrap();

        assert_matches!(
            price_cart(&cart, &catalog, &PricingConfig::default()).await,
            Err(ServiceError::ProductUnavailable(id)) if id == p(2)
        );
    }

    #[tokio::test]
    async fn empty_cart_prices_to_zero() {
        let priced = price_cart(&Cart::new(), &StaticCatalog::new(), &PricingConfig::default())
            .await
            .unwrap();
        assert!(priced.is_empty());
        assert_eq!(priced.grand_total, Decimal::ZERO);
        assert_eq!(priced.free_delivery_gap, dec!(50));
    }

    #[test]
    fn custom_policy_is_respected() {
        let config = PricingConfig {
            free_delivery_threshold: dec!(100),
            standard_delivery_percentage: dec!(5),
        };
        assert_eq!(config.delivery_fee(dec!(80)), dec!(4));
        assert_eq!(config.free_delivery_gap(dec!(80)), dec!(20));
        assert_eq!(config.delivery_fee(dec!(100)), Decimal::ZERO);
    }
}
