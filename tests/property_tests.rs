//! Property-based tests for bag arithmetic and delivery pricing.
//!
//! These tests use proptest to verify invariants across a wide range of inputs,
//! helping to catch edge cases that unit tests might miss.

use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_api::services::commerce::{
    payment_gateway::to_minor_units, Cart, PricingConfig,
};
use uuid::Uuid;

// Strategies for generating test data
fn quantity_strategy() -> impl Strategy<Value = u32> {
    1u32..10_000
}

fn size_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("S".to_string())),
        Just(Some("M".to_string())),
        Just(Some("XL".to_string())),
    ]
}

/// Amounts with at most two decimal places, up to 100k.
fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn adding_in_two_steps_equals_adding_once(
        first in quantity_strategy(),
        second in quantity_strategy(),
        size in size_strategy(),
    ) {
        let product = Uuid::new_v4();

        let mut split = Cart::new();
        split.add(product, first, size.as_deref()).unwrap();
        split.add(product, second, size.as_deref()).unwrap();

        let mut once = Cart::new();
        once.add(product, first + second, size.as_deref()).unwrap();

        prop_assert_eq!(split, once);
    }

    #[test]
    fn product_count_is_the_sum_of_line_quantities(
        quantities in proptest::collection::vec(quantity_strategy(), 1..8),
    ) {
        let mut cart = Cart::new();
        for quantity in &quantities {
            cart.add(Uuid::new_v4(), *quantity, None).unwrap();
        }
        let expected: u64 = quantities.iter().map(|q| u64::from(*q)).sum();
        prop_assert_eq!(cart.product_count(), expected);
        prop_assert_eq!(cart.lines().len(), quantities.len());
    }

    #[test]
    fn setting_zero_or_less_always_empties_the_line(
        quantity in quantity_strategy(),
        target in -1_000i64..=0,
        size in size_strategy(),
    ) {
        let product = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add(product, quantity, size.as_deref()).unwrap();
        cart.set(product, target, size.as_deref()).unwrap();
        prop_assert!(cart.is_empty());
    }

    #[test]
    fn delivery_fee_follows_threshold_policy(subtotal in money_strategy()) {
        let pricing = PricingConfig::default();
        let fee = pricing.delivery_fee(subtotal);

        prop_assert!(fee >= Decimal::ZERO);
        if subtotal >= pricing.free_delivery_threshold {
            prop_assert_eq!(fee, Decimal::ZERO);
            prop_assert_eq!(pricing.free_delivery_gap(subtotal), Decimal::ZERO);
        } else {
            prop_assert_eq!(fee, subtotal * Decimal::new(1, 1));
            prop_assert_eq!(
                pricing.free_delivery_gap(subtotal) + subtotal,
                pricing.free_delivery_threshold
            );
        }
    }

    #[test]
    fn two_place_amounts_convert_to_exact_minor_units(cents in 0i64..10_000_000) {
        let amount = Decimal::new(cents, 2);
        prop_assert_eq!(to_minor_units(amount).unwrap(), cents);
    }
}
