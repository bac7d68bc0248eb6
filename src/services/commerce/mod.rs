pub mod cart;
pub mod cart_service;
pub mod catalog;
pub mod checkout_service;
pub mod order_builder;
pub mod payment_gateway;
pub mod pricing_service;
pub mod session_store;

pub use cart::{Cart, CartEntry, CartLine};
pub use cart_service::{CartMutation, CartService};
pub use catalog::{Catalog, CatalogProduct, DbCatalog, StaticCatalog};
pub use checkout_service::{CheckoutService, PaymentIntentResponse, PlacedOrder};
pub use order_builder::{CustomerInfo, OrderBuilder, OrderWithLines};
pub use payment_gateway::{PaymentGateway, PaymentIntent, StripeGateway};
pub use pricing_service::{price_cart, PricedCart, PricedLine, PricingConfig};
pub use session_store::{InMemorySessionStore, PendingPayment, RedisSessionStore, SessionStore};
