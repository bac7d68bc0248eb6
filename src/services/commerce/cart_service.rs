use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::SessionId,
    services::commerce::{
        catalog::{Catalog, CatalogProduct, DbCatalog},
        pricing_service::{price_cart, PricedCart, PricingConfig},
        session_store::SessionStore,
    },
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Outcome of a bag mutation, with the message shown to the shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartMutation {
    pub product_id: Uuid,
    pub size: Option<String>,
    /// Quantity of the line after the mutation; 0 when it was removed.
    pub quantity: u32,
    pub message: String,
}

/// Session bag operations.
///
/// Every mutation is a single read and a single write of the session cart.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<dyn SessionStore>,
    event_sender: Arc<EventSender>,
    pricing: PricingConfig,
}

fn clean_size(size: Option<&str>) -> Option<String> {
    size.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn describe(name: &str, size: Option<&str>) -> String {
    match size {
        Some(size) => format!("{} size {}", name, size.to_uppercase()),
        None => name.to_string(),
    }
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<dyn SessionStore>,
        event_sender: Arc<EventSender>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            db,
            sessions,
            event_sender,
            pricing,
        }
    }

    /// Prices the session bag. A bag that references a removed product is
    /// reported as `ProductUnavailable` rather than silently trimmed.
    #[instrument(skip(self, session), fields(session_id = %session.as_str()))]
    pub async fn get_priced_cart(&self, session: &SessionId) -> Result<PricedCart, ServiceError> {
        let cart = self.sessions.get_cart(session).await?;
        let catalog = DbCatalog::new(&*self.db);
        price_cart(&cart, &catalog, &self.pricing).await
    }

    #[instrument(skip(self, session), fields(session_id = %session.as_str()))]
    pub async fn add_item(
        &self,
        session: &SessionId,
        product_id: Uuid,
        quantity: u32,
        size: Option<&str>,
    ) -> Result<CartMutation, ServiceError> {
        let size = clean_size(size);
        let product = self.require_product(product_id).await?;
        Self::check_size_matches(&product, size.as_deref())?;

        let mut cart = self.sessions.get_cart(session).await?;
        let existed = cart.quantity_of(product_id, size.as_deref()) > 0;
        let updated = cart.add(product_id, quantity, size.as_deref())?;
        self.sessions.put_cart(session, &cart).await?;

        let label = describe(&product.name, size.as_deref());
        let message = if existed {
            format!("Updated {} quantity to {}", label, updated)
        } else {
            format!("Added {} to your bag!", label)
        };
        info!(%product_id, quantity = updated, "bag line added");
        Ok(CartMutation {
            product_id,
            size,
            quantity: updated,
            message,
        })
    }

    /// Sets a line to an exact quantity; zero or less removes it.
    #[instrument(skip(self, session), fields(session_id = %session.as_str()))]
    pub async fn set_item(
        &self,
        session: &SessionId,
        product_id: Uuid,
        quantity: i64,
        size: Option<&str>,
    ) -> Result<CartMutation, ServiceError> {
        let size = clean_size(size);
        let name = if quantity > 0 {
            let product = self.require_product(product_id).await?;
            Self::check_size_matches(&product, size.as_deref())?;
            product.name
        } else {
            self.display_name(product_id).await?
        };

        let mut cart = self.sessions.get_cart(session).await?;
        let updated = cart.set(product_id, quantity, size.as_deref())?;
        self.sessions.put_cart(session, &cart).await?;

        let label = describe(&name, size.as_deref());
        let message = if updated > 0 {
            format!("Updated {} quantity to {}!", label, updated)
        } else {
            format!("Removed {} from bag!", label)
        };
        Ok(CartMutation {
            product_id,
            size,
            quantity: updated,
            message,
        })
    }

    /// Removes a line, or the whole product when no size is given. Works for
    /// products that have since left the catalog.
    #[instrument(skip(self, session), fields(session_id = %session.as_str()))]
    pub async fn remove_item(
        &self,
        session: &SessionId,
        product_id: Uuid,
        size: Option<&str>,
    ) -> Result<CartMutation, ServiceError> {
        let size = clean_size(size);
        let name = self.display_name(product_id).await?;

        let mut cart = self.sessions.get_cart(session).await?;
        cart.remove(product_id, size.as_deref())?;
        self.sessions.put_cart(session, &cart).await?;

        let message = format!("Removed {} from bag!", describe(&name, size.as_deref()));
        Ok(CartMutation {
            product_id,
            size,
            quantity: 0,
            message,
        })
    }

    #[instrument(skip(self, session), fields(session_id = %session.as_str()))]
    pub async fn clear(&self, session: &SessionId) -> Result<(), ServiceError> {
        self.sessions.clear_cart(session).await?;
        self.event_sender
            .send_or_log(Event::CartCleared {
                session_id: session.as_str().to_string(),
            })
            .await;
        Ok(())
    }

    async fn require_product(&self, product_id: Uuid) -> Result<CatalogProduct, ServiceError> {
        DbCatalog::new(&*self.db)
            .lookup(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    async fn display_name(&self, product_id: Uuid) -> Result<String, ServiceError> {
        Ok(DbCatalog::new(&*self.db)
            .lookup(product_id)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| product_id.to_string()))
    }

    fn check_size_matches(product: &CatalogProduct, size: Option<&str>) -> Result<(), ServiceError> {
        match (product.has_sizes, size) {
            (true, None) => Err(ServiceError::InvalidInput(format!(
                "{} requires a size",
                product.name
            ))),
            (false, Some(_)) => Err(ServiceError::InvalidInput(format!(
                "{} is not sold by size",
                product.name
            ))),
            _ => Ok(()),
        }
    }
}
