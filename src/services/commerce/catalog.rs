use crate::entities::product;
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, EntityTrait};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Price and display data for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogProduct {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub has_sizes: bool,
    pub image_url: Option<String>,
}

impl From<product::Model> for CatalogProduct {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            price: model.price,
            has_sizes: model.has_sizes,
            image_url: model.image_url,
        }
    }
}

/// Read-only price oracle.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// `Ok(None)` when the product does not exist.
    async fn lookup(&self, product_id: Uuid) -> Result<Option<CatalogProduct>, ServiceError>;
}

/// Catalog backed by the `products` table over any connection, including an
/// open transaction.
pub struct DbCatalog<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DbCatalog<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<'a, C> Catalog for DbCatalog<'a, C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn lookup(&self, product_id: Uuid) -> Result<Option<CatalogProduct>, ServiceError> {
        let found = product::Entity::find_by_id(product_id)
            .one(self.conn)
            .await?;
        Ok(found.map(CatalogProduct::from))
    }
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    products: HashMap<Uuid, CatalogProduct>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, id: Uuid, name: &str, price: Decimal) -> Self {
        self.products.insert(
            id,
            CatalogProduct {
                id,
                name: name.to_string(),
                price,
                has_sizes: false,
                image_url: None,
            },
        );
        self
    }

    pub fn with_sized_product(mut self, id: Uuid, name: &str, price: Decimal) -> Self {
        self = self.with_product(id, name, price);
        if let Some(p) = self.products.get_mut(&id) {
            p.has_sizes = true;
        }
        self
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn lookup(&self, product_id: Uuid) -> Result<Option<CatalogProduct>, ServiceError> {
        Ok(self.products.get(&product_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::Migrator;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, Database, Set};
    use sea_orm_migration::MigratorTrait;

    #[tokio::test]
    async fn db_catalog_finds_products_and_reports_misses() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            sku: Set(Some("pp5001340155".into())),
            name: Set("Arashi Tee".into()),
            description: Set(None),
            price: Set(dec!(12.5)),
            has_sizes: Set(true),
            image_url: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&db)
        .await
        .unwrap();

        let catalog = DbCatalog::new(&db);
        let found = catalog.lookup(id).await.unwrap().unwrap();
        assert_eq!(found.name, "Arashi Tee");
        assert_eq!(found.price, dec!(12.5));
        assert!(found.has_sizes);

        assert!(catalog.lookup(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn static_catalog_lookup() {
        let id = Uuid::from_u128(1);
        let catalog = StaticCatalog::new().with_sized_product(id, "Hoodie", dec!(40));
        let product = catalog.lookup(id).await.unwrap().unwrap();
        assert!(product.has_sizes);
        assert!(catalog.lookup(Uuid::from_u128(2)).await.unwrap().is_none());
    }
}
