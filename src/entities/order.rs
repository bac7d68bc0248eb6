use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment lifecycle of an order. `Paid` and `PaymentFailed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Created)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    #[serde(skip_serializing)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub country: String,
    pub postcode: Option<String>,
    pub town_or_city: String,
    pub street_address1: String,
    pub street_address2: Option<String>,
    pub county: Option<String>,
    pub delivery_cost: Decimal,
    pub order_total: Decimal,
    pub grand_total: Decimal,
    /// JSON snapshot of the session cart the order was built from.
    #[sea_orm(column_type = "Text")]
    pub original_cart: String,
    #[sea_orm(unique)]
    pub payment_intent_id: String,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line_item::Entity")]
    OrderLineItem,
}

impl Related<super::order_line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLineItem.def()
    }
}

/// Public order number: 32 upper-case hex characters from a random UUID.
pub fn generate_order_number() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            // Assigned once; updates never touch it.
            let needs_number = match &active_model.order_number {
                ActiveValue::NotSet => true,
                ActiveValue::Set(n) | ActiveValue::Unchanged(n) => n.is_empty(),
            };
            if needs_number {
                active_model.order_number = Set(generate_order_number());
            }
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
            if let ActiveValue::NotSet = active_model.payment_status {
                active_model.payment_status = Set(PaymentStatus::Created);
            }
            if let ActiveValue::NotSet = active_model.payment_intent_id {
                active_model.payment_intent_id = Set(String::new());
            }
            active_model.created_at = Set(now);
        } else {
            active_model.updated_at = Set(Some(now));
        }

        Ok(active_model)
    }
}
