use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_products_table::Migration),
            Box::new(m20240601_000002_create_orders_table::Migration),
            Box::new(m20240601_000003_create_order_line_items_table::Migration),
        ]
    }
}

mod m20240601_000001_create_products_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Sku).string().null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Description).text().null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::HasSizes)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Products::ImageUrl).string().null())
                        .col(ColumnDef::new(Products::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Sku,
        Name,
        Description,
        Price,
        HasSizes,
        ImageUrl,
        CreatedAt,
    }
}

mod m20240601_000002_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::FullName).string_len(50).not_null())
                        .col(ColumnDef::new(Orders::Email).string_len(254).not_null())
                        .col(ColumnDef::new(Orders::PhoneNumber).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::Country).string_len(40).not_null())
                        .col(ColumnDef::new(Orders::Postcode).string_len(20).null())
                        .col(ColumnDef::new(Orders::TownOrCity).string_len(40).not_null())
                        .col(
                            ColumnDef::new(Orders::StreetAddress1)
                                .string_len(80)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::StreetAddress2).string_len(80).null())
                        .col(ColumnDef::new(Orders::County).string_len(80).null())
                        .col(
                            ColumnDef::new(Orders::DeliveryCost)
                                .decimal_len(6, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::OrderTotal)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::GrandTotal)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::OriginalCart).text().not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentIntentId)
                                .string_len(254)
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_payment_intent_id")
                        .table(Orders::Table)
                        .col(Orders::PaymentIntentId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        FullName,
        Email,
        PhoneNumber,
        Country,
        Postcode,
        TownOrCity,
        StreetAddress1,
        StreetAddress2,
        County,
        DeliveryCost,
        OrderTotal,
        GrandTotal,
        OriginalCart,
        PaymentIntentId,
        PaymentStatus,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_order_line_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_order_line_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderLineItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLineItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderLineItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderLineItems::ProductSize).string_len(2).null())
                        .col(ColumnDef::new(OrderLineItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderLineItems::UnitPrice)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderLineItems::LineTotal)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderLineItems::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_line_items_order_id")
                                .from(OrderLineItems::Table, OrderLineItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_line_items_product_id")
                                .from(OrderLineItems::Table, OrderLineItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_line_items_order_id")
                        .table(OrderLineItems::Table)
                        .col(OrderLineItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderLineItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderLineItems {
        Table,
        Id,
        OrderId,
        ProductId,
        ProductSize,
        Quantity,
        UnitPrice,
        LineTotal,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
    }
}
