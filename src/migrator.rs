use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateStorefrontTables)]
    }
}

pub struct CreateStorefrontTables;

impl MigrationName for CreateStorefrontTables {
    fn name(&self) -> &str {
        "m20260801_000001_create_storefront_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateStorefrontTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Products::Name).string().not_null())
                    .col(
                        ColumnDef::new(Products::Slug)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Products::Description).text().not_null())
                    .col(ColumnDef::new(Products::ActualPrice).decimal().not_null())
                    .col(ColumnDef::new(Products::DiscountPrice).decimal().null())
                    .col(ColumnDef::new(Products::ImageUrl).string().null())
                    .col(ColumnDef::new(Products::Category).string().null())
                    .col(
                        ColumnDef::new(Products::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Products::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Products::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Carts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Carts::Id).uuid().primary_key().not_null())
                    .col(
                        ColumnDef::new(Carts::CustomerId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Carts::Currency).string().not_null())
                    .col(
                        ColumnDef::new(Carts::Total)
                            .decimal()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(Carts::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Carts::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CartItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CartItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CartItems::CartId).uuid().not_null())
                    .col(ColumnDef::new(CartItems::ProductId).uuid().not_null())
                    .col(ColumnDef::new(CartItems::Size).string().not_null())
                    .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                    .col(ColumnDef::new(CartItems::UnitPrice).decimal().not_null())
                    .col(ColumnDef::new(CartItems::LineTotal).decimal().not_null())
                    .col(
                        ColumnDef::new(CartItems::List)
                            .string()
                            .not_null()
                            .default("cart"),
                    )
                    .col(ColumnDef::new(CartItems::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(CartItems::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cart_items_cart")
                            .from(CartItems::Table, CartItems::CartId)
                            .to(Carts::Table, Carts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Item identity within a cart is (product, size), across both lists.
        manager
            .create_index(
                Index::create()
                    .name("idx_cart_items_identity")
                    .table(CartItems::Table)
                    .col(CartItems::CartId)
                    .col(CartItems::ProductId)
                    .col(CartItems::Size)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WishlistItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WishlistItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WishlistItems::CustomerId).uuid().not_null())
                    .col(ColumnDef::new(WishlistItems::ProductId).uuid().not_null())
                    .col(ColumnDef::new(WishlistItems::Size).string().not_null())
                    .col(
                        ColumnDef::new(WishlistItems::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_wishlist_items_identity")
                    .table(WishlistItems::Table)
                    .col(WishlistItems::CustomerId)
                    .col(WishlistItems::ProductId)
                    .col(WishlistItems::Size)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                    .col(
                        ColumnDef::new(Orders::OrderNumber)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Orders::CustomerId).uuid().not_null())
                    .col(
                        ColumnDef::new(Orders::Status)
                            .string()
                            .not_null()
                            .default("pending_payment"),
                    )
                    .col(
                        ColumnDef::new(Orders::PaymentStatus)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Orders::PaymentMethod).string().null())
                    .col(ColumnDef::new(Orders::GatewayOrderId).string().null())
                    .col(ColumnDef::new(Orders::GatewayPaymentId).string().null())
                    .col(
                        ColumnDef::new(Orders::TotalAmount)
                            .decimal()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(Orders::Currency).string().not_null())
                    .col(ColumnDef::new(Orders::ShippingAddress).json().not_null())
                    .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Orders::UpdatedAt).timestamp().not_null())
                    .col(
                        ColumnDef::new(Orders::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .to_owned(),
            )
            .await?;

        // Callbacks resolve orders by the gateway's order reference.
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_gateway_order_id")
                    .table(Orders::Table)
                    .col(Orders::GatewayOrderId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_customer_created")
                    .table(Orders::Table)
                    .col(Orders::CustomerId)
                    .col(Orders::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                    .col(ColumnDef::new(OrderItems::Name).string().not_null())
                    .col(ColumnDef::new(OrderItems::Size).string().not_null())
                    .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                    .col(ColumnDef::new(OrderItems::UnitPrice).decimal().not_null())
                    .col(ColumnDef::new(OrderItems::LineTotal).decimal().not_null())
                    .col(ColumnDef::new(OrderItems::CreatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_items_order")
                            .from(OrderItems::Table, OrderItems::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WishlistItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CartItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Carts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    Name,
    Slug,
    Description,
    ActualPrice,
    DiscountPrice,
    ImageUrl,
    Category,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Carts {
    Table,
    Id,
    CustomerId,
    Currency,
    Total,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CartItems {
    Table,
    Id,
    CartId,
    ProductId,
    Size,
    Quantity,
    UnitPrice,
    LineTotal,
    List,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WishlistItems {
    Table,
    Id,
    CustomerId,
    ProductId,
    Size,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    OrderNumber,
    CustomerId,
    Status,
    PaymentStatus,
    PaymentMethod,
    GatewayOrderId,
    GatewayPaymentId,
    TotalAmount,
    Currency,
    ShippingAddress,
    CreatedAt,
    UpdatedAt,
    Version,
}

#[derive(DeriveIden)]
enum OrderItems {
    Table,
    Id,
    OrderId,
    ProductId,
    Name,
    Size,
    Quantity,
    UnitPrice,
    LineTotal,
    CreatedAt,
}
