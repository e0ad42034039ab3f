use crate::{
    entities::{wishlist_item, Size, WishlistItem, WishlistItemModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::{AddToCartInput, CartService, CartWithItems},
        catalog::CatalogService,
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Wishlist service: one implicit wishlist per customer.
///
/// Entry identity is `(customer_id, product_id, size)`; re-adding an
/// existing identity is a no-op rather than an error or a duplicate.
#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<CatalogService>,
    cart: Arc<CartService>,
}

impl WishlistService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<CatalogService>,
        cart: Arc<CartService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
            cart,
        }
    }

    /// Lists the customer's wishlist, newest first.
    pub async fn list(&self, customer_id: Uuid) -> Result<Vec<WishlistItemModel>, ServiceError> {
        Ok(WishlistItem::find()
            .filter(wishlist_item::Column::CustomerId.eq(customer_id))
            .order_by_desc(wishlist_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Adds a `(product, size)` to the wishlist; idempotent.
    #[instrument(skip(self, input), fields(customer_id = %customer_id, product_id = %input.product_id))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddToWishlistInput,
    ) -> Result<WishlistItemModel, ServiceError> {
        self.catalog.get_active_product(input.product_id).await?;

        if let Some(existing) = WishlistItem::find()
            .filter(wishlist_item::Column::CustomerId.eq(customer_id))
            .filter(wishlist_item::Column::ProductId.eq(input.product_id))
            .filter(wishlist_item::Column::Size.eq(input.size))
            .one(&*self.db)
            .await?
        {
            return Ok(existing);
        }

        let item = wishlist_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            product_id: Set(input.product_id),
            size: Set(input.size),
            created_at: Set(Utc::now()),
        };
        let item = item.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::WishlistItemAdded {
                customer_id,
                product_id: input.product_id,
            })
            .await;

        Ok(item)
    }

    /// Removes a wishlist entry owned by the customer.
    #[instrument(skip(self), fields(customer_id = %customer_id, item_id = %item_id))]
    pub async fn remove_item(&self, customer_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let item = self.owned_item(customer_id, item_id).await?;
        item.delete(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::WishlistItemRemoved {
                customer_id,
                item_id,
            })
            .await;

        Ok(())
    }

    /// Moves a wishlist entry into the cart (quantity 1, merging with any
    /// existing cart row) and removes it from the wishlist.
    #[instrument(skip(self), fields(customer_id = %customer_id, item_id = %item_id))]
    pub async fn move_to_cart(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let item = self.owned_item(customer_id, item_id).await?;

        let cart = self
            .cart
            .add_item(
                customer_id,
                AddToCartInput {
                    product_id: item.product_id,
                    size: item.size,
                    quantity: 1,
                },
            )
            .await?;

        item.delete(&*self.db).await?;
        info!("Wishlist item moved to cart");

        Ok(cart)
    }

    async fn owned_item(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<WishlistItemModel, ServiceError> {
        let item = WishlistItem::find_by_id(item_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Wishlist item {} not found", item_id))
            })?;

        if item.customer_id != customer_id {
            return Err(ServiceError::NotFound(format!(
                "Wishlist item {} not found",
                item_id
            )));
        }
        Ok(item)
    }
}

/// Input for adding an item to the wishlist
#[derive(Debug, Deserialize)]
pub struct AddToWishlistInput {
    pub product_id: Uuid,
    pub size: Size,
}
