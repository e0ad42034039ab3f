use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel, ItemList, Size},
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::CatalogService,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Shopping cart service.
///
/// A cart is a per-customer aggregate of two parallel lists (`cart` and
/// `saved_for_later`). Item identity is `(product_id, size)` across both
/// lists: every mutation merges quantities into an existing row instead of
/// duplicating it, and the cart total is recomputed inside the same
/// transaction as the mutation.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<CatalogService>,
    currency: String,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<CatalogService>,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
            currency,
        }
    }

    /// Fetches the customer's cart, creating an empty one on first touch.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, customer_id: Uuid) -> Result<CartModel, ServiceError> {
        if let Some(cart) = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
        {
            return Ok(cart);
        }

        let cart_id = Uuid::new_v4();
        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(cart_id),
            customer_id: Set(customer_id),
            currency: Set(self.currency.clone()),
            total: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let cart = cart.insert(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::CartCreated(cart_id))
            .await;

        info!(%customer_id, %cart_id, "Cart created");
        Ok(cart)
    }

    /// The cart plus both of its item lists.
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = self.get_or_create_cart(customer_id).await?;
        let rows = cart
            .find_related(CartItem)
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let (items, saved_for_later): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .partition(|row| row.list == ItemList::Cart);

        Ok(CartWithItems {
            cart,
            items,
            saved_for_later,
        })
    }

    /// Adds a `(product, size)` to the active list, merging quantities if
    /// the identity already exists there. Rejects products that are no
    /// longer purchasable and identities currently saved for later.
    #[instrument(skip(self, input), fields(customer_id = %customer_id, product_id = %input.product_id))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;
        let product = self.catalog.get_active_product(input.product_id).await?;
        let cart = self.get_or_create_cart(customer_id).await?;
        let unit_price = product.current_price();

        let txn = self.db.begin().await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .filter(cart_item::Column::Size.eq(input.size))
            .one(&txn)
            .await?;

        match existing {
            Some(item) if item.list == ItemList::SavedForLater => {
                return Err(ServiceError::InvalidOperation(
                    "Item is saved for later; move it back to the cart instead".to_string(),
                ));
            }
            Some(item) => {
                let quantity = item.quantity + input.quantity;
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(quantity);
                active.unit_price = Set(unit_price);
                active.line_total = Set(unit_price * Decimal::from(quantity));
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
            None => {
                let now = Utc::now();
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(input.product_id),
                    size: Set(input.size),
                    quantity: Set(input.quantity),
                    unit_price: Set(unit_price),
                    line_total: Set(unit_price * Decimal::from(input.quantity)),
                    list: Set(ItemList::Cart),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                item.insert(&txn).await?;
            }
        }

        self.recalculate_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: input.product_id,
            })
            .await;

        self.get_cart(customer_id).await
    }

    /// Sets an item's quantity; zero removes the row.
    #[instrument(skip(self), fields(customer_id = %customer_id, item_id = %item_id))]
    pub async fn update_item_quantity(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must not be negative".to_string(),
            ));
        }
        let cart = self.get_or_create_cart(customer_id).await?;

        let txn = self.db.begin().await?;
        let item = self.owned_item(&txn, cart.id, item_id).await?;

        if quantity == 0 {
            item.delete(&txn).await?;
        } else {
            let unit_price = item.unit_price;
            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(quantity);
            active.line_total = Set(unit_price * Decimal::from(quantity));
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        self.recalculate_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.get_cart(customer_id).await
    }

    /// Removes an item from either list.
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        self.update_item_quantity(customer_id, item_id, 0).await
    }

    /// Moves an item from the active list to saved-for-later, or back.
    /// A matching `(product, size)` row on the destination list absorbs the
    /// quantity instead of producing a duplicate identity.
    #[instrument(skip(self), fields(customer_id = %customer_id, item_id = %item_id, destination = ?destination))]
    pub async fn move_item(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
        destination: ItemList,
    ) -> Result<CartWithItems, ServiceError> {
        let cart = self.get_or_create_cart(customer_id).await?;

        let txn = self.db.begin().await?;
        let item = self.owned_item(&txn, cart.id, item_id).await?;

        if item.list == destination {
            txn.commit().await?;
            return self.get_cart(customer_id).await;
        }

        let twin = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(item.product_id))
            .filter(cart_item::Column::Size.eq(item.size))
            .filter(cart_item::Column::List.eq(destination))
            .one(&txn)
            .await?;

        match twin {
            Some(twin) => {
                let quantity = twin.quantity + item.quantity;
                let unit_price = twin.unit_price;
                let mut active: cart_item::ActiveModel = twin.into();
                active.quantity = Set(quantity);
                active.line_total = Set(unit_price * Decimal::from(quantity));
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
                item.delete(&txn).await?;
            }
            None => {
                let mut active: cart_item::ActiveModel = item.into();
                active.list = Set(destination);
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
        }

        self.recalculate_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemMoved {
                cart_id: cart.id,
                item_id,
            })
            .await;

        self.get_cart(customer_id).await
    }

    /// Removes every row from both lists and zeroes the total.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn clear_cart(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let cart = self.get_or_create_cart(customer_id).await?;

        let txn = self.db.begin().await?;
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        self.recalculate_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;

        info!(cart_id = %cart.id, "Cart cleared");
        Ok(())
    }

    /// Deletes the active-list rows matching the given identities after a
    /// successful checkout; saved-for-later rows are untouched.
    pub async fn consume_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        identities: &[(Uuid, Size)],
    ) -> Result<(), ServiceError> {
        for (product_id, size) in identities {
            CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(cart_id))
                .filter(cart_item::Column::ProductId.eq(*product_id))
                .filter(cart_item::Column::Size.eq(*size))
                .filter(cart_item::Column::List.eq(ItemList::Cart))
                .exec(conn)
                .await?;
        }
        self.recalculate_total(conn, cart_id).await?;
        Ok(())
    }

    /// Recomputes the cart total from the active list. Saved-for-later
    /// rows do not count toward the total.
    async fn recalculate_total<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::List.eq(ItemList::Cart))
            .all(conn)
            .await?;

        let total: Decimal = items.iter().map(|item| item.line_total).sum();

        let mut cart: cart::ActiveModel = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?
            .into();

        cart.total = Set(total);
        cart.updated_at = Set(Utc::now());
        Ok(cart.update(conn).await?)
    }

    async fn owned_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartItemModel, ServiceError> {
        let item = CartItem::find_by_id(item_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if item.cart_id != cart_id {
            return Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                item_id
            )));
        }
        Ok(item)
    }
}

/// Input for adding an item to the cart
#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub size: Size,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Cart with both of its lists
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<CartItemModel>,
    pub saved_for_later: Vec<CartItemModel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn add_input_rejects_zero_quantity() {
        let input = AddToCartInput {
            product_id: Uuid::new_v4(),
            size: Size::L,
            quantity: 0,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn add_input_deserializes_size() {
        let json = r#"{
            "product_id": "550e8400-e29b-41d4-a716-446655440000",
            "size": "XXL",
            "quantity": 2
        }"#;

        let input: AddToCartInput = serde_json::from_str(json).expect("deserializes");
        assert_eq!(input.size, Size::Xxl);
        assert_eq!(input.quantity, 2);
    }

    #[test]
    fn line_total_arithmetic() {
        let unit_price = dec!(499.50);
        let line_total = unit_price * Decimal::from(3);
        assert_eq!(line_total, dec!(1498.50));
    }

    #[test]
    fn total_sums_only_active_list() {
        // Mirrors recalculate_total's partitioning: saved rows are excluded
        // before summation.
        let rows = [
            (dec!(500), ItemList::Cart),
            (dec!(300), ItemList::SavedForLater),
            (dec!(800), ItemList::Cart),
        ];
        let total: Decimal = rows
            .iter()
            .filter(|(_, list)| *list == ItemList::Cart)
            .map(|(line_total, _)| *line_total)
            .sum();

        assert_eq!(total, dec!(1300));
    }
}
