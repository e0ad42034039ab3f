use crate::{
    auth::AuthenticatedUser,
    config::AppConfig,
    entities::{
        order, order_item, Order, OrderItem, OrderModel, OrderStatus, PaymentStatus, Size,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::{CustomerContact, GatewayRegistry, GatewaySession},
    services::{cart::CartService, catalog::CatalogService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Payment method tag for orders settled offline on delivery.
pub const METHOD_COD: &str = "cod";

/// Checkout orchestrator: sequences order creation and gateway session
/// acquisition as seen by the client.
///
/// Prices are never taken from the client. Order creation prices every line
/// from the catalog, and payment initiation re-prices the order again so
/// the amount quoted to the gateway is the authoritative amount at that
/// moment, not the one frozen at cart time.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<CatalogService>,
    cart: Arc<CartService>,
    gateways: GatewayRegistry,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<CatalogService>,
        cart: Arc<CartService>,
        gateways: GatewayRegistry,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
            cart,
            gateways,
            config,
        }
    }

    /// Creates an order from the submitted items and shipping address.
    ///
    /// Duplicate `(product, size)` entries merge their quantities. Matching
    /// rows in the customer's cart are consumed on success. COD orders are
    /// confirmed immediately with payment still pending; everything else
    /// starts in `pending_payment`.
    #[instrument(skip(self, input), fields(customer_id = %caller.customer_id))]
    pub async fn create_order(
        &self,
        caller: &AuthenticatedUser,
        input: CreateOrderInput,
    ) -> Result<OrderModel, ServiceError> {
        input.validate()?;
        if input.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }
        input.shipping_address.validate()?;
        if let Some(method) = &input.payment_method {
            if method != METHOD_COD {
                // Unknown tags are caught here, not at payment time.
                self.gateways.get(method)?;
            }
        }

        let lines = merge_lines(&input.items)?;

        // Price every line from the catalog; a stale reference blocks the
        // order outright.
        let mut priced = Vec::with_capacity(lines.len());
        for (product_id, size, quantity) in &lines {
            let product = self.catalog.get_active_product(*product_id).await?;
            let unit_price = product.current_price();
            priced.push((product, *size, *quantity, unit_price));
        }
        let total_amount: Decimal = priced
            .iter()
            .map(|(_, _, quantity, unit_price)| *unit_price * Decimal::from(*quantity))
            .sum();
        if total_amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Order total must be positive".to_string(),
            ));
        }

        let is_cod = input.payment_method.as_deref() == Some(METHOD_COD);
        let order_id = Uuid::new_v4();
        let order_number = format!(
            "ORD-{}",
            order_id.simple().to_string()[..8].to_uppercase()
        );
        let now = Utc::now();

        let address_json = serde_json::to_value(&input.shipping_address)
            .map_err(|e| ServiceError::InternalError(format!("address serialization: {}", e)))?;

        let txn = self.db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(caller.customer_id),
            status: Set(if is_cod {
                OrderStatus::Confirmed
            } else {
                OrderStatus::PendingPayment
            }),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(input.payment_method.clone()),
            gateway_order_id: Set(None),
            gateway_payment_id: Set(None),
            total_amount: Set(total_amount),
            currency: Set(self.config.currency.clone()),
            shipping_address: Set(address_json),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        let order_model = order_model.insert(&txn).await?;

        for (product, size, quantity, unit_price) in &priced {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                name: Set(product.name.clone()),
                size: Set(*size),
                quantity: Set(*quantity),
                unit_price: Set(*unit_price),
                line_total: Set(*unit_price * Decimal::from(*quantity)),
                created_at: Set(now),
            };
            item.insert(&txn).await?;
        }

        // The purchased identities leave the cart; saved-for-later stays.
        let cart = self.cart.get_or_create_cart(caller.customer_id).await?;
        let identities: Vec<(Uuid, Size)> = lines
            .iter()
            .map(|(product_id, size, _)| (*product_id, *size))
            .collect();
        self.cart.consume_items(&txn, cart.id, &identities).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;

        info!(%order_id, %order_number, %total_amount, "Order created");
        Ok(order_model)
    }

    /// Prepares a hosted-checkout session for an order.
    ///
    /// Re-resolves every product and recomputes the authoritative amount at
    /// initiation time; price drift since order creation is persisted back
    /// onto the order before the gateway sees the amount.
    #[instrument(skip(self), fields(customer_id = %caller.customer_id, order_id = %order_id))]
    pub async fn initiate_payment(
        &self,
        caller: &AuthenticatedUser,
        order_id: Uuid,
        gateway_name: Option<&str>,
    ) -> Result<GatewaySession, ServiceError> {
        let order_model = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.customer_id == caller.customer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        // Explicit request choice wins; otherwise the method picked at
        // order creation. COD never reaches a gateway.
        let gateway_name = gateway_name
            .map(str::to_string)
            .or_else(|| {
                order_model
                    .payment_method
                    .clone()
                    .filter(|m| m != METHOD_COD)
            })
            .ok_or_else(|| {
                ServiceError::ValidationError("No payment gateway selected".to_string())
            })?;
        let gateway = self.gateways.get(&gateway_name)?;

        if order_model.payment_status == PaymentStatus::Completed {
            return Err(ServiceError::InvalidOperation(
                "Order is already paid".to_string(),
            ));
        }
        if order_model.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidOperation(
                "Order is cancelled".to_string(),
            ));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        // Authoritative repricing: a product that vanished since order
        // creation blocks payment initiation.
        let mut total_amount = Decimal::ZERO;
        let mut repriced = Vec::with_capacity(items.len());
        for item in items {
            let product = self.catalog.get_active_product(item.product_id).await?;
            let unit_price = product.current_price();
            total_amount += unit_price * Decimal::from(item.quantity);
            repriced.push((item, unit_price));
        }
        if total_amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Order total must be positive".to_string(),
            ));
        }

        let gateway_order_id = gateway.new_order_ref(&order_model);
        let expected_version = order_model.version;

        let txn = self.db.begin().await?;

        for (item, unit_price) in &repriced {
            if item.unit_price != *unit_price {
                warn!(
                    order_item = %item.id,
                    old_price = %item.unit_price,
                    new_price = %unit_price,
                    "Catalog price drifted since order creation"
                );
                let quantity = item.quantity;
                let mut active: order_item::ActiveModel = item.clone().into();
                active.unit_price = Set(*unit_price);
                active.line_total = Set(*unit_price * Decimal::from(quantity));
                active.update(&txn).await?;
            }
        }

        let updated = Order::update_many()
            .col_expr(order::Column::TotalAmount, Expr::value(total_amount))
            .col_expr(
                order::Column::GatewayOrderId,
                Expr::value(Some(gateway_order_id.clone())),
            )
            .col_expr(
                order::Column::PaymentMethod,
                Expr::value(Some(gateway.name().to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::value(expected_version + 1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(expected_version))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        txn.commit().await?;

        let fresh = OrderModel {
            total_amount,
            gateway_order_id: Some(gateway_order_id),
            payment_method: Some(gateway.name().to_string()),
            version: expected_version + 1,
            ..order_model
        };

        let session = gateway.build_session_params(&fresh, &self.contact_for(caller))?;

        self.event_sender
            .send_or_log(Event::PaymentInitiated {
                order_id,
                gateway: gateway.name().to_string(),
                amount: total_amount,
            })
            .await;

        info!(%order_id, amount = %total_amount, "Payment initiated");
        Ok(session)
    }

    fn contact_for(&self, caller: &AuthenticatedUser) -> CustomerContact {
        CustomerContact {
            email: caller
                .email
                .clone()
                .unwrap_or_else(|| self.config.fallback_contact_email.clone()),
            phone: caller
                .phone
                .clone()
                .unwrap_or_else(|| self.config.fallback_contact_phone.clone()),
        }
    }
}

/// Merges duplicate `(product, size)` request lines, validating quantities.
fn merge_lines(items: &[OrderItemInput]) -> Result<Vec<(Uuid, Size, i32)>, ServiceError> {
    let mut lines: Vec<(Uuid, Size, i32)> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }
        match lines
            .iter_mut()
            .find(|(product_id, size, _)| *product_id == item.product_id && *size == item.size)
        {
            Some((_, _, quantity)) => *quantity += item.quantity,
            None => lines.push((item.product_id, item.size, item.quantity)),
        }
    }
    Ok(lines)
}

/// Structured postal address, validated at the boundary and stored on the
/// order as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 4, max = 10))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 56))]
    pub country: String,
}

/// One requested order line
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub size: Size,
    pub quantity: i32,
}

/// Input for creating an order
#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateOrderInput {
    pub items: Vec<OrderItemInput>,
    pub shipping_address: Address,
    /// Gateway tag (`razorpay`, `paytm`) or `cod`
    pub payment_method: Option<String>,
}
