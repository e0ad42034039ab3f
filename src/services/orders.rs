use crate::{
    auth::AuthenticatedUser,
    entities::{
        order, order_item, Order, OrderItem, OrderItemModel, OrderModel, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order management: owner-scoped reads, owner cancellation/deletion, and
/// the admin status-update path gated by an explicit transition table.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Order with its line items
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Fetches an order with items. Non-admin callers only resolve their
    /// own orders; anyone else's answer 404 to avoid resource enumeration.
    #[instrument(skip(self, caller), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        caller: &AuthenticatedUser,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order_model = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| caller.is_admin() || o.customer_id == caller.customer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(OrderWithItems {
            order: order_model,
            items,
        })
    }

    /// Lists the caller's own orders, newest first.
    #[instrument(skip(self, caller))]
    pub async fn list_orders(
        &self,
        caller: &AuthenticatedUser,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::CustomerId.eq(caller.customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Admin listing across all customers with an optional status filter.
    #[instrument(skip(self))]
    pub async fn admin_list_orders(
        &self,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Admin status update through the allowed-transition table.
    /// Same-status updates are a no-op; terminal states never move.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order_model = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order_model.status;
        if old_status == new_status {
            return Ok(order_model);
        }

        if !is_valid_transition(old_status, new_status) {
            warn!(%old_status, %new_status, "Rejected status transition");
            return Err(ServiceError::ValidationError(format!(
                "Cannot transition from status '{}' to '{}'",
                old_status, new_status
            )));
        }

        let updated = self
            .transition(&order_model, new_status)
            .await?
            .ok_or(ServiceError::ConcurrentModification(order_id))?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        info!(%old_status, %new_status, "Order status updated");
        Ok(updated)
    }

    /// Owner-driven cancellation; allowed until the order ships.
    #[instrument(skip(self, caller), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        caller: &AuthenticatedUser,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let owned = self.get_order(caller, order_id).await?.order;

        if !matches!(
            owned.status,
            OrderStatus::PendingPayment | OrderStatus::Confirmed
        ) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order in status '{}' can no longer be cancelled",
                owned.status
            )));
        }

        let updated = self
            .transition(&owned, OrderStatus::Cancelled)
            .await?
            .ok_or(ServiceError::ConcurrentModification(order_id))?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;

        info!("Order cancelled");
        Ok(updated)
    }

    /// Deletes an order record. Admins may delete any order; owners only
    /// orders that never got paid (pending payment or cancelled).
    #[instrument(skip(self, caller), fields(order_id = %order_id))]
    pub async fn delete_order(
        &self,
        caller: &AuthenticatedUser,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let owned = self.get_order(caller, order_id).await?.order;

        if !caller.is_admin()
            && !matches!(
                owned.status,
                OrderStatus::PendingPayment | OrderStatus::Cancelled
            )
        {
            return Err(ServiceError::InvalidOperation(format!(
                "Order in status '{}' cannot be deleted",
                owned.status
            )));
        }

        Order::delete_by_id(order_id).exec(&*self.db).await?;
        info!("Order deleted");
        Ok(())
    }

    /// CAS write of a status change; `None` means the version moved
    /// underneath us.
    async fn transition(
        &self,
        order_model: &OrderModel,
        new_status: OrderStatus,
    ) -> Result<Option<OrderModel>, ServiceError> {
        let updated = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::value(order_model.version + 1),
            )
            .filter(order::Column::Id.eq(order_model.id))
            .filter(order::Column::Version.eq(order_model.version))
            .exec(&*self.db)
            .await?;

        if updated.rows_affected == 0 {
            return Ok(None);
        }

        Ok(Order::find_by_id(order_model.id).one(&*self.db).await?)
    }
}

/// The allowed-transition table for the admin status-update path.
///
/// `delivered` and `cancelled` are terminal. The payment path confirms
/// orders through the reconciler; the table also permits a manual
/// `pending_payment → confirmed` for back-office confirmation of offline
/// payments.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match (from, to) {
        (PendingPayment, Confirmed) => true,
        (PendingPayment, Cancelled) => true,

        (Confirmed, Processing) => true,
        (Confirmed, Shipped) => true,
        (Confirmed, Delivered) => true,
        (Confirmed, Cancelled) => true,

        (Processing, Shipped) => true,
        (Processing, Cancelled) => true,

        (Shipped, Delivered) => true,

        // delivered and cancelled are terminal
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use OrderStatus::*;

    #[rstest]
    #[case(PendingPayment, Confirmed)]
    #[case(PendingPayment, Cancelled)]
    #[case(Confirmed, Processing)]
    #[case(Confirmed, Shipped)]
    #[case(Confirmed, Delivered)]
    #[case(Confirmed, Cancelled)]
    #[case(Processing, Shipped)]
    #[case(Processing, Cancelled)]
    #[case(Shipped, Delivered)]
    fn allowed_transitions(#[case] from: OrderStatus, #[case] to: OrderStatus) {
        assert!(is_valid_transition(from, to));
    }

    #[rstest]
    #[case(Delivered, Confirmed)]
    #[case(Delivered, Cancelled)]
    #[case(Delivered, Shipped)]
    #[case(Cancelled, Confirmed)]
    #[case(Cancelled, PendingPayment)]
    #[case(Cancelled, Delivered)]
    #[case(Shipped, Cancelled)]
    #[case(Shipped, Processing)]
    #[case(PendingPayment, Shipped)]
    #[case(PendingPayment, Delivered)]
    #[case(Processing, PendingPayment)]
    fn rejected_transitions(#[case] from: OrderStatus, #[case] to: OrderStatus) {
        assert!(!is_valid_transition(from, to));
    }

    #[test]
    fn terminal_states_never_move() {
        for to in [PendingPayment, Confirmed, Processing, Shipped, Delivered] {
            assert!(!is_valid_transition(Cancelled, to));
        }
        for to in [PendingPayment, Confirmed, Processing, Shipped, Cancelled] {
            assert!(!is_valid_transition(Delivered, to));
        }
    }
}
