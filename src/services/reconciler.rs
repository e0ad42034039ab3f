use crate::{
    auth::AuthenticatedUser,
    entities::{order, Order, OrderModel, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::{CallbackStatus, GatewayRegistry, VerificationResult},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// The authoritative state-transition function for payment events.
///
/// Per order: `pending_payment → confirmed` on a verified success;
/// a verified failure marks `payment_status = failed` while the order stays
/// `pending_payment` so checkout can retry; a replayed callback for an
/// already-completed order is a no-op success. Every write is a
/// compare-and-swap on the order's version, so two racing callbacks cannot
/// interleave — the loser either observes the completed order (idempotent
/// success) or surfaces a conflict the gateway will retry.
#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    gateways: GatewayRegistry,
    event_sender: Arc<EventSender>,
}

/// What a reconciliation run did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// Verified success applied: order confirmed, payment completed
    Completed,
    /// Replay of an already-completed payment; nothing changed
    AlreadyCompleted,
    /// Verified failure recorded; order remains retryable
    MarkedFailed,
    /// Gateway reports the transaction still in flight; nothing changed
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: ReconcileStatus,
}

/// Read-model for the payment-status polling endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPaymentSnapshot {
    pub order_number: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub amount: Decimal,
    pub gateway_txn_ref: Option<String>,
}

impl PaymentReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: GatewayRegistry,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateways,
            event_sender,
        }
    }

    /// Processes a gateway callback end to end: verify authenticity, match
    /// the order, check the amount, transition state.
    ///
    /// Safe to re-enter: gateways redeliver callbacks, and the idempotence
    /// short-circuit plus the version CAS make redelivery harmless.
    #[instrument(skip(self, payload), fields(gateway = %gateway_name))]
    pub async fn reconcile(
        &self,
        gateway_name: &str,
        payload: &Value,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let gateway = self.gateways.get(gateway_name)?;

        let verification = gateway.verify_callback(payload);
        if !verification.is_valid {
            let reason = verification
                .error
                .unwrap_or_else(|| "invalid callback".to_string());
            warn!(gateway = gateway_name, %reason, "Callback rejected");
            return Err(ServiceError::PaymentVerification(reason));
        }

        let order_ref = verification.gateway_order_ref.clone().ok_or_else(|| {
            ServiceError::PaymentVerification("callback carries no order reference".to_string())
        })?;

        let order_model = self.find_by_reference(&order_ref).await?.ok_or_else(|| {
            warn!(gateway = gateway_name, %order_ref, "Callback for unknown order");
            ServiceError::NotFound(format!("Order for reference {} not found", order_ref))
        })?;

        // Idempotence: replayed success callbacks must not double-apply.
        if order_model.payment_status == PaymentStatus::Completed {
            info!(order_id = %order_model.id, "Replayed callback for completed order; no-op");
            return Ok(ReconcileOutcome {
                order_id: order_model.id,
                order_number: order_model.order_number,
                status: ReconcileStatus::AlreadyCompleted,
            });
        }

        // The verified amount must equal what we quoted, in major units.
        if let Some(reported) = verification.amount {
            if !amounts_match(order_model.total_amount, reported) {
                warn!(
                    order_id = %order_model.id,
                    expected = %order_model.total_amount,
                    %reported,
                    "Callback amount mismatch"
                );
                return Err(ServiceError::PaymentVerification(format!(
                    "amount mismatch: expected {}, gateway reported {}",
                    order_model.total_amount, reported
                )));
            }
        }

        match verification.status {
            CallbackStatus::Success => {
                self.apply_success(gateway_name, &order_model, &verification)
                    .await
            }
            CallbackStatus::Failed => self.apply_failure(gateway_name, &order_model).await,
            CallbackStatus::Pending => {
                info!(order_id = %order_model.id, "Gateway reports transaction pending");
                Ok(ReconcileOutcome {
                    order_id: order_model.id,
                    order_number: order_model.order_number,
                    status: ReconcileStatus::Pending,
                })
            }
        }
    }

    /// Read path for payment-status polling. Callers may only read their
    /// own orders; admins may read any.
    #[instrument(skip(self, caller), fields(customer_id = %caller.customer_id, %order_number))]
    pub async fn payment_status(
        &self,
        order_number: &str,
        caller: &AuthenticatedUser,
    ) -> Result<OrderPaymentSnapshot, ServiceError> {
        let order_model = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", order_number))
            })?;

        if !caller.is_admin() && order_model.customer_id != caller.customer_id {
            return Err(ServiceError::Forbidden(
                "Order belongs to a different customer".to_string(),
            ));
        }

        Ok(OrderPaymentSnapshot {
            order_number: order_model.order_number,
            order_status: order_model.status,
            payment_status: order_model.payment_status,
            amount: order_model.total_amount,
            gateway_txn_ref: order_model.gateway_payment_id,
        })
    }

    async fn apply_success(
        &self,
        gateway_name: &str,
        order_model: &OrderModel,
        verification: &VerificationResult,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let txn_ref = verification.gateway_txn_ref.clone();
        let updated = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed),
            )
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Confirmed))
            .col_expr(
                order::Column::GatewayPaymentId,
                Expr::value(txn_ref.clone()),
            )
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
            // Lost the race. If the winner completed the payment the replay
            // is benign; anything else is a genuine conflict the gateway
            // should redeliver.
            let current = Order::find_by_id(order_model.id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::ConcurrentModification(order_model.id))?;
            if current.payment_status == PaymentStatus::Completed {
                return Ok(ReconcileOutcome {
                    order_id: current.id,
                    order_number: current.order_number,
                    status: ReconcileStatus::AlreadyCompleted,
                });
            }
            return Err(ServiceError::ConcurrentModification(order_model.id));
        }

        self.event_sender
            .send_or_log(Event::PaymentCompleted {
                order_id: order_model.id,
                gateway: gateway_name.to_string(),
                gateway_payment_id: txn_ref.unwrap_or_default(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order_model.id,
                old_status: order_model.status.to_string(),
                new_status: OrderStatus::Confirmed.to_string(),
            })
            .await;

        info!(order_id = %order_model.id, "Payment completed; order confirmed");
        Ok(ReconcileOutcome {
            order_id: order_model.id,
            order_number: order_model.order_number.clone(),
            status: ReconcileStatus::Completed,
        })
    }

    async fn apply_failure(
        &self,
        gateway_name: &str,
        order_model: &OrderModel,
    ) -> Result<ReconcileOutcome, ServiceError> {
        // The order itself stays pending_payment so checkout can retry.
        let updated = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed),
            )
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
            return Err(ServiceError::ConcurrentModification(order_model.id));
        }

        self.event_sender
            .send_or_log(Event::PaymentFailed {
                order_id: order_model.id,
                gateway: gateway_name.to_string(),
                reason: "gateway reported failure".to_string(),
            })
            .await;

        info!(order_id = %order_model.id, "Payment failed; order remains retryable");
        Ok(ReconcileOutcome {
            order_id: order_model.id,
            order_number: order_model.order_number.clone(),
            status: ReconcileStatus::MarkedFailed,
        })
    }

    /// Orders are matched by the gateway's order reference first, falling
    /// back to the order number (gateways that reuse it as their reference).
    async fn find_by_reference(&self, order_ref: &str) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(
                Condition::any()
                    .add(order::Column::GatewayOrderId.eq(order_ref))
                    .add(order::Column::OrderNumber.eq(order_ref)),
            )
            .one(&*self.db)
            .await?)
    }
}

/// Amounts are equal when their normalized decimal values are; trailing
/// zeros from unit formatting ("1300" vs "1300.00") do not matter.
fn amounts_match(expected: Decimal, reported: Decimal) -> bool {
    expected.normalize() == reported.normalize()
}
