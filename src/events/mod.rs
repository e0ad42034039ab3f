use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the storefront domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Catalog events
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),

    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
    },
    CartItemMoved {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartCleared(Uuid),

    // Wishlist events
    WishlistItemAdded {
        customer_id: Uuid,
        product_id: Uuid,
    },
    WishlistItemRemoved {
        customer_id: Uuid,
        item_id: Uuid,
    },

    // Order events
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentInitiated {
        order_id: Uuid,
        gateway: String,
        amount: Decimal,
    },
    PaymentCompleted {
        order_id: Uuid,
        gateway: String,
        gateway_payment_id: String,
    },
    PaymentFailed {
        order_id: Uuid,
        gateway: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging a warning instead of failing the caller.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Consumes events off the channel and logs them. Runs until the channel
/// closes (all senders dropped during shutdown).
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "event: order status changed");
            }
            Event::PaymentCompleted {
                order_id,
                gateway,
                gateway_payment_id,
            } => {
                info!(%order_id, %gateway, %gateway_payment_id, "event: payment completed");
            }
            Event::PaymentFailed {
                order_id,
                gateway,
                reason,
            } => {
                info!(%order_id, %gateway, %reason, "event: payment failed");
            }
            other => {
                info!(event = ?other, "event");
            }
        }
    }
    info!("Event channel closed; event processor stopping");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::OrderCreated(Uuid::new_v4()))
            .await
            .expect("send should succeed");

        assert!(matches!(rx.recv().await, Some(Event::OrderCreated(_))));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or return an error to the caller.
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }
}
