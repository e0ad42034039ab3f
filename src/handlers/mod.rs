pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payments;
pub mod products;
pub mod wishlist;

use crate::{
    config::AppConfig, db::DbPool, events::EventSender, gateways::GatewayRegistry,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<crate::services::CatalogService>,
    pub cart: Arc<crate::services::CartService>,
    pub wishlist: Arc<crate::services::WishlistService>,
    pub checkout: Arc<crate::services::CheckoutService>,
    pub orders: Arc<crate::services::OrderService>,
    pub reconciler: Arc<crate::services::PaymentReconciler>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let gateways = GatewayRegistry::from_config(&config);

        let catalog = Arc::new(crate::services::CatalogService::new(
            db.clone(),
            event_sender.clone(),
        ));
        let cart = Arc::new(crate::services::CartService::new(
            db.clone(),
            event_sender.clone(),
            catalog.clone(),
            config.currency.clone(),
        ));
        let wishlist = Arc::new(crate::services::WishlistService::new(
            db.clone(),
            event_sender.clone(),
            catalog.clone(),
            cart.clone(),
        ));
        let checkout = Arc::new(crate::services::CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            catalog.clone(),
            cart.clone(),
            gateways.clone(),
            config.clone(),
        ));
        let orders = Arc::new(crate::services::OrderService::new(
            db.clone(),
            event_sender.clone(),
        ));
        let reconciler = Arc::new(crate::services::PaymentReconciler::new(
            db,
            gateways,
            event_sender,
        ));

        Self {
            catalog,
            cart,
            wishlist,
            checkout,
            orders,
            reconciler,
        }
    }
}
