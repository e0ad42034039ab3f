// Core services
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod orders;
pub mod reconciler;
pub mod wishlist;

pub use cart::CartService;
pub use catalog::CatalogService;
pub use checkout::CheckoutService;
pub use orders::OrderService;
pub use reconciler::PaymentReconciler;
pub use wishlist::WishlistService;
