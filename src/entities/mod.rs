pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod product;
pub mod wishlist_item;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, ItemList, Model as CartItemModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel, ProductStatus, Size};
pub use wishlist_item::{Entity as WishlistItem, Model as WishlistItemModel};
