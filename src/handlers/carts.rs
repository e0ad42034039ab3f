use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::AuthenticatedUser, entities::ItemList, errors::ApiError,
    services::cart::AddToCartInput, AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for the caller's cart. Every route is scoped to the
/// authenticated customer; there is no cart id in the URL.
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:item_id", put(update_cart_item))
        .route("/items/:item_id", delete(remove_cart_item))
        .route("/items/:item_id/save-for-later", post(save_for_later))
        .route("/items/:item_id/move-to-cart", post(move_to_cart))
}

/// Get the cart with both lists
async fn get_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(user.customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Add an item; an existing (product, size) row absorbs the quantity
async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .add_item(user.customer_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 0))]
    pub quantity: i32,
}

/// Update an item's quantity (0 removes)
async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .update_item_quantity(user.customer_id, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove an item from either list
async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_item(user.customer_id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Park an item on the saved-for-later list
async fn save_for_later(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .move_item(user.customer_id, item_id, ItemList::SavedForLater)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Bring a saved item back to the active list
async fn move_to_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .move_item(user.customer_id, item_id, ItemList::Cart)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Clear both lists
async fn clear_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .cart
        .clear_cart(user.customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "message": "Cart cleared successfully"
    })))
}
