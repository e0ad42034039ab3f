use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response,
};
use crate::{
    auth::AuthenticatedUser, errors::ApiError, services::wishlist::AddToWishlistInput, AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post},
    Router,
};
use uuid::Uuid;

/// Creates the router for the caller's wishlist.
pub fn wishlist_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_wishlist))
        .route("/items", post(add_to_wishlist))
        .route("/items/:item_id", delete(remove_from_wishlist))
        .route("/items/:item_id/move-to-cart", post(move_to_cart))
}

/// List wishlist entries
async fn list_wishlist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let items = state
        .services
        .wishlist
        .list(user.customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(items))
}

/// Add an entry; re-adding an existing (product, size) is a no-op
async fn add_to_wishlist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AddToWishlistInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let item = state
        .services
        .wishlist
        .add_item(user.customer_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(item))
}

/// Remove an entry
async fn remove_from_wishlist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .wishlist
        .remove_item(user.customer_id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Move an entry into the cart (quantity 1, merging)
async fn move_to_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .wishlist
        .move_to_cart(user.customer_id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}
