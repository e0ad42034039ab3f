use crate::handlers::common::{
    map_service_error, no_content_response, success_response, PaginatedResponse, PaginationParams,
};
use crate::{
    auth::AuthenticatedUser, entities::OrderStatus, errors::ApiError, AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for customer-facing order endpoints.
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id", delete(delete_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/by-number/:order_number/payment", get(payment_status))
}

/// Creates the router for admin back-office order endpoints.
pub fn admin_orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list_orders))
        .route("/:id/status", put(update_order_status))
}

/// List the caller's orders
async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (page, per_page) = pagination.normalized();
    let (orders, total) = state
        .services
        .orders
        .list_orders(&user, page, per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders, page, per_page, total,
    )))
}

/// Get one of the caller's orders, with items
async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(&user, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Payment-status polling endpoint
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}/payment",
    responses(
        (status = 200, description = "Payment snapshot"),
        (status = 403, description = "Order belongs to a different customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order number", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_number): Path<String>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let snapshot = state
        .services
        .reconciler
        .payment_status(&order_number, &user)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(snapshot))
}

/// Cancel one of the caller's orders
async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .cancel_order(&user, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Delete an order (owner: only never-paid orders; admin: any)
async fn delete_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .orders
        .delete_order(&user, id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    pub status: Option<OrderStatus>,
}

/// Admin: list all orders, optionally filtered by status
async fn admin_list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
    Query(query): Query<AdminListQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;

    let (page, per_page) = pagination.normalized();
    let (orders, total) = state
        .services
        .orders
        .admin_list_orders(page, per_page, query.status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders, page, per_page, total,
    )))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// Admin: move an order through the allowed-transition table
async fn update_order_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;

    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
