use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::{
    auth::AuthenticatedUser,
    entities::{OrderStatus, PaymentStatus},
    errors::ApiError,
    services::checkout::CreateOrderInput,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Creates the router for the checkout flow.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id/payment", post(initiate_payment))
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

/// Create an order from cart items and a shipping address
#[utoipa::path(
    post,
    path = "/api/v1/checkout/orders",
    responses(
        (status = 201, description = "Order created"),
        (status = 400, description = "Empty cart or invalid address", body = crate::errors::ErrorResponse),
        (status = 404, description = "Stale product reference", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrderInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .checkout
        .create_order(&user, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(CreateOrderResponse {
        order_id: order.id,
        order_number: order.order_number,
        total_amount: order.total_amount,
        status: order.status,
        payment_status: order.payment_status,
    }))
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct InitiatePaymentRequest {
    /// Gateway tag; defaults to the method chosen at order creation
    pub gateway: Option<String>,
}

/// Prepare a hosted-checkout session for an order
#[utoipa::path(
    post,
    path = "/api/v1/checkout/orders/{id}/payment",
    responses(
        (status = 200, description = "Gateway session parameters"),
        (status = 400, description = "Already paid or zero amount", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<InitiatePaymentRequest>>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let gateway = payload.as_ref().and_then(|p| p.gateway.clone());

    let session = state
        .services
        .checkout
        .initiate_payment(&user, order_id, gateway.as_deref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(session))
}
