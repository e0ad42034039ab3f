use std::collections::BTreeMap;

use crate::handlers::common::map_service_error;
use crate::{
    errors::{ApiError, ServiceError},
    services::reconciler::{ReconcileOutcome, ReconcileStatus},
    AppState,
};
use axum::{
    extract::{Form, Json, State},
    response::{IntoResponse, Redirect},
    routing::post,
    Router,
};
use serde_json::{json, Value};
use tracing::warn;

/// Creates the router for gateway callback endpoints. These carry no
/// bearer token — authenticity is the signature/checksum inside the
/// payload, verified by the adapters.
pub fn payments_routes() -> Router<AppState> {
    Router::new()
        .route("/razorpay/callback", post(razorpay_callback))
        .route("/paytm/callback", post(paytm_callback))
}

/// Razorpay-style callback: server-to-server JSON, answered with a JSON ack.
///
/// Verification failures answer 402 so the gateway stops redelivering a
/// payload that can never verify; persistence failures keep their 5xx so
/// it retries later. Redelivery of a success is a no-op by design.
#[utoipa::path(
    post,
    path = "/api/v1/payments/razorpay/callback",
    responses(
        (status = 200, description = "Callback accepted"),
        (status = 402, description = "Verification failed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order reference", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn razorpay_callback(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .services
        .reconciler
        .reconcile("razorpay", &payload)
        .await
        .map_err(map_service_error)?;

    Ok(Json(json!({
        "status": "ok",
        "order_number": outcome.order_number,
        "result": outcome.status,
    })))
}

/// Paytm-style callback: a browser-initiated form POST, answered with a
/// redirect to the storefront's result page.
///
/// Invalid payloads also redirect (the user is sitting in the browser),
/// but leave the order untouched; only persistence failures surface as
/// 5xx so the gateway-side retry kicks in.
#[utoipa::path(
    post,
    path = "/api/v1/payments/paytm/callback",
    responses(
        (status = 303, description = "Redirect to the payment result page")
    ),
    tag = "Payments"
)]
pub async fn paytm_callback(
    State(state): State<AppState>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = serde_json::to_value(&fields)
        .map_err(|e| ApiError::BadRequest(format!("invalid form payload: {}", e)))?;

    let result_url = state.config.payment_result_url.clone();
    match state.services.reconciler.reconcile("paytm", &payload).await {
        Ok(outcome) => Ok(Redirect::to(&result_redirect(&result_url, &outcome))),
        Err(ServiceError::PaymentVerification(reason)) => {
            warn!(%reason, "Rejected paytm callback");
            Ok(Redirect::to(&format!("{}?status=invalid", result_url)))
        }
        Err(ServiceError::NotFound(reason)) => {
            warn!(%reason, "Paytm callback for unknown order");
            Ok(Redirect::to(&format!("{}?status=unknown_order", result_url)))
        }
        // Database/conflict errors propagate as 5xx/409 so Paytm retries.
        Err(other) => Err(map_service_error(other)),
    }
}

fn result_redirect(base: &str, outcome: &ReconcileOutcome) -> String {
    let status = match outcome.status {
        ReconcileStatus::Completed | ReconcileStatus::AlreadyCompleted => "success",
        ReconcileStatus::MarkedFailed => "failed",
        ReconcileStatus::Pending => "pending",
    };
    format!(
        "{}?order={}&status={}",
        base, outcome.order_number, status
    )
}
