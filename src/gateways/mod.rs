use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::AppConfig,
    entities::order::Model as OrderModel,
    errors::ServiceError,
};

pub mod paytm;
pub mod razorpay;

pub use paytm::PaytmGateway;
pub use razorpay::RazorpayGateway;

/// Contact details handed to the hosted checkout. Callers fall back to the
/// configured defaults when the token carries no contact.
#[derive(Debug, Clone)]
pub struct CustomerContact {
    pub email: String,
    pub phone: String,
}

/// Session parameters the client needs to open a gateway's hosted checkout.
///
/// `params` is an ordered map of gateway-specific fields; nothing outside
/// the owning adapter interprets its keys.
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySession {
    pub gateway: String,
    /// Public identifier the client-side SDK requires (key id / merchant id)
    pub key_id: String,
    pub params: BTreeMap<String, String>,
}

/// Normalized status reported by a verified callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Success,
    Failed,
    Pending,
}

/// Outcome of verifying a gateway callback.
///
/// Verification fails closed: a missing field, a signature mismatch, or an
/// amount in the wrong unit convention all yield `is_valid = false` with a
/// descriptive error, never a panic or an uncaught error.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub gateway_order_ref: Option<String>,
    pub gateway_txn_ref: Option<String>,
    /// Callback amount converted to major currency units by the adapter,
    /// when the payload carries one.
    pub amount: Option<Decimal>,
    pub status: CallbackStatus,
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            gateway_order_ref: None,
            gateway_txn_ref: None,
            amount: None,
            status: CallbackStatus::Failed,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.is_valid && self.status == CallbackStatus::Success
    }
}

/// The contract both payment integrations satisfy so the reconciler stays
/// gateway-agnostic.
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Generates the gateway-side order reference assigned to an order at
    /// payment initiation; callbacks are matched back through it.
    fn new_order_ref(&self, order: &OrderModel) -> String;

    /// Builds the parameter set for the hosted checkout. Pure: no I/O, no
    /// side effects. Requires `order.total_amount > 0` and an assigned
    /// gateway order reference.
    fn build_session_params(
        &self,
        order: &OrderModel,
        contact: &CustomerContact,
    ) -> Result<GatewaySession, ServiceError>;

    /// Validates a raw callback payload: structural completeness plus
    /// signature/checksum authenticity.
    fn verify_callback(&self, payload: &Value) -> VerificationResult;
}

/// Gateways available in this deployment, selected by payment-method tag.
#[derive(Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<&'static str, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    /// Builds the registry from configured credentials; unconfigured
    /// gateways simply do not exist as payment methods.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut gateways: HashMap<&'static str, Arc<dyn PaymentGateway>> = HashMap::new();

        if let Some(razorpay) = &config.razorpay {
            let gateway = RazorpayGateway::new(razorpay.clone(), config.currency.clone());
            gateways.insert(gateway.name(), Arc::new(gateway));
        }
        if let Some(paytm) = &config.paytm {
            let gateway = PaytmGateway::new(paytm.clone(), config.currency.clone());
            gateways.insert(gateway.name(), Arc::new(gateway));
        }

        Self { gateways }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::ValidationError(format!("Unknown gateway: {}", name)))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.gateways.keys().copied().collect()
    }
}

/// Constant-time string comparison for signature/checksum checks.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Pulls a non-empty string field off a callback payload.
pub(crate) fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, String> {
    match payload.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(format!("missing field `{}`", field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq("abcdef", "abcdef"));
        assert!(!constant_time_eq("abcdef", "abcdeg"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn required_str_rejects_missing_and_empty() {
        let payload = serde_json::json!({"present": "x", "empty": "", "number": 5});
        assert_eq!(required_str(&payload, "present"), Ok("x"));
        assert!(required_str(&payload, "empty").is_err());
        assert!(required_str(&payload, "number").is_err());
        assert!(required_str(&payload, "absent").is_err());
    }
}
