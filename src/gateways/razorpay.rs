use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use tracing::warn;

use crate::{
    config::RazorpayConfig,
    entities::order::Model as OrderModel,
    errors::ServiceError,
    gateways::{
        constant_time_eq, required_str, CallbackStatus, CustomerContact, GatewaySession,
        PaymentGateway, VerificationResult,
    },
};

type HmacSha256 = Hmac<Sha256>;

/// Razorpay-style gateway: amounts travel in minor currency units (paise)
/// and callbacks carry a hex HMAC-SHA256 signature over
/// `"{order_id}|{payment_id}"` computed with the key secret.
#[derive(Clone)]
pub struct RazorpayGateway {
    config: RazorpayConfig,
    currency: String,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig, currency: String) -> Self {
        Self { config, currency }
    }

    /// Converts a major-unit amount to minor units (paise). Fails on
    /// amounts with sub-paise precision rather than rounding money.
    fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
        let minor = amount * Decimal::from(100);
        if minor.fract() != Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Amount {} has sub-minor-unit precision",
                amount
            )));
        }
        minor.to_i64().ok_or_else(|| {
            ServiceError::ValidationError(format!("Amount {} out of range", amount))
        })
    }

    /// Converts a minor-unit callback amount back to major units.
    fn from_minor_units(minor: i64) -> Decimal {
        Decimal::from(minor) / Decimal::from(100)
    }

    fn expected_signature(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.config.key_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{}|{}", gateway_order_id, gateway_payment_id).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> &'static str {
        "razorpay"
    }

    fn new_order_ref(&self, _order: &OrderModel) -> String {
        format!("order_{:016X}", rand::random::<u64>())
    }

    fn build_session_params(
        &self,
        order: &OrderModel,
        contact: &CustomerContact,
    ) -> Result<GatewaySession, ServiceError> {
        if order.total_amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Order {} has non-positive amount",
                order.order_number
            )));
        }
        let gateway_order_id = order.gateway_order_id.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "Order {} has no gateway order reference",
                order.order_number
            ))
        })?;

        let amount_minor = Self::to_minor_units(order.total_amount)?;

        let mut params = BTreeMap::new();
        params.insert("key".to_string(), self.config.key_id.clone());
        params.insert("amount".to_string(), amount_minor.to_string());
        params.insert("currency".to_string(), self.currency.clone());
        params.insert("order_id".to_string(), gateway_order_id.to_string());
        params.insert("receipt".to_string(), order.order_number.clone());
        params.insert("prefill_email".to_string(), contact.email.clone());
        params.insert("prefill_contact".to_string(), contact.phone.clone());
        params.insert(
            "callback_url".to_string(),
            self.config.callback_url.clone(),
        );

        Ok(GatewaySession {
            gateway: self.name().to_string(),
            key_id: self.config.key_id.clone(),
            params,
        })
    }

    fn verify_callback(&self, payload: &Value) -> VerificationResult {
        let order_id = match required_str(payload, "razorpay_order_id") {
            Ok(v) => v,
            Err(e) => return VerificationResult::invalid(e),
        };
        let payment_id = match required_str(payload, "razorpay_payment_id") {
            Ok(v) => v,
            Err(e) => return VerificationResult::invalid(e),
        };
        let signature = match required_str(payload, "razorpay_signature") {
            Ok(v) => v,
            Err(e) => return VerificationResult::invalid(e),
        };

        let expected = self.expected_signature(order_id, payment_id);
        if !constant_time_eq(&expected, signature) {
            warn!(gateway = self.name(), %order_id, "signature mismatch on callback");
            return VerificationResult::invalid("signature mismatch");
        }

        // The browser-redirect payload has no amount; webhook-style
        // delivery restates it in minor units.
        let amount = match payload.get("amount") {
            None => None,
            Some(v) => match v.as_i64() {
                Some(minor) => Some(Self::from_minor_units(minor)),
                None => return VerificationResult::invalid("amount must be integer minor units"),
            },
        };

        let status = match payload.get("status").and_then(|v| v.as_str()) {
            None | Some("captured") | Some("authorized") | Some("paid") => CallbackStatus::Success,
            Some("failed") => CallbackStatus::Failed,
            Some("created") | Some("pending") => CallbackStatus::Pending,
            Some(other) => {
                return VerificationResult::invalid(format!("unrecognized status `{}`", other))
            }
        };

        VerificationResult {
            is_valid: true,
            gateway_order_ref: Some(order_id.to_string()),
            gateway_txn_ref: Some(payment_id.to_string()),
            amount,
            status,
            error: None,
        }
    }
}
