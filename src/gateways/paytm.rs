use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use tracing::warn;

use crate::{
    config::PaytmConfig,
    entities::order::Model as OrderModel,
    errors::ServiceError,
    gateways::{
        constant_time_eq, required_str, CallbackStatus, CustomerContact, GatewaySession,
        PaymentGateway, VerificationResult,
    },
};

type HmacSha256 = Hmac<Sha256>;

/// Paytm-style gateway: amounts travel in major currency units rendered
/// with two decimals, and every message carries a checksum — a hex
/// HMAC-SHA256 over the sorted `key=value&…` canonical form of all other
/// parameters, keyed with the merchant key.
#[derive(Clone)]
pub struct PaytmGateway {
    config: PaytmConfig,
    currency: String,
}

impl PaytmGateway {
    pub fn new(config: PaytmConfig, currency: String) -> Self {
        Self { config, currency }
    }

    /// Canonical checksum over already-sorted params (BTreeMap ordering).
    fn checksum(&self, params: &BTreeMap<String, String>) -> String {
        let canonical = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let mut mac = HmacSha256::new_from_slice(self.config.merchant_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn format_amount(amount: Decimal) -> String {
        format!("{:.2}", amount)
    }
}

impl PaymentGateway for PaytmGateway {
    fn name(&self) -> &'static str {
        "paytm"
    }

    /// Paytm identifies the transaction by the merchant's own order id.
    fn new_order_ref(&self, order: &OrderModel) -> String {
        order.order_number.clone()
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
        let order_ref = order.gateway_order_id.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "Order {} has no gateway order reference",
                order.order_number
            ))
        })?;

        let mut params = BTreeMap::new();
        params.insert("MID".to_string(), self.config.merchant_id.clone());
        params.insert("ORDER_ID".to_string(), order_ref.to_string());
        params.insert("CUST_ID".to_string(), order.customer_id.to_string());
        params.insert(
            "TXN_AMOUNT".to_string(),
            Self::format_amount(order.total_amount),
        );
        params.insert("CURRENCY".to_string(), self.currency.clone());
        params.insert("CHANNEL_ID".to_string(), "WEB".to_string());
        params.insert("WEBSITE".to_string(), self.config.website.clone());
        params.insert(
            "INDUSTRY_TYPE_ID".to_string(),
            self.config.industry_type.clone(),
        );
        params.insert("EMAIL".to_string(), contact.email.clone());
        params.insert("MOBILE_NO".to_string(), contact.phone.clone());
        params.insert(
            "CALLBACK_URL".to_string(),
            self.config.callback_url.clone(),
        );

        let checksum = self.checksum(&params);
        params.insert("CHECKSUMHASH".to_string(), checksum);

        Ok(GatewaySession {
            gateway: self.name().to_string(),
            key_id: self.config.merchant_id.clone(),
            params,
        })
    }

    fn verify_callback(&self, payload: &Value) -> VerificationResult {
        let order_ref = match required_str(payload, "ORDERID") {
            Ok(v) => v,
            Err(e) => return VerificationResult::invalid(e),
        };
        let status_raw = match required_str(payload, "STATUS") {
            Ok(v) => v,
            Err(e) => return VerificationResult::invalid(e),
        };
        let amount_raw = match required_str(payload, "TXNAMOUNT") {
            Ok(v) => v,
            Err(e) => return VerificationResult::invalid(e),
        };
        let received_checksum = match required_str(payload, "CHECKSUMHASH") {
            Ok(v) => v,
            Err(e) => return VerificationResult::invalid(e),
        };

        // The checksum covers every other string parameter Paytm sent.
        let params: BTreeMap<String, String> = match payload.as_object() {
            Some(map) => map
                .iter()
                .filter(|(k, _)| k.as_str() != "CHECKSUMHASH")
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            None => return VerificationResult::invalid("callback payload is not an object"),
        };

        let expected = self.checksum(&params);
        if !constant_time_eq(&expected, received_checksum) {
            warn!(gateway = self.name(), %order_ref, "checksum mismatch on callback");
            return VerificationResult::invalid("checksum mismatch");
        }

        let amount: Decimal = match amount_raw.parse() {
            Ok(a) => a,
            Err(_) => {
                return VerificationResult::invalid(format!(
                    "unparseable TXNAMOUNT `{}`",
                    amount_raw
                ))
            }
        };

        let status = match status_raw {
            "TXN_SUCCESS" => CallbackStatus::Success,
            "TXN_FAILURE" => CallbackStatus::Failed,
            "PENDING" => CallbackStatus::Pending,
            other => {
                return VerificationResult::invalid(format!("unrecognized STATUS `{}`", other))
            }
        };

        let txn_ref = payload
            .get("TXNID")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if status == CallbackStatus::Success && txn_ref.is_none() {
            return VerificationResult::invalid("missing field `TXNID`");
        }

        VerificationResult {
            is_valid: true,
            gateway_order_ref: Some(order_ref.to_string()),
            gateway_txn_ref: txn_ref,
            amount: Some(amount),
            status,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use uuid::Uuid;

    fn gateway() -> PaytmGateway {
        PaytmGateway::new(
            PaytmConfig {
                merchant_id: "shopMID01".into(),
                merchant_key: "ptm_merchant_k3y".into(),
                website: "DEFAULT".into(),
                industry_type: "Retail".into(),
                callback_url: "https://shop.test/api/v1/payments/paytm/callback".into(),
            },
            "INR".into(),
        )
    }

    fn order(total: Decimal) -> OrderModel {
        OrderModel {
            id: Uuid::new_v4(),
            order_number: "ORD-7B2E90D1".into(),
            customer_id: Uuid::new_v4(),
            status: crate::entities::OrderStatus::PendingPayment,
            payment_status: crate::entities::PaymentStatus::Pending,
            payment_method: Some("paytm".into()),
            gateway_order_id: Some("ORD-7B2E90D1".into()),
            gateway_payment_id: None,
            total_amount: total,
            currency: "INR".into(),
            shipping_address: json!({"city": "Jaipur"}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    fn signed_callback(gw: &PaytmGateway, fields: &[(&str, &str)]) -> Value {
        let params: BTreeMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let checksum = gw.checksum(&params);

        let mut payload = serde_json::Map::new();
        for (k, v) in &params {
            payload.insert(k.clone(), json!(v));
        }
        payload.insert("CHECKSUMHASH".to_string(), json!(checksum));
        Value::Object(payload)
    }

    #[test]
    fn session_amount_is_major_units_two_decimals() {
        let session = gateway()
            .build_session_params(
                &order(dec!(1300)),
                &CustomerContact {
                    email: "asha@example.com".into(),
                    phone: "9876543210".into(),
                },
            )
            .expect("session builds");

        assert_eq!(session.params["TXN_AMOUNT"], "1300.00");
        assert_eq!(session.params["MID"], "shopMID01");
        assert_eq!(session.params["ORDER_ID"], "ORD-7B2E90D1");
        assert!(session.params.contains_key("CHECKSUMHASH"));
    }

    #[test]
    fn session_checksum_covers_all_params() {
        let gw = gateway();
        let session = gw
            .build_session_params(
                &order(dec!(499.50)),
                &CustomerContact {
                    email: "a@b.c".into(),
                    phone: "1".into(),
                },
            )
            .unwrap();

        let mut params = session.params.clone();
        let checksum = params.remove("CHECKSUMHASH").unwrap();
        assert_eq!(gw.checksum(&params), checksum);
    }

    #[test]
    fn success_callback_verifies() {
        let gw = gateway();
        let payload = signed_callback(
            &gw,
            &[
                ("ORDERID", "ORD-7B2E90D1"),
                ("TXNID", "202608061234567"),
                ("TXNAMOUNT", "1300.00"),
                ("STATUS", "TXN_SUCCESS"),
                ("RESPMSG", "Txn Success"),
            ],
        );

        let result = gw.verify_callback(&payload);
        assert!(result.is_valid);
        assert!(result.is_success());
        assert_eq!(result.amount, Some(dec!(1300.00)));
        assert_eq!(result.gateway_order_ref.as_deref(), Some("ORD-7B2E90D1"));
        assert_eq!(result.gateway_txn_ref.as_deref(), Some("202608061234567"));
    }

    #[test]
    fn tampered_amount_breaks_checksum() {
        let gw = gateway();
        let mut payload = signed_callback(
            &gw,
            &[
                ("ORDERID", "ORD-7B2E90D1"),
                ("TXNID", "202608061234567"),
                ("TXNAMOUNT", "1300.00"),
                ("STATUS", "TXN_SUCCESS"),
            ],
        );
        payload["TXNAMOUNT"] = json!("1.00");

        let result = gw.verify_callback(&payload);
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("checksum mismatch"));
    }

    #[test]
    fn failure_callback_maps_to_failed() {
        let gw = gateway();
        let payload = signed_callback(
            &gw,
            &[
                ("ORDERID", "ORD-7B2E90D1"),
                ("TXNAMOUNT", "1300.00"),
                ("STATUS", "TXN_FAILURE"),
                ("RESPMSG", "Payment declined by bank"),
            ],
        );

        let result = gw.verify_callback(&payload);
        assert!(result.is_valid);
        assert_eq!(result.status, CallbackStatus::Failed);
        assert!(!result.is_success());
    }

    #[test]
    fn missing_status_fails_closed() {
        let gw = gateway();
        let payload = signed_callback(
            &gw,
            &[
                ("ORDERID", "ORD-7B2E90D1"),
                ("TXNID", "202608061234567"),
                ("TXNAMOUNT", "1300.00"),
            ],
        );

        let result = gw.verify_callback(&payload);
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("missing field `STATUS`"));
    }

    #[test]
    fn success_without_txnid_fails_closed() {
        let gw = gateway();
        let payload = signed_callback(
            &gw,
            &[
                ("ORDERID", "ORD-7B2E90D1"),
                ("TXNAMOUNT", "1300.00"),
                ("STATUS", "TXN_SUCCESS"),
            ],
        );

        assert!(!gw.verify_callback(&payload).is_valid);
    }

    #[test]
    fn amount_formatting_pads_decimals() {
        assert_eq!(PaytmGateway::format_amount(dec!(1300)), "1300.00");
        assert_eq!(PaytmGateway::format_amount(dec!(499.5)), "499.50");
    }
}
