//! Integration tests for the payment gateway adapters.
//!
//! Both adapters are pure (no I/O), so these run without any environment:
//! they exercise the full session-build + callback-verify contract the
//! reconciler depends on.

use std::collections::BTreeMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use storefront_api::config::{PaytmConfig, RazorpayConfig};
use storefront_api::entities::{order, OrderStatus, PaymentStatus};
use storefront_api::gateways::{
    CallbackStatus, CustomerContact, PaymentGateway, PaytmGateway, RazorpayGateway,
};

type HmacSha256 = Hmac<Sha256>;

const RAZORPAY_SECRET: &str = "integration_rzp_secret";
const PAYTM_KEY: &str = "integration_ptm_key";

fn razorpay() -> RazorpayGateway {
    RazorpayGateway::new(
        RazorpayConfig {
            key_id: "rzp_test_integration".into(),
            key_secret: RAZORPAY_SECRET.into(),
            callback_url: "https://shop.test/api/v1/payments/razorpay/callback".into(),
        },
        "INR".into(),
    )
}

fn paytm() -> PaytmGateway {
    PaytmGateway::new(
        PaytmConfig {
            merchant_id: "INTEGMID01".into(),
            merchant_key: PAYTM_KEY.into(),
            website: "DEFAULT".into(),
            industry_type: "Retail".into(),
            callback_url: "https://shop.test/api/v1/payments/paytm/callback".into(),
        },
        "INR".into(),
    )
}

fn order(total: Decimal, gateway_order_id: &str) -> order::Model {
    order::Model {
        id: Uuid::new_v4(),
        order_number: "ORD-1A2B3C4D".into(),
        customer_id: Uuid::new_v4(),
        status: OrderStatus::PendingPayment,
        payment_status: PaymentStatus::Pending,
        payment_method: None,
        gateway_order_id: Some(gateway_order_id.into()),
        gateway_payment_id: None,
        total_amount: total,
        currency: "INR".into(),
        shipping_address: json!({"city": "Mumbai"}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        version: 1,
    }
}

fn contact() -> CustomerContact {
    CustomerContact {
        email: "asha@example.com".into(),
        phone: "9876543210".into(),
    }
}

fn hmac_hex(key: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("any key length works");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn paytm_signed(fields: &[(&str, &str)]) -> Value {
    let params: BTreeMap<String, String> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let canonical = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let checksum = hmac_hex(PAYTM_KEY, &canonical);

    let mut payload = serde_json::Map::new();
    for (k, v) in &params {
        payload.insert(k.clone(), json!(v));
    }
    payload.insert("CHECKSUMHASH".to_string(), json!(checksum));
    Value::Object(payload)
}

// ==================== Cross-gateway contract ====================

#[test]
fn both_gateways_satisfy_the_session_contract() {
    let order_rzp = order(dec!(1300), "order_INTEG01");
    let order_ptm = order(dec!(1300), "ORD-1A2B3C4D");

    let gateways: Vec<Box<dyn PaymentGateway>> = vec![Box::new(razorpay()), Box::new(paytm())];
    for (gateway, ord) in gateways.iter().zip([&order_rzp, &order_ptm]) {
        let session = gateway
            .build_session_params(ord, &contact())
            .expect("session builds for a positive amount");
        assert_eq!(session.gateway, gateway.name());
        assert!(!session.key_id.is_empty());
        assert!(!session.params.is_empty());

        // Zero-amount orders never reach a gateway.
        let mut zero = ord.clone();
        zero.total_amount = Decimal::ZERO;
        assert!(gateway.build_session_params(&zero, &contact()).is_err());
    }
}

#[test]
fn unit_conventions_differ_between_gateways() {
    let ord = order(dec!(499.50), "order_INTEG02");
    let session = razorpay()
        .build_session_params(&ord, &contact())
        .expect("razorpay session");
    // Minor units, integral string.
    assert_eq!(session.params["amount"], "49950");

    let mut ord = ord;
    ord.gateway_order_id = Some(ord.order_number.clone());
    let session = paytm()
        .build_session_params(&ord, &contact())
        .expect("paytm session");
    // Major units, two decimals.
    assert_eq!(session.params["TXN_AMOUNT"], "499.50");
}

// ==================== Razorpay verification ====================

#[test]
fn razorpay_round_trip_verifies_and_converts_amount() {
    let gw = razorpay();
    let signature = hmac_hex(RAZORPAY_SECRET, "order_INTEG03|pay_77");
    let payload = json!({
        "razorpay_order_id": "order_INTEG03",
        "razorpay_payment_id": "pay_77",
        "razorpay_signature": signature,
        "amount": 130000,
    });

    let result = gw.verify_callback(&payload);
    assert!(result.is_valid, "error: {:?}", result.error);
    assert_eq!(result.status, CallbackStatus::Success);
    assert_eq!(result.amount, Some(dec!(1300)));
    assert_eq!(result.gateway_order_ref.as_deref(), Some("order_INTEG03"));
    assert_eq!(result.gateway_txn_ref.as_deref(), Some("pay_77"));
}

#[test]
fn razorpay_single_byte_tamper_is_rejected() {
    let gw = razorpay();
    let signature = hmac_hex(RAZORPAY_SECRET, "order_INTEG04|pay_88");
    for (field, tampered) in [
        ("razorpay_order_id", "order_INTEG05"),
        ("razorpay_payment_id", "pay_89"),
    ] {
        let mut payload = json!({
            "razorpay_order_id": "order_INTEG04",
            "razorpay_payment_id": "pay_88",
            "razorpay_signature": signature,
        });
        payload[field] = json!(tampered);

        let result = gw.verify_callback(&payload);
        assert!(!result.is_valid, "tampering {} must invalidate", field);
        assert!(result.error.is_some());
    }
}

#[test]
fn razorpay_missing_fields_fail_closed() {
    let gw = razorpay();
    for field in [
        "razorpay_order_id",
        "razorpay_payment_id",
        "razorpay_signature",
    ] {
        let mut payload = json!({
            "razorpay_order_id": "order_X",
            "razorpay_payment_id": "pay_X",
            "razorpay_signature": "00",
        });
        payload.as_object_mut().unwrap().remove(field);

        let result = gw.verify_callback(&payload);
        assert!(!result.is_valid);
        assert_eq!(
            result.error.as_deref(),
            Some(format!("missing field `{}`", field).as_str())
        );
    }
}

// ==================== Paytm verification ====================

#[test]
fn paytm_round_trip_verifies() {
    let gw = paytm();
    let payload = paytm_signed(&[
        ("ORDERID", "ORD-1A2B3C4D"),
        ("TXNID", "20260806111222333"),
        ("TXNAMOUNT", "1300.00"),
        ("STATUS", "TXN_SUCCESS"),
        ("RESPMSG", "Txn Success"),
        ("BANKTXNID", "777888999"),
    ]);

    let result = gw.verify_callback(&payload);
    assert!(result.is_valid, "error: {:?}", result.error);
    assert_eq!(result.status, CallbackStatus::Success);
    assert_eq!(result.amount, Some(dec!(1300.00)));
    assert_eq!(result.gateway_order_ref.as_deref(), Some("ORD-1A2B3C4D"));
}

#[test]
fn paytm_any_field_tamper_breaks_checksum() {
    let gw = paytm();
    let base = [
        ("ORDERID", "ORD-1A2B3C4D"),
        ("TXNID", "20260806111222333"),
        ("TXNAMOUNT", "1300.00"),
        ("STATUS", "TXN_SUCCESS"),
    ];

    for (field, tampered) in [
        ("ORDERID", "ORD-FFFFFFFF"),
        ("TXNAMOUNT", "0.01"),
        ("STATUS", "TXN_FAILURE"),
    ] {
        let mut payload = paytm_signed(&base);
        payload[field] = json!(tampered);

        let result = gw.verify_callback(&payload);
        assert!(!result.is_valid, "tampering {} must invalidate", field);
        assert_eq!(result.error.as_deref(), Some("checksum mismatch"));
    }
}

#[test]
fn paytm_failure_status_is_valid_but_failed() {
    let gw = paytm();
    let payload = paytm_signed(&[
        ("ORDERID", "ORD-1A2B3C4D"),
        ("TXNAMOUNT", "1300.00"),
        ("STATUS", "TXN_FAILURE"),
        ("RESPMSG", "Insufficient funds"),
    ]);

    let result = gw.verify_callback(&payload);
    assert!(result.is_valid);
    assert_eq!(result.status, CallbackStatus::Failed);
    assert!(!result.is_success());
}

#[test]
fn paytm_pending_status_maps_to_pending() {
    let gw = paytm();
    let payload = paytm_signed(&[
        ("ORDERID", "ORD-1A2B3C4D"),
        ("TXNID", "20260806111222333"),
        ("TXNAMOUNT", "1300.00"),
        ("STATUS", "PENDING"),
    ]);

    let result = gw.verify_callback(&payload);
    assert!(result.is_valid);
    assert_eq!(result.status, CallbackStatus::Pending);
}

#[test]
fn paytm_garbage_amount_fails_closed() {
    let gw = paytm();
    let payload = paytm_signed(&[
        ("ORDERID", "ORD-1A2B3C4D"),
        ("TXNID", "20260806111222333"),
        ("TXNAMOUNT", "not-a-number"),
        ("STATUS", "TXN_SUCCESS"),
    ]);

    let result = gw.verify_callback(&payload);
    assert!(!result.is_valid);
    assert!(result.error.unwrap().contains("TXNAMOUNT"));
}
