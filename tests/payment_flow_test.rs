//! Integration tests for the order payment-reconciliation flow:
//! create order → initiate payment → gateway callback → state transition.
//!
//! These run against an in-memory SQLite database via the sea-orm
//! migrator, mirroring the production schema.

use std::sync::Arc;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::auth::{AuthenticatedUser, Role};
use storefront_api::config::{AppConfig, RazorpayConfig};
use storefront_api::entities::{OrderStatus, PaymentStatus, Size};
use storefront_api::errors::ServiceError;
use storefront_api::events::EventSender;
use storefront_api::handlers::AppServices;
use storefront_api::migrator::Migrator;
use storefront_api::services::catalog::CreateProductInput;
use storefront_api::services::checkout::{Address, CreateOrderInput, OrderItemInput};
use storefront_api::services::reconciler::ReconcileStatus;

const RAZORPAY_SECRET: &str = "flowtest_rzp_secret";

struct TestApp {
    services: AppServices,
    _db: Arc<DatabaseConnection>,
    _event_rx: mpsc::Receiver<storefront_api::events::Event>,
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        jwt_secret: "flow_test_jwt_secret_that_is_definitely_long_enough_for_validation_rules"
            .into(),
        jwt_issuer: None,
        host: "127.0.0.1".into(),
        port: 8080,
        environment: "test".into(),
        log_level: "info".into(),
        log_json: false,
        auto_migrate: false,
        cors_allowed_origins: None,
        cors_allow_any_origin: false,
        db_max_connections: 4,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        db_acquire_timeout_secs: 5,
        event_channel_capacity: 64,
        currency: "INR".into(),
        fallback_contact_phone: "9999999999".into(),
        fallback_contact_email: "orders@example.com".into(),
        razorpay: Some(RazorpayConfig {
            key_id: "rzp_test_flow".into(),
            key_secret: RAZORPAY_SECRET.into(),
            callback_url: "https://shop.test/api/v1/payments/razorpay/callback".into(),
        }),
        paytm: None,
        payment_result_url: "/payment/result".into(),
    }
}

impl TestApp {
    async fn new() -> Self {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("sqlite in-memory connects");
        Migrator::up(&db, None).await.expect("migrations apply");

        let db = Arc::new(db);
        let (tx, rx) = mpsc::channel(64);
        let event_sender = Arc::new(EventSender::new(tx));
        let services = AppServices::new(db.clone(), event_sender, Arc::new(test_config()));

        Self {
            services,
            _db: db,
            _event_rx: rx,
        }
    }

    fn customer(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            customer_id: Uuid::new_v4(),
            role: Role::Customer,
            email: Some("asha@example.com".into()),
            phone: Some("9876543210".into()),
        }
    }

    async fn seed_product(&self, name: &str, price: rust_decimal::Decimal) -> Uuid {
        self.services
            .catalog
            .create_product(CreateProductInput {
                name: name.into(),
                description: "flow test product".into(),
                actual_price: price,
                discount_price: None,
                image_url: None,
                category: Some("tees".into()),
            })
            .await
            .expect("product seeds")
            .id
    }
}

fn address() -> Address {
    Address {
        name: "Asha Rao".into(),
        phone: "9876543210".into(),
        line1: "14 MG Road".into(),
        line2: None,
        city: "Bengaluru".into(),
        state: "Karnataka".into(),
        postal_code: "560001".into(),
        country: "IN".into(),
    }
}

fn signed_callback(gateway_order_id: &str, payment_id: &str) -> serde_json::Value {
    use hmac::{Hmac, Mac};
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(RAZORPAY_SECRET.as_bytes()).unwrap();
    mac.update(format!("{}|{}", gateway_order_id, payment_id).as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    json!({
        "razorpay_order_id": gateway_order_id,
        "razorpay_payment_id": payment_id,
        "razorpay_signature": signature,
    })
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn order_totals_follow_catalog_prices() {
    let app = TestApp::new().await;
    let user = app.customer();
    let product_a = app.seed_product("Tee A", dec!(500)).await;
    let product_b = app.seed_product("Tee B", dec!(300)).await;

    let order = app
        .services
        .checkout
        .create_order(
            &user,
            CreateOrderInput {
                items: vec![
                    OrderItemInput {
                        product_id: product_a,
                        size: Size::L,
                        quantity: 2,
                    },
                    OrderItemInput {
                        product_id: product_b,
                        size: Size::M,
                        quantity: 1,
                    },
                ],
                shipping_address: address(),
                payment_method: Some("razorpay".into()),
            },
        )
        .await
        .expect("order creates");

    assert_eq!(order.total_amount, dec!(1300));
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn successful_callback_confirms_order_exactly_once() {
    let app = TestApp::new().await;
    let user = app.customer();
    let product = app.seed_product("Tee", dec!(650)).await;

    let order = app
        .services
        .checkout
        .create_order(
            &user,
            CreateOrderInput {
                items: vec![OrderItemInput {
                    product_id: product,
                    size: Size::Xl,
                    quantity: 2,
                }],
                shipping_address: address(),
                payment_method: Some("razorpay".into()),
            },
        )
        .await
        .unwrap();

    let session = app
        .services
        .checkout
        .initiate_payment(&user, order.id, None)
        .await
        .expect("payment initiates");
    let gateway_order_id = session.params["order_id"].clone();

    let payload = signed_callback(&gateway_order_id, "pay_FLOW01");
    let outcome = app
        .services
        .reconciler
        .reconcile("razorpay", &payload)
        .await
        .expect("callback reconciles");
    assert_eq!(outcome.status, ReconcileStatus::Completed);

    // Idempotence: the replay is a no-op success.
    let replay = app
        .services
        .reconciler
        .reconcile("razorpay", &payload)
        .await
        .expect("replay is accepted");
    assert_eq!(replay.status, ReconcileStatus::AlreadyCompleted);

    let snapshot = app
        .services
        .reconciler
        .payment_status(&order.order_number, &user)
        .await
        .unwrap();
    assert_eq!(snapshot.payment_status, PaymentStatus::Completed);
    assert_eq!(snapshot.order_status, OrderStatus::Confirmed);
    assert_eq!(snapshot.gateway_txn_ref.as_deref(), Some("pay_FLOW01"));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn failed_callback_keeps_order_retryable() {
    let app = TestApp::new().await;
    let user = app.customer();
    let product = app.seed_product("Tee", dec!(999)).await;

    let order = app
        .services
        .checkout
        .create_order(
            &user,
            CreateOrderInput {
                items: vec![OrderItemInput {
                    product_id: product,
                    size: Size::M,
                    quantity: 1,
                }],
                shipping_address: address(),
                payment_method: Some("razorpay".into()),
            },
        )
        .await
        .unwrap();

    let session = app
        .services
        .checkout
        .initiate_payment(&user, order.id, None)
        .await
        .unwrap();
    let gateway_order_id = session.params["order_id"].clone();

    let mut payload = signed_callback(&gateway_order_id, "pay_FLOW02");
    payload["status"] = json!("failed");

    let outcome = app
        .services
        .reconciler
        .reconcile("razorpay", &payload)
        .await
        .unwrap();
    assert_eq!(outcome.status, ReconcileStatus::MarkedFailed);

    let snapshot = app
        .services
        .reconciler
        .payment_status(&order.order_number, &user)
        .await
        .unwrap();
    assert_eq!(snapshot.payment_status, PaymentStatus::Failed);
    assert_eq!(snapshot.order_status, OrderStatus::PendingPayment);

    // The retry path stays open.
    app.services
        .checkout
        .initiate_payment(&user, order.id, None)
        .await
        .expect("retry initiates a fresh session");
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn tampered_callback_leaves_order_untouched() {
    let app = TestApp::new().await;
    let user = app.customer();
    let product = app.seed_product("Tee", dec!(450)).await;

    let order = app
        .services
        .checkout
        .create_order(
            &user,
            CreateOrderInput {
                items: vec![OrderItemInput {
                    product_id: product,
                    size: Size::L,
                    quantity: 1,
                }],
                shipping_address: address(),
                payment_method: Some("razorpay".into()),
            },
        )
        .await
        .unwrap();

    let session = app
        .services
        .checkout
        .initiate_payment(&user, order.id, None)
        .await
        .unwrap();
    let gateway_order_id = session.params["order_id"].clone();

    let mut payload = signed_callback(&gateway_order_id, "pay_FLOW03");
    payload["razorpay_payment_id"] = json!("pay_EVIL");

    let err = app
        .services
        .reconciler
        .reconcile("razorpay", &payload)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentVerification(_));

    let snapshot = app
        .services
        .reconciler
        .payment_status(&order.order_number, &user)
        .await
        .unwrap();
    assert_eq!(snapshot.payment_status, PaymentStatus::Pending);
    assert_eq!(snapshot.order_status, OrderStatus::PendingPayment);
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn payment_status_is_owner_scoped() {
    let app = TestApp::new().await;
    let owner = app.customer();
    let stranger = app.customer();
    let product = app.seed_product("Tee", dec!(450)).await;

    let order = app
        .services
        .checkout
        .create_order(
            &owner,
            CreateOrderInput {
                items: vec![OrderItemInput {
                    product_id: product,
                    size: Size::L,
                    quantity: 1,
                }],
                shipping_address: address(),
                payment_method: Some("razorpay".into()),
            },
        )
        .await
        .unwrap();

    let err = app
        .services
        .reconciler
        .payment_status(&order.order_number, &stranger)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn double_payment_is_rejected() {
    let app = TestApp::new().await;
    let user = app.customer();
    let product = app.seed_product("Tee", dec!(450)).await;

    let order = app
        .services
        .checkout
        .create_order(
            &user,
            CreateOrderInput {
                items: vec![OrderItemInput {
                    product_id: product,
                    size: Size::L,
                    quantity: 1,
                }],
                shipping_address: address(),
                payment_method: Some("razorpay".into()),
            },
        )
        .await
        .unwrap();

    let session = app
        .services
        .checkout
        .initiate_payment(&user, order.id, None)
        .await
        .unwrap();
    let gateway_order_id = session.params["order_id"].clone();

    app.services
        .reconciler
        .reconcile("razorpay", &signed_callback(&gateway_order_id, "pay_FLOW04"))
        .await
        .unwrap();

    let err = app
        .services
        .checkout
        .initiate_payment(&user, order.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn initiate_payment_reprices_from_current_catalog() {
    let app = TestApp::new().await;
    let user = app.customer();
    let product = app.seed_product("Tee", dec!(500)).await;

    let order = app
        .services
        .checkout
        .create_order(
            &user,
            CreateOrderInput {
                items: vec![OrderItemInput {
                    product_id: product,
                    size: Size::L,
                    quantity: 2,
                }],
                shipping_address: address(),
                payment_method: Some("razorpay".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(order.total_amount, dec!(1000));

    // Catalog price drops between order creation and payment.
    app.services
        .catalog
        .update_product(
            product,
            storefront_api::services::catalog::UpdateProductInput {
                discount_price: Some(Some(dec!(400))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let session = app
        .services
        .checkout
        .initiate_payment(&user, order.id, None)
        .await
        .unwrap();

    // 2 x 400 in minor units.
    assert_eq!(session.params["amount"], "80000");

    let snapshot = app
        .services
        .reconciler
        .payment_status(&order.order_number, &user)
        .await
        .unwrap();
    assert_eq!(snapshot.amount, dec!(800));
}
