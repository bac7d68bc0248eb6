#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{order, order_line_item, product},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    middleware_helpers::SESSION_ID_HEADER,
    services::commerce::{InMemorySessionStore, PaymentGateway, PaymentIntent},
    webhooks::{sign_payload, SIGNATURE_HEADER},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_storefront";

/// Gateway double that hands out sequential `pi_test_N` intents.
#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<Vec<(i64, String)>>,
    unavailable: AtomicBool,
}

impl FakeGateway {
    pub fn calls(&self) -> Vec<(i64, String)> {
        self.calls.lock().expect("gateway calls lock").clone()
    }

    pub fn go_down(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable("gateway timed out".into()));
        }
        let mut calls = self.calls.lock().expect("gateway calls lock");
        calls.push((amount_minor, currency.to_string()));
        let n = calls.len();
        Ok(PaymentIntent {
            id: format!("pi_test_{n}"),
            client_secret: format!("pi_test_{n}_secret_abc{n}"),
        })
    }
}

/// Helper harness for spinning up the storefront against an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub sessions: Arc<InMemorySessionStore>,
    pub gateway: Arc<FakeGateway>,
    events: Mutex<mpsc::Receiver<Event>>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_webhook_secret(Some(WEBHOOK_SECRET)).await
    }

    /// Construct a test application; `None` leaves webhook signing unconfigured.
    pub async fn with_webhook_secret(secret: Option<&str>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.stripe_public_key = Some("pk_test_storefront".to_string());
        cfg.stripe_webhook_secret = secret.map(str::to_string);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let sessions = Arc::new(InMemorySessionStore::new());
        let gateway = Arc::new(FakeGateway::default());

        let services = AppServices::new(
            db_arc.clone(),
            &cfg,
            event_sender.clone(),
            sessions.clone(),
            gateway.clone(),
        );
        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            event_sender,
            services,
        };

        Self {
            router: storefront_api::build_router(state.clone()),
            state,
            sessions,
            gateway,
            events: Mutex::new(event_rx),
        }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        self.insert_product(name, price, false).await
    }

    pub async fn seed_sized_product(&self, name: &str, price: Decimal) -> product::Model {
        self.insert_product(name, price, true).await
    }

    async fn insert_product(&self, name: &str, price: Decimal, has_sizes: bool) -> product::Model {
        product::ActiveModel {
            sku: Set(Some(format!("sku-{}", name.to_lowercase().replace(' ', "-")))),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            has_sizes: Set(has_sizes),
            image_url: Set(None),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    pub async fn delete_product(&self, id: Uuid) {
        product::Entity::delete_by_id(id)
            .exec(&*self.state.db)
            .await
            .expect("delete product");
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    pub async fn line_item_count(&self) -> u64 {
        order_line_item::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count line items")
    }

    /// Events emitted since the last call.
    pub fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().expect("event receiver lock");
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    /// Send a JSON request, optionally bound to a shopper session.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        session: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            builder = builder.header(SESSION_ID_HEADER, session);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Post a webhook body with an optional `stripe-signature` header.
    pub async fn post_webhook(&self, payload: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Post a webhook body signed with the configured secret.
    pub async fn post_signed_webhook(&self, payload: &[u8]) -> Response {
        let header = sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), payload)
            .expect("sign webhook payload");
        self.post_webhook(payload, Some(&header)).await
    }

    pub async fn add_to_bag(&self, session: &str, product_id: Uuid, quantity: u32) -> Response {
        self.request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product_id, "quantity": quantity })),
            Some(session),
        )
        .await
    }

    /// Creates an intent for the session bag and returns its client secret.
    pub async fn start_payment(&self, session: &str) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/v1/checkout/payment-intent",
                None,
                Some(session),
            )
            .await;
        assert_eq!(response.status(), 200);
        let body = response_json(response).await;
        body["data"]["client_secret"]
            .as_str()
            .expect("client secret in response")
            .to_string()
    }

    pub async fn checkout(&self, session: &str, client_secret: &str) -> Response {
        let mut form = customer_form();
        form["client_secret"] = json!(client_secret);
        self.request(Method::POST, "/api/v1/checkout", Some(form), Some(session))
            .await
    }
}

pub fn customer_form() -> Value {
    json!({
        "full_name": "Ada Lovelace",
        "email": "ada@example.com",
        "phone_number": "0123456789",
        "country": "IE",
        "postcode": "D02",
        "town_or_city": "Dublin",
        "street_address1": "1 Main Street",
        "street_address2": "",
        "county": "Dublin"
    })
}

/// Gateway event for the 33.00 order most tests place.
pub fn payment_event(event_type: &str, payment_intent_id: &str) -> Vec<u8> {
    payment_event_for_amount(event_type, payment_intent_id, 3300)
}

pub fn payment_event_for_amount(
    event_type: &str,
    payment_intent_id: &str,
    amount_minor: i64,
) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": {
            "object": {
                "id": payment_intent_id,
                "amount": amount_minor,
                "status": "succeeded"
            }
        }
    }))
    .expect("serialize webhook payload")
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Decimal fields serialize as strings; compare them numerically.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal, got {other}"),
    }
}
