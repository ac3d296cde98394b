#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use orderly_api::{
    build_router,
    config::AppConfig,
    db::{self, DbConfig},
    notifications::{LocalOnlyMailer, NotificationError, OrderEmail, OrderMailer},
    store::{EntityStore, MemoryStore, SeaOrmStore},
    AppState,
};

/// Which `EntityStore` backend a test runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Embedded,
}

/// Captures outgoing emails; addresses listed in `reject` fail with a 500 from the "provider".
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OrderEmail>>,
    reject: Vec<String>,
}

impl RecordingMailer {
    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<OrderEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderMailer for RecordingMailer {
    async fn send(&self, email: OrderEmail) -> Result<(), NotificationError> {
        if self.reject.iter().any(|a| a == &email.to) {
            return Err(NotificationError::Rejected {
                status: 500,
                body: "provider unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// Holds every `send` until `release` is called, so a delivery can be kept in flight.
pub struct GatedMailer {
    entered: Semaphore,
    gate: Semaphore,
    sent: Mutex<Vec<OrderEmail>>,
}

impl GatedMailer {
    pub fn new() -> Self {
        Self {
            entered: Semaphore::new(0),
            gate: Semaphore::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Resolves once a `send` call is waiting at the gate.
    pub async fn wait_until_sending(&self) {
        self.entered.acquire().await.expect("gate closed").forget();
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn sent(&self) -> Vec<OrderEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderMailer for GatedMailer {
    async fn send(&self, email: OrderEmail) -> Result<(), NotificationError> {
        self.entered.add_permits(1);
        self.gate.acquire().await.expect("gate closed").forget();
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// Router plus state over a fresh store.
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

pub fn test_config(delivery_mode: &str) -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.delivery_mode = delivery_mode.to_string();
    cfg.mail_from = "Test Warehouse <orders@example.com>".to_string();
    cfg
}

pub async fn sqlite_store() -> Arc<dyn EntityStore> {
    let pool = db::establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    })
    .await
    .expect("failed to open sqlite");
    db::run_migrations(&pool).await.expect("migrations failed");
    Arc::new(SeaOrmStore::new(Arc::new(pool)))
}

pub async fn store_for(backend: Backend) -> Arc<dyn EntityStore> {
    match backend {
        Backend::Sqlite => sqlite_store().await,
        Backend::Embedded => Arc::new(MemoryStore::in_memory()),
    }
}

impl TestApp {
    /// Local delivery mode, no mailer calls.
    pub async fn new(backend: Backend) -> Self {
        Self::with_mailer(backend, "local", Arc::new(LocalOnlyMailer)).await
    }

    pub async fn with_mailer(
        backend: Backend,
        delivery_mode: &str,
        mailer: Arc<dyn OrderMailer>,
    ) -> Self {
        let store = store_for(backend).await;
        Self::from_store(store, delivery_mode, mailer)
    }

    pub async fn with_snapshot(path: &Path) -> Self {
        let store = MemoryStore::open(path).await.expect("failed to open snapshot");
        Self::from_store(Arc::new(store), "local", Arc::new(LocalOnlyMailer))
    }

    pub fn from_store(
        store: Arc<dyn EntityStore>,
        delivery_mode: &str,
        mailer: Arc<dyn OrderMailer>,
    ) -> Self {
        let state = AppState::new(store, mailer, test_config(delivery_mode))
            .expect("failed to build state");
        Self {
            router: build_router(state.clone()),
            state,
        }
    }

    pub async fn raw(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends a JSON request and returns the status with the parsed body (`Null` when empty).
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("failed to serialize request body"))
            }
            None => Body::empty(),
        };
        let response = self.raw(builder.body(body).expect("failed to build request")).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is not JSON")
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None).await
    }

    pub async fn create_supplier(&self, name: &str, email: Option<&str>) -> String {
        let (status, body) = self
            .post("/api/suppliers", json!({ "name": name, "email": email }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create supplier: {body}");
        id_of(&body)
    }

    pub async fn create_product(&self, name: &str, supplier_id: &str, unit: &str) -> String {
        let (status, body) = self
            .post(
                "/api/products",
                json!({ "name": name, "supplier_id": supplier_id, "unit": unit }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create product: {body}");
        id_of(&body)
    }

    pub async fn add_to_order(
        &self,
        supplier_id: &str,
        product_id: &str,
        quantity: &str,
    ) -> (StatusCode, Value) {
        self.post(
            "/api/orders/add-item",
            json!({
                "supplier_id": supplier_id,
                "product_id": product_id,
                "quantity": quantity,
            }),
        )
        .await
    }
}

pub fn id_of(value: &Value) -> String {
    value["id"]
        .as_str()
        .unwrap_or_else(|| panic!("no id in {value}"))
        .to_string()
}

/// Reads a decimal that may be serialized as a string or a number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap_or_else(|_| panic!("bad decimal {s}")),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap_or_else(|_| panic!("bad decimal {n}")),
        other => panic!("not a decimal: {other}"),
    }
}

pub fn ids(values: &Value) -> Vec<String> {
    values
        .as_array()
        .expect("expected an array")
        .iter()
        .map(id_of)
        .collect()
}
