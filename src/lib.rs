//! Orderly API library
//!
//! Supplier and product catalog, one draft purchase order per supplier, and sending of orders
//! by email or locally, over either a relational database or an embedded snapshot store.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod store;
pub mod tracing;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::notifications::{HttpMailer, LocalOnlyMailer, OrderMailer};
use crate::services::{AppServices, DeliveryMode};
use crate::store::{EntityStore, MemoryStore, SeaOrmStore};
use axum::{http::HeaderValue, routing::get, Router};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub services: AppServices,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EntityStore>,
        mailer: Arc<dyn OrderMailer>,
        config: AppConfig,
    ) -> Result<Self, ServiceError> {
        let delivery: DeliveryMode = config.delivery_mode.parse()?;
        let services = AppServices::new(store.clone(), mailer, delivery, config.mail_from.clone());
        Ok(Self {
            store,
            services,
            config: Arc::new(config),
        })
    }

    /// Builds the store and mailer the configuration asks for.
    pub async fn from_config(config: AppConfig) -> Result<Self, ServiceError> {
        let store = build_store(&config).await?;
        let mailer = build_mailer(&config)?;
        Self::new(store, mailer, config)
    }
}

/// Opens the configured backend. The database backend is migrated first when `auto_migrate` is set.
pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn EntityStore>, ServiceError> {
    if config.uses_embedded_store() {
        let store = match config.embedded_snapshot_path.as_deref() {
            Some(path) if !path.trim().is_empty() => MemoryStore::open(path).await?,
            _ => {
                ::tracing::warn!("Embedded store has no snapshot path; data is lost on exit");
                MemoryStore::in_memory()
            }
        };
        return Ok(Arc::new(store));
    }

    let pool = db::establish_connection_from_app_config(config).await?;
    if config.auto_migrate {
        db::run_migrations(&pool).await?;
    }
    Ok(Arc::new(SeaOrmStore::new(Arc::new(pool))))
}

pub fn build_mailer(config: &AppConfig) -> Result<Arc<dyn OrderMailer>, ServiceError> {
    if config.sends_email() {
        Ok(Arc::new(HttpMailer::from_config(config)?))
    } else {
        Ok(Arc::new(LocalOnlyMailer))
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

/// Full application router: `/api`, health probes, Swagger UI and the HTTP middleware stack.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));
    let cors = cors_layer(&state.config);

    Router::<AppState>::new()
        .route("/", get(|| async { "orderly-api up" }))
        .nest("/api", handlers::api_routes())
        .merge(openapi::swagger_ui())
        .with_state(state.clone())
        .merge(health::health_routes(state.store.clone()))
        .layer(tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(axum::middleware::from_fn(tracing::request_id_middleware))
}
