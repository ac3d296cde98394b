pub mod common;
pub mod order_items;
pub mod orders;
pub mod products;
pub mod settings;
pub mod suppliers;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// Every `/api` route, without state applied.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/suppliers", suppliers::supplier_routes())
        .nest("/products", products::product_routes())
        .nest("/orders", orders::order_routes())
        .nest("/order-items", order_items::order_item_routes())
        .nest("/settings", settings::settings_routes())
        .route("/search", get(products::search_all))
        .route("/admin/reset", post(settings::reset_data))
}
