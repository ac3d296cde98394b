use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Orderly API",
        version = "0.1.0",
        description = r#"
# Orderly purchasing API

Keeps a catalog of suppliers and the products bought from them, and collects products into one
draft purchase order per supplier until the order is sent.

## Errors

Every error uses the same JSON body:

```json
{
  "error": "quantity must be greater than zero",
  "status": "Bad Request",
  "request_id": "3f0c6a2e-5f7a-4c55-9d0e-0b6f3f1f2a10",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Ordering

Suppliers, products and order items carry a `sort_order`. The `PUT .../order` endpoints accept
either `[{"id": ..., "sort_order": 0}, ...]` or `{"ids": [...]}` in display order, and apply all
positions or none.
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "suppliers", description = "Supplier catalog"),
        (name = "products", description = "Products and search"),
        (name = "orders", description = "Draft and sent purchase orders"),
        (name = "order-items", description = "Lines of an order"),
        (name = "settings", description = "Business profile"),
        (name = "admin", description = "Maintenance endpoints")
    ),
    paths(
        crate::handlers::suppliers::list_suppliers,
        crate::handlers::suppliers::get_supplier,
        crate::handlers::suppliers::create_supplier,
        crate::handlers::suppliers::update_supplier,
        crate::handlers::suppliers::reorder_suppliers,
        crate::handlers::suppliers::delete_supplier,

        crate::handlers::products::list_products,
        crate::handlers::products::list_products_with_suppliers,
        crate::handlers::products::search_products,
        crate::handlers::products::find_duplicates,
        crate::handlers::products::search_all,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::reorder_products,
        crate::handlers::products::delete_product,

        crate::handlers::orders::list_orders,
        crate::handlers::orders::list_draft_orders,
        crate::handlers::orders::draft_for_supplier,
        crate::handlers::orders::get_order,
        crate::handlers::orders::create_order,
        crate::handlers::orders::add_to_order,
        crate::handlers::orders::update_order,
        crate::handlers::orders::delete_order,
        crate::handlers::orders::send_order,

        crate::handlers::order_items::get_order_item,
        crate::handlers::order_items::add_order_item,
        crate::handlers::order_items::update_order_item,
        crate::handlers::order_items::reorder_order_items,
        crate::handlers::order_items::delete_order_item,

        crate::handlers::settings::get_settings,
        crate::handlers::settings::update_settings,
        crate::handlers::settings::reset_data,
    ),
    components(
        schemas(
            crate::entities::Supplier,
            crate::entities::Product,
            crate::entities::Order,
            crate::entities::OrderItem,
            crate::entities::Settings,
            crate::entities::OrderStatus,
            crate::entities::Unit,

            crate::store::SortPosition,
            crate::store::ProductWithSupplier,
            crate::store::OrderItemWithProduct,
            crate::store::OrderWithDetails,

            crate::services::catalog::CreateSupplierRequest,
            crate::services::catalog::UpdateSupplierRequest,
            crate::services::catalog::CreateProductRequest,
            crate::services::catalog::UpdateProductRequest,
            crate::services::catalog::SearchHit,
            crate::services::aggregator::AddToOrderRequest,
            crate::services::aggregator::AddItemRequest,
            crate::services::aggregator::AddToOrderResult,
            crate::services::lifecycle::DeliveryMode,
            crate::services::lifecycle::SendOrderRequest,
            crate::services::lifecycle::SendOrderResult,
            crate::services::lifecycle::UpdateOrderRequest,
            crate::services::lifecycle::UpdateOrderItemRequest,
            crate::services::settings::UpdateSettingsRequest,

            crate::handlers::common::ReorderRequest,
            crate::handlers::orders::CreateOrderRequest,

            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_resource() {
        let json = serde_json::to_string(&ApiDoc::openapi()).unwrap();
        for path in [
            "/api/suppliers",
            "/api/products/search",
            "/api/orders/{id}/send",
            "/api/order-items/order",
            "/api/settings",
            "/api/search",
        ] {
            assert!(json.contains(path), "missing {path}");
        }
    }
}
