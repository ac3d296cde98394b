use super::common::{
    created_response, no_content_response, success_response, ApiJson, ApiQuery, ReorderRequest,
};
use crate::{
    entities::Product,
    errors::{ErrorResponse, ServiceError},
    services::catalog::{CreateProductRequest, SearchHit, UpdateProductRequest},
    store::ProductWithSupplier,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ProductFilter {
    /// Only products of this supplier
    pub supplier_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SearchParams {
    /// Search term; fewer than 2 usable characters returns nothing
    #[serde(default)]
    pub q: String,
    /// Result cap (default 20, max 100)
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DuplicateParams {
    #[serde(default)]
    pub name: String,
    pub exclude_supplier_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/api/products",
    params(ProductFilter),
    responses((status = 200, description = "Products by display order", body = [Product])),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<ProductFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state
        .services
        .catalog
        .list_products(filter.supplier_id)
        .await?;
    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/products/with-suppliers",
    responses((status = 200, description = "Products joined with their supplier", body = [ProductWithSupplier])),
    tag = "products"
)]
pub async fn list_products_with_suppliers(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state.services.catalog.list_products_with_suppliers().await?;
    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/products/search",
    params(SearchParams),
    responses((status = 200, description = "Matching products", body = [ProductWithSupplier])),
    tag = "products"
)]
pub async fn search_products(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state
        .services
        .catalog
        .search_products(&params.q, params.limit)
        .await?;
    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/products/duplicates",
    params(DuplicateParams),
    responses((status = 200, description = "Same-name products of other suppliers", body = [ProductWithSupplier])),
    tag = "products"
)]
pub async fn find_duplicates(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<DuplicateParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state
        .services
        .catalog
        .find_duplicates(&params.name, params.exclude_supplier_id)
        .await?;
    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/search",
    params(SearchParams),
    responses((status = 200, description = "Matching suppliers, then products", body = [SearchHit])),
    tag = "products"
)]
pub async fn search_all(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let hits = state.services.catalog.search(&params.q).await?;
    Ok(success_response(hits))
}

#[utoipa::path(
    get,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = Product),
        (status = 404, description = "Product not found", body = ErrorResponse)
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.catalog.get_product(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = Product),
        (status = 400, description = "Invalid product", body = ErrorResponse),
        (status = 404, description = "Supplier not found", body = ErrorResponse)
    ),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateProductRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.create_product(payload).await?;
    Ok(created_response(product))
}

#[utoipa::path(
    patch,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Product updated", body = Product),
        (status = 404, description = "Product or target supplier not found", body = ErrorResponse)
    ),
    tag = "products"
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateProductRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.update_product(id, payload).await?;
    Ok(success_response(product))
}

#[utoipa::path(
    put,
    path = "/api/products/order",
    request_body = ReorderRequest,
    responses(
        (status = 204, description = "Positions applied"),
        (status = 404, description = "Unknown product in the list, nothing applied", body = ErrorResponse)
    ),
    tag = "products"
)]
pub async fn reorder_products(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ReorderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let ordering = &state.services.ordering;
    match payload {
        ReorderRequest::Positions(positions) => ordering.apply_product_positions(&positions).await?,
        ReorderRequest::Ids { ids } => ordering.reorder_products(&ids).await?,
    }
    Ok(no_content_response())
}

#[utoipa::path(
    delete,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 204, description = "Product and its order lines deleted"),
        (status = 404, description = "Product not found", body = ErrorResponse)
    ),
    tag = "products"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.catalog.delete_product(id).await?;
    Ok(no_content_response())
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/with-suppliers", get(list_products_with_suppliers))
        .route("/search", get(search_products))
        .route("/duplicates", get(find_duplicates))
        .route("/order", put(reorder_products))
        .route(
            "/:id",
            get(get_product).patch(update_product).delete(delete_product),
        )
}
