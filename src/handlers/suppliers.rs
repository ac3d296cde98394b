use super::common::{
    created_response, no_content_response, success_response, ApiJson, ReorderRequest,
};
use crate::{
    entities::Supplier,
    errors::{ErrorResponse, ServiceError},
    services::catalog::{CreateSupplierRequest, UpdateSupplierRequest},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/suppliers",
    summary = "List suppliers",
    description = "All suppliers in their manual display order",
    responses((status = 200, description = "Suppliers", body = [Supplier])),
    tag = "suppliers"
)]
pub async fn list_suppliers(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let suppliers = state.services.catalog.list_suppliers().await?;
    Ok(success_response(suppliers))
}

#[utoipa::path(
    get,
    path = "/api/suppliers/{id}",
    params(("id" = Uuid, Path, description = "Supplier id")),
    responses(
        (status = 200, description = "Supplier", body = Supplier),
        (status = 404, description = "Supplier not found", body = ErrorResponse)
    ),
    tag = "suppliers"
)]
pub async fn get_supplier(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let supplier = state.services.catalog.get_supplier(id).await?;
    Ok(success_response(supplier))
}

#[utoipa::path(
    post,
    path = "/api/suppliers",
    request_body = CreateSupplierRequest,
    responses(
        (status = 201, description = "Supplier created", body = Supplier),
        (status = 400, description = "Invalid supplier", body = ErrorResponse)
    ),
    tag = "suppliers"
)]
pub async fn create_supplier(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateSupplierRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let supplier = state.services.catalog.create_supplier(payload).await?;
    Ok(created_response(supplier))
}

#[utoipa::path(
    patch,
    path = "/api/suppliers/{id}",
    params(("id" = Uuid, Path, description = "Supplier id")),
    request_body = UpdateSupplierRequest,
    responses(
        (status = 200, description = "Supplier updated", body = Supplier),
        (status = 404, description = "Supplier not found", body = ErrorResponse)
    ),
    tag = "suppliers"
)]
pub async fn update_supplier(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateSupplierRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let supplier = state.services.catalog.update_supplier(id, payload).await?;
    Ok(success_response(supplier))
}

#[utoipa::path(
    put,
    path = "/api/suppliers/order",
    request_body = ReorderRequest,
    responses(
        (status = 204, description = "Positions applied"),
        (status = 404, description = "Unknown supplier in the list, nothing applied", body = ErrorResponse)
    ),
    tag = "suppliers"
)]
pub async fn reorder_suppliers(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ReorderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let ordering = &state.services.ordering;
    match payload {
        ReorderRequest::Positions(positions) => {
            ordering.apply_supplier_positions(&positions).await?
        }
        ReorderRequest::Ids { ids } => ordering.reorder_suppliers(&ids).await?,
    }
    Ok(no_content_response())
}

#[utoipa::path(
    delete,
    path = "/api/suppliers/{id}",
    params(("id" = Uuid, Path, description = "Supplier id")),
    responses(
        (status = 204, description = "Supplier and everything it owns deleted"),
        (status = 404, description = "Supplier not found", body = ErrorResponse)
    ),
    tag = "suppliers"
)]
pub async fn delete_supplier(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.catalog.delete_supplier(id).await?;
    Ok(no_content_response())
}

pub fn supplier_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_suppliers).post(create_supplier))
        .route("/order", put(reorder_suppliers))
        .route(
            "/:id",
            get(get_supplier)
                .patch(update_supplier)
                .delete(delete_supplier),
        )
}
