use super::common::{created_response, no_content_response, success_response, ApiJson};
use crate::{
    errors::{ErrorResponse, ServiceError},
    services::aggregator::{AddToOrderRequest, AddToOrderResult},
    services::lifecycle::{SendOrderRequest, SendOrderResult, UpdateOrderRequest},
    store::OrderWithDetails,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub supplier_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/api/orders",
    responses((status = 200, description = "Every order, most recently updated first", body = [OrderWithDetails])),
    tag = "orders"
)]
pub async fn list_orders(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.lifecycle.list_orders().await?))
}

#[utoipa::path(
    get,
    path = "/api/orders/draft",
    responses((status = 200, description = "Draft orders", body = [OrderWithDetails])),
    tag = "orders"
)]
pub async fn list_draft_orders(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.services.lifecycle.list_draft_orders().await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/orders/by-supplier/{supplier_id}",
    params(("supplier_id" = Uuid, Path, description = "Supplier id")),
    responses((status = 200, description = "The supplier's draft, or null", body = Option<OrderWithDetails>)),
    tag = "orders"
)]
pub async fn draft_for_supplier(
    State(state): State<AppState>,
    Path(supplier_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state
            .services
            .lifecycle
            .draft_for_supplier(supplier_id)
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with supplier and items", body = OrderWithDetails),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.lifecycle.get_order(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Draft created", body = OrderWithDetails),
        (status = 200, description = "Supplier already had a draft", body = OrderWithDetails),
        (status = 404, description = "Supplier not found", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let draft = state
        .services
        .aggregator
        .ensure_draft(payload.supplier_id)
        .await?;
    Ok(if draft.created {
        created_response(draft.order)
    } else {
        success_response(draft.order)
    })
}

#[utoipa::path(
    post,
    path = "/api/orders/add-item",
    request_body = AddToOrderRequest,
    responses(
        (status = 200, description = "Product added to the supplier's draft", body = AddToOrderResult),
        (status = 400, description = "Invalid quantity or product of another supplier", body = ErrorResponse),
        (status = 404, description = "Supplier or product not found", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn add_to_order(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<AddToOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state.services.aggregator.add_to_order(payload).await?;
    Ok(success_response(result))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderRequest,
    responses(
        (status = 200, description = "Order updated", body = OrderWithDetails),
        (status = 400, description = "Unsupported status transition", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.lifecycle.update_order(id, payload).await?;
    Ok(success_response(order))
}

#[utoipa::path(
    delete,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 204, description = "Order and its items deleted"),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.lifecycle.delete_order(id).await?;
    Ok(no_content_response())
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/send",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = SendOrderRequest,
    responses(
        (status = 200, description = "Order delivered and marked sent", body = SendOrderResult),
        (status = 400, description = "Order is not a draft, is empty, or the supplier has no email", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse),
        (status = 502, description = "Email delivery failed, order left as draft", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn send_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<ApiJson<SendOrderRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = payload.map(|ApiJson(body)| body).unwrap_or_default();
    let result = state.services.lifecycle.send(id, request).await?;
    Ok(success_response(result))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/draft", get(list_draft_orders))
        .route("/add-item", post(add_to_order))
        .route("/by-supplier/:supplier_id", get(draft_for_supplier))
        .route(
            "/:id",
            get(get_order).patch(update_order).delete(delete_order),
        )
        .route("/:id/send", post(send_order))
}
