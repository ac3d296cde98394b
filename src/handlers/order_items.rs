use super::common::{no_content_response, success_response, ApiJson, ReorderRequest};
use crate::{
    entities::OrderItem,
    errors::{ErrorResponse, ServiceError},
    services::aggregator::{AddItemRequest, AddToOrderResult},
    services::lifecycle::UpdateOrderItemRequest,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/order-items/{id}",
    params(("id" = Uuid, Path, description = "Order item id")),
    responses(
        (status = 200, description = "Order item", body = OrderItem),
        (status = 404, description = "Order item not found", body = ErrorResponse)
    ),
    tag = "order-items"
)]
pub async fn get_order_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.services.lifecycle.get_order_item(id).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/order-items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Product merged into the order", body = AddToOrderResult),
        (status = 400, description = "Invalid quantity or order is not a draft", body = ErrorResponse),
        (status = 404, description = "Order or product not found", body = ErrorResponse)
    ),
    tag = "order-items"
)]
pub async fn add_order_item(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state.services.aggregator.add_item_to_order(payload).await?;
    Ok(success_response(result))
}

#[utoipa::path(
    patch,
    path = "/api/order-items/{id}",
    params(("id" = Uuid, Path, description = "Order item id")),
    request_body = UpdateOrderItemRequest,
    responses(
        (status = 200, description = "Order item updated", body = OrderItem),
        (status = 400, description = "Invalid quantity or order is not a draft", body = ErrorResponse),
        (status = 404, description = "Order item not found", body = ErrorResponse)
    ),
    tag = "order-items"
)]
pub async fn update_order_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateOrderItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state
        .services
        .lifecycle
        .update_order_item(id, payload)
        .await?;
    Ok(success_response(item))
}

#[utoipa::path(
    put,
    path = "/api/order-items/order",
    request_body = ReorderRequest,
    responses(
        (status = 204, description = "Positions applied"),
        (status = 404, description = "Unknown item in the list, nothing applied", body = ErrorResponse)
    ),
    tag = "order-items"
)]
pub async fn reorder_order_items(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ReorderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let ordering = &state.services.ordering;
    match payload {
        ReorderRequest::Positions(positions) => {
            ordering.apply_order_item_positions(&positions).await?
        }
        ReorderRequest::Ids { ids } => ordering.reorder_order_items(&ids).await?,
    }
    Ok(no_content_response())
}

#[utoipa::path(
    delete,
    path = "/api/order-items/{id}",
    params(("id" = Uuid, Path, description = "Order item id")),
    responses(
        (status = 204, description = "Order item deleted"),
        (status = 404, description = "Order item not found", body = ErrorResponse)
    ),
    tag = "order-items"
)]
pub async fn delete_order_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.lifecycle.delete_order_item(id).await?;
    Ok(no_content_response())
}

pub fn order_item_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(add_order_item))
        .route("/order", put(reorder_order_items))
        .route(
            "/:id",
            get(get_order_item)
                .patch(update_order_item)
                .delete(delete_order_item),
        )
}
