use super::common::{no_content_response, success_response, ApiJson};
use crate::{
    entities::Settings,
    errors::{ErrorResponse, ServiceError},
    services::settings::UpdateSettingsRequest,
    AppState,
};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use tracing::warn;

#[utoipa::path(
    get,
    path = "/api/settings",
    responses((status = 200, description = "Business settings", body = Settings)),
    tag = "settings"
)]
pub async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.settings.get().await?))
}

#[utoipa::path(
    patch,
    path = "/api/settings",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings updated", body = Settings),
        (status = 400, description = "Invalid settings", body = ErrorResponse)
    ),
    tag = "settings"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<UpdateSettingsRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.settings.update(payload).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/reset",
    responses((status = 204, description = "All suppliers, products, orders and settings removed")),
    tag = "admin"
)]
pub async fn reset_data(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    warn!(backend = state.store.backend(), "Clearing all data");
    state.store.clear_all().await?;
    Ok(no_content_response())
}

pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/", get(get_settings).patch(update_settings))
}
