use super::{check_email, clean_optional, double_option};
use crate::entities::Settings;
use crate::errors::ServiceError;
use crate::store::{EntityStore, SettingsPatch};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

/// PATCH body for the settings record. `null` clears a field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateSettingsRequest {
    pub business_name: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub tax_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub website: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub pdf_introduction: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub pdf_footer: Option<Option<String>>,
}

pub struct SettingsService {
    store: Arc<dyn EntityStore>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self) -> Result<Settings, ServiceError> {
        self.store.get_settings().await
    }

    #[instrument(skip(self, request))]
    pub async fn update(&self, request: UpdateSettingsRequest) -> Result<Settings, ServiceError> {
        let business_name = match request.business_name.map(|n| n.trim().to_string()) {
            Some(name) if name.is_empty() => {
                return Err(ServiceError::ValidationError(
                    "business_name must not be empty".to_string(),
                ))
            }
            other => other,
        };

        let patch = SettingsPatch {
            business_name,
            email: request.email.map(clean_optional),
            phone: request.phone.map(clean_optional),
            address: request.address.map(clean_optional),
            tax_id: request.tax_id.map(clean_optional),
            website: request.website.map(clean_optional),
            pdf_introduction: request.pdf_introduction.map(clean_optional),
            pdf_footer: request.pdf_footer.map(clean_optional),
        };
        check_email("email", patch.email.as_ref().and_then(|e| e.as_deref()))?;

        let settings = self.store.update_settings(patch).await?;
        info!("Settings updated");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::settings::DEFAULT_BUSINESS_NAME;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn defaults_then_partial_update() {
        let service = SettingsService::new(Arc::new(MemoryStore::in_memory()));
        assert_eq!(service.get().await.unwrap().business_name, DEFAULT_BUSINESS_NAME);

        let updated = service
            .update(UpdateSettingsRequest {
                email: Some(Some("office@kiosk.test".into())),
                pdf_footer: Some(Some("Thank you".into())),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.email.as_deref(), Some("office@kiosk.test"));
        assert_eq!(updated.business_name, DEFAULT_BUSINESS_NAME);

        let cleared = service
            .update(UpdateSettingsRequest {
                pdf_footer: Some(None),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(cleared.pdf_footer, None);
        assert_eq!(cleared.email.as_deref(), Some("office@kiosk.test"));
    }

    #[tokio::test]
    async fn rejects_invalid_email() {
        let service = SettingsService::new(Arc::new(MemoryStore::in_memory()));
        let err = service
            .update(UpdateSettingsRequest {
                email: Some(Some("nope".into())),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[test]
    fn null_and_absent_are_distinguished() {
        let body: UpdateSettingsRequest =
            serde_json::from_str(r#"{"phone": null, "website": "kiosk.test"}"#).unwrap();
        assert_eq!(body.phone, Some(None));
        assert_eq!(body.website, Some(Some("kiosk.test".into())));
        assert_eq!(body.email, None);
    }
}
