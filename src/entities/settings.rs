use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Id of the single settings row.
pub const SETTINGS_ID: i32 = 1;
/// Current shape of the settings record.
pub const SETTINGS_SCHEMA_VERSION: i32 = 2;
pub const DEFAULT_BUSINESS_NAME: &str = "Αποθήκη";

/// Business details printed on outgoing orders.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "settings")]
#[schema(as = Settings)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    #[serde(skip_serializing, default = "default_id")]
    pub id: i32,
    pub business_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<String>,
    pub website: Option<String>,
    pub pdf_introduction: Option<String>,
    pub pdf_footer: Option<String>,
    pub schema_version: i32,
    pub updated_at: DateTime<Utc>,
}

fn default_id() -> i32 {
    SETTINGS_ID
}

impl Model {
    pub fn defaults() -> Self {
        Self {
            id: SETTINGS_ID,
            business_name: DEFAULT_BUSINESS_NAME.to_string(),
            email: None,
            phone: None,
            address: None,
            tax_id: None,
            website: None,
            pdf_introduction: None,
            pdf_footer: None,
            schema_version: SETTINGS_SCHEMA_VERSION,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
