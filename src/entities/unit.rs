use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Measurement unit for products and order lines, stored and serialised as its abbreviation.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum Unit {
    #[sea_orm(string_value = "κιβ")]
    #[serde(rename = "κιβ")]
    #[strum(serialize = "κιβ")]
    Box,
    #[default]
    #[sea_orm(string_value = "τεμ")]
    #[serde(rename = "τεμ")]
    #[strum(serialize = "τεμ")]
    Piece,
    #[sea_orm(string_value = "παλ")]
    #[serde(rename = "παλ")]
    #[strum(serialize = "παλ")]
    Pallet,
    #[sea_orm(string_value = "kg")]
    #[serde(rename = "kg")]
    #[strum(serialize = "kg")]
    Kilogram,
}

impl Unit {
    pub fn abbreviation(self) -> &'static str {
        match self {
            Unit::Box => "κιβ",
            Unit::Piece => "τεμ",
            Unit::Pallet => "παλ",
            Unit::Kilogram => "kg",
        }
    }

    pub fn singular(self) -> &'static str {
        match self {
            Unit::Box => "κιβώτιο",
            Unit::Piece => "τεμάχιο",
            Unit::Pallet => "παλέτα",
            Unit::Kilogram => "κιλό",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            Unit::Box => "κιβώτια",
            Unit::Piece => "τεμάχια",
            Unit::Pallet => "παλέτες",
            Unit::Kilogram => "κιλά",
        }
    }

    /// Display name for a quantity: singular only for exactly one.
    pub fn full_name(self, quantity: Decimal) -> &'static str {
        if quantity == Decimal::ONE {
            self.singular()
        } else {
            self.plural()
        }
    }
}
