//! Business logic in front of the `EntityStore`.

pub mod aggregator;
pub mod catalog;
pub mod lifecycle;
pub mod locks;
pub mod ordering;
pub mod settings;

use crate::entities::order_item::MAX_QUANTITY;
use crate::errors::ServiceError;
use crate::notifications::OrderMailer;
use crate::store::EntityStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;

pub use aggregator::DraftOrderAggregator;
pub use catalog::CatalogService;
pub use lifecycle::{DeliveryMode, OrderLifecycle};
pub use locks::SupplierLocks;
pub use ordering::OrderingService;
pub use settings::SettingsService;

/// Quantities are stored with two decimal places.
pub const QUANTITY_SCALE: u32 = 2;

/// Every service, sharing one store handle.
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub aggregator: Arc<DraftOrderAggregator>,
    pub ordering: Arc<OrderingService>,
    pub lifecycle: Arc<OrderLifecycle>,
    pub settings: Arc<SettingsService>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn EntityStore>,
        mailer: Arc<dyn OrderMailer>,
        delivery: DeliveryMode,
        mail_from: String,
    ) -> Self {
        // drafts are created, filled and sent under the same per-supplier lock
        let locks = SupplierLocks::new();
        Self {
            catalog: Arc::new(CatalogService::new(store.clone())),
            aggregator: Arc::new(DraftOrderAggregator::new(store.clone(), locks.clone())),
            ordering: Arc::new(OrderingService::new(store.clone())),
            lifecycle: Arc::new(OrderLifecycle::new(
                store.clone(),
                locks,
                mailer,
                delivery,
                mail_from,
            )),
            settings: Arc::new(SettingsService::new(store)),
        }
    }
}

/// Rounds to the stored scale and rejects values outside `(0, MAX_QUANTITY]`.
pub(crate) fn normalize_quantity(quantity: Decimal) -> Result<Decimal, ServiceError> {
    let rounded = quantity.round_dp(QUANTITY_SCALE);
    if rounded <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "quantity must be greater than zero".to_string(),
        ));
    }
    if rounded > MAX_QUANTITY {
        return Err(ServiceError::ValidationError(format!(
            "quantity must not exceed {}",
            MAX_QUANTITY
        )));
    }
    Ok(rounded)
}

/// Trims and turns blank strings into `None`.
pub(crate) fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn check_email(field: &str, value: Option<&str>) -> Result<(), ServiceError> {
    match value {
        Some(email) if !validator::validate_email(email) => Err(ServiceError::ValidationError(
            format!("{}: '{}' is not a valid email address", field, email),
        )),
        _ => Ok(()),
    }
}

/// Lets a PATCH body tell "absent" (`None`) from explicit `null` (`Some(None)`).
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantities_round_to_two_places() {
        assert_eq!(normalize_quantity(dec!(1.005)).unwrap(), dec!(1.00));
        assert_eq!(normalize_quantity(dec!(2.456)).unwrap(), dec!(2.46));
        assert!(normalize_quantity(dec!(0)).is_err());
        assert!(normalize_quantity(dec!(-1)).is_err());
        assert!(normalize_quantity(dec!(0.001)).is_err());
    }

    #[test]
    fn quantities_above_the_column_limit_are_rejected() {
        assert_eq!(normalize_quantity(dec!(99999999.99)).unwrap(), MAX_QUANTITY);
        assert!(normalize_quantity(dec!(100000000)).is_err());
        assert!(normalize_quantity(Decimal::MAX).is_err());
    }

    #[test]
    fn blank_optionals_collapse() {
        assert_eq!(clean_optional(Some("  ".into())), None);
        assert_eq!(clean_optional(Some(" a@b.test ".into())), Some("a@b.test".into()));
        assert_eq!(clean_optional(None), None);
    }
}
