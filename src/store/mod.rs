//! Storage contract shared by the relational and the embedded backends.
//!
//! Services talk to an `Arc<dyn EntityStore>` and never know which backend is behind it. Every
//! multi-record write (cascades, reorders, the item upsert) is atomic in both implementations.

pub mod memory;
pub mod sea_orm_store;

use crate::entities::{Order, OrderItem, OrderStatus, Product, Settings, Supplier, Unit};
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use sea_orm_store::SeaOrmStore;

pub type StoreResult<T> = Result<T, ServiceError>;

pub(crate) fn order_not_draft(id: Uuid, status: OrderStatus) -> ServiceError {
    ServiceError::InvalidStatus(format!(
        "Order {} is {} and can no longer be edited",
        id, status
    ))
}

pub(crate) fn quantity_too_large(product_id: Uuid) -> ServiceError {
    ServiceError::ValidationError(format!(
        "quantity of product {} would exceed {}",
        product_id,
        crate::entities::order_item::MAX_QUANTITY
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSupplier {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Explicit position; `max + 1` when absent.
    pub sort_order: Option<i32>,
}

/// Partial update. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupplierPatch {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub supplier_id: Uuid,
    pub unit: Unit,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub supplier_id: Option<Uuid>,
    pub unit: Option<Unit>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub sent_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit: Unit,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderItemPatch {
    pub quantity: Option<Decimal>,
    pub unit: Option<Unit>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub business_name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub tax_id: Option<Option<String>>,
    pub website: Option<Option<String>>,
    pub pdf_introduction: Option<Option<String>>,
    pub pdf_footer: Option<Option<String>>,
}

impl SettingsPatch {
    pub fn apply(self, settings: &mut Settings) {
        if let Some(name) = self.business_name {
            settings.business_name = name;
        }
        apply_optional(&mut settings.email, self.email);
        apply_optional(&mut settings.phone, self.phone);
        apply_optional(&mut settings.address, self.address);
        apply_optional(&mut settings.tax_id, self.tax_id);
        apply_optional(&mut settings.website, self.website);
        apply_optional(&mut settings.pdf_introduction, self.pdf_introduction);
        apply_optional(&mut settings.pdf_footer, self.pdf_footer);
    }
}

pub(crate) fn apply_optional<T>(target: &mut Option<T>, patch: Option<Option<T>>) {
    if let Some(value) = patch {
        *target = value;
    }
}

/// One entry of a bulk reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SortPosition {
    pub id: Uuid,
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProductWithSupplier {
    #[serde(flatten)]
    pub product: Product,
    pub supplier: Supplier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemWithProduct {
    #[serde(flatten)]
    pub item: OrderItem,
    pub product: Product,
}

/// An order populated with its supplier and its items (each with its product), items ordered by
/// `sort_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderWithDetails {
    #[serde(flatten)]
    pub order: Order,
    pub supplier: Supplier,
    pub items: Vec<OrderItemWithProduct>,
}

/// Result of the insert-or-increment upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub item: OrderItem,
    pub created: bool,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    // suppliers
    async fn list_suppliers(&self) -> StoreResult<Vec<Supplier>>;
    async fn get_supplier(&self, id: Uuid) -> StoreResult<Option<Supplier>>;
    async fn create_supplier(&self, new: NewSupplier) -> StoreResult<Supplier>;
    async fn update_supplier(&self, id: Uuid, patch: SupplierPatch)
        -> StoreResult<Option<Supplier>>;
    async fn reorder_suppliers(&self, positions: &[SortPosition]) -> StoreResult<()>;
    /// Deletes the supplier with its products, orders and their items.
    async fn delete_supplier(&self, id: Uuid) -> StoreResult<bool>;

    // products
    async fn list_products(&self, supplier_id: Option<Uuid>) -> StoreResult<Vec<Product>>;
    async fn list_products_with_suppliers(&self) -> StoreResult<Vec<ProductWithSupplier>>;
    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>>;
    async fn create_product(&self, new: NewProduct) -> StoreResult<Product>;
    async fn update_product(&self, id: Uuid, patch: ProductPatch) -> StoreResult<Option<Product>>;
    async fn reorder_products(&self, positions: &[SortPosition]) -> StoreResult<()>;
    /// Deletes the product and every order item referencing it.
    async fn delete_product(&self, id: Uuid) -> StoreResult<bool>;
    /// `pattern` is already sanitised; matching is a case-insensitive substring test.
    async fn search_products(&self, pattern: &str, limit: u64)
        -> StoreResult<Vec<ProductWithSupplier>>;
    async fn find_product_duplicates(
        &self,
        name: &str,
        exclude_supplier_id: Option<Uuid>,
    ) -> StoreResult<Vec<ProductWithSupplier>>;

    // orders
    async fn list_draft_orders(&self) -> StoreResult<Vec<OrderWithDetails>>;
    async fn list_orders(&self) -> StoreResult<Vec<OrderWithDetails>>;
    async fn get_order(&self, id: Uuid) -> StoreResult<Option<OrderWithDetails>>;
    async fn get_draft_order_for_supplier(
        &self,
        supplier_id: Uuid,
    ) -> StoreResult<Option<OrderWithDetails>>;
    /// Fails with `Conflict` when the supplier already has a draft.
    async fn create_order(&self, supplier_id: Uuid) -> StoreResult<Order>;
    async fn update_order(&self, id: Uuid, patch: OrderPatch) -> StoreResult<Option<Order>>;
    /// Moves the order from `draft` to `sent` in one conditional write. Returns `false` when no
    /// draft with this id exists, so two senders cannot both win.
    async fn mark_order_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> StoreResult<bool>;
    async fn delete_order(&self, id: Uuid) -> StoreResult<bool>;

    // order items
    async fn get_order_item(&self, id: Uuid) -> StoreResult<Option<OrderItem>>;
    async fn find_order_item(&self, order_id: Uuid, product_id: Uuid)
        -> StoreResult<Option<OrderItem>>;
    /// Highest item position in the order, -1 when it has no items.
    async fn max_order_item_sort_order(&self, order_id: Uuid) -> StoreResult<i32>;
    async fn add_order_item(&self, new: NewOrderItem) -> StoreResult<OrderItem>;
    /// Atomic insert-or-increment keyed on `(order_id, product_id)`. Fails with `InvalidStatus`
    /// when the order is no longer a draft and with `ValidationError` when the merged quantity
    /// would exceed `order_item::MAX_QUANTITY`.
    async fn merge_order_item(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        unit: Unit,
    ) -> StoreResult<MergeOutcome>;
    async fn update_order_item(&self, id: Uuid, patch: OrderItemPatch)
        -> StoreResult<Option<OrderItem>>;
    async fn reorder_order_items(&self, positions: &[SortPosition]) -> StoreResult<()>;
    async fn delete_order_item(&self, id: Uuid) -> StoreResult<bool>;

    // settings
    async fn get_settings(&self) -> StoreResult<Settings>;
    async fn update_settings(&self, patch: SettingsPatch) -> StoreResult<Settings>;

    /// Removes every record and resets settings.
    async fn clear_all(&self) -> StoreResult<()>;
}

/// Joins orders with their suppliers and items from batch-fetched lookups.
pub(crate) fn assemble_orders(
    orders: Vec<Order>,
    suppliers: &HashMap<Uuid, Supplier>,
    mut items: Vec<OrderItem>,
    products: &HashMap<Uuid, Product>,
) -> Vec<OrderWithDetails> {
    items.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    let mut items_by_order: HashMap<Uuid, Vec<OrderItemWithProduct>> = HashMap::new();
    for item in items {
        if let Some(product) = products.get(&item.product_id) {
            items_by_order
                .entry(item.order_id)
                .or_default()
                .push(OrderItemWithProduct {
                    product: product.clone(),
                    item,
                });
        }
    }

    orders
        .into_iter()
        .filter_map(|order| {
            let supplier = suppliers.get(&order.supplier_id)?.clone();
            let items = items_by_order.remove(&order.id).unwrap_or_default();
            Some(OrderWithDetails {
                order,
                supplier,
                items,
            })
        })
        .collect()
}

pub(crate) fn ensure_unique_ids(positions: &[SortPosition]) -> StoreResult<()> {
    let mut seen = std::collections::HashSet::with_capacity(positions.len());
    for position in positions {
        if !seen.insert(position.id) {
            return Err(ServiceError::ValidationError(format!(
                "id {} appears more than once in the reorder list",
                position.id
            )));
        }
    }
    Ok(())
}
