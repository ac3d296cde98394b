//! Embedded document store.
//!
//! Collections live in memory behind one `RwLock`. Mutations run against a copy of the state and
//! are swapped in only when they succeed (and, with a snapshot path, once the snapshot is on disk),
//! so a failing operation never leaves partial writes behind.

use super::{
    assemble_orders, ensure_unique_ids, EntityStore, MergeOutcome, NewOrderItem, NewProduct,
    NewSupplier, OrderItemPatch, OrderPatch, OrderWithDetails, ProductPatch, ProductWithSupplier,
    SettingsPatch, SortPosition, StoreResult, SupplierPatch,
};
use crate::entities::order_item::merged_quantity;
use crate::entities::settings::{DEFAULT_BUSINESS_NAME, SETTINGS_SCHEMA_VERSION};
use crate::entities::{Order, OrderItem, OrderStatus, Product, Settings, Supplier, Unit};
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Current snapshot layout.
pub const SNAPSHOT_VERSION: u64 = 2;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    suppliers: HashMap<Uuid, Supplier>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, OrderItem>,
    settings: Option<Settings>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u64,
    #[serde(default)]
    suppliers: Vec<Supplier>,
    #[serde(default)]
    products: Vec<Product>,
    #[serde(default)]
    orders: Vec<Order>,
    #[serde(default)]
    order_items: Vec<OrderItem>,
    #[serde(default)]
    settings: Option<Settings>,
}

impl From<&MemoryState> for Snapshot {
    fn from(state: &MemoryState) -> Self {
        fn sorted<T: Clone>(map: &HashMap<Uuid, T>) -> Vec<T> {
            let mut entries: Vec<(&Uuid, &T)> = map.iter().collect();
            entries.sort_by_key(|(id, _)| **id);
            entries.into_iter().map(|(_, v)| v.clone()).collect()
        }

        Snapshot {
            version: SNAPSHOT_VERSION,
            suppliers: sorted(&state.suppliers),
            products: sorted(&state.products),
            orders: sorted(&state.orders),
            order_items: sorted(&state.order_items),
            settings: state.settings.clone(),
        }
    }
}

impl From<Snapshot> for MemoryState {
    fn from(snapshot: Snapshot) -> Self {
        MemoryState {
            suppliers: snapshot.suppliers.into_iter().map(|s| (s.id, s)).collect(),
            products: snapshot.products.into_iter().map(|p| (p.id, p)).collect(),
            orders: snapshot.orders.into_iter().map(|o| (o.id, o)).collect(),
            order_items: snapshot.order_items.into_iter().map(|i| (i.id, i)).collect(),
            settings: snapshot.settings,
        }
    }
}

/// Parses snapshot bytes, upgrading older layouts step by step.
fn decode_snapshot(bytes: &[u8]) -> StoreResult<MemoryState> {
    let mut value: Value = serde_json::from_slice(bytes)?;
    let version = value.get("version").and_then(Value::as_u64).unwrap_or(1);

    if version > SNAPSHOT_VERSION {
        return Err(ServiceError::StorageError(format!(
            "snapshot version {} is newer than the supported version {}",
            version, SNAPSHOT_VERSION
        )));
    }
    if version < 2 {
        upgrade_v1_to_v2(&mut value)?;
    }

    let snapshot: Snapshot = serde_json::from_value(value)?;
    Ok(snapshot.into())
}

/// Version 1 kept only `company`, `pdfIntroduction` and `pdfFooter` under the settings key.
fn upgrade_v1_to_v2(value: &mut Value) -> StoreResult<()> {
    let root = value.as_object_mut().ok_or_else(|| {
        ServiceError::StorageError("snapshot root is not a JSON object".to_string())
    })?;

    let legacy = root.remove("settings").filter(|v| !v.is_null());
    if let Some(legacy) = legacy {
        let text = |v: Option<&Value>| -> Option<String> {
            v.and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let company = legacy.get("company");
        let field = |key: &str| text(company.and_then(|c| c.get(key)));

        let mut settings = Settings::defaults();
        settings.business_name =
            field("name").unwrap_or_else(|| DEFAULT_BUSINESS_NAME.to_string());
        settings.email = field("email");
        settings.phone = field("phone");
        settings.address = field("address");
        settings.tax_id = field("taxId");
        settings.website = field("website");
        settings.pdf_introduction = text(legacy.get("pdfIntroduction"));
        settings.pdf_footer = text(legacy.get("pdfFooter"));
        settings.schema_version = SETTINGS_SCHEMA_VERSION;

        root.insert("settings".to_string(), serde_json::to_value(settings)?);
    }

    root.insert("version".to_string(), Value::from(2u64));
    info!("Upgraded embedded snapshot from version 1 to 2");
    Ok(())
}

#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            snapshot_path: None,
        }
    }

    /// Opens (or starts) a store persisted to `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state = decode_snapshot(&bytes)?;
                info!(
                    path = %path.display(),
                    suppliers = state.suppliers.len(),
                    products = state.products.len(),
                    orders = state.orders.len(),
                    "Loaded embedded snapshot"
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting empty");
                MemoryState::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    async fn persist(&self, state: &MemoryState) -> StoreResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&Snapshot::from(state))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;

        counter!("orderly_store.snapshot_writes", 1);
        debug!(path = %path.display(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }

    async fn read<R>(&self, f: impl FnOnce(&MemoryState) -> R) -> R {
        let guard = self.state.read().await;
        f(&guard)
    }

    /// Runs `f` against a working copy and commits it only on success.
    async fn mutate<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut MemoryState) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut guard = self.state.write().await;
        let mut working = guard.clone();

        let result = f(&mut working).map_err(|e| {
            counter!("orderly_store.error", 1, "backend" => "embedded", "operation" => operation);
            e
        })?;

        if let Err(e) = self.persist(&working).await {
            warn!(operation, error = %e, "Snapshot write failed, change discarded");
            return Err(e);
        }
        *guard = working;
        Ok(result)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl MemoryState {
    fn with_supplier(&self, product: &Product) -> Option<ProductWithSupplier> {
        self.suppliers
            .get(&product.supplier_id)
            .map(|supplier| ProductWithSupplier {
                product: product.clone(),
                supplier: supplier.clone(),
            })
    }

    fn products_matching(&self, predicate: impl Fn(&Product) -> bool) -> Vec<ProductWithSupplier> {
        let mut rows: Vec<ProductWithSupplier> = self
            .products
            .values()
            .filter(|p| predicate(p))
            .filter_map(|p| self.with_supplier(p))
            .collect();
        rows.sort_by(|a, b| a.product.name.cmp(&b.product.name));
        rows
    }

    fn populate(&self, mut orders: Vec<Order>) -> Vec<OrderWithDetails> {
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let order_ids: HashSet<Uuid> = orders.iter().map(|o| o.id).collect();
        let items: Vec<OrderItem> = self
            .order_items
            .values()
            .filter(|i| order_ids.contains(&i.order_id))
            .cloned()
            .collect();
        assemble_orders(orders, &self.suppliers, items, &self.products)
    }

    fn draft_for(&self, supplier_id: Uuid) -> Option<&Order> {
        self.orders
            .values()
            .find(|o| o.supplier_id == supplier_id && o.status == OrderStatus::Draft)
    }

    fn max_item_position(&self, order_id: Uuid) -> i32 {
        self.order_items
            .values()
            .filter(|i| i.order_id == order_id)
            .map(|i| i.sort_order)
            .max()
            .unwrap_or(-1)
    }

    fn touch(&mut self, order_ids: impl IntoIterator<Item = Uuid>) {
        let now = Utc::now();
        for id in order_ids {
            if let Some(order) = self.orders.get_mut(&id) {
                order.updated_at = now;
            }
        }
    }

    fn require_supplier(&self, id: Uuid) -> StoreResult<()> {
        if self.suppliers.contains_key(&id) {
            Ok(())
        } else {
            Err(ServiceError::not_found("Supplier", id))
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "embedded"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn list_suppliers(&self) -> StoreResult<Vec<Supplier>> {
        Ok(self
            .read(|s| {
                let mut suppliers: Vec<Supplier> = s.suppliers.values().cloned().collect();
                suppliers.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));
                suppliers
            })
            .await)
    }

    async fn get_supplier(&self, id: Uuid) -> StoreResult<Option<Supplier>> {
        Ok(self.read(|s| s.suppliers.get(&id).cloned()).await)
    }

    #[instrument(skip(self))]
    async fn create_supplier(&self, new: NewSupplier) -> StoreResult<Supplier> {
        self.mutate("create_supplier", |s| {
            let sort_order = new.sort_order.unwrap_or_else(|| {
                s.suppliers
                    .values()
                    .map(|x| x.sort_order)
                    .max()
                    .map_or(0, |max| max + 1)
            });
            let supplier = Supplier {
                id: Uuid::new_v4(),
                name: new.name,
                email: new.email,
                phone: new.phone,
                sort_order,
                created_at: Utc::now(),
            };
            s.suppliers.insert(supplier.id, supplier.clone());
            Ok(supplier)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn update_supplier(
        &self,
        id: Uuid,
        patch: SupplierPatch,
    ) -> StoreResult<Option<Supplier>> {
        self.mutate("update_supplier", |s| {
            let Some(supplier) = s.suppliers.get_mut(&id) else {
                return Ok(None);
            };
            if let Some(name) = patch.name {
                supplier.name = name;
            }
            super::apply_optional(&mut supplier.email, patch.email);
            super::apply_optional(&mut supplier.phone, patch.phone);
            if let Some(sort_order) = patch.sort_order {
                supplier.sort_order = sort_order;
            }
            Ok(Some(supplier.clone()))
        })
        .await
    }

    #[instrument(skip(self, positions), fields(count = positions.len()))]
    async fn reorder_suppliers(&self, positions: &[SortPosition]) -> StoreResult<()> {
        ensure_unique_ids(positions)?;
        self.mutate("reorder_suppliers", |s| {
            for position in positions {
                let supplier = s
                    .suppliers
                    .get_mut(&position.id)
                    .ok_or_else(|| ServiceError::not_found("Supplier", position.id))?;
                supplier.sort_order = position.sort_order;
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_supplier(&self, id: Uuid) -> StoreResult<bool> {
        self.mutate("delete_supplier", |s| {
            if s.suppliers.remove(&id).is_none() {
                return Ok(false);
            }

            let product_ids: HashSet<Uuid> = s
                .products
                .values()
                .filter(|p| p.supplier_id == id)
                .map(|p| p.id)
                .collect();
            let order_ids: HashSet<Uuid> = s
                .orders
                .values()
                .filter(|o| o.supplier_id == id)
                .map(|o| o.id)
                .collect();

            let mut touched = HashSet::new();
            s.order_items.retain(|_, item| {
                let owned_order = order_ids.contains(&item.order_id);
                let owned_product = product_ids.contains(&item.product_id);
                if owned_product && !owned_order {
                    touched.insert(item.order_id);
                }
                !(owned_order || owned_product)
            });
            s.orders.retain(|oid, _| !order_ids.contains(oid));
            s.products.retain(|pid, _| !product_ids.contains(pid));
            s.touch(touched);
            Ok(true)
        })
        .await
    }

    async fn list_products(&self, supplier_id: Option<Uuid>) -> StoreResult<Vec<Product>> {
        Ok(self
            .read(|s| {
                let mut products: Vec<Product> = s
                    .products
                    .values()
                    .filter(|p| supplier_id.map_or(true, |sid| p.supplier_id == sid))
                    .cloned()
                    .collect();
                products.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));
                products
            })
            .await)
    }

    async fn list_products_with_suppliers(&self) -> StoreResult<Vec<ProductWithSupplier>> {
        Ok(self.read(|s| s.products_matching(|_| true)).await)
    }

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.read(|s| s.products.get(&id).cloned()).await)
    }

    #[instrument(skip(self))]
    async fn create_product(&self, new: NewProduct) -> StoreResult<Product> {
        self.mutate("create_product", |s| {
            s.require_supplier(new.supplier_id)?;
            let sort_order = new.sort_order.unwrap_or_else(|| {
                s.products
                    .values()
                    .filter(|p| p.supplier_id == new.supplier_id)
                    .map(|p| p.sort_order)
                    .max()
                    .map_or(0, |max| max + 1)
            });
            let product = Product {
                id: Uuid::new_v4(),
                name: new.name,
                supplier_id: new.supplier_id,
                unit: new.unit,
                sort_order,
                created_at: Utc::now(),
            };
            s.products.insert(product.id, product.clone());
            Ok(product)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn update_product(&self, id: Uuid, patch: ProductPatch) -> StoreResult<Option<Product>> {
        self.mutate("update_product", |s| {
            if let Some(supplier_id) = patch.supplier_id {
                if s.products.contains_key(&id) {
                    s.require_supplier(supplier_id)?;
                }
            }
            let Some(product) = s.products.get_mut(&id) else {
                return Ok(None);
            };
            if let Some(name) = patch.name {
                product.name = name;
            }
            if let Some(supplier_id) = patch.supplier_id {
                product.supplier_id = supplier_id;
            }
            if let Some(unit) = patch.unit {
                product.unit = unit;
            }
            if let Some(sort_order) = patch.sort_order {
                product.sort_order = sort_order;
            }
            Ok(Some(product.clone()))
        })
        .await
    }

    #[instrument(skip(self, positions), fields(count = positions.len()))]
    async fn reorder_products(&self, positions: &[SortPosition]) -> StoreResult<()> {
        ensure_unique_ids(positions)?;
        self.mutate("reorder_products", |s| {
            for position in positions {
                let product = s
                    .products
                    .get_mut(&position.id)
                    .ok_or_else(|| ServiceError::not_found("Product", position.id))?;
                product.sort_order = position.sort_order;
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_product(&self, id: Uuid) -> StoreResult<bool> {
        self.mutate("delete_product", |s| {
            if s.products.remove(&id).is_none() {
                return Ok(false);
            }
            let mut touched = HashSet::new();
            s.order_items.retain(|_, item| {
                if item.product_id == id {
                    touched.insert(item.order_id);
                    false
                } else {
                    true
                }
            });
            s.touch(touched);
            Ok(true)
        })
        .await
    }

    async fn search_products(
        &self,
        pattern: &str,
        limit: u64,
    ) -> StoreResult<Vec<ProductWithSupplier>> {
        let needle = pattern.to_lowercase();
        let mut rows = self
            .read(|s| s.products_matching(|p| p.name.to_lowercase().contains(&needle)))
            .await;
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn find_product_duplicates(
        &self,
        name: &str,
        exclude_supplier_id: Option<Uuid>,
    ) -> StoreResult<Vec<ProductWithSupplier>> {
        let needle = name.to_lowercase();
        Ok(self
            .read(|s| {
                s.products_matching(|p| {
                    p.name.to_lowercase() == needle && Some(p.supplier_id) != exclude_supplier_id
                })
            })
            .await)
    }

    async fn list_draft_orders(&self) -> StoreResult<Vec<OrderWithDetails>> {
        Ok(self
            .read(|s| {
                let drafts = s
                    .orders
                    .values()
                    .filter(|o| o.status == OrderStatus::Draft)
                    .cloned()
                    .collect();
                s.populate(drafts)
            })
            .await)
    }

    async fn list_orders(&self) -> StoreResult<Vec<OrderWithDetails>> {
        Ok(self
            .read(|s| s.populate(s.orders.values().cloned().collect()))
            .await)
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<OrderWithDetails>> {
        Ok(self
            .read(|s| {
                let order = s.orders.get(&id).cloned()?;
                s.populate(vec![order]).pop()
            })
            .await)
    }

    async fn get_draft_order_for_supplier(
        &self,
        supplier_id: Uuid,
    ) -> StoreResult<Option<OrderWithDetails>> {
        Ok(self
            .read(|s| {
                let order = s.draft_for(supplier_id).cloned()?;
                s.populate(vec![order]).pop()
            })
            .await)
    }

    #[instrument(skip(self))]
    async fn create_order(&self, supplier_id: Uuid) -> StoreResult<Order> {
        self.mutate("create_order", |s| {
            s.require_supplier(supplier_id)?;
            if s.draft_for(supplier_id).is_some() {
                return Err(ServiceError::Conflict(format!(
                    "Supplier {} already has a draft order",
                    supplier_id
                )));
            }
            let now = Utc::now();
            let order = Order {
                id: Uuid::new_v4(),
                supplier_id,
                status: OrderStatus::Draft,
                created_at: now,
                updated_at: now,
                sent_at: None,
            };
            s.orders.insert(order.id, order.clone());
            Ok(order)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn update_order(&self, id: Uuid, patch: OrderPatch) -> StoreResult<Option<Order>> {
        self.mutate("update_order", |s| {
            let Some(current) = s.orders.get(&id) else {
                return Ok(None);
            };
            if patch.status == Some(OrderStatus::Draft) {
                let supplier_id = current.supplier_id;
                if s
                    .draft_for(supplier_id)
                    .is_some_and(|draft| draft.id != id)
                {
                    return Err(ServiceError::Conflict(format!(
                        "Order {} conflicts with an existing draft",
                        id
                    )));
                }
            }

            let Some(order) = s.orders.get_mut(&id) else {
                return Ok(None);
            };
            if let Some(status) = patch.status {
                order.status = status;
            }
            super::apply_optional(&mut order.sent_at, patch.sent_at);
            order.updated_at = Utc::now();
            Ok(Some(order.clone()))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn mark_order_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> StoreResult<bool> {
        self.mutate("mark_order_sent", |s| match s.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Draft => {
                order.status = OrderStatus::Sent;
                order.sent_at = Some(sent_at);
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_order(&self, id: Uuid) -> StoreResult<bool> {
        self.mutate("delete_order", |s| {
            if s.orders.remove(&id).is_none() {
                return Ok(false);
            }
            s.order_items.retain(|_, item| item.order_id != id);
            Ok(true)
        })
        .await
    }

    async fn get_order_item(&self, id: Uuid) -> StoreResult<Option<OrderItem>> {
        Ok(self.read(|s| s.order_items.get(&id).cloned()).await)
    }

    async fn find_order_item(
        &self,
        order_id: Uuid,
        product_id: Uuid,
    ) -> StoreResult<Option<OrderItem>> {
        Ok(self
            .read(|s| {
                s.order_items
                    .values()
                    .find(|i| i.order_id == order_id && i.product_id == product_id)
                    .cloned()
            })
            .await)
    }

    async fn max_order_item_sort_order(&self, order_id: Uuid) -> StoreResult<i32> {
        Ok(self.read(|s| s.max_item_position(order_id)).await)
    }

    #[instrument(skip(self))]
    async fn add_order_item(&self, new: NewOrderItem) -> StoreResult<OrderItem> {
        self.mutate("add_order_item", |s| {
            if !s.orders.contains_key(&new.order_id) {
                return Err(ServiceError::not_found("Order", new.order_id));
            }
            if !s.products.contains_key(&new.product_id) {
                return Err(ServiceError::not_found("Product", new.product_id));
            }
            let duplicate = s
                .order_items
                .values()
                .any(|i| i.order_id == new.order_id && i.product_id == new.product_id);
            if duplicate {
                return Err(ServiceError::Conflict(format!(
                    "Product {} is already in order {}",
                    new.product_id, new.order_id
                )));
            }

            let sort_order = new
                .sort_order
                .unwrap_or_else(|| s.max_item_position(new.order_id) + 1);
            let item = OrderItem {
                id: Uuid::new_v4(),
                order_id: new.order_id,
                product_id: new.product_id,
                quantity: new.quantity,
                unit: new.unit,
                sort_order,
                created_at: Utc::now(),
            };
            s.order_items.insert(item.id, item.clone());
            s.touch([new.order_id]);
            Ok(item)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn merge_order_item(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        unit: Unit,
    ) -> StoreResult<MergeOutcome> {
        self.mutate("merge_order_item", |s| {
            let order = s
                .orders
                .get(&order_id)
                .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
            if order.status != OrderStatus::Draft {
                return Err(super::order_not_draft(order_id, order.status));
            }
            if !s.products.contains_key(&product_id) {
                return Err(ServiceError::not_found("Product", product_id));
            }

            let existing = s
                .order_items
                .values_mut()
                .find(|i| i.order_id == order_id && i.product_id == product_id);
            let current = existing.as_ref().map_or(Decimal::ZERO, |i| i.quantity);
            let total = merged_quantity(current, quantity)
                .ok_or_else(|| super::quantity_too_large(product_id))?;

            let outcome = match existing {
                Some(item) => {
                    item.quantity = total;
                    item.unit = unit;
                    MergeOutcome {
                        item: item.clone(),
                        created: false,
                    }
                }
                None => {
                    let item = OrderItem {
                        id: Uuid::new_v4(),
                        order_id,
                        product_id,
                        quantity,
                        unit,
                        sort_order: s.max_item_position(order_id) + 1,
                        created_at: Utc::now(),
                    };
                    s.order_items.insert(item.id, item.clone());
                    MergeOutcome {
                        item,
                        created: true,
                    }
                }
            };
            s.touch([order_id]);
            Ok(outcome)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn update_order_item(
        &self,
        id: Uuid,
        patch: OrderItemPatch,
    ) -> StoreResult<Option<OrderItem>> {
        self.mutate("update_order_item", |s| {
            let Some(item) = s.order_items.get_mut(&id) else {
                return Ok(None);
            };
            if let Some(quantity) = patch.quantity {
                item.quantity = quantity;
            }
            if let Some(unit) = patch.unit {
                item.unit = unit;
            }
            if let Some(sort_order) = patch.sort_order {
                item.sort_order = sort_order;
            }
            let updated = item.clone();
            s.touch([updated.order_id]);
            Ok(Some(updated))
        })
        .await
    }

    #[instrument(skip(self, positions), fields(count = positions.len()))]
    async fn reorder_order_items(&self, positions: &[SortPosition]) -> StoreResult<()> {
        ensure_unique_ids(positions)?;
        self.mutate("reorder_order_items", |s| {
            let mut touched = HashSet::new();
            for position in positions {
                let item = s
                    .order_items
                    .get_mut(&position.id)
                    .ok_or_else(|| ServiceError::not_found("Order item", position.id))?;
                item.sort_order = position.sort_order;
                touched.insert(item.order_id);
            }
            s.touch(touched);
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_order_item(&self, id: Uuid) -> StoreResult<bool> {
        self.mutate("delete_order_item", |s| match s.order_items.remove(&id) {
            Some(item) => {
                s.touch([item.order_id]);
                Ok(true)
            }
            None => Ok(false),
        })
        .await
    }

    async fn get_settings(&self) -> StoreResult<Settings> {
        Ok(self
            .read(|s| s.settings.clone().unwrap_or_else(Settings::defaults))
            .await)
    }

    #[instrument(skip(self, patch))]
    async fn update_settings(&self, patch: SettingsPatch) -> StoreResult<Settings> {
        self.mutate("update_settings", |s| {
            let mut record = s.settings.clone().unwrap_or_else(Settings::defaults);
            patch.apply(&mut record);
            record.schema_version = SETTINGS_SCHEMA_VERSION;
            record.updated_at = Utc::now();
            s.settings = Some(record.clone());
            Ok(record)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn clear_all(&self) -> StoreResult<()> {
        self.mutate("clear_all", |s| {
            *s = MemoryState::default();
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    async fn seeded() -> (MemoryStore, Supplier, Product) {
        let store = MemoryStore::in_memory();
        let supplier = store
            .create_supplier(NewSupplier {
                name: "Alpha Foods".into(),
                email: Some("orders@alpha.test".into()),
                phone: None,
                sort_order: None,
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                name: "Flour".into(),
                supplier_id: supplier.id,
                unit: Unit::Box,
                sort_order: None,
            })
            .await
            .unwrap();
        (store, supplier, product)
    }

    #[tokio::test]
    async fn merge_accumulates_and_keeps_position() {
        let (store, supplier, product) = seeded().await;
        let order = store.create_order(supplier.id).await.unwrap();

        let first = store
            .merge_order_item(order.id, product.id, dec!(2), Unit::Box)
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.item.sort_order, 0);

        let second = store
            .merge_order_item(order.id, product.id, dec!(1.5), Unit::Piece)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.item.id, first.item.id);
        assert_eq!(second.item.quantity, dec!(3.5));
        assert_eq!(second.item.unit, Unit::Piece);
        assert_eq!(second.item.sort_order, 0);
    }

    #[tokio::test]
    async fn oversized_merge_is_rejected_without_changes() {
        let (store, supplier, product) = seeded().await;
        let order = store.create_order(supplier.id).await.unwrap();

        let err = store
            .merge_order_item(order.id, product.id, Decimal::MAX, Unit::Box)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        store
            .merge_order_item(order.id, product.id, dec!(99999999.99), Unit::Box)
            .await
            .unwrap();
        let err = store
            .merge_order_item(order.id, product.id, Decimal::MAX, Unit::Box)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        let item = store
            .find_order_item(order.id, product.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.quantity, dec!(99999999.99));
    }

    #[tokio::test]
    async fn sent_orders_take_no_merges_and_send_once() {
        let (store, supplier, product) = seeded().await;
        let order = store.create_order(supplier.id).await.unwrap();
        store
            .merge_order_item(order.id, product.id, dec!(1), Unit::Box)
            .await
            .unwrap();

        assert!(store.mark_order_sent(order.id, Utc::now()).await.unwrap());
        assert!(!store.mark_order_sent(order.id, Utc::now()).await.unwrap());
        assert!(!store.mark_order_sent(Uuid::new_v4(), Utc::now()).await.unwrap());

        let err = store
            .merge_order_item(order.id, product.id, dec!(1), Unit::Box)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidStatus(_));

        let sent = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(sent.order.status, OrderStatus::Sent);
        assert!(sent.order.sent_at.is_some());
        assert_eq!(sent.items[0].item.quantity, dec!(1));
    }

    #[tokio::test]
    async fn second_draft_for_supplier_conflicts() {
        let (store, supplier, _) = seeded().await;
        store.create_order(supplier.id).await.unwrap();
        let err = store.create_order(supplier.id).await.unwrap_err();
        assert_matches!(err, ServiceError::Conflict(_));
    }

    #[tokio::test]
    async fn failed_reorder_applies_nothing() {
        let (store, supplier, product) = seeded().await;
        let result = store
            .reorder_products(&[
                SortPosition {
                    id: product.id,
                    sort_order: 7,
                },
                SortPosition {
                    id: Uuid::new_v4(),
                    sort_order: 8,
                },
            ])
            .await;
        assert_matches!(result, Err(ServiceError::NotFound(_)));

        let products = store.list_products(Some(supplier.id)).await.unwrap();
        assert_eq!(products[0].sort_order, 0);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orderly.json");

        let store = MemoryStore::open(&path).await.unwrap();
        let supplier = store
            .create_supplier(NewSupplier {
                name: "Beta Drinks".into(),
                email: None,
                phone: None,
                sort_order: None,
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                name: "Soda".into(),
                supplier_id: supplier.id,
                unit: Unit::Pallet,
                sort_order: None,
            })
            .await
            .unwrap();
        let order = store.create_order(supplier.id).await.unwrap();
        store
            .merge_order_item(order.id, product.id, dec!(3), Unit::Pallet)
            .await
            .unwrap();
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        let draft = reopened
            .get_draft_order_for_supplier(supplier.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(draft.items.len(), 1);
        assert_eq!(draft.items[0].item.quantity, dec!(3));
        assert_eq!(draft.items[0].product.name, "Soda");
    }

    #[tokio::test]
    async fn version_one_snapshot_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        let legacy = serde_json::json!({
            "settings": {
                "company": {
                    "name": "Kiosk 24",
                    "email": "owner@kiosk.test",
                    "taxId": "",
                    "website": "kiosk.test"
                },
                "pdfIntroduction": "Please deliver by Friday.",
                "pdfFooter": ""
            }
        });
        tokio::fs::write(&path, serde_json::to_vec(&legacy).unwrap())
            .await
            .unwrap();

        let store = MemoryStore::open(&path).await.unwrap();
        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings.business_name, "Kiosk 24");
        assert_eq!(settings.email.as_deref(), Some("owner@kiosk.test"));
        assert_eq!(settings.tax_id, None);
        assert_eq!(settings.website.as_deref(), Some("kiosk.test"));
        assert_eq!(
            settings.pdf_introduction.as_deref(),
            Some("Please deliver by Friday.")
        );
        assert_eq!(settings.pdf_footer, None);
        assert_eq!(settings.schema_version, SETTINGS_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn newer_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.json");
        tokio::fs::write(&path, br#"{"version": 99}"#).await.unwrap();

        let result = MemoryStore::open(&path).await;
        assert_matches!(result, Err(ServiceError::StorageError(_)));
    }

    #[tokio::test]
    async fn deleting_supplier_cascades() {
        let (store, supplier, product) = seeded().await;
        let order = store.create_order(supplier.id).await.unwrap();
        store
            .merge_order_item(order.id, product.id, dec!(1), Unit::Box)
            .await
            .unwrap();

        assert!(store.delete_supplier(supplier.id).await.unwrap());
        assert!(store.get_product(product.id).await.unwrap().is_none());
        assert!(store.get_order(order.id).await.unwrap().is_none());
        assert!(store.list_orders().await.unwrap().is_empty());
        assert!(!store.delete_supplier(supplier.id).await.unwrap());
    }
}
