//! Relational `EntityStore` on sea-orm. Runs on postgres in production and sqlite locally.

use super::{
    assemble_orders, ensure_unique_ids, EntityStore, MergeOutcome, NewOrderItem, NewProduct,
    NewSupplier, OrderItemPatch, OrderPatch, OrderWithDetails, ProductPatch, ProductWithSupplier,
    SettingsPatch, SortPosition, StoreResult, SupplierPatch,
};
use crate::db::DbPool;
use crate::entities::order_item::merged_quantity;
use crate::entities::{
    order, order_item, product, settings, supplier, Order, OrderItem, OrderStatus, Product,
    Settings, Supplier, Unit,
};
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Alias, Expr, Func, OnConflict, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct SeaOrmStore {
    db: Arc<DbPool>,
}

fn db_err(operation: &'static str) -> impl FnOnce(DbErr) -> ServiceError {
    move |e| {
        error!(operation, error = %e, "Database operation failed");
        counter!("orderly_store.error", 1, "backend" => "database", "operation" => operation);
        ServiceError::DatabaseError(e)
    }
}

impl SeaOrmStore {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DbPool {
        &self.db
    }

    /// SQLite's `LOWER` folds ASCII only, so Greek names are matched in Rust there.
    fn folds_case_in_sql(&self) -> bool {
        self.db.get_database_backend() != DbBackend::Sqlite
    }
}

fn lower_name() -> SimpleExpr {
    Expr::expr(Func::lower(Expr::col((product::Entity, product::Column::Name)))).into()
}

async fn max_supplier_sort_order<C: ConnectionTrait>(conn: &C) -> Result<Option<i32>, DbErr> {
    Ok(supplier::Entity::find()
        .select_only()
        .column_as(supplier::Column::SortOrder.max(), "max_sort_order")
        .into_tuple::<Option<i32>>()
        .one(conn)
        .await?
        .flatten())
}

async fn max_product_sort_order<C: ConnectionTrait>(
    conn: &C,
    supplier_id: Uuid,
) -> Result<Option<i32>, DbErr> {
    Ok(product::Entity::find()
        .select_only()
        .column_as(product::Column::SortOrder.max(), "max_sort_order")
        .filter(product::Column::SupplierId.eq(supplier_id))
        .into_tuple::<Option<i32>>()
        .one(conn)
        .await?
        .flatten())
}

async fn max_item_sort_order<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<i32, DbErr> {
    Ok(order_item::Entity::find()
        .select_only()
        .column_as(order_item::Column::SortOrder.max(), "max_sort_order")
        .filter(order_item::Column::OrderId.eq(order_id))
        .into_tuple::<Option<i32>>()
        .one(conn)
        .await?
        .flatten()
        .unwrap_or(-1))
}

async fn touch_orders<C: ConnectionTrait>(conn: &C, order_ids: Vec<Uuid>) -> Result<(), DbErr> {
    if order_ids.is_empty() {
        return Ok(());
    }
    order::Entity::update_many()
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.is_in(order_ids))
        .exec(conn)
        .await?;
    Ok(())
}

/// Batch-fetches suppliers, items and products for a page of orders.
async fn populate_orders<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<Order>,
) -> Result<Vec<OrderWithDetails>, DbErr> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let supplier_ids: HashSet<Uuid> = orders.iter().map(|o| o.supplier_id).collect();
    let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

    let suppliers: HashMap<Uuid, Supplier> = supplier::Entity::find()
        .filter(supplier::Column::Id.is_in(supplier_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.is_in(order_ids))
        .order_by_asc(order_item::Column::SortOrder)
        .all(conn)
        .await?;

    let product_ids: HashSet<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products: HashMap<Uuid, Product> = if product_ids.is_empty() {
        HashMap::new()
    } else {
        product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect()
    };

    Ok(assemble_orders(orders, &suppliers, items, &products))
}

fn with_suppliers(rows: Vec<(Product, Option<Supplier>)>) -> Vec<ProductWithSupplier> {
    rows.into_iter()
        .filter_map(|(product, supplier)| {
            supplier.map(|supplier| ProductWithSupplier { product, supplier })
        })
        .collect()
}

fn settings_active_model(model: &Settings) -> settings::ActiveModel {
    settings::ActiveModel {
        id: Set(model.id),
        business_name: Set(model.business_name.clone()),
        email: Set(model.email.clone()),
        phone: Set(model.phone.clone()),
        address: Set(model.address.clone()),
        tax_id: Set(model.tax_id.clone()),
        website: Set(model.website.clone()),
        pdf_introduction: Set(model.pdf_introduction.clone()),
        pdf_footer: Set(model.pdf_footer.clone()),
        schema_version: Set(model.schema_version),
        updated_at: Set(model.updated_at),
    }
}

#[async_trait]
impl EntityStore for SeaOrmStore {
    fn backend(&self) -> &'static str {
        "database"
    }

    async fn ping(&self) -> StoreResult<()> {
        crate::db::check_connection(&self.db).await
    }

    #[instrument(skip(self))]
    async fn list_suppliers(&self) -> StoreResult<Vec<Supplier>> {
        supplier::Entity::find()
            .order_by_asc(supplier::Column::SortOrder)
            .order_by_asc(supplier::Column::Name)
            .all(&*self.db)
            .await
            .map_err(db_err("list_suppliers"))
    }

    #[instrument(skip(self))]
    async fn get_supplier(&self, id: Uuid) -> StoreResult<Option<Supplier>> {
        supplier::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(db_err("get_supplier"))
    }

    #[instrument(skip(self))]
    async fn create_supplier(&self, new: NewSupplier) -> StoreResult<Supplier> {
        let txn = self.db.begin().await.map_err(db_err("create_supplier"))?;

        let sort_order = match new.sort_order {
            Some(explicit) => explicit,
            None => max_supplier_sort_order(&txn)
                .await
                .map_err(db_err("create_supplier"))?
                .map_or(0, |max| max + 1),
        };

        let supplier = supplier::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new.name),
            email: Set(new.email),
            phone: Set(new.phone),
            sort_order: Set(sort_order),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(db_err("create_supplier"))?;

        txn.commit().await.map_err(db_err("create_supplier"))?;
        Ok(supplier)
    }

    #[instrument(skip(self))]
    async fn update_supplier(
        &self,
        id: Uuid,
        patch: SupplierPatch,
    ) -> StoreResult<Option<Supplier>> {
        let Some(existing) = supplier::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(db_err("update_supplier"))?
        else {
            return Ok(None);
        };

        let mut active: supplier::ActiveModel = existing.into();
        if let Some(name) = patch.name {
            active.name = Set(name);
        }
        if let Some(email) = patch.email {
            active.email = Set(email);
        }
        if let Some(phone) = patch.phone {
            active.phone = Set(phone);
        }
        if let Some(sort_order) = patch.sort_order {
            active.sort_order = Set(sort_order);
        }

        let updated = active
            .update(&*self.db)
            .await
            .map_err(db_err("update_supplier"))?;
        Ok(Some(updated))
    }

    #[instrument(skip(self, positions), fields(count = positions.len()))]
    async fn reorder_suppliers(&self, positions: &[SortPosition]) -> StoreResult<()> {
        ensure_unique_ids(positions)?;
        let txn = self.db.begin().await.map_err(db_err("reorder_suppliers"))?;
        for position in positions {
            let result = supplier::Entity::update_many()
                .col_expr(supplier::Column::SortOrder, Expr::value(position.sort_order))
                .filter(supplier::Column::Id.eq(position.id))
                .exec(&txn)
                .await
                .map_err(db_err("reorder_suppliers"))?;
            if result.rows_affected == 0 {
                // dropping the transaction rolls back the positions applied so far
                return Err(ServiceError::not_found("Supplier", position.id));
            }
        }
        txn.commit().await.map_err(db_err("reorder_suppliers"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_supplier(&self, id: Uuid) -> StoreResult<bool> {
        let txn = self.db.begin().await.map_err(db_err("delete_supplier"))?;

        let order_ids: Vec<Uuid> = order::Entity::find()
            .select_only()
            .column(order::Column::Id)
            .filter(order::Column::SupplierId.eq(id))
            .into_tuple()
            .all(&txn)
            .await
            .map_err(db_err("delete_supplier"))?;
        let product_ids: Vec<Uuid> = product::Entity::find()
            .select_only()
            .column(product::Column::Id)
            .filter(product::Column::SupplierId.eq(id))
            .into_tuple()
            .all(&txn)
            .await
            .map_err(db_err("delete_supplier"))?;

        // items of this supplier's products may sit in other suppliers' orders after a
        // product was re-assigned; those orders get touched
        let foreign_orders: Vec<Uuid> = if product_ids.is_empty() {
            Vec::new()
        } else {
            order_item::Entity::find()
                .select_only()
                .column(order_item::Column::OrderId)
                .filter(order_item::Column::ProductId.is_in(product_ids.clone()))
                .filter(order_item::Column::OrderId.is_not_in(order_ids.clone()))
                .distinct()
                .into_tuple()
                .all(&txn)
                .await
                .map_err(db_err("delete_supplier"))?
        };

        if !order_ids.is_empty() {
            order_item::Entity::delete_many()
                .filter(order_item::Column::OrderId.is_in(order_ids.clone()))
                .exec(&txn)
                .await
                .map_err(db_err("delete_supplier"))?;
            order::Entity::delete_many()
                .filter(order::Column::Id.is_in(order_ids))
                .exec(&txn)
                .await
                .map_err(db_err("delete_supplier"))?;
        }
        if !product_ids.is_empty() {
            order_item::Entity::delete_many()
                .filter(order_item::Column::ProductId.is_in(product_ids.clone()))
                .exec(&txn)
                .await
                .map_err(db_err("delete_supplier"))?;
            product::Entity::delete_many()
                .filter(product::Column::Id.is_in(product_ids))
                .exec(&txn)
                .await
                .map_err(db_err("delete_supplier"))?;
        }
        touch_orders(&txn, foreign_orders)
            .await
            .map_err(db_err("delete_supplier"))?;

        let deleted = supplier::Entity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(db_err("delete_supplier"))?;

        txn.commit().await.map_err(db_err("delete_supplier"))?;
        Ok(deleted.rows_affected > 0)
    }

    #[instrument(skip(self))]
    async fn list_products(&self, supplier_id: Option<Uuid>) -> StoreResult<Vec<Product>> {
        let mut query = product::Entity::find();
        if let Some(supplier_id) = supplier_id {
            query = query.filter(product::Column::SupplierId.eq(supplier_id));
        }
        query
            .order_by_asc(product::Column::SortOrder)
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await
            .map_err(db_err("list_products"))
    }

    #[instrument(skip(self))]
    async fn list_products_with_suppliers(&self) -> StoreResult<Vec<ProductWithSupplier>> {
        let rows = product::Entity::find()
            .find_also_related(supplier::Entity)
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await
            .map_err(db_err("list_products_with_suppliers"))?;
        Ok(with_suppliers(rows))
    }

    #[instrument(skip(self))]
    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(db_err("get_product"))
    }

    #[instrument(skip(self))]
    async fn create_product(&self, new: NewProduct) -> StoreResult<Product> {
        let txn = self.db.begin().await.map_err(db_err("create_product"))?;

        let supplier_exists = supplier::Entity::find_by_id(new.supplier_id)
            .one(&txn)
            .await
            .map_err(db_err("create_product"))?
            .is_some();
        if !supplier_exists {
            return Err(ServiceError::not_found("Supplier", new.supplier_id));
        }

        let sort_order = match new.sort_order {
            Some(explicit) => explicit,
            None => max_product_sort_order(&txn, new.supplier_id)
                .await
                .map_err(db_err("create_product"))?
                .map_or(0, |max| max + 1),
        };

        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new.name),
            supplier_id: Set(new.supplier_id),
            unit: Set(new.unit),
            sort_order: Set(sort_order),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(db_err("create_product"))?;

        txn.commit().await.map_err(db_err("create_product"))?;
        Ok(product)
    }

    #[instrument(skip(self))]
    async fn update_product(&self, id: Uuid, patch: ProductPatch) -> StoreResult<Option<Product>> {
        let txn = self.db.begin().await.map_err(db_err("update_product"))?;

        let Some(existing) = product::Entity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(db_err("update_product"))?
        else {
            return Ok(None);
        };

        if let Some(supplier_id) = patch.supplier_id {
            let exists = supplier::Entity::find_by_id(supplier_id)
                .one(&txn)
                .await
                .map_err(db_err("update_product"))?
                .is_some();
            if !exists {
                return Err(ServiceError::not_found("Supplier", supplier_id));
            }
        }

        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = patch.name {
            active.name = Set(name);
        }
        if let Some(supplier_id) = patch.supplier_id {
            active.supplier_id = Set(supplier_id);
        }
        if let Some(unit) = patch.unit {
            active.unit = Set(unit);
        }
        if let Some(sort_order) = patch.sort_order {
            active.sort_order = Set(sort_order);
        }

        let updated = active.update(&txn).await.map_err(db_err("update_product"))?;
        txn.commit().await.map_err(db_err("update_product"))?;
        Ok(Some(updated))
    }

    #[instrument(skip(self, positions), fields(count = positions.len()))]
    async fn reorder_products(&self, positions: &[SortPosition]) -> StoreResult<()> {
        ensure_unique_ids(positions)?;
        let txn = self.db.begin().await.map_err(db_err("reorder_products"))?;
        for position in positions {
            let result = product::Entity::update_many()
                .col_expr(product::Column::SortOrder, Expr::value(position.sort_order))
                .filter(product::Column::Id.eq(position.id))
                .exec(&txn)
                .await
                .map_err(db_err("reorder_products"))?;
            if result.rows_affected == 0 {
                return Err(ServiceError::not_found("Product", position.id));
            }
        }
        txn.commit().await.map_err(db_err("reorder_products"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_product(&self, id: Uuid) -> StoreResult<bool> {
        let txn = self.db.begin().await.map_err(db_err("delete_product"))?;

        let affected_orders: Vec<Uuid> = order_item::Entity::find()
            .select_only()
            .column(order_item::Column::OrderId)
            .filter(order_item::Column::ProductId.eq(id))
            .distinct()
            .into_tuple()
            .all(&txn)
            .await
            .map_err(db_err("delete_product"))?;

        order_item::Entity::delete_many()
            .filter(order_item::Column::ProductId.eq(id))
            .exec(&txn)
            .await
            .map_err(db_err("delete_product"))?;
        let deleted = product::Entity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(db_err("delete_product"))?;
        touch_orders(&txn, affected_orders)
            .await
            .map_err(db_err("delete_product"))?;

        txn.commit().await.map_err(db_err("delete_product"))?;
        Ok(deleted.rows_affected > 0)
    }

    #[instrument(skip(self))]
    async fn search_products(
        &self,
        pattern: &str,
        limit: u64,
    ) -> StoreResult<Vec<ProductWithSupplier>> {
        let needle = pattern.to_lowercase();
        let query = product::Entity::find()
            .find_also_related(supplier::Entity)
            .order_by_asc(product::Column::Name);

        let rows = if self.folds_case_in_sql() {
            query
                .filter(lower_name().like(format!("%{}%", needle)))
                .limit(limit)
                .all(&*self.db)
                .await
                .map_err(db_err("search_products"))?
        } else {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            query
                .all(&*self.db)
                .await
                .map_err(db_err("search_products"))?
                .into_iter()
                .filter(|(p, _)| p.name.to_lowercase().contains(&needle))
                .take(limit)
                .collect()
        };
        debug!(matches = rows.len(), "product search completed");
        Ok(with_suppliers(rows))
    }

    #[instrument(skip(self))]
    async fn find_product_duplicates(
        &self,
        name: &str,
        exclude_supplier_id: Option<Uuid>,
    ) -> StoreResult<Vec<ProductWithSupplier>> {
        let needle = name.to_lowercase();
        let mut query = product::Entity::find().find_also_related(supplier::Entity);
        if let Some(excluded) = exclude_supplier_id {
            query = query.filter(product::Column::SupplierId.ne(excluded));
        }
        let in_sql = self.folds_case_in_sql();
        if in_sql {
            query = query.filter(lower_name().eq(needle.clone()));
        }
        let mut rows = query
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await
            .map_err(db_err("find_product_duplicates"))?;
        if !in_sql {
            rows.retain(|(p, _)| p.name.to_lowercase() == needle);
        }
        Ok(with_suppliers(rows))
    }

    #[instrument(skip(self))]
    async fn list_draft_orders(&self) -> StoreResult<Vec<OrderWithDetails>> {
        let orders = order::Entity::find()
            .filter(order::Column::Status.eq(OrderStatus::Draft))
            .order_by_desc(order::Column::UpdatedAt)
            .all(&*self.db)
            .await
            .map_err(db_err("list_draft_orders"))?;
        populate_orders(&*self.db, orders)
            .await
            .map_err(db_err("list_draft_orders"))
    }

    #[instrument(skip(self))]
    async fn list_orders(&self) -> StoreResult<Vec<OrderWithDetails>> {
        let orders = order::Entity::find()
            .order_by_desc(order::Column::UpdatedAt)
            .all(&*self.db)
            .await
            .map_err(db_err("list_orders"))?;
        populate_orders(&*self.db, orders)
            .await
            .map_err(db_err("list_orders"))
    }

    #[instrument(skip(self))]
    async fn get_order(&self, id: Uuid) -> StoreResult<Option<OrderWithDetails>> {
        let Some(order) = order::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(db_err("get_order"))?
        else {
            return Ok(None);
        };
        Ok(populate_orders(&*self.db, vec![order])
            .await
            .map_err(db_err("get_order"))?
            .pop())
    }

    #[instrument(skip(self))]
    async fn get_draft_order_for_supplier(
        &self,
        supplier_id: Uuid,
    ) -> StoreResult<Option<OrderWithDetails>> {
        let Some(order) = order::Entity::find()
            .filter(order::Column::SupplierId.eq(supplier_id))
            .filter(order::Column::Status.eq(OrderStatus::Draft))
            .order_by_desc(order::Column::UpdatedAt)
            .one(&*self.db)
            .await
            .map_err(db_err("get_draft_order_for_supplier"))?
        else {
            return Ok(None);
        };
        Ok(populate_orders(&*self.db, vec![order])
            .await
            .map_err(db_err("get_draft_order_for_supplier"))?
            .pop())
    }

    #[instrument(skip(self))]
    async fn create_order(&self, supplier_id: Uuid) -> StoreResult<Order> {
        let txn = self.db.begin().await.map_err(db_err("create_order"))?;

        let supplier_exists = supplier::Entity::find_by_id(supplier_id)
            .one(&txn)
            .await
            .map_err(db_err("create_order"))?
            .is_some();
        if !supplier_exists {
            return Err(ServiceError::not_found("Supplier", supplier_id));
        }

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            supplier_id: Set(supplier_id),
            status: Set(OrderStatus::Draft),
            created_at: Set(now),
            updated_at: Set(now),
            sent_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            ServiceError::from_db(
                e,
                format!("Supplier {} already has a draft order", supplier_id),
            )
        })?;

        txn.commit().await.map_err(db_err("create_order"))?;
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn update_order(&self, id: Uuid, patch: OrderPatch) -> StoreResult<Option<Order>> {
        let Some(existing) = order::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(db_err("update_order"))?
        else {
            return Ok(None);
        };

        let mut active: order::ActiveModel = existing.into();
        if let Some(status) = patch.status {
            active.status = Set(status);
        }
        if let Some(sent_at) = patch.sent_at {
            active.sent_at = Set(sent_at);
        }

        let updated = active.update(&*self.db).await.map_err(|e| {
            ServiceError::from_db(e, format!("Order {} conflicts with an existing draft", id))
        })?;
        Ok(Some(updated))
    }

    #[instrument(skip(self))]
    async fn mark_order_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> StoreResult<bool> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Sent.to_string()))
            .col_expr(order::Column::SentAt, Expr::value(sent_at))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::Status.eq(OrderStatus::Draft))
            .exec(&*self.db)
            .await
            .map_err(db_err("mark_order_sent"))?;
        Ok(result.rows_affected == 1)
    }

    #[instrument(skip(self))]
    async fn delete_order(&self, id: Uuid) -> StoreResult<bool> {
        let txn = self.db.begin().await.map_err(db_err("delete_order"))?;
        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(id))
            .exec(&txn)
            .await
            .map_err(db_err("delete_order"))?;
        let deleted = order::Entity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(db_err("delete_order"))?;
        txn.commit().await.map_err(db_err("delete_order"))?;
        Ok(deleted.rows_affected > 0)
    }

    #[instrument(skip(self))]
    async fn get_order_item(&self, id: Uuid) -> StoreResult<Option<OrderItem>> {
        order_item::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(db_err("get_order_item"))
    }

    #[instrument(skip(self))]
    async fn find_order_item(
        &self,
        order_id: Uuid,
        product_id: Uuid,
    ) -> StoreResult<Option<OrderItem>> {
        order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await
            .map_err(db_err("find_order_item"))
    }

    #[instrument(skip(self))]
    async fn max_order_item_sort_order(&self, order_id: Uuid) -> StoreResult<i32> {
        max_item_sort_order(&*self.db, order_id)
            .await
            .map_err(db_err("max_order_item_sort_order"))
    }

    #[instrument(skip(self))]
    async fn add_order_item(&self, new: NewOrderItem) -> StoreResult<OrderItem> {
        let txn = self.db.begin().await.map_err(db_err("add_order_item"))?;

        let sort_order = match new.sort_order {
            Some(explicit) => explicit,
            None => max_item_sort_order(&txn, new.order_id)
                .await
                .map_err(db_err("add_order_item"))?
                + 1,
        };

        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(new.order_id),
            product_id: Set(new.product_id),
            quantity: Set(new.quantity),
            unit: Set(new.unit),
            sort_order: Set(sort_order),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            ServiceError::from_db(
                e,
                format!(
                    "Product {} is already in order {}",
                    new.product_id, new.order_id
                ),
            )
        })?;

        touch_orders(&txn, vec![new.order_id])
            .await
            .map_err(db_err("add_order_item"))?;
        txn.commit().await.map_err(db_err("add_order_item"))?;
        Ok(item)
    }

    #[instrument(skip(self))]
    async fn merge_order_item(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        unit: Unit,
    ) -> StoreResult<MergeOutcome> {
        let txn = self.db.begin().await.map_err(db_err("merge_order_item"))?;

        // row lock on postgres keeps a concurrent send from flipping the status mid-merge
        let target = order::Entity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(db_err("merge_order_item"))?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        if target.status != OrderStatus::Draft {
            return Err(super::order_not_draft(order_id, target.status));
        }

        let current = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await
            .map_err(db_err("merge_order_item"))?
            .map_or(Decimal::ZERO, |item| item.quantity);
        if merged_quantity(current, quantity).is_none() {
            return Err(super::quantity_too_large(product_id));
        }

        let next_position = max_item_sort_order(&txn, order_id)
            .await
            .map_err(db_err("merge_order_item"))?
            + 1;
        let candidate_id = Uuid::new_v4();

        let candidate = order_item::ActiveModel {
            id: Set(candidate_id),
            order_id: Set(order_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            unit: Set(unit),
            sort_order: Set(next_position),
            created_at: Set(Utc::now()),
        };

        // quantity accumulates on the existing row, the latest unit wins
        let on_conflict = OnConflict::columns([
            order_item::Column::OrderId,
            order_item::Column::ProductId,
        ])
        .value(
            order_item::Column::Quantity,
            Expr::col((order_item::Entity, order_item::Column::Quantity)).add(Expr::col((
                Alias::new("excluded"),
                order_item::Column::Quantity,
            ))),
        )
        .update_column(order_item::Column::Unit)
        .to_owned();

        order_item::Entity::insert(candidate)
            .on_conflict(on_conflict)
            .exec_without_returning(&txn)
            .await
            .map_err(db_err("merge_order_item"))?;

        let item = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await
            .map_err(db_err("merge_order_item"))?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "order item for product {} vanished during upsert",
                    product_id
                ))
            })?;

        touch_orders(&txn, vec![order_id])
            .await
            .map_err(db_err("merge_order_item"))?;
        txn.commit().await.map_err(db_err("merge_order_item"))?;

        let created = item.id == candidate_id;
        Ok(MergeOutcome { item, created })
    }

    #[instrument(skip(self))]
    async fn update_order_item(
        &self,
        id: Uuid,
        patch: OrderItemPatch,
    ) -> StoreResult<Option<OrderItem>> {
        let txn = self.db.begin().await.map_err(db_err("update_order_item"))?;

        let Some(existing) = order_item::Entity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(db_err("update_order_item"))?
        else {
            return Ok(None);
        };
        let order_id = existing.order_id;

        let mut active: order_item::ActiveModel = existing.into();
        if let Some(quantity) = patch.quantity {
            active.quantity = Set(quantity);
        }
        if let Some(unit) = patch.unit {
            active.unit = Set(unit);
        }
        if let Some(sort_order) = patch.sort_order {
            active.sort_order = Set(sort_order);
        }

        let updated = active
            .update(&txn)
            .await
            .map_err(db_err("update_order_item"))?;
        touch_orders(&txn, vec![order_id])
            .await
            .map_err(db_err("update_order_item"))?;
        txn.commit().await.map_err(db_err("update_order_item"))?;
        Ok(Some(updated))
    }

    #[instrument(skip(self, positions), fields(count = positions.len()))]
    async fn reorder_order_items(&self, positions: &[SortPosition]) -> StoreResult<()> {
        ensure_unique_ids(positions)?;
        if positions.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin().await.map_err(db_err("reorder_order_items"))?;

        let ids: Vec<Uuid> = positions.iter().map(|p| p.id).collect();
        let items = order_item::Entity::find()
            .filter(order_item::Column::Id.is_in(ids))
            .all(&txn)
            .await
            .map_err(db_err("reorder_order_items"))?;
        let known: HashSet<Uuid> = items.iter().map(|i| i.id).collect();
        if let Some(missing) = positions.iter().find(|p| !known.contains(&p.id)) {
            return Err(ServiceError::not_found("Order item", missing.id));
        }

        for position in positions {
            order_item::Entity::update_many()
                .col_expr(
                    order_item::Column::SortOrder,
                    Expr::value(position.sort_order),
                )
                .filter(order_item::Column::Id.eq(position.id))
                .exec(&txn)
                .await
                .map_err(db_err("reorder_order_items"))?;
        }

        let affected: HashSet<Uuid> = items.iter().map(|i| i.order_id).collect();
        touch_orders(&txn, affected.into_iter().collect())
            .await
            .map_err(db_err("reorder_order_items"))?;
        txn.commit().await.map_err(db_err("reorder_order_items"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_order_item(&self, id: Uuid) -> StoreResult<bool> {
        let txn = self.db.begin().await.map_err(db_err("delete_order_item"))?;

        let Some(existing) = order_item::Entity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(db_err("delete_order_item"))?
        else {
            return Ok(false);
        };

        order_item::Entity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(db_err("delete_order_item"))?;
        touch_orders(&txn, vec![existing.order_id])
            .await
            .map_err(db_err("delete_order_item"))?;
        txn.commit().await.map_err(db_err("delete_order_item"))?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn get_settings(&self) -> StoreResult<Settings> {
        Ok(settings::Entity::find_by_id(settings::SETTINGS_ID)
            .one(&*self.db)
            .await
            .map_err(db_err("get_settings"))?
            .unwrap_or_else(Settings::defaults))
    }

    #[instrument(skip(self, patch))]
    async fn update_settings(&self, patch: SettingsPatch) -> StoreResult<Settings> {
        let txn = self.db.begin().await.map_err(db_err("update_settings"))?;

        let existing = settings::Entity::find_by_id(settings::SETTINGS_ID)
            .one(&txn)
            .await
            .map_err(db_err("update_settings"))?;
        let is_new = existing.is_none();

        let mut record = existing.unwrap_or_else(Settings::defaults);
        patch.apply(&mut record);
        record.schema_version = settings::SETTINGS_SCHEMA_VERSION;
        record.updated_at = Utc::now();

        let active = settings_active_model(&record);
        let saved = if is_new {
            active.insert(&txn).await
        } else {
            active.update(&txn).await
        }
        .map_err(db_err("update_settings"))?;

        txn.commit().await.map_err(db_err("update_settings"))?;
        Ok(saved)
    }

    #[instrument(skip(self))]
    async fn clear_all(&self) -> StoreResult<()> {
        let txn = self.db.begin().await.map_err(db_err("clear_all"))?;
        order_item::Entity::delete_many()
            .exec(&txn)
            .await
            .map_err(db_err("clear_all"))?;
        order::Entity::delete_many()
            .exec(&txn)
            .await
            .map_err(db_err("clear_all"))?;
        product::Entity::delete_many()
            .exec(&txn)
            .await
            .map_err(db_err("clear_all"))?;
        supplier::Entity::delete_many()
            .exec(&txn)
            .await
            .map_err(db_err("clear_all"))?;
        settings::Entity::delete_many()
            .exec(&txn)
            .await
            .map_err(db_err("clear_all"))?;
        txn.commit().await.map_err(db_err("clear_all"))?;
        Ok(())
    }
}
