//! Manual display order for suppliers, products and order lines.

use crate::errors::ServiceError;
use crate::store::{ensure_unique_ids, EntityStore, SortPosition};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Positions for an id list in display order: each id gets its zero-based index.
pub fn positions_from_ids(ids: &[Uuid]) -> Result<Vec<SortPosition>, ServiceError> {
    let positions: Vec<SortPosition> = ids
        .iter()
        .zip(0..)
        .map(|(id, sort_order)| SortPosition {
            id: *id,
            sort_order,
        })
        .collect();
    ensure_unique_ids(&positions)?;
    Ok(positions)
}

pub struct OrderingService {
    store: Arc<dyn EntityStore>,
}

impl OrderingService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn reorder_suppliers(&self, ids: &[Uuid]) -> Result<(), ServiceError> {
        self.apply_supplier_positions(&positions_from_ids(ids)?).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn reorder_products(&self, ids: &[Uuid]) -> Result<(), ServiceError> {
        self.apply_product_positions(&positions_from_ids(ids)?).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn reorder_order_items(&self, ids: &[Uuid]) -> Result<(), ServiceError> {
        self.apply_order_item_positions(&positions_from_ids(ids)?).await
    }

    pub async fn apply_supplier_positions(
        &self,
        positions: &[SortPosition],
    ) -> Result<(), ServiceError> {
        ensure_unique_ids(positions)?;
        if positions.is_empty() {
            return Ok(());
        }
        self.store.reorder_suppliers(positions).await?;
        info!(count = positions.len(), "Suppliers reordered");
        Ok(())
    }

    pub async fn apply_product_positions(
        &self,
        positions: &[SortPosition],
    ) -> Result<(), ServiceError> {
        ensure_unique_ids(positions)?;
        if positions.is_empty() {
            return Ok(());
        }
        self.store.reorder_products(positions).await?;
        info!(count = positions.len(), "Products reordered");
        Ok(())
    }

    pub async fn apply_order_item_positions(
        &self,
        positions: &[SortPosition],
    ) -> Result<(), ServiceError> {
        ensure_unique_ids(positions)?;
        if positions.is_empty() {
            return Ok(());
        }
        self.store.reorder_order_items(positions).await?;
        info!(count = positions.len(), "Order items reordered");
        Ok(())
    }
}
