//! Accumulates products into one draft order per supplier.

use super::{normalize_quantity, SupplierLocks};
use crate::entities::{OrderItem, Product, Unit};
use crate::errors::ServiceError;
use crate::store::{EntityStore, OrderWithDetails};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddToOrderRequest {
    pub supplier_id: Uuid,
    pub product_id: Uuid,
    #[schema(value_type = String, example = "2")]
    pub quantity: Decimal,
    #[serde(default)]
    pub unit: Unit,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
    #[schema(value_type = String, example = "1")]
    pub quantity: Decimal,
    #[serde(default)]
    pub unit: Unit,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddToOrderResult {
    pub order: OrderWithDetails,
    pub item: OrderItem,
    /// `false` when the quantity was merged into an existing line.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DraftResult {
    pub order: OrderWithDetails,
    pub created: bool,
}

pub struct DraftOrderAggregator {
    store: Arc<dyn EntityStore>,
    locks: SupplierLocks,
}

fn ensure_supplied_by(product: &Product, supplier_id: Uuid) -> Result<(), ServiceError> {
    if product.supplier_id != supplier_id {
        return Err(ServiceError::ValidationError(format!(
            "Product {} does not belong to supplier {}",
            product.id, supplier_id
        )));
    }
    Ok(())
}

impl DraftOrderAggregator {
    pub fn new(store: Arc<dyn EntityStore>, locks: SupplierLocks) -> Self {
        Self { store, locks }
    }

    /// Finds or creates the draft. Caller holds the supplier lock.
    async fn find_or_create_draft(
        &self,
        supplier_id: Uuid,
    ) -> Result<(Uuid, bool), ServiceError> {
        if let Some(draft) = self.store.get_draft_order_for_supplier(supplier_id).await? {
            return Ok((draft.order.id, false));
        }

        match self.store.create_order(supplier_id).await {
            Ok(order) => {
                counter!("orderly_orders.drafts_created", 1);
                info!(order_id = %order.id, supplier_id = %supplier_id, "Draft order created");
                Ok((order.id, true))
            }
            Err(ServiceError::Conflict(_)) => {
                // another process created it between our read and insert
                debug!(supplier_id = %supplier_id, "Draft created concurrently, re-reading");
                let draft = self
                    .store
                    .get_draft_order_for_supplier(supplier_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "draft for supplier {} vanished after conflict",
                            supplier_id
                        ))
                    })?;
                Ok((draft.order.id, false))
            }
            Err(e) => Err(e),
        }
    }

    async fn load_order(&self, order_id: Uuid) -> Result<OrderWithDetails, ServiceError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))
    }

    /// Returns the supplier's draft, creating an empty one when there is none.
    #[instrument(skip(self))]
    pub async fn ensure_draft(&self, supplier_id: Uuid) -> Result<DraftResult, ServiceError> {
        if self.store.get_supplier(supplier_id).await?.is_none() {
            return Err(ServiceError::not_found("Supplier", supplier_id));
        }

        let _guard = self.locks.acquire(supplier_id).await;
        let (order_id, created) = self.find_or_create_draft(supplier_id).await?;
        let order = self.load_order(order_id).await?;
        Ok(DraftResult { order, created })
    }

    /// Adds `quantity` of a product to the supplier's draft, merging into an existing line.
    #[instrument(skip(self))]
    pub async fn add_to_order(
        &self,
        request: AddToOrderRequest,
    ) -> Result<AddToOrderResult, ServiceError> {
        let quantity = normalize_quantity(request.quantity)?;

        if self.store.get_supplier(request.supplier_id).await?.is_none() {
            return Err(ServiceError::not_found("Supplier", request.supplier_id));
        }
        let product = self
            .store
            .get_product(request.product_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", request.product_id))?;
        ensure_supplied_by(&product, request.supplier_id)?;

        let _guard = self.locks.acquire(request.supplier_id).await;

        let (order_id, _) = self.find_or_create_draft(request.supplier_id).await?;
        let outcome = self
            .store
            .merge_order_item(order_id, product.id, quantity, request.unit)
            .await?;

        if outcome.created {
            counter!("orderly_orders.items_created", 1);
        } else {
            counter!("orderly_orders.items_merged", 1);
        }
        info!(
            order_id = %order_id,
            product_id = %product.id,
            quantity = %outcome.item.quantity,
            created = outcome.created,
            "Product added to draft order"
        );

        let order = self.load_order(order_id).await?;
        Ok(AddToOrderResult {
            order,
            item: outcome.item,
            created: outcome.created,
        })
    }

    /// Merges a product into an explicit draft order.
    #[instrument(skip(self))]
    pub async fn add_item_to_order(
        &self,
        request: AddItemRequest,
    ) -> Result<AddToOrderResult, ServiceError> {
        let quantity = normalize_quantity(request.quantity)?;

        let order = self.load_order(request.order_id).await?;
        let product = self
            .store
            .get_product(request.product_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", request.product_id))?;
        ensure_supplied_by(&product, order.order.supplier_id)?;

        let _guard = self.locks.acquire(order.order.supplier_id).await;
        // the store refuses to merge into an order that is no longer a draft
        let outcome = self
            .store
            .merge_order_item(order.order.id, product.id, quantity, request.unit)
            .await?;
        let order = self.load_order(request.order_id).await?;
        Ok(AddToOrderResult {
            order,
            item: outcome.item,
            created: outcome.created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OrderStatus;
    use crate::store::{MemoryStore, NewProduct, NewSupplier, OrderPatch};
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use sea_orm::Iterable;

    async fn setup() -> (Arc<dyn EntityStore>, DraftOrderAggregator, Uuid, Uuid) {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::in_memory());
        let supplier = store
            .create_supplier(NewSupplier {
                name: "Delta Dairy".into(),
                email: None,
                phone: None,
                sort_order: None,
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                name: "Yogurt".into(),
                supplier_id: supplier.id,
                unit: Unit::Piece,
                sort_order: None,
            })
            .await
            .unwrap();
        let aggregator = DraftOrderAggregator::new(store.clone(), SupplierLocks::new());
        (store, aggregator, supplier.id, product.id)
    }

    fn add(supplier_id: Uuid, product_id: Uuid, quantity: Decimal, unit: Unit) -> AddToOrderRequest {
        AddToOrderRequest {
            supplier_id,
            product_id,
            quantity,
            unit,
        }
    }

    #[tokio::test]
    async fn rejects_non_positive_quantity() {
        let (_, aggregator, supplier_id, product_id) = setup().await;
        let err = aggregator
            .add_to_order(add(supplier_id, product_id, dec!(0), Unit::Box))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn rejects_product_of_another_supplier() {
        let (store, aggregator, _, product_id) = setup().await;
        let other = store
            .create_supplier(NewSupplier {
                name: "Other".into(),
                email: None,
                phone: None,
                sort_order: None,
            })
            .await
            .unwrap();
        let err = aggregator
            .add_to_order(add(other.id, product_id, dec!(1), Unit::Box))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
        assert!(store
            .get_draft_order_for_supplier(other.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sent_order_starts_a_fresh_draft() {
        let (store, aggregator, supplier_id, product_id) = setup().await;
        let first = aggregator
            .add_to_order(add(supplier_id, product_id, dec!(1), Unit::Box))
            .await
            .unwrap();
        store
            .update_order(
                first.order.order.id,
                OrderPatch {
                    status: Some(OrderStatus::Sent),
                    sent_at: Some(Some(chrono::Utc::now())),
                },
            )
            .await
            .unwrap();

        let second = aggregator
            .add_to_order(add(supplier_id, product_id, dec!(1), Unit::Box))
            .await
            .unwrap();
        assert_ne!(second.order.order.id, first.order.order.id);
        assert!(second.created);

        let err = aggregator
            .add_item_to_order(AddItemRequest {
                order_id: first.order.order.id,
                product_id,
                quantity: dec!(1),
                unit: Unit::Box,
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidStatus(_));
    }

    #[tokio::test]
    async fn ensure_draft_is_idempotent() {
        let (_, aggregator, supplier_id, _) = setup().await;
        let first = aggregator.ensure_draft(supplier_id).await.unwrap();
        let second = aggregator.ensure_draft(supplier_id).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.order.order.id, second.order.order.id);
    }

    #[tokio::test]
    async fn concurrent_adds_share_one_draft() {
        let (store, aggregator, supplier_id, product_id) = setup().await;
        let aggregator = Arc::new(aggregator);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    aggregator
                        .add_to_order(add(supplier_id, product_id, dec!(1), Unit::Piece))
                        .await
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let drafts = store.list_draft_orders().await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].items.len(), 1);
        assert_eq!(drafts[0].items[0].item.quantity, dec!(16));
    }

    #[tokio::test]
    async fn explicit_order_rejects_product_of_another_supplier() {
        let (store, aggregator, supplier_id, product_id) = setup().await;
        let draft = aggregator.ensure_draft(supplier_id).await.unwrap();
        let other = store
            .create_supplier(NewSupplier {
                name: "Other".into(),
                email: None,
                phone: None,
                sort_order: None,
            })
            .await
            .unwrap();
        let foreign = store
            .create_product(NewProduct {
                name: "Butter".into(),
                supplier_id: other.id,
                unit: Unit::Piece,
                sort_order: None,
            })
            .await
            .unwrap();

        let err = aggregator
            .add_item_to_order(AddItemRequest {
                order_id: draft.order.order.id,
                product_id: foreign.id,
                quantity: dec!(1),
                unit: Unit::Piece,
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        let merged = aggregator
            .add_item_to_order(AddItemRequest {
                order_id: draft.order.order.id,
                product_id,
                quantity: dec!(2),
                unit: Unit::Piece,
            })
            .await
            .unwrap();
        assert_eq!(merged.order.items.len(), 1);
    }

    #[tokio::test]
    async fn merged_total_above_the_column_limit_is_rejected() {
        let (store, aggregator, supplier_id, product_id) = setup().await;
        aggregator
            .add_to_order(add(supplier_id, product_id, dec!(99999999), Unit::Piece))
            .await
            .unwrap();

        let err = aggregator
            .add_to_order(add(supplier_id, product_id, dec!(1), Unit::Piece))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        let err = aggregator
            .add_to_order(add(supplier_id, product_id, Decimal::MAX, Unit::Piece))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        let draft = store
            .get_draft_order_for_supplier(supplier_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(draft.items[0].item.quantity, dec!(99999999));
    }

    #[tokio::test]
    async fn supplier_locks_do_not_accumulate() {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::in_memory());
        let locks = SupplierLocks::new();
        let aggregator = DraftOrderAggregator::new(store.clone(), locks.clone());
        for name in ["A", "B", "C"] {
            let supplier = store
                .create_supplier(NewSupplier {
                    name: name.into(),
                    email: None,
                    phone: None,
                    sort_order: None,
                })
                .await
                .unwrap();
            aggregator.ensure_draft(supplier.id).await.unwrap();
        }
        assert!(locks.is_empty());
    }

    proptest! {
        #[test]
        fn repeated_adds_merge_into_one_line(
            steps in prop::collection::vec((1u32..10_000, 0usize..4), 1..12)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let (store, aggregator, supplier_id, product_id) = setup().await;
                let units: Vec<Unit> = Unit::iter().collect();

                let mut expected = Decimal::ZERO;
                let mut last_unit = Unit::Piece;
                for (cents, unit_index) in &steps {
                    let quantity = Decimal::new(i64::from(*cents), 2);
                    last_unit = units[*unit_index % units.len()];
                    expected += quantity;
                    aggregator
                        .add_to_order(add(supplier_id, product_id, quantity, last_unit))
                        .await
                        .unwrap();
                }

                let draft = store
                    .get_draft_order_for_supplier(supplier_id)
                    .await
                    .unwrap()
                    .unwrap();
                prop_assert_eq!(draft.items.len(), 1);
                prop_assert_eq!(draft.items[0].item.quantity, expected);
                prop_assert_eq!(draft.items[0].item.unit, last_unit);
                Ok(())
            })?;
        }
    }
}
