use super::{check_email, clean_optional, double_option};
use crate::entities::{Product, Supplier, Unit};
use crate::errors::ServiceError;
use crate::store::{
    EntityStore, NewProduct, NewSupplier, ProductPatch, ProductWithSupplier, SupplierPatch,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const MAX_SEARCH_TERM_CHARS: usize = 100;
pub const MIN_SEARCH_TERM_CHARS: usize = 2;
pub const DEFAULT_SEARCH_LIMIT: u64 = 20;
pub const MAX_SEARCH_LIMIT: u64 = 100;
/// Cap on the combined supplier and product search.
pub const GLOBAL_SEARCH_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateSupplierRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    pub sort_order: Option<i32>,
}

/// PATCH body; `null` clears `email`/`phone`, an absent key leaves them alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateSupplierRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub phone: Option<Option<String>>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub supplier_id: Uuid,
    #[serde(default)]
    pub unit: Unit,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub supplier_id: Option<Uuid>,
    pub unit: Option<Unit>,
    pub sort_order: Option<i32>,
}

/// One hit of the combined search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchHit {
    Supplier { supplier: Supplier },
    Product { product: ProductWithSupplier },
}

/// Trims, caps the length and strips SQL wildcards so they match nothing special.
pub fn sanitize_search_term(raw: &str) -> String {
    raw.trim()
        .chars()
        .take(MAX_SEARCH_TERM_CHARS)
        .filter(|c| *c != '%' && *c != '_')
        .collect()
}

fn clean_name(raw: &str) -> Result<String, ServiceError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ServiceError::ValidationError(
            "name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > 200 {
        return Err(ServiceError::ValidationError(
            "name must be at most 200 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Suppliers and products.
pub struct CatalogService {
    store: Arc<dyn EntityStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn list_suppliers(&self) -> Result<Vec<Supplier>, ServiceError> {
        self.store.list_suppliers().await
    }

    pub async fn get_supplier(&self, id: Uuid) -> Result<Supplier, ServiceError> {
        self.store
            .get_supplier(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Supplier", id))
    }

    #[instrument(skip(self))]
    pub async fn create_supplier(
        &self,
        request: CreateSupplierRequest,
    ) -> Result<Supplier, ServiceError> {
        let request = CreateSupplierRequest {
            name: request.name.trim().to_string(),
            email: clean_optional(request.email),
            phone: clean_optional(request.phone),
            sort_order: request.sort_order,
        };
        request.validate()?;

        let supplier = self
            .store
            .create_supplier(NewSupplier {
                name: request.name,
                email: request.email,
                phone: request.phone,
                sort_order: request.sort_order,
            })
            .await?;
        info!(supplier_id = %supplier.id, "Supplier created");
        Ok(supplier)
    }

    #[instrument(skip(self))]
    pub async fn update_supplier(
        &self,
        id: Uuid,
        request: UpdateSupplierRequest,
    ) -> Result<Supplier, ServiceError> {
        let name = request.name.as_deref().map(clean_name).transpose()?;
        let email = request.email.map(clean_optional);
        let phone = request.phone.map(clean_optional);
        check_email("email", email.as_ref().and_then(|e| e.as_deref()))?;

        self.store
            .update_supplier(
                id,
                SupplierPatch {
                    name,
                    email,
                    phone,
                    sort_order: request.sort_order,
                },
            )
            .await?
            .ok_or_else(|| ServiceError::not_found("Supplier", id))
    }

    #[instrument(skip(self))]
    pub async fn delete_supplier(&self, id: Uuid) -> Result<(), ServiceError> {
        if !self.store.delete_supplier(id).await? {
            return Err(ServiceError::not_found("Supplier", id));
        }
        info!(supplier_id = %id, "Supplier deleted with its products and orders");
        Ok(())
    }

    pub async fn list_products(
        &self,
        supplier_id: Option<Uuid>,
    ) -> Result<Vec<Product>, ServiceError> {
        self.store.list_products(supplier_id).await
    }

    pub async fn list_products_with_suppliers(
        &self,
    ) -> Result<Vec<ProductWithSupplier>, ServiceError> {
        self.store.list_products_with_suppliers().await
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product, ServiceError> {
        self.store
            .get_product(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", id))
    }

    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<Product, ServiceError> {
        let request = CreateProductRequest {
            name: request.name.trim().to_string(),
            ..request
        };
        request.validate()?;

        let product = self
            .store
            .create_product(NewProduct {
                name: request.name,
                supplier_id: request.supplier_id,
                unit: request.unit,
                sort_order: request.sort_order,
            })
            .await?;
        info!(product_id = %product.id, supplier_id = %product.supplier_id, "Product created");
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn update_product(
        &self,
        id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<Product, ServiceError> {
        let name = request.name.as_deref().map(clean_name).transpose()?;
        self.store
            .update_product(
                id,
                ProductPatch {
                    name,
                    supplier_id: request.supplier_id,
                    unit: request.unit,
                    sort_order: request.sort_order,
                },
            )
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", id))
    }

    #[instrument(skip(self))]
    pub async fn delete_product(&self, id: Uuid) -> Result<(), ServiceError> {
        if !self.store.delete_product(id).await? {
            return Err(ServiceError::not_found("Product", id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn search_products(
        &self,
        raw_term: &str,
        limit: Option<u64>,
    ) -> Result<Vec<ProductWithSupplier>, ServiceError> {
        let term = sanitize_search_term(raw_term);
        if term.chars().count() < MIN_SEARCH_TERM_CHARS {
            return Ok(Vec::new());
        }
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        self.store.search_products(&term, limit).await
    }

    /// Matching suppliers first, then matching products.
    #[instrument(skip(self))]
    pub async fn search(&self, raw_term: &str) -> Result<Vec<SearchHit>, ServiceError> {
        let term = sanitize_search_term(raw_term);
        if term.chars().count() < MIN_SEARCH_TERM_CHARS {
            return Ok(Vec::new());
        }
        let needle = term.to_lowercase();

        let mut hits: Vec<SearchHit> = self
            .store
            .list_suppliers()
            .await?
            .into_iter()
            .filter(|s| s.name.to_lowercase().contains(&needle))
            .map(|supplier| SearchHit::Supplier { supplier })
            .collect();
        hits.extend(
            self.store
                .search_products(&term, GLOBAL_SEARCH_LIMIT as u64)
                .await?
                .into_iter()
                .map(|product| SearchHit::Product { product }),
        );
        hits.truncate(GLOBAL_SEARCH_LIMIT);
        Ok(hits)
    }

    #[instrument(skip(self))]
    pub async fn find_duplicates(
        &self,
        name: &str,
        exclude_supplier_id: Option<Uuid>,
    ) -> Result<Vec<ProductWithSupplier>, ServiceError> {
        let name = name.trim();
        if name.chars().count() < MIN_SEARCH_TERM_CHARS {
            return Ok(Vec::new());
        }
        self.store
            .find_product_duplicates(name, exclude_supplier_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("  flour  ", "flour")]
    #[case("50%_off", "50off")]
    #[case("%%", "")]
    #[case("a_", "a")]
    fn sanitizes_terms(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_search_term(raw), expected);
    }

    #[test]
    fn long_terms_are_truncated_before_stripping() {
        let raw = format!("{}%tail", "x".repeat(120));
        assert_eq!(sanitize_search_term(&raw), "x".repeat(100));
    }

    fn service() -> CatalogService {
        CatalogService::new(Arc::new(MemoryStore::in_memory()))
    }

    #[tokio::test]
    async fn rejects_blank_supplier_and_bad_email() {
        let catalog = service();
        let blank = catalog
            .create_supplier(CreateSupplierRequest {
                name: "   ".into(),
                email: None,
                phone: None,
                sort_order: None,
            })
            .await;
        assert_matches!(blank, Err(ServiceError::ValidationError(_)));

        let bad_email = catalog
            .create_supplier(CreateSupplierRequest {
                name: "Gamma".into(),
                email: Some("not-an-email".into()),
                phone: None,
                sort_order: None,
            })
            .await;
        assert_matches!(bad_email, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn blank_email_is_stored_as_none() {
        let catalog = service();
        let supplier = catalog
            .create_supplier(CreateSupplierRequest {
                name: " Gamma ".into(),
                email: Some("   ".into()),
                phone: None,
                sort_order: None,
            })
            .await
            .unwrap();
        assert_eq!(supplier.name, "Gamma");
        assert_eq!(supplier.email, None);

        let cleared = catalog
            .update_supplier(
                supplier.id,
                UpdateSupplierRequest {
                    email: Some(Some("g@gamma.test".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.email.as_deref(), Some("g@gamma.test"));
    }

    #[tokio::test]
    async fn short_search_terms_return_nothing() {
        let catalog = service();
        let supplier = catalog
            .create_supplier(CreateSupplierRequest {
                name: "Olive Grove".into(),
                email: None,
                phone: None,
                sort_order: None,
            })
            .await
            .unwrap();
        catalog
            .create_product(CreateProductRequest {
                name: "Olive Oil".into(),
                supplier_id: supplier.id,
                unit: Unit::Box,
                sort_order: None,
            })
            .await
            .unwrap();

        assert!(catalog.search_products("o", None).await.unwrap().is_empty());
        assert!(catalog.search_products("%o", None).await.unwrap().is_empty());
        assert_eq!(catalog.search_products("OLIVE", None).await.unwrap().len(), 1);

        let hits = catalog.search("olive").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_matches!(hits[0], SearchHit::Supplier { .. });
        assert_matches!(hits[1], SearchHit::Product { .. });
    }

    #[tokio::test]
    async fn missing_supplier_is_not_found() {
        let catalog = service();
        let err = catalog.delete_supplier(Uuid::new_v4()).await.unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));

        let err = catalog
            .create_product(CreateProductRequest {
                name: "Orphan".into(),
                supplier_id: Uuid::new_v4(),
                unit: Unit::Piece,
                sort_order: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }
}
