//! Orders after aggregation: reading, editing lines, sending and deleting.

use super::locks::SupplierGuard;
use super::{check_email, clean_optional, normalize_quantity, SupplierLocks};
use crate::entities::{OrderItem, OrderStatus, Unit};
use crate::errors::ServiceError;
use crate::notifications::{
    copy_subject, order_subject, render_order_email_html, OrderEmail, OrderMailer,
};
use crate::store::{EntityStore, OrderItemPatch, OrderPatch, OrderWithDetails};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// How `send` delivers an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Email the supplier, then mark the order sent.
    Email,
    /// Only mark the order sent.
    Local,
}

impl FromStr for DeliveryMode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(DeliveryMode::Email),
            "local" => Ok(DeliveryMode::Local),
            other => Err(ServiceError::ValidationError(format!(
                "unknown delivery mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SendOrderRequest {
    #[serde(default)]
    pub send_copy_to_user: bool,
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendOrderResult {
    pub order: OrderWithDetails,
    pub delivery: DeliveryMode,
    /// Whether the copy to the user went out.
    pub copy_sent: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderRequest {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderItemRequest {
    #[schema(value_type = Option<String>)]
    pub quantity: Option<Decimal>,
    pub unit: Option<Unit>,
    pub sort_order: Option<i32>,
}

pub struct OrderLifecycle {
    store: Arc<dyn EntityStore>,
    locks: SupplierLocks,
    mailer: Arc<dyn OrderMailer>,
    delivery: DeliveryMode,
    mail_from: String,
}

impl OrderLifecycle {
    pub fn new(
        store: Arc<dyn EntityStore>,
        locks: SupplierLocks,
        mailer: Arc<dyn OrderMailer>,
        delivery: DeliveryMode,
        mail_from: String,
    ) -> Self {
        Self {
            store,
            locks,
            mailer,
            delivery,
            mail_from,
        }
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery
    }

    pub async fn list_orders(&self) -> Result<Vec<OrderWithDetails>, ServiceError> {
        self.store.list_orders().await
    }

    pub async fn list_draft_orders(&self) -> Result<Vec<OrderWithDetails>, ServiceError> {
        self.store.list_draft_orders().await
    }

    pub async fn get_order(&self, id: Uuid) -> Result<OrderWithDetails, ServiceError> {
        self.store
            .get_order(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", id))
    }

    pub async fn draft_for_supplier(
        &self,
        supplier_id: Uuid,
    ) -> Result<Option<OrderWithDetails>, ServiceError> {
        self.store.get_draft_order_for_supplier(supplier_id).await
    }

    fn ensure_draft(order: &OrderWithDetails) -> Result<(), ServiceError> {
        if !order.order.is_draft() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {} and can no longer be changed",
                order.order.id, order.order.status
            )));
        }
        Ok(())
    }

    /// Takes the supplier lock shared with the aggregator, then re-reads the order under it.
    async fn lock_draft(
        &self,
        order_id: Uuid,
    ) -> Result<(SupplierGuard, OrderWithDetails), ServiceError> {
        let supplier_id = self.get_order(order_id).await?.order.supplier_id;
        let guard = self.locks.acquire(supplier_id).await;
        let order = self.get_order(order_id).await?;
        Self::ensure_draft(&order)?;
        Ok((guard, order))
    }

    async fn mark_sent(&self, order_id: Uuid) -> Result<(), ServiceError> {
        if !self.store.mark_order_sent(order_id, Utc::now()).await? {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is no longer a draft",
                order_id
            )));
        }
        Ok(())
    }

    /// Applies a status change. Only `draft -> sent` is accepted; it stamps `sent_at`.
    #[instrument(skip(self))]
    pub async fn update_order(
        &self,
        id: Uuid,
        request: UpdateOrderRequest,
    ) -> Result<OrderWithDetails, ServiceError> {
        let current = self.get_order(id).await?;

        match request.status {
            Some(next) if next != current.order.status => {
                if !current.order.status.can_transition_to(next) {
                    return Err(ServiceError::InvalidStatus(format!(
                        "Cannot move order {} from {} to {}",
                        id, current.order.status, next
                    )));
                }
                // draft -> sent is the only transition
                let _guard = self.locks.acquire(current.order.supplier_id).await;
                self.mark_sent(id).await?;
            }
            _ => {
                self.store
                    .update_order(id, OrderPatch::default())
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Order", id))?;
            }
        }
        self.get_order(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_order(&self, id: Uuid) -> Result<(), ServiceError> {
        if !self.store.delete_order(id).await? {
            return Err(ServiceError::not_found("Order", id));
        }
        info!(order_id = %id, "Order deleted");
        Ok(())
    }

    /// Delivers a draft and marks it sent. The order stays a draft when delivery fails.
    #[instrument(skip(self, request), fields(copy = request.send_copy_to_user))]
    pub async fn send(
        &self,
        order_id: Uuid,
        request: SendOrderRequest,
    ) -> Result<SendOrderResult, ServiceError> {
        // held until the order is marked, so no add can slip into the order being emailed
        let (_guard, order) = self.lock_draft(order_id).await?;
        if order.items.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "Order {} has no items",
                order_id
            )));
        }

        let mut copy_sent = false;
        if self.delivery == DeliveryMode::Email {
            let recipient = order.supplier.email.clone().ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Supplier {} has no email address",
                    order.supplier.name
                ))
            })?;
            let copy_to = if request.send_copy_to_user {
                let address = clean_optional(request.user_email.clone()).ok_or_else(|| {
                    ServiceError::ValidationError(
                        "user_email is required when send_copy_to_user is set".to_string(),
                    )
                })?;
                check_email("user_email", Some(&address))?;
                Some(address)
            } else {
                None
            };

            let settings = self.store.get_settings().await?;
            let subject = order_subject(&order.supplier.name);
            let html = render_order_email_html(
                &order,
                &settings.business_name,
                settings.pdf_introduction.as_deref(),
                Utc::now(),
            );

            self.mailer
                .send(OrderEmail {
                    from: self.mail_from.clone(),
                    to: recipient,
                    subject: subject.clone(),
                    html: html.clone(),
                })
                .await
                .map_err(|e| {
                    counter!("orderly_orders.send_failures", 1);
                    ServiceError::from(e)
                })?;

            if let Some(address) = copy_to {
                // the supplier already has the order, a failed copy does not undo the send
                match self
                    .mailer
                    .send(OrderEmail {
                        from: self.mail_from.clone(),
                        to: address,
                        subject: copy_subject(&subject),
                        html,
                    })
                    .await
                {
                    Ok(()) => copy_sent = true,
                    Err(e) => warn!(error = %e, "Copy of the order email was not delivered"),
                }
            }
        }

        self.mark_sent(order_id).await?;

        counter!("orderly_orders.sent", 1);
        info!(order_id = %order_id, delivery = ?self.delivery, "Order sent");

        let message = match self.delivery {
            DeliveryMode::Email => "Order emailed and marked as sent",
            DeliveryMode::Local => "Order marked as sent",
        };
        Ok(SendOrderResult {
            order: self.get_order(order_id).await?,
            delivery: self.delivery,
            copy_sent,
            message: message.to_string(),
        })
    }

    pub async fn get_order_item(&self, id: Uuid) -> Result<OrderItem, ServiceError> {
        self.store
            .get_order_item(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order item", id))
    }

    #[instrument(skip(self))]
    pub async fn update_order_item(
        &self,
        id: Uuid,
        request: UpdateOrderItemRequest,
    ) -> Result<OrderItem, ServiceError> {
        let quantity = request.quantity.map(normalize_quantity).transpose()?;
        let item = self.get_order_item(id).await?;
        let (_guard, _) = self.lock_draft(item.order_id).await?;

        self.store
            .update_order_item(
                id,
                OrderItemPatch {
                    quantity,
                    unit: request.unit,
                    sort_order: request.sort_order,
                },
            )
            .await?
            .ok_or_else(|| ServiceError::not_found("Order item", id))
    }

    #[instrument(skip(self))]
    pub async fn delete_order_item(&self, id: Uuid) -> Result<(), ServiceError> {
        let item = self.get_order_item(id).await?;
        let (_guard, _) = self.lock_draft(item.order_id).await?;
        if !self.store.delete_order_item(id).await? {
            return Err(ServiceError::not_found("Order item", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{MockOrderMailer, NotificationError};
    use crate::store::{MemoryStore, NewProduct, NewSupplier};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<dyn EntityStore>,
        order_id: Uuid,
    }

    async fn draft_with_item(email: Option<&str>) -> Fixture {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::in_memory());
        let supplier = store
            .create_supplier(NewSupplier {
                name: "Zeta Bakery".into(),
                email: email.map(str::to_string),
                phone: None,
                sort_order: None,
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                name: "Bread".into(),
                supplier_id: supplier.id,
                unit: Unit::Piece,
                sort_order: None,
            })
            .await
            .unwrap();
        let order = store.create_order(supplier.id).await.unwrap();
        store
            .merge_order_item(order.id, product.id, dec!(2), Unit::Box)
            .await
            .unwrap();
        Fixture {
            store,
            order_id: order.id,
        }
    }

    fn lifecycle(store: &Arc<dyn EntityStore>, mailer: MockOrderMailer, mode: DeliveryMode) -> OrderLifecycle {
        OrderLifecycle::new(
            store.clone(),
            SupplierLocks::new(),
            Arc::new(mailer),
            mode,
            "orders@kiosk.test".into(),
        )
    }

    #[tokio::test]
    async fn email_mode_delivers_then_marks_sent() {
        let fixture = draft_with_item(Some("bakery@zeta.test")).await;
        let mut mailer = MockOrderMailer::new();
        mailer
            .expect_send()
            .withf(|email| {
                email.to == "bakery@zeta.test"
                    && email.subject == "Παραγγελία - Zeta Bakery"
                    && email.html.contains("κιβώτια")
            })
            .times(1)
            .returning(|_| Ok(()));
        mailer
            .expect_send()
            .withf(|email| email.subject == "[Αντίγραφο] Παραγγελία - Zeta Bakery")
            .times(1)
            .returning(|_| Ok(()));

        let result = lifecycle(&fixture.store, mailer, DeliveryMode::Email)
            .send(
                fixture.order_id,
                SendOrderRequest {
                    send_copy_to_user: true,
                    user_email: Some("me@kiosk.test".into()),
                },
            )
            .await
            .unwrap();

        assert_eq!(result.order.order.status, OrderStatus::Sent);
        assert!(result.order.order.sent_at.is_some());
        assert!(result.copy_sent);
    }

    #[tokio::test]
    async fn delivery_failure_keeps_draft() {
        let fixture = draft_with_item(Some("bakery@zeta.test")).await;
        let mut mailer = MockOrderMailer::new();
        mailer.expect_send().times(1).returning(|_| {
            Err(NotificationError::Rejected {
                status: 503,
                body: "unavailable".into(),
            })
        });

        let err = lifecycle(&fixture.store, mailer, DeliveryMode::Email)
            .send(fixture.order_id, SendOrderRequest::default())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ExternalServiceError(_));

        let order = fixture.store.get_order(fixture.order_id).await.unwrap().unwrap();
        assert_eq!(order.order.status, OrderStatus::Draft);
        assert!(order.order.sent_at.is_none());
    }

    #[tokio::test]
    async fn local_mode_never_calls_the_mailer() {
        let fixture = draft_with_item(None).await;
        let mut mailer = MockOrderMailer::new();
        mailer.expect_send().times(0);

        let service = lifecycle(&fixture.store, mailer, DeliveryMode::Local);
        let result = service
            .send(fixture.order_id, SendOrderRequest::default())
            .await
            .unwrap();
        assert_eq!(result.order.order.status, OrderStatus::Sent);

        let again = service
            .send(fixture.order_id, SendOrderRequest::default())
            .await
            .unwrap_err();
        assert_matches!(again, ServiceError::InvalidStatus(_));
    }

    #[tokio::test]
    async fn email_mode_requires_supplier_email() {
        let fixture = draft_with_item(None).await;
        let mut mailer = MockOrderMailer::new();
        mailer.expect_send().times(0);

        let err = lifecycle(&fixture.store, mailer, DeliveryMode::Email)
            .send(fixture.order_id, SendOrderRequest::default())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn reserved_statuses_are_rejected() {
        let fixture = draft_with_item(None).await;
        let service = lifecycle(&fixture.store, MockOrderMailer::new(), DeliveryMode::Local);

        let err = service
            .update_order(
                fixture.order_id,
                UpdateOrderRequest {
                    status: Some(OrderStatus::Confirmed),
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidStatus(_));

        let sent = service
            .update_order(
                fixture.order_id,
                UpdateOrderRequest {
                    status: Some(OrderStatus::Sent),
                },
            )
            .await
            .unwrap();
        assert!(sent.order.sent_at.is_some());

        let item_id = sent.items[0].item.id;
        let err = service
            .update_order_item(
                item_id,
                UpdateOrderItemRequest {
                    quantity: Some(dec!(5)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidStatus(_));
    }

    #[test]
    fn delivery_mode_parses() {
        assert_eq!("EMAIL".parse::<DeliveryMode>().unwrap(), DeliveryMode::Email);
        assert_eq!("local".parse::<DeliveryMode>().unwrap(), DeliveryMode::Local);
        assert!("pigeon".parse::<DeliveryMode>().is_err());
    }
}
