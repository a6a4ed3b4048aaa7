//! Order lifecycle.
//!
//! ```text
//! PENDING --paid--> PAID --refund--> PAID + REFUNDED
//! PENDING --cancel/close--> CANCELLED
//! ```
//!
//! Every transition is a compare-and-set in the order store, so duplicate
//! notifications and concurrent reconciliation cannot both apply.

use super::metrics;
use super::order_no::generate_order_no;
use super::registry::ProviderRegistry;
use crate::error::{PaymentError, PaymentResult};
use crate::models::{
    ItemKind, ItemSnapshot, NewOrder, Order, OrderGuard, OrderLookup, OrderPatch, OrderStatus,
    PayState, ProviderType, RefundState, Terminal,
};
use crate::providers::{
    CreatePayment, NormalizedStatus, OperationResult, PaymentGateway, PaymentRedirect,
    RefundRequest,
};
use crate::stores::{ItemCatalog, OrderStore, StoreError};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const ORDER_NO_ATTEMPTS: usize = 5;

pub type OrderNoGenerator = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SubmitOrder {
    pub item_ref: String,
    pub provider: ProviderType,
    pub user_id: String,
    pub terminal: Terminal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub order_id: Uuid,
    pub order_no: String,
    pub order_amount: Decimal,
}

#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// The order moved from PENDING to PAID.
    Applied(Order),
    /// The order was already PAID; nothing changed.
    Duplicate(Order),
}

impl ConfirmOutcome {
    pub fn order(&self) -> &Order {
        match self {
            ConfirmOutcome::Applied(order) | ConfirmOutcome::Duplicate(order) => order,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseReport {
    pub order: Order,
    pub provider: OperationResult,
}

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn ItemCatalog>,
    registry: Arc<ProviderRegistry>,
    next_order_no: OrderNoGenerator,
}

fn feature_name(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Recharge => "recharge",
        ItemKind::Membership => "membership",
    }
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn ItemCatalog>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            orders,
            catalog,
            registry,
            next_order_no: Arc::new(generate_order_no),
        }
    }

    pub fn with_order_no_generator(mut self, generator: OrderNoGenerator) -> Self {
        self.next_order_no = generator;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub async fn get(&self, order_no: &str) -> PaymentResult<Order> {
        self.orders
            .find_order(&OrderLookup::OrderNo(order_no.to_string()))
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("order {}", order_no)))
    }

    pub async fn submit(&self, request: SubmitOrder) -> PaymentResult<SubmitReceipt> {
        if request.user_id.trim().is_empty() {
            return Err(PaymentError::InvalidArgument("user id is required".into()));
        }
        let item = self
            .catalog
            .find_item(&request.item_ref)
            .await?
            .filter(|item| item.active)
            .ok_or_else(|| PaymentError::NotFound(format!("item {}", request.item_ref)))?;
        if !self.catalog.feature_enabled(item.kind).await? {
            return Err(PaymentError::InvalidState(format!(
                "{} is currently disabled",
                feature_name(item.kind)
            )));
        }
        if item.price.is_sign_negative() {
            return Err(PaymentError::InvalidArgument(format!(
                "item {} has a negative price",
                item.item_ref
            )));
        }

        let snapshot = ItemSnapshot::from(&item);
        let mut last_collision = None;
        for _ in 0..ORDER_NO_ATTEMPTS {
            let new_order = NewOrder {
                order_no: (self.next_order_no)(),
                provider: request.provider,
                user_id: request.user_id.clone(),
                order_amount: item.price.round_dp(2),
                item: snapshot.clone(),
                terminal: request.terminal,
            };
            match self.orders.create_order(new_order).await {
                Ok(order) => {
                    metrics::record_order_created(order.provider);
                    tracing::info!(
                        order_no = %order.order_no,
                        provider = %order.provider,
                        user_id = %order.user_id,
                        amount = %order.order_amount,
                        "Payment order created"
                    );
                    return Ok(SubmitReceipt {
                        order_id: order.id,
                        order_no: order.order_no,
                        order_amount: order.order_amount,
                    });
                }
                Err(StoreError::DuplicateOrderNo(no)) => {
                    tracing::warn!(order_no = %no, "Order number collision, regenerating");
                    last_collision = Some(no);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PaymentError::Internal(format!(
            "could not allocate a unique order number (last tried {})",
            last_collision.unwrap_or_default()
        )))
    }

    /// Builds the gateway redirect for a PENDING order.
    pub async fn create_payment(
        &self,
        order_no: &str,
        correlation_tag: Option<String>,
    ) -> PaymentResult<PaymentRedirect> {
        let order = self.get(order_no).await?;
        if order.status != OrderStatus::Pending {
            return Err(PaymentError::InvalidState(format!(
                "order {} is {:?}, payment can only start while pending",
                order_no, order.status
            )));
        }

        let client = self.registry.get_client(order.provider).await?;
        client
            .create_payment(&CreatePayment {
                order_no: order.order_no.clone(),
                amount: order.order_amount,
                description: order.item.title.clone(),
                callback: client.callback_urls().clone(),
                correlation_tag,
                terminal: order.terminal,
            })
            .await
    }

    /// Marks a PENDING order as paid. Repeating the call for an order that
    /// is already PAID is a no-op reported as [`ConfirmOutcome::Duplicate`].
    ///
    /// `provider` is the gateway that reported the payment; it must be the
    /// one the order was created for. A payment that lands on a cancelled
    /// order is recorded for follow-up but never turns the order PAID.
    pub async fn apply_payment_confirmed(
        &self,
        order_no: &str,
        provider: ProviderType,
        provider_txn_id: &str,
        paid_amount: Decimal,
    ) -> PaymentResult<ConfirmOutcome> {
        if provider_txn_id.trim().is_empty() {
            return Err(PaymentError::InvalidArgument(
                "provider transaction id is required".into(),
            ));
        }
        if paid_amount.is_sign_negative() {
            return Err(PaymentError::InvalidArgument(format!(
                "paid amount {} is negative",
                paid_amount
            )));
        }

        let patch = OrderPatch {
            status: Some(OrderStatus::Paid),
            pay_state: Some(PayState::Paid),
            provider_txn_id: Some(provider_txn_id.to_string()),
            paid_amount: Some(paid_amount),
            pay_time: Some(Utc::now()),
            ..Default::default()
        };
        let guard = OrderGuard::status(OrderStatus::Pending).and_provider(provider);

        if let Some(order) = self.orders.update_order(order_no, guard, patch).await? {
            if order.order_amount != paid_amount {
                tracing::warn!(
                    order_no = %order_no,
                    expected = %order.order_amount,
                    paid = %paid_amount,
                    "Paid amount differs from order amount"
                );
            }
            tracing::info!(
                order_no = %order_no,
                provider_txn_id = %provider_txn_id,
                amount = %paid_amount,
                "Order paid"
            );
            return Ok(ConfirmOutcome::Applied(order));
        }

        let order = self.get(order_no).await?;
        if order.provider != provider {
            tracing::warn!(
                order_no = %order_no,
                order_provider = %order.provider,
                reported_by = %provider,
                "Payment reported by a gateway the order does not use"
            );
            return Err(PaymentError::InvalidArgument(format!(
                "order {} belongs to {}",
                order_no, order.provider
            )));
        }

        match order.status {
            OrderStatus::Paid => {
                if order.provider_txn_id.as_deref() != Some(provider_txn_id) {
                    tracing::error!(
                        order_no = %order_no,
                        recorded = ?order.provider_txn_id,
                        received = %provider_txn_id,
                        "Paid order confirmed again with a different transaction id"
                    );
                } else {
                    tracing::debug!(order_no = %order_no, "Duplicate payment confirmation ignored");
                }
                Ok(ConfirmOutcome::Duplicate(order))
            }
            OrderStatus::Cancelled => {
                self.record_late_payment(order_no, provider, provider_txn_id, paid_amount)
                    .await?;
                Err(PaymentError::InvalidState(format!(
                    "order {} is cancelled",
                    order_no
                )))
            }
            OrderStatus::Pending => Err(PaymentError::Internal(format!(
                "order {} is still pending after a failed update",
                order_no
            ))),
        }
    }

    /// Keeps the gateway's transaction id and amount on a CANCELLED order so
    /// the money can be found and refunded by hand. Status and pay state
    /// stay as they are. Only the first late payment is recorded.
    async fn record_late_payment(
        &self,
        order_no: &str,
        provider: ProviderType,
        provider_txn_id: &str,
        paid_amount: Decimal,
    ) -> PaymentResult<()> {
        let patch = OrderPatch {
            provider_txn_id: Some(provider_txn_id.to_string()),
            paid_amount: Some(paid_amount),
            ..Default::default()
        };
        let guard = OrderGuard::status(OrderStatus::Cancelled)
            .and_provider(provider)
            .and_txn_unset();
        let recorded = self.orders.update_order(order_no, guard, patch).await?.is_some();
        metrics::record_late_payment(provider);
        tracing::error!(
            order_no = %order_no,
            provider_txn_id = %provider_txn_id,
            amount = %paid_amount,
            recorded,
            "Payment received for a cancelled order, manual refund needed"
        );
        Ok(())
    }

    /// Asks the gateway for the trade state and applies it to a PENDING
    /// order.
    pub async fn reconcile(&self, order_no: &str) -> PaymentResult<Order> {
        let order = self.get(order_no).await?;
        if order.status != OrderStatus::Pending {
            return Ok(order);
        }

        let client = self.registry.get_client(order.provider).await?;
        let result = client.query(Some(order_no), None).await?;
        if !result.success {
            tracing::info!(
                order_no = %order_no,
                code = ?result.provider_code,
                "Gateway has no paid trade for order"
            );
            return Ok(order);
        }

        match result.status {
            NormalizedStatus::Paid => {
                let txn = result.provider_txn_id.ok_or_else(|| PaymentError::UpstreamRejected {
                    code: "MISSING_TRADE_NO".to_string(),
                    message: "paid trade without a transaction id".to_string(),
                })?;
                let amount = result.amount.unwrap_or(order.order_amount);
                Ok(self
                    .apply_payment_confirmed(order_no, order.provider, &txn, amount)
                    .await?
                    .order()
                    .clone())
            }
            NormalizedStatus::Closed => self.mark_cancelled(order_no).await,
            _ => Ok(order),
        }
    }

    /// User-initiated cancellation. The trade is closed at the gateway
    /// first so it can no longer be paid; the order is only cancelled once
    /// the gateway agrees.
    pub async fn cancel(&self, order_no: &str) -> PaymentResult<Order> {
        let report = self.close(order_no).await?;
        if report.order.status == OrderStatus::Cancelled {
            return Ok(report.order);
        }
        Err(PaymentError::UpstreamRejected {
            code: report
                .provider
                .provider_code
                .unwrap_or_else(|| "CLOSE_DECLINED".to_string()),
            message: report
                .provider
                .message
                .unwrap_or_else(|| "gateway declined to close the trade".to_string()),
        })
    }

    async fn mark_cancelled(&self, order_no: &str) -> PaymentResult<Order> {
        let patch = OrderPatch {
            status: Some(OrderStatus::Cancelled),
            ..Default::default()
        };
        match self
            .orders
            .update_order(order_no, OrderGuard::status(OrderStatus::Pending), patch)
            .await?
        {
            Some(order) => {
                tracing::info!(order_no = %order_no, "Order cancelled");
                Ok(order)
            }
            None => {
                let order = self.get(order_no).await?;
                Err(PaymentError::InvalidState(format!(
                    "order {} is {:?}, only pending orders can be cancelled",
                    order_no, order.status
                )))
            }
        }
    }

    /// Closes the trade at the gateway, then cancels locally if the
    /// gateway accepted.
    pub async fn close(&self, order_no: &str) -> PaymentResult<CloseReport> {
        let order = self.get(order_no).await?;
        if order.status != OrderStatus::Pending {
            return Err(PaymentError::InvalidState(format!(
                "order {} is {:?}, only pending orders can be closed",
                order_no, order.status
            )));
        }

        let client = self.registry.get_client(order.provider).await?;
        let result = client.close(order_no).await?;
        let order = if result.success {
            self.mark_cancelled(order_no).await?
        } else {
            tracing::warn!(
                order_no = %order_no,
                code = ?result.provider_code,
                message = ?result.message,
                "Gateway declined to close trade"
            );
            order
        };
        Ok(CloseReport {
            order,
            provider: result,
        })
    }

    /// Full refund of a PAID order. Not retried on rejection.
    pub async fn refund(&self, order_no: &str, reason: Option<String>) -> PaymentResult<Order> {
        let order = self.get(order_no).await?;
        if order.status != OrderStatus::Paid || order.pay_state != PayState::Paid {
            return Err(PaymentError::InvalidState(format!(
                "order {} is {:?}, only paid orders can be refunded",
                order_no, order.status
            )));
        }
        if order.is_refunded() {
            return Err(PaymentError::InvalidState(format!(
                "order {} is already refunded",
                order_no
            )));
        }

        let refund_request_no = refund_request_no(order_no);
        let client = self.registry.get_client(order.provider).await?;
        let outcome = client
            .refund(&RefundRequest {
                order_no: Some(order.order_no.clone()),
                provider_txn_id: order.provider_txn_id.clone(),
                amount: order.paid_amount.unwrap_or(order.order_amount),
                reason: reason.clone(),
                refund_request_no: Some(refund_request_no.clone()),
            })
            .await
            .and_then(OperationResult::into_accepted);

        if let Err(e) = outcome {
            metrics::record_refund(order.provider, "rejected");
            tracing::warn!(order_no = %order_no, error = %e, "Refund not accepted by gateway");
            return Err(e);
        }

        let patch = OrderPatch {
            refund_state: Some(RefundState::Refunded),
            refund_time: Some(Utc::now()),
            refund_request_no: Some(refund_request_no),
            refund_reason: reason,
            ..Default::default()
        };
        let guard = OrderGuard::status(OrderStatus::Paid).and_refund_state(RefundState::None);
        let updated = match self.orders.update_order(order_no, guard, patch).await? {
            Some(order) => order,
            None => {
                let current = self.get(order_no).await?;
                if !current.is_refunded() {
                    return Err(PaymentError::InvalidState(format!(
                        "order {} changed during refund",
                        order_no
                    )));
                }
                current
            }
        };

        metrics::record_refund(updated.provider, "accepted");
        tracing::info!(order_no = %order_no, "Order refunded");
        Ok(updated)
    }

    pub async fn refund_query(&self, order_no: &str) -> PaymentResult<OperationResult> {
        let order = self.get(order_no).await?;
        let client = self.registry.get_client(order.provider).await?;
        let request_no = order
            .refund_request_no
            .clone()
            .unwrap_or_else(|| refund_request_no(order_no));
        client.refund_query(order_no, Some(&request_no)).await
    }
}

/// Same value for every attempt on one order, so gateways deduplicate
/// repeated refund requests.
pub fn refund_request_no(order_no: &str) -> String {
    format!("{}RF", order_no)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogItem;
    use crate::services::registry::{CallbackDomainResolver, SlotState};
    use crate::stores::{
        ConfigurationStore, InMemoryConfigurationStore, InMemoryItemCatalog, InMemoryOrderStore,
    };
    use service_core::http::{HttpClient, HttpClientConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        service: OrderService,
        orders: Arc<InMemoryOrderStore>,
        catalog: Arc<InMemoryItemCatalog>,
        config: Arc<InMemoryConfigurationStore>,
    }

    fn harness() -> Harness {
        let orders = Arc::new(InMemoryOrderStore::new());
        let catalog = Arc::new(InMemoryItemCatalog::new());
        catalog.put(CatalogItem {
            item_ref: "vip-month".into(),
            kind: ItemKind::Membership,
            title: "VIP monthly".into(),
            price: Decimal::new(990, 2),
            quantity: 30,
            active: true,
        });
        let config = Arc::new(InMemoryConfigurationStore::new());
        let store: Arc<dyn ConfigurationStore> = config.clone();
        let registry = Arc::new(ProviderRegistry::new(
            store.clone(),
            CallbackDomainResolver::new(store, Some("pay.example.com".into())),
            HttpClient::new(HttpClientConfig::default()).unwrap(),
        ));
        let service = OrderService::new(orders.clone(), catalog.clone(), registry);
        Harness {
            service,
            orders,
            catalog,
            config,
        }
    }

    fn submit(provider: ProviderType) -> SubmitOrder {
        SubmitOrder {
            item_ref: "vip-month".into(),
            provider,
            user_id: "user-1".into(),
            terminal: Terminal::Web,
        }
    }

    #[tokio::test]
    async fn submit_snapshots_the_item() {
        let h = harness();
        let receipt = h.service.submit(submit(ProviderType::Epay)).await.unwrap();
        assert_eq!(receipt.order_amount, Decimal::new(990, 2));

        // Later catalog changes do not touch the order.
        h.catalog.put(CatalogItem {
            item_ref: "vip-month".into(),
            kind: ItemKind::Membership,
            title: "VIP monthly".into(),
            price: Decimal::new(1990, 2),
            quantity: 30,
            active: true,
        });
        let order = h.service.get(&receipt.order_no).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.item.unit_price, Decimal::new(990, 2));
        assert_eq!(order.id, receipt.order_id);
    }

    #[tokio::test]
    async fn submit_validates_item_and_feature() {
        let h = harness();
        let mut missing = submit(ProviderType::Epay);
        missing.item_ref = "nope".into();
        assert_eq!(h.service.submit(missing).await.unwrap_err().kind(), "NOT_FOUND");

        h.catalog.set_feature_enabled(ItemKind::Membership, false);
        assert_eq!(
            h.service.submit(submit(ProviderType::Epay)).await.unwrap_err().kind(),
            "INVALID_STATE"
        );
        assert!(h.orders.is_empty());
    }

    #[tokio::test]
    async fn order_number_collisions_are_retried() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service = h.service.with_order_no_generator(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 { "FIXED".to_string() } else { format!("N{}", n) }
        }));

        let first = service.submit(submit(ProviderType::Epay)).await.unwrap();
        let second = service.submit(submit(ProviderType::Epay)).await.unwrap();
        assert_eq!(first.order_no, "FIXED");
        assert_eq!(second.order_no, "N2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn repeated_confirmation_is_a_no_op() {
        let h = harness();
        let receipt = h.service.submit(submit(ProviderType::Epay)).await.unwrap();
        let amount = Decimal::new(990, 2);

        let first = h
            .service
            .apply_payment_confirmed(&receipt.order_no, ProviderType::Epay, "T123", amount)
            .await
            .unwrap();
        let ConfirmOutcome::Applied(paid) = first else {
            panic!("first confirmation should apply");
        };
        assert!(paid.is_paid());

        let second = h
            .service
            .apply_payment_confirmed(&receipt.order_no, ProviderType::Epay, "T123", amount)
            .await
            .unwrap();
        let ConfirmOutcome::Duplicate(again) = second else {
            panic!("second confirmation should be a duplicate");
        };
        assert_eq!(again.pay_time, paid.pay_time);
        assert_eq!(again.provider_txn_id.as_deref(), Some("T123"));

        // A different transaction id never overwrites the recorded one.
        let third = h
            .service
            .apply_payment_confirmed(&receipt.order_no, ProviderType::Epay, "T999", amount)
            .await
            .unwrap();
        assert_eq!(third.order().provider_txn_id.as_deref(), Some("T123"));
    }

    #[tokio::test]
    async fn cancelled_orders_never_become_paid() {
        let h = harness();
        let receipt = h.service.submit(submit(ProviderType::Epay)).await.unwrap();
        h.service.mark_cancelled(&receipt.order_no).await.unwrap();

        let err = h
            .service
            .apply_payment_confirmed(&receipt.order_no, ProviderType::Epay, "T1", Decimal::new(990, 2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_STATE");
        assert_eq!(
            h.service.mark_cancelled(&receipt.order_no).await.unwrap_err().kind(),
            "INVALID_STATE"
        );

        let order = h.service.get(&receipt.order_no).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.pay_state, PayState::Unpaid);
        assert!(order.pay_time.is_none());
        // The late payment is kept so it can be refunded by hand.
        assert_eq!(order.provider_txn_id.as_deref(), Some("T1"));
        assert_eq!(order.paid_amount, Some(Decimal::new(990, 2)));

        // A second late payment does not overwrite the first.
        h.service
            .apply_payment_confirmed(&receipt.order_no, ProviderType::Epay, "T2", Decimal::ONE)
            .await
            .unwrap_err();
        let order = h.service.get(&receipt.order_no).await.unwrap();
        assert_eq!(order.provider_txn_id.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn confirmation_from_another_gateway_is_refused() {
        let h = harness();
        let receipt = h.service.submit(submit(ProviderType::Alipay)).await.unwrap();

        let err = h
            .service
            .apply_payment_confirmed(&receipt.order_no, ProviderType::Epay, "T1", Decimal::new(990, 2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_ARGUMENT");

        let order = h.service.get(&receipt.order_no).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.provider_txn_id.is_none());
    }

    #[tokio::test]
    async fn refund_of_pending_order_never_reaches_the_gateway() {
        let h = harness();
        let receipt = h.service.submit(submit(ProviderType::Epay)).await.unwrap();

        let err = h.service.refund(&receipt.order_no, None).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_STATE");
        // No provider client was even built.
        assert_eq!(h.config.fetch_count(), 0);
        assert_eq!(
            h.service.registry().slot_state(ProviderType::Epay),
            SlotState::Empty
        );
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let h = harness();
        let err = h
            .service
            .apply_payment_confirmed("missing", ProviderType::Epay, "T1", Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[test]
    fn refund_request_numbers_are_stable() {
        assert_eq!(refund_request_no("2024"), "2024RF");
    }
}
