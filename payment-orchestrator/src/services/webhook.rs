//! Inbound gateway notifications.
//!
//! Signature failures and unknown orders are answered with the gateway's
//! reject body so it redelivers later; nothing here returns an error to
//! the sender.

use super::metrics;
use super::orders::{ConfirmOutcome, OrderService};
use crate::error::PaymentError;
use crate::models::ProviderType;
use crate::providers::{CallbackPayload, PaymentGateway, TradeStatus};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookAck {
    pub accepted: bool,
    /// Provider-native acknowledgement body.
    pub body: &'static str,
}

impl WebhookAck {
    fn accept(provider: ProviderType) -> Self {
        Self {
            accepted: true,
            body: provider.acknowledgement(true),
        }
    }

    fn reject(provider: ProviderType) -> Self {
        Self {
            accepted: false,
            body: provider.acknowledgement(false),
        }
    }
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    orders: Arc<OrderService>,
}

impl WebhookDispatcher {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }

    pub async fn dispatch(&self, provider: ProviderType, payload: CallbackPayload) -> WebhookAck {
        let ack = self.handle(provider, &payload).await;
        if !ack.accepted {
            tracing::debug!(provider = %provider, payload = ?payload.params(), "Rejected notification payload");
        }
        ack
    }

    async fn handle(&self, provider: ProviderType, payload: &CallbackPayload) -> WebhookAck {
        let client = match self.orders.registry().get_client(provider).await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(provider = %provider, error = %e, "No client available for notification");
                metrics::record_webhook(provider, "rejected");
                return WebhookAck::reject(provider);
            }
        };

        if !client.verify_callback_signature(payload) {
            tracing::warn!(provider = %provider, "Notification signature verification failed");
            metrics::record_webhook(provider, "rejected");
            return WebhookAck::reject(provider);
        }

        let event = match client.parse_callback(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "Malformed notification");
                metrics::record_webhook(provider, "rejected");
                return WebhookAck::reject(provider);
            }
        };

        if let Some(merchant) = &event.merchant_id {
            if merchant != client.merchant_id() {
                tracing::warn!(
                    provider = %provider,
                    merchant = %merchant,
                    "Notification addressed to another merchant"
                );
                metrics::record_webhook(provider, "rejected");
                return WebhookAck::reject(provider);
            }
        }

        if event.trade_status != TradeStatus::Paid {
            tracing::info!(
                provider = %provider,
                order_no = %event.order_no,
                status = ?event.trade_status,
                "Notification without payment, no transition"
            );
            metrics::record_webhook(provider, "ignored");
            return WebhookAck::accept(provider);
        }

        let result = self
            .orders
            .apply_payment_confirmed(
                &event.order_no,
                provider,
                &event.provider_txn_id,
                event.paid_amount,
            )
            .await;

        match result {
            Ok(ConfirmOutcome::Applied(_)) => {
                metrics::record_webhook(provider, "paid");
                tracing::info!(
                    provider = %provider,
                    order_no = %event.order_no,
                    correlation_tag = ?event.correlation_tag,
                    "Payment notification applied"
                );
                WebhookAck::accept(provider)
            }
            Ok(ConfirmOutcome::Duplicate(_)) => {
                metrics::record_webhook(provider, "duplicate");
                WebhookAck::accept(provider)
            }
            // Cancelled order: the late payment is already recorded for manual refund.
            Err(PaymentError::InvalidState(_)) => {
                metrics::record_webhook(provider, "ignored");
                WebhookAck::accept(provider)
            }
            Err(e) => {
                tracing::warn!(
                    provider = %provider,
                    order_no = %event.order_no,
                    error = %e,
                    "Notification could not be applied"
                );
                metrics::record_webhook(provider, "rejected");
                WebhookAck::reject(provider)
            }
        }
    }
}
