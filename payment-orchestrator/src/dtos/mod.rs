use crate::models::{ItemSnapshot, Order, OrderStatus, PayState, ProviderType, RefundState, Terminal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub item_ref: String,
    /// Provider name, case-insensitive (`alipay`, `EPAY`, ...).
    pub provider: String,
    #[serde(default)]
    pub terminal: Terminal,
    /// Echoed back on the return URL and in the notification.
    #[serde(default)]
    pub correlation_tag: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub order_id: Uuid,
    pub order_no: String,
    pub order_amount: Decimal,
    pub redirect_url: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: Uuid,
    pub order_no: String,
    pub provider: ProviderType,
    pub provider_txn_id: Option<String>,
    pub order_amount: Decimal,
    pub paid_amount: Option<Decimal>,
    pub status: OrderStatus,
    pub pay_state: PayState,
    pub refund_state: RefundState,
    pub pay_time: Option<DateTime<Utc>>,
    pub refund_time: Option<DateTime<Utc>>,
    pub item: ItemSnapshot,
    pub terminal: Terminal,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            order_no: order.order_no,
            provider: order.provider,
            provider_txn_id: order.provider_txn_id,
            order_amount: order.order_amount,
            paid_amount: order.paid_amount,
            status: order.status,
            pay_state: order.pay_state,
            refund_state: order.refund_state,
            pay_time: order.pay_time,
            refund_time: order.refund_time,
            item: order.item,
            terminal: order.terminal,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub provider: Option<ProviderType>,
    /// Other instances reached through pub/sub, when Redis is configured.
    pub broadcast_to: Option<i64>,
}
