//! Order and provider data model.

use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported payment gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderType {
    /// Certificate-authenticated open platform gateway.
    Alipay,
    /// Merchant-key gateway.
    Epay,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Alipay => "ALIPAY",
            ProviderType::Epay => "EPAY",
        }
    }

    /// Lower-case form used in URLs.
    pub fn slug(&self) -> &'static str {
        match self {
            ProviderType::Alipay => "alipay",
            ProviderType::Epay => "epay",
        }
    }

    /// Body the gateway expects in reply to a notification.
    ///
    /// Both gateways stop redelivering only on the exact literal `success`.
    pub fn acknowledgement(&self, accepted: bool) -> &'static str {
        match self {
            ProviderType::Alipay | ProviderType::Epay => {
                if accepted {
                    "success"
                } else {
                    "fail"
                }
            }
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alipay" => Ok(ProviderType::Alipay),
            "epay" => Ok(ProviderType::Epay),
            other => Err(PaymentError::InvalidArgument(format!(
                "unknown payment provider '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayState {
    Unpaid,
    Paid,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundState {
    None,
    Refunded,
}

/// Where the buyer started checkout.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Terminal {
    Web,
    H5,
    App,
    MiniProgram,
    #[default]
    Unknown,
}

impl Terminal {
    /// Mobile terminals get the gateway's mobile checkout.
    pub fn is_mobile(&self) -> bool {
        matches!(self, Terminal::H5 | Terminal::App | Terminal::MiniProgram)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    /// Balance top-up package.
    Recharge,
    /// Time-limited membership package.
    Membership,
}

/// A purchasable entry in the live catalog.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CatalogItem {
    pub item_ref: String,
    pub kind: ItemKind,
    pub title: String,
    pub price: Decimal,
    /// Credits for recharge packages, days for memberships.
    pub quantity: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Copy of the catalog item taken when the order is submitted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ItemSnapshot {
    pub item_ref: String,
    pub kind: ItemKind,
    pub title: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl From<&CatalogItem> for ItemSnapshot {
    fn from(item: &CatalogItem) -> Self {
        Self {
            item_ref: item.item_ref.clone(),
            kind: item.kind,
            title: item.title.clone(),
            unit_price: item.price,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub order_no: String,
    pub provider_txn_id: Option<String>,
    pub provider: ProviderType,
    pub user_id: String,
    pub order_amount: Decimal,
    pub paid_amount: Option<Decimal>,
    pub status: OrderStatus,
    pub pay_state: PayState,
    pub refund_state: RefundState,
    pub pay_time: Option<DateTime<Utc>>,
    pub refund_time: Option<DateTime<Utc>>,
    pub refund_request_no: Option<String>,
    pub refund_reason: Option<String>,
    pub item: ItemSnapshot,
    pub terminal: Terminal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Materialise a freshly submitted order.
    pub fn from_new(new: NewOrder) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_no: new.order_no,
            provider_txn_id: None,
            provider: new.provider,
            user_id: new.user_id,
            order_amount: new.order_amount,
            paid_amount: None,
            status: OrderStatus::Pending,
            pay_state: PayState::Unpaid,
            refund_state: RefundState::None,
            pay_time: None,
            refund_time: None,
            refund_request_no: None,
            refund_reason: None,
            item: new.item,
            terminal: new.terminal,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid && self.pay_state == PayState::Paid
    }

    pub fn is_refunded(&self) -> bool {
        self.refund_state == RefundState::Refunded
    }
}

/// Input to [`crate::stores::OrderStore::create_order`].
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_no: String,
    pub provider: ProviderType,
    pub user_id: String,
    pub order_amount: Decimal,
    pub item: ItemSnapshot,
    pub terminal: Terminal,
}

#[derive(Debug, Clone)]
pub enum OrderLookup {
    OrderNo(String),
    ProviderTxnId(String),
}

/// Conditions an order must still satisfy for an update to apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderGuard {
    pub status: Option<OrderStatus>,
    pub refund_state: Option<RefundState>,
    pub provider: Option<ProviderType>,
    /// Only orders that have not recorded a provider transaction id.
    pub txn_unset: bool,
}

impl OrderGuard {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn and_refund_state(mut self, refund_state: RefundState) -> Self {
        self.refund_state = Some(refund_state);
        self
    }

    pub fn and_provider(mut self, provider: ProviderType) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn and_txn_unset(mut self) -> Self {
        self.txn_unset = true;
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |s| order.status == s)
            && self.refund_state.map_or(true, |r| order.refund_state == r)
            && self.provider.map_or(true, |p| order.provider == p)
            && (!self.txn_unset || order.provider_txn_id.is_none())
    }
}

/// Fields to set on an order. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub pay_state: Option<PayState>,
    pub refund_state: Option<RefundState>,
    pub provider_txn_id: Option<String>,
    pub paid_amount: Option<Decimal>,
    pub pay_time: Option<DateTime<Utc>>,
    pub refund_time: Option<DateTime<Utc>>,
    pub refund_request_no: Option<String>,
    pub refund_reason: Option<String>,
}

impl OrderPatch {
    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(pay_state) = self.pay_state {
            order.pay_state = pay_state;
        }
        if let Some(refund_state) = self.refund_state {
            order.refund_state = refund_state;
        }
        if let Some(txn) = &self.provider_txn_id {
            order.provider_txn_id = Some(txn.clone());
        }
        if let Some(amount) = self.paid_amount {
            order.paid_amount = Some(amount);
        }
        if let Some(at) = self.pay_time {
            order.pay_time = Some(at);
        }
        if let Some(at) = self.refund_time {
            order.refund_time = Some(at);
        }
        if let Some(no) = &self.refund_request_no {
            order.refund_request_no = Some(no.clone());
        }
        if let Some(reason) = &self.refund_reason {
            order.refund_reason = Some(reason.clone());
        }
        order.updated_at = Utc::now();
    }
}

/// Inline certificate text or a path to it. Inline content wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateMaterial {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl CertificateMaterial {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            path: None,
        }
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            content: None,
            path: Some(path.into()),
        }
    }

    fn content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }

    fn path(&self) -> Option<&str> {
        self.path.as_deref().filter(|p| !p.trim().is_empty())
    }

    pub fn is_present(&self) -> bool {
        self.content().is_some() || self.path().is_some()
    }

    /// Returns the certificate text; `Ok(None)` when neither source is set.
    pub fn load(&self) -> std::io::Result<Option<String>> {
        if let Some(content) = self.content() {
            return Ok(Some(content.to_string()));
        }
        match self.path() {
            Some(path) => std::fs::read_to_string(path).map(Some),
            None => Ok(None),
        }
    }
}

/// Credential bundle for one gateway, owned by the configuration store.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfiguration {
    pub provider: ProviderType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Open-platform app id, or the merchant `pid`.
    #[serde(default)]
    pub app_id: Option<String>,
    /// App private key used to sign requests (certificate gateway).
    #[serde(default)]
    pub private_key: Option<Secret<String>>,
    /// Shared signing secret (merchant-key gateway).
    #[serde(default)]
    pub merchant_key: Option<Secret<String>>,
    #[serde(default)]
    pub gateway_public_cert: CertificateMaterial,
    #[serde(default)]
    pub app_cert: CertificateMaterial,
    #[serde(default)]
    pub root_cert: CertificateMaterial,
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub sign_type: Option<String>,
    /// Payment channel requested from the merchant gateway (`alipay`, `wxpay`, ...).
    #[serde(default)]
    pub channel: Option<String>,
}

impl ProviderConfiguration {
    pub fn new(provider: ProviderType) -> Self {
        Self {
            provider,
            enabled: true,
            app_id: None,
            private_key: None,
            merchant_key: None,
            gateway_public_cert: CertificateMaterial::default(),
            app_cert: CertificateMaterial::default(),
            root_cert: CertificateMaterial::default(),
            gateway_url: None,
            protocol_version: None,
            sign_type: None,
            channel: None,
        }
    }
}
