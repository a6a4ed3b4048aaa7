//! Request and result vocabulary shared by every gateway.

use crate::error::{PaymentError, PaymentResult};
use crate::models::Terminal;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Two-decimal amount as gateways expect it, e.g. `9.90`.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

pub fn parse_amount(raw: &str) -> PaymentResult<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|_| PaymentError::InvalidArgument(format!("invalid amount '{}'", raw)))
}

/// Where the gateway should notify us and send the buyer back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    pub notify_url: String,
    pub return_url: String,
}

impl CallbackUrls {
    /// Return URL carrying the correlation tag as `from=<tag>`.
    pub fn return_url_with_tag(&self, tag: Option<&str>) -> String {
        match tag {
            Some(tag) => {
                let separator = if self.return_url.contains('?') { '&' } else { '?' };
                format!(
                    "{}{}from={}",
                    self.return_url,
                    separator,
                    urlencoding::encode(tag)
                )
            }
            None => self.return_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub order_no: String,
    pub amount: Decimal,
    pub description: String,
    pub callback: CallbackUrls,
    pub correlation_tag: Option<String>,
    pub terminal: Terminal,
}

impl CreatePayment {
    /// The explicit tag, or failing that one found in the description.
    pub fn effective_correlation_tag(&self) -> Option<String> {
        self.correlation_tag
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| legacy_correlation_tag(&self.description))
    }
}

/// Legacy `from:<tag>` convention embedded in a free-text description.
///
/// Kept for older callers that never pass the tag explicitly. The tag runs
/// from the prefix to the next whitespace, `,` or `;`.
pub fn legacy_correlation_tag(description: &str) -> Option<String> {
    let start = description.find("from:")? + "from:".len();
    let tag: String = description[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != ',' && *c != ';')
        .collect();
    if tag.is_empty() { None } else { Some(tag) }
}

/// Instructions for sending the buyer to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRedirect {
    /// Fully signed URL; a GET on it opens the checkout page.
    pub url: String,
    /// The signed parameters, for callers that render their own form.
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalizedStatus {
    Pending,
    Paid,
    Closed,
    Refunded,
    Unknown,
}

/// Outcome of a query, close, refund or refund query.
///
/// A business rejection is `success == false`; only transport, signature
/// and argument problems are errors.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub status: NormalizedStatus,
    pub provider_txn_id: Option<String>,
    pub amount: Option<Decimal>,
    pub provider_code: Option<String>,
    pub message: Option<String>,
    pub raw: serde_json::Value,
}

impl OperationResult {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>, raw: serde_json::Value) -> Self {
        Self {
            success: false,
            status: NormalizedStatus::Unknown,
            provider_txn_id: None,
            amount: None,
            provider_code: Some(code.into()),
            message: Some(message.into()),
            raw,
        }
    }

    /// Converts a rejection into [`PaymentError::UpstreamRejected`].
    pub fn into_accepted(self) -> PaymentResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(PaymentError::UpstreamRejected {
                code: self.provider_code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: self.message.unwrap_or_default(),
            })
        }
    }
}

/// Identifies a trade by our order number, the gateway's id, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeRef<'a> {
    pub order_no: Option<&'a str>,
    pub provider_txn_id: Option<&'a str>,
}

impl<'a> TradeRef<'a> {
    /// Fails with `INVALID_ARGUMENT` when neither identifier is usable.
    pub fn new(order_no: Option<&'a str>, provider_txn_id: Option<&'a str>) -> PaymentResult<Self> {
        let order_no = order_no.map(str::trim).filter(|s| !s.is_empty());
        let provider_txn_id = provider_txn_id.map(str::trim).filter(|s| !s.is_empty());
        if order_no.is_none() && provider_txn_id.is_none() {
            return Err(PaymentError::InvalidArgument(
                "either order_no or provider_txn_id is required".to_string(),
            ));
        }
        Ok(Self {
            order_no,
            provider_txn_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub order_no: Option<String>,
    pub provider_txn_id: Option<String>,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub refund_request_no: Option<String>,
}

impl RefundRequest {
    pub fn trade_ref(&self) -> PaymentResult<TradeRef<'_>> {
        TradeRef::new(self.order_no.as_deref(), self.provider_txn_id.as_deref())
    }
}

/// Raw notification fields, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    params: BTreeMap<String, String>,
}

impl CallbackPayload {
    pub fn new(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }

    /// Parses a URL query string. Malformed input yields an empty payload,
    /// which never verifies.
    pub fn from_query(query: &str) -> Self {
        Self::from_form(query.as_bytes())
    }

    pub fn from_form(body: &[u8]) -> Self {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).unwrap_or_default();
        Self {
            params: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeStatus {
    Paid,
    Pending,
    Closed,
    Other(String),
}

/// The order-relevant facts of a verified notification.
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub order_no: String,
    pub provider_txn_id: String,
    pub paid_amount: Decimal,
    pub trade_status: TradeStatus,
    pub merchant_id: Option<String>,
    pub correlation_tag: Option<String>,
}
