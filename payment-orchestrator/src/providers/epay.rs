//! Merchant-key client for "epay" style aggregation gateways.
//!
//! Every request and notification is signed with
//! `md5(sorted k=v pairs + merchant key)`.

use super::sign::{canonical_query, constant_time_eq, md5_sign};
use super::types::{
    format_amount, parse_amount, CallbackEvent, CallbackPayload, CallbackUrls, CreatePayment,
    NormalizedStatus, OperationResult, PaymentRedirect, RefundRequest, TradeRef, TradeStatus,
};
use crate::error::{PaymentError, PaymentResult};
use crate::models::ProviderConfiguration;
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde_json::Value;
use service_core::http::{HttpClient, HttpRequest};
use std::collections::BTreeMap;
use std::str::FromStr;

const DEFAULT_CHANNEL: &str = "alipay";
const SIGN_EXCLUDED: &[&str] = &["sign", "sign_type"];

#[derive(Clone)]
pub struct EpayClient {
    pid: String,
    key: Secret<String>,
    gateway_url: String,
    channel: String,
    callback: CallbackUrls,
    http: HttpClient,
}

impl std::fmt::Debug for EpayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpayClient")
            .field("pid", &self.pid)
            .field("gateway_url", &self.gateway_url)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

impl EpayClient {
    pub fn new(
        config: &ProviderConfiguration,
        callback: CallbackUrls,
        http: HttpClient,
    ) -> PaymentResult<Self> {
        let pid = non_blank(config.app_id.as_deref())
            .ok_or_else(|| PaymentError::ConfigurationInvalid("merchant id (pid) is required".into()))?
            .to_string();
        let key = config
            .merchant_key
            .clone()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| PaymentError::ConfigurationInvalid("merchant_key is required".into()))?;
        let gateway_url = non_blank(config.gateway_url.as_deref())
            .ok_or_else(|| PaymentError::ConfigurationInvalid("gateway_url is required".into()))?
            .trim_end_matches('/')
            .to_string();
        let channel = non_blank(config.channel.as_deref())
            .unwrap_or(DEFAULT_CHANNEL)
            .to_string();

        tracing::info!(pid = %pid, gateway = %gateway_url, channel = %channel, "Epay client initialized");

        Ok(Self {
            pid,
            key,
            gateway_url,
            channel,
            callback,
            http,
        })
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    pub fn callback_urls(&self) -> &CallbackUrls {
        &self.callback
    }

    fn signature(&self, params: &BTreeMap<String, String>) -> String {
        md5_sign(&canonical_query(params, SIGN_EXCLUDED), self.key.expose_secret())
    }

    fn sign(&self, params: &mut BTreeMap<String, String>) {
        let sign = self.signature(params);
        params.insert("sign".to_string(), sign);
        params.insert("sign_type".to_string(), "MD5".to_string());
    }

    pub async fn create_payment(&self, request: &CreatePayment) -> PaymentResult<PaymentRedirect> {
        let tag = request.effective_correlation_tag();
        let mut params = BTreeMap::new();
        params.insert("pid".to_string(), self.pid.clone());
        params.insert("type".to_string(), self.channel.clone());
        params.insert("out_trade_no".to_string(), request.order_no.clone());
        params.insert("notify_url".to_string(), request.callback.notify_url.clone());
        params.insert(
            "return_url".to_string(),
            request.callback.return_url_with_tag(tag.as_deref()),
        );
        params.insert("name".to_string(), request.description.clone());
        params.insert("money".to_string(), format_amount(request.amount));
        if let Some(tag) = tag {
            params.insert("param".to_string(), tag);
        }
        self.sign(&mut params);

        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| PaymentError::Internal(format!("failed to encode payment request: {}", e)))?;

        tracing::info!(order_no = %request.order_no, amount = %request.amount, "Epay payment request built");

        Ok(PaymentRedirect {
            url: format!("{}/submit.php?{}", self.gateway_url, query),
            params,
        })
    }

    /// Signed form POST to `api.php?act=<act>`.
    async fn api(&self, act: &str, mut params: BTreeMap<String, String>) -> PaymentResult<Value> {
        params.insert("pid".to_string(), self.pid.clone());
        params.insert("timestamp".to_string(), Utc::now().timestamp().to_string());
        self.sign(&mut params);

        let url = format!("{}/api.php?act={}", self.gateway_url, act);
        let request = HttpRequest::post(url).form(&params)?;
        let response = self.http.request(request).await?;

        let body: Value = serde_json::from_slice(&response.body).map_err(|e| {
            tracing::warn!(act = act, error = %e, "Epay returned a non-JSON response");
            PaymentError::UpstreamRejected {
                code: "INVALID_RESPONSE".to_string(),
                message: e.to_string(),
            }
        })?;
        tracing::debug!(act = act, code = ?body.get("code"), "Epay response received");
        Ok(body)
    }

    pub async fn query(
        &self,
        order_no: Option<&str>,
        provider_txn_id: Option<&str>,
    ) -> PaymentResult<OperationResult> {
        let trade = TradeRef::new(order_no, provider_txn_id)?;
        let body = self.api("order", trade_params(&trade)).await?;
        Ok(operation_result(body, |body| match int_field(body, "status") {
            Some(1) => NormalizedStatus::Paid,
            Some(0) => NormalizedStatus::Pending,
            _ => NormalizedStatus::Unknown,
        }))
    }

    pub async fn close(&self, order_no: &str) -> PaymentResult<OperationResult> {
        let trade = TradeRef::new(Some(order_no), None)?;
        let body = self.api("close", trade_params(&trade)).await?;
        Ok(operation_result(body, |_| NormalizedStatus::Closed))
    }

    pub async fn refund(&self, request: &RefundRequest) -> PaymentResult<OperationResult> {
        let trade = request.trade_ref()?;
        let mut params = trade_params(&trade);
        params.insert("money".to_string(), format_amount(request.amount));
        if let Some(no) = &request.refund_request_no {
            params.insert("out_refund_no".to_string(), no.clone());
        }
        if let Some(reason) = &request.reason {
            params.insert("reason".to_string(), reason.clone());
        }

        let body = self.api("refund", params).await?;
        Ok(operation_result(body, |_| NormalizedStatus::Refunded))
    }

    pub async fn refund_query(
        &self,
        order_no: &str,
        refund_request_no: Option<&str>,
    ) -> PaymentResult<OperationResult> {
        let trade = TradeRef::new(Some(order_no), None)?;
        let mut params = trade_params(&trade);
        params.insert(
            "out_refund_no".to_string(),
            refund_request_no.unwrap_or(order_no).to_string(),
        );

        let body = self.api("refundquery", params).await?;
        Ok(operation_result(body, |body| match int_field(body, "status") {
            Some(1) => NormalizedStatus::Refunded,
            _ => NormalizedStatus::Pending,
        }))
    }

    pub fn verify_callback_signature(&self, payload: &CallbackPayload) -> bool {
        let Some(signature) = payload.get("sign") else {
            tracing::debug!("Epay notification has no sign field");
            return false;
        };
        if let Some(sign_type) = payload.get("sign_type") {
            if !sign_type.eq_ignore_ascii_case("MD5") {
                tracing::debug!(sign_type = %sign_type, "Epay notification uses an unsupported sign type");
                return false;
            }
        }

        let expected = self.signature(payload.params());
        let valid = constant_time_eq(&expected, &signature.to_ascii_lowercase());
        if !valid {
            tracing::debug!(payload = ?payload.params(), "Epay notification signature rejected");
        }
        valid
    }

    pub fn parse_callback(&self, payload: &CallbackPayload) -> PaymentResult<CallbackEvent> {
        let field = |name: &str| {
            payload.get(name).map(str::to_string).ok_or_else(|| {
                PaymentError::InvalidArgument(format!("notification is missing {}", name))
            })
        };
        let trade_status = match field("trade_status")?.as_str() {
            "TRADE_SUCCESS" => TradeStatus::Paid,
            other => TradeStatus::Other(other.to_string()),
        };

        Ok(CallbackEvent {
            order_no: field("out_trade_no")?,
            provider_txn_id: field("trade_no")?,
            paid_amount: parse_amount(&field("money")?)?,
            trade_status,
            merchant_id: payload.get("pid").map(str::to_string),
            correlation_tag: payload.get("param").map(str::to_string),
        })
    }
}

fn trade_params(trade: &TradeRef<'_>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    if let Some(order_no) = trade.order_no {
        params.insert("out_trade_no".to_string(), order_no.to_string());
    }
    if let Some(txn) = trade.provider_txn_id {
        params.insert("trade_no".to_string(), txn.to_string());
    }
    params
}

/// Integer field that the gateway may send as a number or a string.
fn int_field(body: &Value, key: &str) -> Option<i64> {
    match body.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn str_field(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn operation_result(body: Value, status: impl FnOnce(&Value) -> NormalizedStatus) -> OperationResult {
    let code = int_field(&body, "code");
    if code != Some(1) {
        let code = code.map_or_else(|| "UNKNOWN".to_string(), |c| c.to_string());
        let message = str_field(&body, "msg").unwrap_or_default();
        return OperationResult::rejected(code, message, body);
    }

    OperationResult {
        success: true,
        status: status(&body),
        provider_txn_id: str_field(&body, "trade_no"),
        amount: str_field(&body, "money").and_then(|m| Decimal::from_str(&m).ok()),
        provider_code: Some("1".to_string()),
        message: str_field(&body, "msg"),
        raw: body,
    }
}
