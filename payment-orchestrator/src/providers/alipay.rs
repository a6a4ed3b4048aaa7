//! Certificate-mode client for the Alipay open platform.
//!
//! Requests are signed with the app private key (RSA2) and carry the app
//! and root certificate SNs. Responses and notifications are verified with
//! the public key of the gateway certificate.

use super::cert;
use super::sign::{canonical_query, RsaSigner, RsaVerifier};
use super::types::{
    format_amount, parse_amount, CallbackEvent, CallbackPayload, CallbackUrls, CreatePayment,
    NormalizedStatus, OperationResult, PaymentRedirect, RefundRequest, TradeRef, TradeStatus,
};
use crate::error::{PaymentError, PaymentResult};
use crate::models::{CertificateMaterial, ProviderConfiguration};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde_json::{json, Map, Value};
use service_core::http::{HttpClient, HttpRequest};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const DEFAULT_GATEWAY: &str = "https://openapi.alipay.com/gateway.do";
const SUCCESS_CODE: &str = "10000";
const TRADE_NOT_EXIST: &str = "ACQ.TRADE_NOT_EXIST";

const PAGE_PAY: &str = "alipay.trade.page.pay";
const WAP_PAY: &str = "alipay.trade.wap.pay";
const TRADE_QUERY: &str = "alipay.trade.query";
const TRADE_CLOSE: &str = "alipay.trade.close";
const TRADE_REFUND: &str = "alipay.trade.refund";
const REFUND_QUERY: &str = "alipay.trade.fastpay.refund.query";

#[derive(Clone)]
pub struct AlipayClient {
    app_id: String,
    gateway_url: String,
    version: String,
    signer: RsaSigner,
    verifier: RsaVerifier,
    app_cert_sn: String,
    root_cert_sn: String,
    callback: CallbackUrls,
    http: HttpClient,
}

impl std::fmt::Debug for AlipayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlipayClient")
            .field("app_id", &self.app_id)
            .field("gateway_url", &self.gateway_url)
            .field("app_cert_sn", &self.app_cert_sn)
            .field("root_cert_sn", &self.root_cert_sn)
            .finish_non_exhaustive()
    }
}

fn required_material(material: &CertificateMaterial, field: &str) -> PaymentResult<String> {
    if !material.is_present() {
        return Err(PaymentError::ConfigurationInvalid(format!(
            "{} is required (content or path)",
            field
        )));
    }
    material
        .load()
        .map_err(|e| PaymentError::ConfigurationInvalid(format!("{}: {}", field, e)))?
        .ok_or_else(|| PaymentError::ConfigurationInvalid(format!("{} is empty", field)))
}

impl AlipayClient {
    pub fn new(
        config: &ProviderConfiguration,
        callback: CallbackUrls,
        http: HttpClient,
    ) -> PaymentResult<Self> {
        let app_id = config
            .app_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PaymentError::ConfigurationInvalid("app_id is required".into()))?
            .to_string();
        let private_key = config
            .private_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| PaymentError::ConfigurationInvalid("private_key is required".into()))?;

        // All three certificates are mandatory in certificate mode.
        let gateway_cert = required_material(&config.gateway_public_cert, "gateway_public_cert")?;
        let app_cert = required_material(&config.app_cert, "app_cert")?;
        let root_cert = required_material(&config.root_cert, "root_cert")?;

        let signer = RsaSigner::from_pem(private_key.expose_secret())?;
        let gateway = cert::parse_one(&gateway_cert, "gateway_public_cert")?;
        let verifier = RsaVerifier::new(cert::public_key(&gateway)?);
        let app_cert_sn = cert::cert_sn_from_pem(&app_cert, "app_cert")?;
        let root_cert_sn = cert::root_cert_sn(&root_cert)?;

        let gateway_url = config
            .gateway_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_GATEWAY)
            .to_string();

        tracing::info!(
            app_id = %app_id,
            gateway = %gateway_url,
            app_cert_sn = %app_cert_sn,
            "Alipay client initialized"
        );

        Ok(Self {
            app_id,
            gateway_url,
            version: config
                .protocol_version
                .clone()
                .unwrap_or_else(|| "1.0".to_string()),
            signer,
            verifier,
            app_cert_sn,
            root_cert_sn,
            callback,
            http,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn callback_urls(&self) -> &CallbackUrls {
        &self.callback
    }

    pub fn app_cert_sn(&self) -> &str {
        &self.app_cert_sn
    }

    pub fn root_cert_sn(&self) -> &str {
        &self.root_cert_sn
    }

    fn common_params(&self, method: &str, biz_content: &Value) -> BTreeMap<String, String> {
        // Gateway timestamps are Beijing time.
        let timestamp = (Utc::now() + Duration::hours(8))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let mut params = BTreeMap::new();
        params.insert("app_id".to_string(), self.app_id.clone());
        params.insert("method".to_string(), method.to_string());
        params.insert("format".to_string(), "JSON".to_string());
        params.insert("charset".to_string(), "utf-8".to_string());
        params.insert("sign_type".to_string(), "RSA2".to_string());
        params.insert("timestamp".to_string(), timestamp);
        params.insert("version".to_string(), self.version.clone());
        params.insert("app_cert_sn".to_string(), self.app_cert_sn.clone());
        params.insert("alipay_root_cert_sn".to_string(), self.root_cert_sn.clone());
        params.insert("biz_content".to_string(), biz_content.to_string());
        params
    }

    fn sign(&self, params: &mut BTreeMap<String, String>) {
        let content = canonical_query(params, &["sign"]);
        params.insert("sign".to_string(), self.signer.sign(&content));
    }

    pub async fn create_payment(&self, request: &CreatePayment) -> PaymentResult<PaymentRedirect> {
        let tag = request.effective_correlation_tag();
        let (method, product_code) = if request.terminal.is_mobile() {
            (WAP_PAY, "QUICK_WAP_WAY")
        } else {
            (PAGE_PAY, "FAST_INSTANT_TRADE_PAY")
        };

        let return_url = request.callback.return_url_with_tag(tag.as_deref());
        let mut biz = json!({
            "out_trade_no": request.order_no,
            "total_amount": format_amount(request.amount),
            "subject": request.description,
            "product_code": product_code,
        });
        if let Some(tag) = &tag {
            biz["passback_params"] = Value::String(urlencoding::encode(tag).into_owned());
        }
        if request.terminal.is_mobile() {
            biz["quit_url"] = Value::String(return_url.clone());
        }

        let mut params = self.common_params(method, &biz);
        params.insert("notify_url".to_string(), request.callback.notify_url.clone());
        params.insert("return_url".to_string(), return_url);
        self.sign(&mut params);

        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| PaymentError::Internal(format!("failed to encode payment request: {}", e)))?;

        tracing::info!(
            order_no = %request.order_no,
            amount = %request.amount,
            method = method,
            "Alipay payment request built"
        );

        Ok(PaymentRedirect {
            url: format!("{}?{}", self.gateway_url, query),
            params,
        })
    }

    /// Calls `method` and returns its verified response node.
    async fn execute(&self, method: &str, biz: Value) -> PaymentResult<Value> {
        let mut params = self.common_params(method, &biz);
        self.sign(&mut params);

        let request = HttpRequest::post(self.gateway_url.as_str()).form(&params)?;
        let response = self.http.request(request).await?;
        let body = response.text();

        let envelope: Value = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(method = method, error = %e, "Alipay returned a non-JSON response");
            PaymentError::UpstreamRejected {
                code: "INVALID_RESPONSE".to_string(),
                message: e.to_string(),
            }
        })?;

        let response_key = format!("{}_response", method.replace('.', "_"));
        let node_key = if envelope.get(&response_key).is_some() {
            response_key
        } else {
            "error_response".to_string()
        };
        let node = envelope.get(&node_key).cloned().unwrap_or(Value::Null);
        let succeeded = node_code(&node) == Some(SUCCESS_CODE);

        match envelope.get("sign").and_then(Value::as_str) {
            Some(signature) => {
                let raw = extract_node(&body, &node_key).ok_or_else(|| {
                    PaymentError::SignatureInvalid(format!("{} node not found", node_key))
                })?;
                if let Err(reason) = self.verifier.verify(raw, signature) {
                    tracing::warn!(method = method, reason = %reason, "Alipay response signature rejected");
                    return Err(PaymentError::SignatureInvalid(reason));
                }
            }
            None if succeeded => {
                return Err(PaymentError::SignatureInvalid(
                    "successful response is not signed".to_string(),
                ));
            }
            // Gateway-level errors are returned unsigned.
            None => {}
        }

        tracing::debug!(method = method, code = ?node_code(&node), "Alipay response received");
        Ok(node)
    }

    pub async fn query(
        &self,
        order_no: Option<&str>,
        provider_txn_id: Option<&str>,
    ) -> PaymentResult<OperationResult> {
        let trade = TradeRef::new(order_no, provider_txn_id)?;
        let node = self.execute(TRADE_QUERY, trade_biz(&trade)).await?;
        Ok(operation_result(node, |node| {
            match node.get("trade_status").and_then(Value::as_str) {
                Some(status) => match map_trade_status(status) {
                    TradeStatus::Paid => NormalizedStatus::Paid,
                    TradeStatus::Pending => NormalizedStatus::Pending,
                    TradeStatus::Closed => NormalizedStatus::Closed,
                    TradeStatus::Other(_) => NormalizedStatus::Unknown,
                },
                None => NormalizedStatus::Unknown,
            }
        }))
    }

    pub async fn close(&self, order_no: &str) -> PaymentResult<OperationResult> {
        let trade = TradeRef::new(Some(order_no), None)?;
        let node = self.execute(TRADE_CLOSE, trade_biz(&trade)).await?;
        // A trade the buyer never opened does not exist at the gateway and
        // can no longer be paid.
        if node.get("sub_code").and_then(Value::as_str) == Some(TRADE_NOT_EXIST) {
            return Ok(OperationResult {
                success: true,
                status: NormalizedStatus::Closed,
                provider_txn_id: None,
                amount: None,
                provider_code: Some(TRADE_NOT_EXIST.to_string()),
                message: node.get("sub_msg").and_then(Value::as_str).map(str::to_string),
                raw: node,
            });
        }
        Ok(operation_result(node, |_| NormalizedStatus::Closed))
    }

    pub async fn refund(&self, request: &RefundRequest) -> PaymentResult<OperationResult> {
        let trade = request.trade_ref()?;
        let mut biz = trade_biz(&trade);
        biz["refund_amount"] = Value::String(format_amount(request.amount));
        if let Some(reason) = &request.reason {
            biz["refund_reason"] = Value::String(reason.clone());
        }
        if let Some(no) = &request.refund_request_no {
            biz["out_request_no"] = Value::String(no.clone());
        }

        let node = self.execute(TRADE_REFUND, biz).await?;
        Ok(operation_result(node, |_| NormalizedStatus::Refunded))
    }

    pub async fn refund_query(
        &self,
        order_no: &str,
        refund_request_no: Option<&str>,
    ) -> PaymentResult<OperationResult> {
        let trade = TradeRef::new(Some(order_no), None)?;
        let mut biz = trade_biz(&trade);
        biz["out_request_no"] = Value::String(refund_request_no.unwrap_or(order_no).to_string());

        let node = self.execute(REFUND_QUERY, biz).await?;
        Ok(operation_result(node, |node| {
            match node.get("refund_status").and_then(Value::as_str) {
                Some("REFUND_SUCCESS") => NormalizedStatus::Refunded,
                _ => NormalizedStatus::Pending,
            }
        }))
    }

    /// RSA2 check of a notification with the gateway certificate key.
    pub fn verify_callback_signature(&self, payload: &CallbackPayload) -> bool {
        let Some(signature) = payload.get("sign") else {
            tracing::debug!("Alipay notification has no sign field");
            return false;
        };
        let content = canonical_query(payload.params(), &["sign", "sign_type"]);
        match self.verifier.verify(&content, signature) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(reason = %reason, payload = ?payload.params(), "Alipay notification signature rejected");
                false
            }
        }
    }

    pub fn parse_callback(&self, payload: &CallbackPayload) -> PaymentResult<CallbackEvent> {
        let field = |name: &str| {
            payload.get(name).map(str::to_string).ok_or_else(|| {
                PaymentError::InvalidArgument(format!("notification is missing {}", name))
            })
        };
        let paid_amount = parse_amount(&field("total_amount")?)?;
        let correlation_tag = payload
            .get("passback_params")
            .map(|p| urlencoding::decode(p).map(|d| d.into_owned()).unwrap_or_else(|_| p.to_string()));

        Ok(CallbackEvent {
            order_no: field("out_trade_no")?,
            provider_txn_id: field("trade_no")?,
            paid_amount,
            trade_status: map_trade_status(&field("trade_status")?),
            merchant_id: payload.get("app_id").map(str::to_string),
            correlation_tag,
        })
    }
}

fn trade_biz(trade: &TradeRef<'_>) -> Value {
    let mut biz = Map::new();
    if let Some(order_no) = trade.order_no {
        biz.insert("out_trade_no".to_string(), Value::String(order_no.to_string()));
    }
    if let Some(txn) = trade.provider_txn_id {
        biz.insert("trade_no".to_string(), Value::String(txn.to_string()));
    }
    Value::Object(biz)
}

fn node_code(node: &Value) -> Option<&str> {
    node.get("code").and_then(Value::as_str)
}

fn operation_result(node: Value, status: impl FnOnce(&Value) -> NormalizedStatus) -> OperationResult {
    if node_code(&node) != Some(SUCCESS_CODE) {
        let str_field = |primary: &str, fallback: &str| {
            node.get(primary)
                .or_else(|| node.get(fallback))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let code = str_field("sub_code", "code");
        let message = str_field("sub_msg", "msg");
        return OperationResult::rejected(code, message, node);
    }

    OperationResult {
        success: true,
        status: status(&node),
        provider_txn_id: node.get("trade_no").and_then(Value::as_str).map(str::to_string),
        amount: node
            .get("total_amount")
            .or_else(|| node.get("refund_fee"))
            .and_then(Value::as_str)
            .and_then(|a| Decimal::from_str(a).ok()),
        provider_code: Some(SUCCESS_CODE.to_string()),
        message: node.get("msg").and_then(Value::as_str).map(str::to_string),
        raw: node,
    }
}

fn map_trade_status(status: &str) -> TradeStatus {
    match status {
        "TRADE_SUCCESS" | "TRADE_FINISHED" => TradeStatus::Paid,
        "WAIT_BUYER_PAY" => TradeStatus::Pending,
        "TRADE_CLOSED" => TradeStatus::Closed,
        other => TradeStatus::Other(other.to_string()),
    }
}

/// Raw text of the JSON object stored under `key`, exactly as received.
/// Signatures cover these bytes, so the node must not be re-serialized.
fn extract_node<'a>(body: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("\"{}\"", key);
    let after_key = body.find(&needle)? + needle.len();
    let rest = body[after_key..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let start = body.len() - rest.len();
    if !rest.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProviderType, Terminal};
    use secrecy::Secret;
    use service_core::http::HttpClientConfig;

    const APP_KEY: &str = include_str!("../../tests/fixtures/app_private_key.pem");
    const APP_CERT: &str = include_str!("../../tests/fixtures/app_cert.crt");
    const GATEWAY_KEY: &str = include_str!("../../tests/fixtures/gateway_private_key.pem");
    const GATEWAY_CERT: &str = include_str!("../../tests/fixtures/gateway_public_cert.crt");
    const ROOT_BUNDLE: &str = include_str!("../../tests/fixtures/root_cert_bundle.crt");

    fn config() -> ProviderConfiguration {
        let mut config = ProviderConfiguration::new(ProviderType::Alipay);
        config.app_id = Some("2021000000000001".into());
        config.private_key = Some(Secret::new(APP_KEY.to_string()));
        config.app_cert = CertificateMaterial::from_content(APP_CERT);
        config.gateway_public_cert = CertificateMaterial::from_content(GATEWAY_CERT);
        config.root_cert = CertificateMaterial::from_content(ROOT_BUNDLE);
        config
    }

    fn urls() -> CallbackUrls {
        CallbackUrls {
            notify_url: "https://pay.example.com/notify/alipay".into(),
            return_url: "https://pay.example.com/payment/result".into(),
        }
    }

    fn client(config: &ProviderConfiguration) -> PaymentResult<AlipayClient> {
        let http = HttpClient::new(HttpClientConfig::default()).unwrap();
        AlipayClient::new(config, urls(), http)
    }

    fn signed_payload(pairs: &[(&str, &str)]) -> CallbackPayload {
        let mut params: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let signer = RsaSigner::from_pem(GATEWAY_KEY).unwrap();
        let content = canonical_query(&params, &["sign", "sign_type"]);
        params.insert("sign".into(), signer.sign(&content));
        params.insert("sign_type".into(), "RSA2".into());
        CallbackPayload::new(params)
    }

    #[test]
    fn each_missing_certificate_is_configuration_invalid() {
        for strip in ["gateway_public_cert", "app_cert", "root_cert"] {
            let mut config = config();
            match strip {
                "gateway_public_cert" => config.gateway_public_cert = CertificateMaterial::default(),
                "app_cert" => config.app_cert = CertificateMaterial::default(),
                _ => config.root_cert = CertificateMaterial::default(),
            }
            let err = client(&config).unwrap_err();
            assert_eq!(err.kind(), "CONFIGURATION_INVALID", "{}", strip);
            assert!(err.to_string().contains(strip));
        }
    }

    #[test]
    fn certificate_sns_are_derived_at_construction() {
        let client = client(&config()).unwrap();
        assert_eq!(client.app_cert_sn(), "7fd808068d8c29c62b0e1dcc97b74cb8");
        assert_eq!(client.root_cert_sn(), "c2137671b7d0646a140525eac6600399");
    }

    #[tokio::test]
    async fn page_pay_redirect_is_signed() {
        let client = client(&config()).unwrap();
        let redirect = client
            .create_payment(&CreatePayment {
                order_no: "20240101120000123456".into(),
                amount: Decimal::new(99, 1),
                description: "VIP monthly from:spring".into(),
                callback: urls(),
                correlation_tag: None,
                terminal: Terminal::Web,
            })
            .await
            .unwrap();

        assert!(redirect.url.starts_with(DEFAULT_GATEWAY));
        assert_eq!(redirect.params["method"], PAGE_PAY);
        assert!(redirect.params["return_url"].ends_with("?from=spring"));
        let biz: Value = serde_json::from_str(&redirect.params["biz_content"]).unwrap();
        assert_eq!(biz["total_amount"], "9.90");
        assert_eq!(biz["passback_params"], "spring");

        let app_key = RsaSigner::from_pem(APP_KEY).unwrap();
        let content = canonical_query(&redirect.params, &["sign"]);
        assert_eq!(redirect.params["sign"], app_key.sign(&content));
    }

    #[test]
    fn tampered_notification_is_rejected_without_panicking() {
        let client = client(&config()).unwrap();
        let payload = signed_payload(&[
            ("app_id", "2021000000000001"),
            ("out_trade_no", "A1"),
            ("trade_no", "T123"),
            ("total_amount", "9.90"),
            ("trade_status", "TRADE_SUCCESS"),
        ]);
        assert!(client.verify_callback_signature(&payload));

        let mut params = payload.params().clone();
        params.insert("total_amount".into(), "0.01".into());
        assert!(!client.verify_callback_signature(&CallbackPayload::new(params.clone())));

        params.insert("sign".into(), "%%%not base64".into());
        assert!(!client.verify_callback_signature(&CallbackPayload::new(params)));
        assert!(!client.verify_callback_signature(&CallbackPayload::default()));
    }

    #[test]
    fn notification_is_parsed() {
        let client = client(&config()).unwrap();
        let payload = signed_payload(&[
            ("app_id", "2021000000000001"),
            ("out_trade_no", "A1"),
            ("trade_no", "T123"),
            ("total_amount", "9.90"),
            ("trade_status", "TRADE_FINISHED"),
            ("passback_params", "invite%2042"),
        ]);
        let event = client.parse_callback(&payload).unwrap();
        assert_eq!(event.order_no, "A1");
        assert_eq!(event.provider_txn_id, "T123");
        assert_eq!(event.paid_amount, Decimal::new(990, 2));
        assert_eq!(event.trade_status, TradeStatus::Paid);
        assert_eq!(event.correlation_tag.as_deref(), Some("invite 42"));
    }

    #[tokio::test]
    async fn query_and_refund_need_an_identifier() {
        let client = client(&config()).unwrap();
        assert_eq!(client.query(None, None).await.unwrap_err().kind(), "INVALID_ARGUMENT");
        let refund = RefundRequest {
            order_no: None,
            provider_txn_id: None,
            amount: Decimal::new(990, 2),
            reason: None,
            refund_request_no: None,
        };
        assert_eq!(client.refund(&refund).await.unwrap_err().kind(), "INVALID_ARGUMENT");
    }

    #[test]
    fn response_node_is_extracted_verbatim() {
        let body = r#"{"alipay_trade_query_response":{"code":"10000","msg":"Success","note":"a \"}\" b","nested":{"x":1}},"sign":"abc"}"#;
        assert_eq!(
            extract_node(body, "alipay_trade_query_response"),
            Some(r#"{"code":"10000","msg":"Success","note":"a \"}\" b","nested":{"x":1}}"#)
        );
        assert_eq!(extract_node(body, "error_response"), None);
    }
}
