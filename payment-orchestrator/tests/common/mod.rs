#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use payment_orchestrator::models::{
    CatalogItem, CertificateMaterial, ItemKind, ProviderConfiguration, ProviderType,
};
use payment_orchestrator::providers::sign::{canonical_query, md5_sign, RsaSigner};
use payment_orchestrator::stores::{
    InMemoryConfigurationStore, InMemoryItemCatalog, InMemoryOrderStore,
};
use payment_orchestrator::{router, AppState};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::Value;
use service_core::http::{HttpClient, HttpClientConfig, RetryPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;

pub const TEST_USER_ID: &str = "user-42";
pub const OPERATOR_ID: &str = "ops-1";
pub const SITE_DOMAIN: &str = "pay.example.com";
pub const VIP_ITEM: &str = "vip-monthly";
pub const ALIPAY_APP_ID: &str = "2021000000000001";
pub const EPAY_PID: &str = "1001";
pub const EPAY_KEY: &str = "epay-merchant-key";

pub const APP_KEY: &str = include_str!("../fixtures/app_private_key.pem");
pub const APP_CERT: &str = include_str!("../fixtures/app_cert.crt");
pub const GATEWAY_KEY: &str = include_str!("../fixtures/gateway_private_key.pem");
pub const GATEWAY_CERT: &str = include_str!("../fixtures/gateway_public_cert.crt");
pub const ROOT_BUNDLE: &str = include_str!("../fixtures/root_cert_bundle.crt");

/// The service wired on in-memory stores, with both gateways pointed at a
/// local mock server.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub orders: Arc<InMemoryOrderStore>,
    pub configs: Arc<InMemoryConfigurationStore>,
    pub catalog: Arc<InMemoryItemCatalog>,
    pub gateway: MockServer,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let gateway = MockServer::start().await;

        let orders = Arc::new(InMemoryOrderStore::new());
        let configs = Arc::new(InMemoryConfigurationStore::new());
        let catalog = Arc::new(InMemoryItemCatalog::new());

        configs.set_site_domain(Some(SITE_DOMAIN.to_string())).await;
        configs.put(alipay_config(&gateway.uri()));
        configs.put(epay_config(&gateway.uri()));
        catalog.put(CatalogItem {
            item_ref: VIP_ITEM.to_string(),
            kind: ItemKind::Membership,
            title: "VIP monthly".to_string(),
            price: Decimal::new(990, 2),
            quantity: 30,
            active: true,
        });

        let http = HttpClient::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::with_retries(0, Duration::from_millis(1)),
            ..HttpClientConfig::default()
        })
        .expect("Failed to build HTTP client");

        let state = AppState::new(
            orders.clone(),
            catalog.clone(),
            configs.clone(),
            None,
            http,
        )
        .with_operators([OPERATOR_ID.to_string()]);

        Self {
            router: router(state.clone()),
            state,
            orders,
            configs,
            catalog,
            gateway,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        let json = serde_json::from_str(&body).unwrap_or(Value::Null);
        (status, json)
    }

    /// `POST /payments` as the test user.
    pub async fn create_payment(&self, provider: &str, correlation_tag: Option<&str>) -> Value {
        let body = serde_json::json!({
            "item_ref": VIP_ITEM,
            "provider": provider,
            "terminal": "WEB",
            "correlation_tag": correlation_tag,
        });
        let (status, json) = self
            .send_json(user_request(Method::POST, "/payments", Some(body)))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create payment failed: {}", json);
        json
    }

    pub async fn get_order(&self, order_no: &str) -> Value {
        let (status, json) = self
            .send_json(user_request(Method::GET, &format!("/orders/{}", order_no), None))
            .await;
        assert_eq!(status, StatusCode::OK, "get order failed: {}", json);
        json
    }
}

pub fn user_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    request_as(TEST_USER_ID, method, uri, body)
}

pub fn operator_request(method: Method, uri: &str) -> Request<Body> {
    request_as(OPERATOR_ID, method, uri, None)
}

pub fn request_as(user_id: &str, method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-User-ID", user_id);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("Failed to build request"),
        None => builder.body(Body::empty()).expect("Failed to build request"),
    }
}

pub fn alipay_config(gateway: &str) -> ProviderConfiguration {
    let mut config = ProviderConfiguration::new(ProviderType::Alipay);
    config.app_id = Some(ALIPAY_APP_ID.to_string());
    config.private_key = Some(Secret::new(APP_KEY.to_string()));
    config.app_cert = CertificateMaterial::from_content(APP_CERT);
    config.gateway_public_cert = CertificateMaterial::from_content(GATEWAY_CERT);
    config.root_cert = CertificateMaterial::from_content(ROOT_BUNDLE);
    config.gateway_url = Some(format!("{}/gateway.do", gateway));
    config
}

pub fn epay_config(gateway: &str) -> ProviderConfiguration {
    let mut config = ProviderConfiguration::new(ProviderType::Epay);
    config.app_id = Some(EPAY_PID.to_string());
    config.merchant_key = Some(Secret::new(EPAY_KEY.to_string()));
    config.gateway_url = Some(gateway.to_string());
    config
}

fn to_params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Merchant-key notification fields, signed like the gateway does.
pub fn signed_epay_notification(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut params = to_params(pairs);
    let sign = md5_sign(&canonical_query(&params, &["sign", "sign_type"]), EPAY_KEY);
    params.insert("sign".to_string(), sign);
    params.insert("sign_type".to_string(), "MD5".to_string());
    params
}

/// Certificate-gateway notification fields, signed with the gateway key.
pub fn signed_alipay_notification(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut params = to_params(pairs);
    let signer = RsaSigner::from_pem(GATEWAY_KEY).expect("Failed to load gateway key");
    let sign = signer.sign(&canonical_query(&params, &["sign", "sign_type"]));
    params.insert("sign".to_string(), sign);
    params.insert("sign_type".to_string(), "RSA2".to_string());
    params
}

/// A gateway API response envelope whose node is signed with the gateway key.
pub fn signed_alipay_response(method: &str, node: Value) -> String {
    let node_key = format!("{}_response", method.replace('.', "_"));
    let node_text = node.to_string();
    let signer = RsaSigner::from_pem(GATEWAY_KEY).expect("Failed to load gateway key");
    let sign = signer.sign(&node_text);
    format!(
        r#"{{"{}":{},"alipay_cert_sn":"b4b70f146dac4e5a7bd65ac9131d52ab","sign":"{}"}}"#,
        node_key, node_text, sign
    )
}

pub fn form_body(params: &BTreeMap<String, String>) -> String {
    serde_urlencoded::to_string(params).expect("Failed to encode form")
}

pub fn notify_post(provider: &str, params: &BTreeMap<String, String>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("/notify/{}", provider))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form_body(params)))
        .expect("Failed to build request")
}

pub fn notify_get(provider: &str, params: &BTreeMap<String, String>) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(format!("/notify/{}?{}", provider, form_body(params)))
        .body(Body::empty())
        .expect("Failed to build request")
}
