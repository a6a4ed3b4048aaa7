//! Payment gateway clients.
//!
//! [`ProviderClient`] is a closed set of gateway variants behind one
//! capability interface, [`PaymentGateway`]. Clients are built from a
//! [`ProviderConfiguration`] by [`ProviderClient::build`]; the registry
//! caches the result per provider type.

pub mod alipay;
pub mod cert;
pub mod epay;
pub mod sign;
pub mod types;

use crate::error::PaymentResult;
use crate::models::{ProviderConfiguration, ProviderType};
use async_trait::async_trait;
use service_core::http::HttpClient;

pub use alipay::AlipayClient;
pub use epay::EpayClient;
pub use types::{
    CallbackEvent, CallbackPayload, CallbackUrls, CreatePayment, NormalizedStatus, OperationResult,
    PaymentRedirect, RefundRequest, TradeRef, TradeStatus,
};

/// Operations every gateway supports.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> ProviderType;

    /// App id or merchant id that notifications must carry.
    fn merchant_id(&self) -> &str;

    async fn create_payment(&self, request: &CreatePayment) -> PaymentResult<PaymentRedirect>;

    async fn query(
        &self,
        order_no: Option<&str>,
        provider_txn_id: Option<&str>,
    ) -> PaymentResult<OperationResult>;

    async fn close(&self, order_no: &str) -> PaymentResult<OperationResult>;

    async fn refund(&self, request: &RefundRequest) -> PaymentResult<OperationResult>;

    async fn refund_query(
        &self,
        order_no: &str,
        refund_request_no: Option<&str>,
    ) -> PaymentResult<OperationResult>;

    /// Never fails: malformed or forged payloads yield `false`.
    fn verify_callback_signature(&self, payload: &CallbackPayload) -> bool;

    /// Extracts order facts from a payload that passed verification.
    fn parse_callback(&self, payload: &CallbackPayload) -> PaymentResult<CallbackEvent>;
}

#[derive(Debug, Clone)]
pub enum ProviderClient {
    Alipay(AlipayClient),
    Epay(EpayClient),
}

impl ProviderClient {
    pub fn build(
        config: &ProviderConfiguration,
        callback: CallbackUrls,
        http: HttpClient,
    ) -> PaymentResult<Self> {
        match config.provider {
            ProviderType::Alipay => Ok(Self::Alipay(AlipayClient::new(config, callback, http)?)),
            ProviderType::Epay => Ok(Self::Epay(EpayClient::new(config, callback, http)?)),
        }
    }

    pub fn callback_urls(&self) -> &CallbackUrls {
        match self {
            Self::Alipay(client) => client.callback_urls(),
            Self::Epay(client) => client.callback_urls(),
        }
    }
}

/// Notification and return URLs under the public site domain.
pub fn callback_urls(domain: &str, provider: ProviderType) -> CallbackUrls {
    let domain = domain.trim().trim_end_matches('/');
    let base = if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    };
    CallbackUrls {
        notify_url: format!("{}/notify/{}", base, provider.slug()),
        return_url: format!("{}/payment/result", base),
    }
}

#[async_trait]
impl PaymentGateway for ProviderClient {
    fn provider(&self) -> ProviderType {
        match self {
            Self::Alipay(_) => ProviderType::Alipay,
            Self::Epay(_) => ProviderType::Epay,
        }
    }

    fn merchant_id(&self) -> &str {
        match self {
            Self::Alipay(client) => client.app_id(),
            Self::Epay(client) => client.pid(),
        }
    }

    async fn create_payment(&self, request: &CreatePayment) -> PaymentResult<PaymentRedirect> {
        match self {
            Self::Alipay(client) => client.create_payment(request).await,
            Self::Epay(client) => client.create_payment(request).await,
        }
    }

    async fn query(
        &self,
        order_no: Option<&str>,
        provider_txn_id: Option<&str>,
    ) -> PaymentResult<OperationResult> {
        match self {
            Self::Alipay(client) => client.query(order_no, provider_txn_id).await,
            Self::Epay(client) => client.query(order_no, provider_txn_id).await,
        }
    }

    async fn close(&self, order_no: &str) -> PaymentResult<OperationResult> {
        match self {
            Self::Alipay(client) => client.close(order_no).await,
            Self::Epay(client) => client.close(order_no).await,
        }
    }

    async fn refund(&self, request: &RefundRequest) -> PaymentResult<OperationResult> {
        match self {
            Self::Alipay(client) => client.refund(request).await,
            Self::Epay(client) => client.refund(request).await,
        }
    }

    async fn refund_query(
        &self,
        order_no: &str,
        refund_request_no: Option<&str>,
    ) -> PaymentResult<OperationResult> {
        match self {
            Self::Alipay(client) => client.refund_query(order_no, refund_request_no).await,
            Self::Epay(client) => client.refund_query(order_no, refund_request_no).await,
        }
    }

    fn verify_callback_signature(&self, payload: &CallbackPayload) -> bool {
        match self {
            Self::Alipay(client) => client.verify_callback_signature(payload),
            Self::Epay(client) => client.verify_callback_signature(payload),
        }
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> PaymentResult<CallbackEvent> {
        match self {
            Self::Alipay(client) => client.parse_callback(payload),
            Self::Epay(client) => client.parse_callback(payload),
        }
    }
}
