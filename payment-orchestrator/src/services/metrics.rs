use crate::models::ProviderType;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once per process. Later calls are
/// no-ops, which lets tests build several applications.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %e, "Metrics recorder already installed");
        }
        handle
    });
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_order_created(provider: ProviderType) {
    metrics::counter!("payment_orders_created_total", "provider" => provider.as_str()).increment(1);
}

/// `outcome` is one of `paid`, `duplicate`, `ignored` or `rejected`.
pub fn record_webhook(provider: ProviderType, outcome: &'static str) {
    metrics::counter!(
        "payment_webhooks_total",
        "provider" => provider.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_refund(provider: ProviderType, outcome: &'static str) {
    metrics::counter!(
        "payment_refunds_total",
        "provider" => provider.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_late_payment(provider: ProviderType) {
    metrics::counter!("payment_late_payments_total", "provider" => provider.as_str()).increment(1);
}
