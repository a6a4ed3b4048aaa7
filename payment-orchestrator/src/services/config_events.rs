//! Provider configuration change notifications over Redis pub/sub.
//!
//! Whoever edits a provider's credentials publishes
//! `{"provider": "ALIPAY"}` (or `{"provider": null}` for all) on the
//! configured channel; every instance drops the matching cached client.

use super::registry::ProviderRegistry;
use crate::models::ProviderType;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChanged {
    #[serde(default)]
    pub provider: Option<ProviderType>,
}

impl ConfigChanged {
    pub fn apply(&self, registry: &ProviderRegistry) {
        match self.provider {
            Some(provider) => registry.invalidate(provider),
            None => registry.invalidate_all(),
        }
    }
}

/// Publishes a change so other instances invalidate too. Returns the
/// number of subscribers that received it.
pub async fn publish(
    client: &redis::Client,
    channel: &str,
    event: &ConfigChanged,
) -> anyhow::Result<i64> {
    let payload = serde_json::to_string(event)?;
    let mut con = client.get_multiplexed_async_connection().await?;
    let receivers: i64 = redis::cmd("PUBLISH")
        .arg(channel)
        .arg(payload)
        .query_async(&mut con)
        .await?;
    Ok(receivers)
}

async fn listen(
    client: &redis::Client,
    channel: &str,
    registry: &ProviderRegistry,
) -> anyhow::Result<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    tracing::info!(channel = %channel, "Listening for provider configuration changes");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable configuration change message");
                continue;
            }
        };
        match serde_json::from_str::<ConfigChanged>(&payload) {
            Ok(event) => event.apply(registry),
            Err(e) => {
                tracing::warn!(error = %e, payload = %payload, "Invalid configuration change message")
            }
        }
    }
    Ok(())
}

/// Runs until the process exits, resubscribing after connection loss.
/// Every client is invalidated on reconnect since messages may have been
/// missed.
pub fn spawn_listener(
    client: redis::Client,
    channel: String,
    registry: Arc<ProviderRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listen(&client, &channel, &registry).await {
                Ok(()) => tracing::warn!(channel = %channel, "Configuration change stream ended"),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Configuration change listener failed")
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
            registry.invalidate_all();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_one_provider_or_all() {
        let one: ConfigChanged = serde_json::from_str(r#"{"provider":"ALIPAY"}"#).unwrap();
        assert_eq!(one.provider, Some(ProviderType::Alipay));

        let all: ConfigChanged = serde_json::from_str(r#"{"provider":null}"#).unwrap();
        assert_eq!(all.provider, None);
        let empty: ConfigChanged = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.provider, None);

        assert!(serde_json::from_str::<ConfigChanged>(r#"{"provider":"STRIPE"}"#).is_err());
    }
}
