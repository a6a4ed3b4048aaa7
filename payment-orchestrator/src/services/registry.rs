//! Lazily built, per-provider cache of gateway clients.
//!
//! Each provider type owns one slot. The first caller builds the client
//! while concurrent callers await the same construction; the slot then
//! serves the instance until it is invalidated.

use crate::error::{PaymentError, PaymentResult};
use crate::models::ProviderType;
use crate::providers::{callback_urls, ProviderClient};
use crate::stores::ConfigurationStore;
use dashmap::DashMap;
use service_core::http::HttpClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Two-tier lookup for the public domain used in callback URLs: the
/// site setting in the configuration store, then the static default from
/// service configuration.
#[derive(Clone)]
pub struct CallbackDomainResolver {
    store: Arc<dyn ConfigurationStore>,
    static_default: Option<String>,
}

impl CallbackDomainResolver {
    pub fn new(store: Arc<dyn ConfigurationStore>, static_default: Option<String>) -> Self {
        Self {
            store,
            static_default: static_default.filter(|d| !d.trim().is_empty()),
        }
    }

    pub async fn resolve(&self) -> PaymentResult<String> {
        match self.store.site_domain().await {
            Ok(Some(domain)) if !domain.trim().is_empty() => return Ok(domain),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read site domain, using static default");
            }
        }
        self.static_default.clone().ok_or_else(|| {
            PaymentError::ConfigurationMissing(
                "no site domain configured for payment callbacks".to_string(),
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Building,
    Ready,
}

#[derive(Default)]
struct Slot {
    client: OnceCell<Arc<ProviderClient>>,
    building: AtomicBool,
}

/// Marks a slot as building until dropped, including when the building
/// caller is cancelled mid-construction.
struct BuildingFlag<'a>(&'a AtomicBool);

impl<'a> BuildingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BuildingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ProviderRegistry {
    slots: DashMap<ProviderType, Arc<Slot>>,
    store: Arc<dyn ConfigurationStore>,
    domains: CallbackDomainResolver,
    http: HttpClient,
}

impl ProviderRegistry {
    pub fn new(
        store: Arc<dyn ConfigurationStore>,
        domains: CallbackDomainResolver,
        http: HttpClient,
    ) -> Self {
        Self {
            slots: DashMap::new(),
            store,
            domains,
            http,
        }
    }

    /// Returns the cached client, building it on first use.
    pub async fn get_client(&self, provider: ProviderType) -> PaymentResult<Arc<ProviderClient>> {
        let slot = self.slots.entry(provider).or_default().clone();
        if let Some(client) = slot.client.get() {
            return Ok(client.clone());
        }

        let client = slot
            .client
            .get_or_try_init(|| async {
                let _building = BuildingFlag::raise(&slot.building);
                self.build(provider).await
            })
            .await?;
        Ok(client.clone())
    }

    async fn build(&self, provider: ProviderType) -> PaymentResult<Arc<ProviderClient>> {
        let domain = self.domains.resolve().await?;
        let config = self
            .store
            .provider_config(provider)
            .await?
            .filter(|c| c.enabled)
            .ok_or_else(|| {
                PaymentError::ConfigurationMissing(format!(
                    "{} is not configured or disabled",
                    provider
                ))
            })?;

        let client = ProviderClient::build(&config, callback_urls(&domain, provider), self.http.clone())
            .map_err(|source| {
                tracing::error!(provider = %provider, error = %source, "Failed to build payment provider client");
                PaymentError::ProviderInitFailed {
                    provider,
                    source: Box::new(source),
                }
            })?;

        metrics::counter!("payment_provider_clients_built_total", "provider" => provider.as_str())
            .increment(1);
        tracing::info!(provider = %provider, domain = %domain, "Payment provider client ready");
        Ok(Arc::new(client))
    }

    /// Drops the cached client so the next call rebuilds from fresh
    /// configuration. Callers already awaiting a build keep its result.
    pub fn invalidate(&self, provider: ProviderType) {
        if self.slots.remove(&provider).is_some() {
            tracing::info!(provider = %provider, "Payment provider client invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        self.slots.clear();
        tracing::info!("All payment provider clients invalidated");
    }

    pub fn slot_state(&self, provider: ProviderType) -> SlotState {
        match self.slots.get(&provider) {
            Some(slot) if slot.client.initialized() => SlotState::Ready,
            Some(slot) if slot.building.load(Ordering::SeqCst) => SlotState::Building,
            _ => SlotState::Empty,
        }
    }
}
