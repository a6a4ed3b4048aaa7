use super::{ConfigurationStore, ItemCatalog, OrderStore, StoreError, StoreResult};
use crate::models::{
    CatalogItem, ItemKind, NewOrder, Order, OrderGuard, OrderLookup, OrderPatch,
    ProviderConfiguration, ProviderType,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Orders keyed by order number. Per-entry locking gives the same
/// compare-and-set semantics as the MongoDB store.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<String, Order>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
        match self.orders.entry(order.order_no.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateOrderNo(order.order_no)),
            Entry::Vacant(slot) => {
                let order = Order::from_new(order);
                slot.insert(order.clone());
                Ok(order)
            }
        }
    }

    async fn find_order(&self, lookup: &OrderLookup) -> StoreResult<Option<Order>> {
        let found = match lookup {
            OrderLookup::OrderNo(order_no) => self.orders.get(order_no).map(|o| o.clone()),
            OrderLookup::ProviderTxnId(txn) => self
                .orders
                .iter()
                .find(|o| o.provider_txn_id.as_deref() == Some(txn.as_str()))
                .map(|o| o.clone()),
        };
        Ok(found)
    }

    async fn update_order(
        &self,
        order_no: &str,
        guard: OrderGuard,
        patch: OrderPatch,
    ) -> StoreResult<Option<Order>> {
        let Some(mut entry) = self.orders.get_mut(order_no) else {
            return Ok(None);
        };
        if !guard.matches(&entry) {
            return Ok(None);
        }
        patch.apply(&mut entry);
        Ok(Some(entry.clone()))
    }
}

/// Provider settings held in memory. Counts fetches and can slow them down
/// so cache behaviour is observable.
#[derive(Default)]
pub struct InMemoryConfigurationStore {
    providers: DashMap<ProviderType, ProviderConfiguration>,
    site_domain: RwLock<Option<String>>,
    fetches: AtomicUsize,
    fetch_delay: Option<Duration>,
}

impl InMemoryConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn put(&self, config: ProviderConfiguration) {
        self.providers.insert(config.provider, config);
    }

    pub async fn set_site_domain(&self, domain: Option<String>) {
        *self.site_domain.write().await = domain;
    }

    /// Number of provider configuration reads so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryConfigurationStore {
    async fn provider_config(
        &self,
        provider: ProviderType,
    ) -> StoreResult<Option<ProviderConfiguration>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.providers.get(&provider).map(|c| c.clone()))
    }

    async fn site_domain(&self) -> StoreResult<Option<String>> {
        Ok(self.site_domain.read().await.clone())
    }
}

#[derive(Default)]
pub struct InMemoryItemCatalog {
    items: DashMap<String, CatalogItem>,
    disabled: DashMap<ItemKind, ()>,
}

impl InMemoryItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, item: CatalogItem) {
        self.items.insert(item.item_ref.clone(), item);
    }

    pub fn set_feature_enabled(&self, kind: ItemKind, enabled: bool) {
        if enabled {
            self.disabled.remove(&kind);
        } else {
            self.disabled.insert(kind, ());
        }
    }
}

#[async_trait]
impl ItemCatalog for InMemoryItemCatalog {
    async fn find_item(&self, item_ref: &str) -> StoreResult<Option<CatalogItem>> {
        Ok(self.items.get(item_ref).map(|i| i.clone()))
    }

    async fn feature_enabled(&self, kind: ItemKind) -> StoreResult<bool> {
        Ok(!self.disabled.contains_key(&kind))
    }
}
