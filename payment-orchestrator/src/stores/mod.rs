//! Persistence and configuration collaborators.
//!
//! The order lifecycle only talks to these traits. MongoDB backs them in
//! production; the in-memory versions serve tests and local runs.

pub mod memory;
pub mod mongo;

use crate::models::{
    CatalogItem, ItemKind, NewOrder, Order, OrderGuard, OrderLookup, OrderPatch,
    ProviderConfiguration, ProviderType,
};
use async_trait::async_trait;
use thiserror::Error;

pub use memory::{InMemoryConfigurationStore, InMemoryItemCatalog, InMemoryOrderStore};
pub use mongo::{MongoConfigurationStore, MongoItemCatalog, MongoOrderStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order number {0} already exists")]
    DuplicateOrderNo(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new PENDING order. Fails with
    /// [`StoreError::DuplicateOrderNo`] when the number is taken.
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order>;

    async fn find_order(&self, lookup: &OrderLookup) -> StoreResult<Option<Order>>;

    /// Atomically applies `patch` if the stored order still satisfies
    /// `guard`. Returns the updated order, or `None` when the order is
    /// missing or the guard no longer holds.
    async fn update_order(
        &self,
        order_no: &str,
        guard: OrderGuard,
        patch: OrderPatch,
    ) -> StoreResult<Option<Order>>;
}

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn provider_config(
        &self,
        provider: ProviderType,
    ) -> StoreResult<Option<ProviderConfiguration>>;

    /// Site-wide public domain used for callback URLs, if one is set.
    async fn site_domain(&self) -> StoreResult<Option<String>>;
}

#[async_trait]
pub trait ItemCatalog: Send + Sync {
    async fn find_item(&self, item_ref: &str) -> StoreResult<Option<CatalogItem>>;

    async fn feature_enabled(&self, kind: ItemKind) -> StoreResult<bool>;
}
