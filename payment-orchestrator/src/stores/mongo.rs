use super::{ConfigurationStore, ItemCatalog, OrderStore, StoreError, StoreResult};
use crate::models::{
    CatalogItem, ItemKind, NewOrder, Order, OrderGuard, OrderLookup, OrderPatch,
    ProviderConfiguration, ProviderType,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{
    bson::{doc, to_bson, Document},
    Collection, Database, IndexModel,
};
use serde::Serialize;

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

fn bson_value<T: Serialize>(value: &T) -> StoreResult<mongodb::bson::Bson> {
    Ok(to_bson(value).context("failed to encode field")?)
}

#[derive(Clone)]
pub struct MongoOrderStore {
    orders: Collection<Order>,
}

impl MongoOrderStore {
    pub fn new(db: &Database) -> Self {
        Self {
            orders: db.collection("payment_orders"),
        }
    }

    /// Unique order numbers and provider transaction ids are enforced here.
    pub async fn init_indexes(&self) -> anyhow::Result<()> {
        let order_no_index = IndexModel::builder()
            .keys(doc! { "order_no": 1 })
            .options(
                IndexOptions::builder()
                    .name("order_no_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        // Only orders with a confirmed transaction id take part.
        let txn_index = IndexModel::builder()
            .keys(doc! { "provider": 1, "provider_txn_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("provider_txn_unique_idx".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "provider_txn_id": { "$type": "string" } })
                    .build(),
            )
            .build();

        let user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("user_orders_idx".to_string())
                    .build(),
            )
            .build();

        self.orders
            .create_indexes([order_no_index, txn_index, user_index], None)
            .await?;

        tracing::info!("Payment order indexes initialized");
        Ok(())
    }

    fn guard_filter(order_no: &str, guard: &OrderGuard) -> StoreResult<Document> {
        let mut filter = doc! { "order_no": order_no };
        if let Some(status) = guard.status {
            filter.insert("status", bson_value(&status)?);
        }
        if let Some(refund_state) = guard.refund_state {
            filter.insert("refund_state", bson_value(&refund_state)?);
        }
        if let Some(provider) = guard.provider {
            filter.insert("provider", bson_value(&provider)?);
        }
        if guard.txn_unset {
            // Matches both a missing field and an explicit null.
            filter.insert("provider_txn_id", mongodb::bson::Bson::Null);
        }
        Ok(filter)
    }

    fn patch_document(patch: &OrderPatch) -> StoreResult<Document> {
        let mut set = Document::new();
        if let Some(status) = patch.status {
            set.insert("status", bson_value(&status)?);
        }
        if let Some(pay_state) = patch.pay_state {
            set.insert("pay_state", bson_value(&pay_state)?);
        }
        if let Some(refund_state) = patch.refund_state {
            set.insert("refund_state", bson_value(&refund_state)?);
        }
        if let Some(txn) = &patch.provider_txn_id {
            set.insert("provider_txn_id", txn.as_str());
        }
        if let Some(amount) = &patch.paid_amount {
            set.insert("paid_amount", bson_value(amount)?);
        }
        if let Some(at) = &patch.pay_time {
            set.insert("pay_time", bson_value(at)?);
        }
        if let Some(at) = &patch.refund_time {
            set.insert("refund_time", bson_value(at)?);
        }
        if let Some(no) = &patch.refund_request_no {
            set.insert("refund_request_no", no.as_str());
        }
        if let Some(reason) = &patch.refund_reason {
            set.insert("refund_reason", reason.as_str());
        }
        set.insert("updated_at", bson_value(&Utc::now())?);
        Ok(doc! { "$set": set })
    }
}

#[async_trait]
impl OrderStore for MongoOrderStore {
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
        let order = Order::from_new(order);
        match self.orders.insert_one(&order, None).await {
            Ok(_) => Ok(order),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::DuplicateOrderNo(order.order_no)),
            Err(e) => Err(anyhow::Error::new(e)
                .context("failed to insert payment order")
                .into()),
        }
    }

    async fn find_order(&self, lookup: &OrderLookup) -> StoreResult<Option<Order>> {
        let filter = match lookup {
            OrderLookup::OrderNo(order_no) => doc! { "order_no": order_no.as_str() },
            OrderLookup::ProviderTxnId(txn) => doc! { "provider_txn_id": txn.as_str() },
        };
        let order = self
            .orders
            .find_one(filter, None)
            .await
            .context("failed to load payment order")?;
        Ok(order)
    }

    async fn update_order(
        &self,
        order_no: &str,
        guard: OrderGuard,
        patch: OrderPatch,
    ) -> StoreResult<Option<Order>> {
        let filter = Self::guard_filter(order_no, &guard)?;
        let update = Self::patch_document(&patch)?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .orders
            .find_one_and_update(filter, update, options)
            .await
            .context("failed to update payment order")?;
        Ok(updated)
    }
}

/// Provider credentials live in `payment_providers`, one document per
/// provider; site-wide settings in `site_settings` as `{ key, value }`.
#[derive(Clone)]
pub struct MongoConfigurationStore {
    providers: Collection<ProviderConfiguration>,
    settings: Collection<Document>,
}

impl MongoConfigurationStore {
    pub fn new(db: &Database) -> Self {
        Self {
            providers: db.collection("payment_providers"),
            settings: db.collection("site_settings"),
        }
    }
}

async fn setting(settings: &Collection<Document>, key: &str) -> StoreResult<Option<Document>> {
    let found = settings
        .find_one(doc! { "key": key }, None)
        .await
        .with_context(|| format!("failed to read site setting {}", key))?;
    Ok(found)
}

#[async_trait]
impl ConfigurationStore for MongoConfigurationStore {
    async fn provider_config(
        &self,
        provider: ProviderType,
    ) -> StoreResult<Option<ProviderConfiguration>> {
        let config = self
            .providers
            .find_one(doc! { "provider": provider.as_str() }, None)
            .await
            .with_context(|| format!("failed to read {} configuration", provider))?;
        Ok(config)
    }

    async fn site_domain(&self) -> StoreResult<Option<String>> {
        let domain = setting(&self.settings, "site_domain")
            .await?
            .and_then(|d| d.get_str("value").ok().map(str::to_string))
            .filter(|d| !d.trim().is_empty());
        Ok(domain)
    }
}

#[derive(Clone)]
pub struct MongoItemCatalog {
    items: Collection<CatalogItem>,
    settings: Collection<Document>,
}

impl MongoItemCatalog {
    pub fn new(db: &Database) -> Self {
        Self {
            items: db.collection("catalog_items"),
            settings: db.collection("site_settings"),
        }
    }
}

#[async_trait]
impl ItemCatalog for MongoItemCatalog {
    async fn find_item(&self, item_ref: &str) -> StoreResult<Option<CatalogItem>> {
        let item = self
            .items
            .find_one(doc! { "item_ref": item_ref }, None)
            .await
            .context("failed to read catalog item")?;
        Ok(item)
    }

    /// Features are on unless a `recharge_enabled` / `membership_enabled`
    /// setting says otherwise.
    async fn feature_enabled(&self, kind: ItemKind) -> StoreResult<bool> {
        let key = match kind {
            ItemKind::Recharge => "recharge_enabled",
            ItemKind::Membership => "membership_enabled",
        };
        let enabled = setting(&self.settings, key)
            .await?
            .and_then(|d| d.get_bool("value").ok())
            .unwrap_or(true);
        Ok(enabled)
    }
}
