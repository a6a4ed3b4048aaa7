use crate::config::Config;
use crate::handlers;
use crate::services::{
    config_events, init_metrics, CallbackDomainResolver, OrderService, ProviderRegistry,
    WebhookDispatcher,
};
use crate::stores::{
    ConfigurationStore, ItemCatalog, MongoConfigurationStore, MongoItemCatalog, MongoOrderStore,
    OrderStore,
};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::http::HttpClient;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub registry: Arc<ProviderRegistry>,
    pub webhooks: WebhookDispatcher,
    /// Used to broadcast configuration refreshes; absent in tests.
    pub redis: Option<redis::Client>,
    pub config_channel: String,
    /// User ids allowed on maintenance routes.
    pub operators: Arc<HashSet<String>>,
}

impl AppState {
    /// Wires the payment core on top of the given stores.
    pub fn new(
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn ItemCatalog>,
        configuration: Arc<dyn ConfigurationStore>,
        static_site_domain: Option<String>,
        http: HttpClient,
    ) -> Self {
        let domains = CallbackDomainResolver::new(configuration.clone(), static_site_domain);
        let registry = Arc::new(ProviderRegistry::new(configuration, domains, http));
        let orders = Arc::new(OrderService::new(orders, catalog, registry.clone()));
        Self {
            webhooks: WebhookDispatcher::new(orders.clone()),
            orders,
            registry,
            redis: None,
            config_channel: "payment:config-changed".to_string(),
            operators: Arc::new(HashSet::new()),
        }
    }

    pub fn with_operators<I>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.operators = Arc::new(users.into_iter().collect());
        self
    }

    pub fn with_redis(mut self, client: redis::Client, channel: String) -> Self {
        self.redis = Some(client);
        self.config_channel = channel;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Gateway notifications
        .route(
            "/notify/:provider",
            post(handlers::notify::notify_post).get(handlers::notify::notify_get),
        )
        // Order API
        .route("/payments", post(handlers::payments::create_payment))
        .route("/orders/:order_no", get(handlers::payments::get_order))
        .route("/orders/:order_no/query", post(handlers::payments::query_order))
        .route("/orders/:order_no/close", post(handlers::payments::close_order))
        .route("/orders/:order_no/cancel", post(handlers::payments::cancel_order))
        .route(
            "/orders/:order_no/refund",
            post(handlers::payments::refund_order).get(handlers::payments::refund_status),
        )
        // Provider configuration
        .route("/providers/refresh", post(handlers::providers::refresh_all))
        .route(
            "/providers/:provider/refresh",
            post(handlers::providers::refresh_provider),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

pub struct Application {
    host: String,
    port: u16,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        init_metrics();

        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some(config.service_name.clone());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let order_store = MongoOrderStore::new(&db);
        order_store.init_indexes().await?;

        let http = HttpClient::new(config.http.client_config())?;
        let redis = redis::Client::open(config.redis.url.expose_secret().as_str())?;

        let state = AppState::new(
            Arc::new(order_store),
            Arc::new(MongoItemCatalog::new(&db)),
            Arc::new(MongoConfigurationStore::new(&db)),
            config.payments.site_domain.clone(),
            http,
        )
        .with_redis(redis.clone(), config.redis.config_channel.clone())
        .with_operators(config.payments.operators.clone());

        if config.payments.operators.is_empty() {
            tracing::warn!("PAYMENT_OPERATORS not set - provider refresh routes are closed");
        }
        if config.payments.site_domain.is_none() {
            tracing::warn!(
                "PAYMENT_SITE_DOMAIN not set - callback URLs depend on the site_domain setting"
            );
        }

        config_events::spawn_listener(
            redis,
            config.redis.config_channel.clone(),
            state.registry.clone(),
        );

        Ok(Self {
            host: config.server.host,
            port: config.server.port,
            router: router(state),
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port)).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router).await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
