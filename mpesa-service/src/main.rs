use anyhow::Context;
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use mpesa_service::{
    gateway::DarajaClient,
    metrics::MpesaMetrics,
    models::{Environment, MpesaSettings},
    pg_repo::PgStore,
    repo::{DynLedgerStore, InMemoryStore},
    router, seed_settings, AppState, MpesaConfig, MpesaService, ServiceOptions,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MpesaConfig::from_env().context("failed to load mpesa-service configuration")?;

    let store: DynLedgerStore = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            let store = PgStore::new(pool);
            store.migrate().await?;
            info!("Using Postgres ledger store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store, data is lost on restart");
            Arc::new(InMemoryStore::new(MpesaSettings::empty(config.environment.unwrap_or(Environment::Test))))
        }
    };
    seed_settings(store.as_ref(), &config).await?;

    let gateway = DarajaClient::from_config(&config)?;
    let metrics = Arc::new(MpesaMetrics::new()?);
    let service = Arc::new(MpesaService::new(
        store,
        Arc::new(gateway),
        metrics,
        ServiceOptions::from(&config),
    ));

    if config.api_key_sha256.is_none() {
        warn!("MPESA_API_KEY_SHA256 not set; operator routes are unauthenticated");
    }
    let state = AppState::new(service, config.api_key_sha256.clone());

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            config
                .cors_allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ]);

    let app = router(state).layer(cors);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    info!(%addr, "starting mpesa-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
