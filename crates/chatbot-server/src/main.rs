mod auth;
mod configuration;
mod entitlements;
mod error;
mod middleware;
mod resumable;
mod routes;
mod state;

use chatbot::logging::{init_tracing, Logger};
use chatbot::providers::registry::ProviderRegistry;
use chatbot::store::{ChatStore, MemoryStore, SqliteStore};
use chatbot::usage::UsageEnricher;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::resumable::StreamHub;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = configuration::Settings::new()?;
    init_tracing(&settings.log.level, settings.log.json());

    let logger = Logger::new(&settings.server.environment, &settings.log.shipping);
    info!(transport = logger.transport_name(), "logger ready");

    let store: Arc<dyn ChatStore> = match &settings.database.url {
        Some(url) => Arc::new(SqliteStore::connect(url).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let registry = ProviderRegistry::from_settings(&settings.provider.model_settings()?)?;
    let enricher = UsageEnricher::new(settings.usage.catalog_url.clone());

    let mut state = AppState::new(store, registry, enricher, logger.clone())
        .with_entitlements(settings.entitlements)
        .with_weather_host(settings.tools.weather_host.clone());
    if settings.streams.enabled() {
        state = state.with_streams(StreamHub::new());
    } else {
        info!("resumable streams are disabled");
    }

    let app = routes::app(
        state,
        Duration::from_secs(settings.server.max_duration_secs),
    );

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    logger.flush().await;
    Ok(())
}
