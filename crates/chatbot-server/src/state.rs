use chatbot::logging::Logger;
use chatbot::providers::registry::ProviderRegistry;
use chatbot::store::ChatStore;
use chatbot::tools::DEFAULT_WEATHER_HOST;
use chatbot::usage::UsageEnricher;
use std::sync::Arc;

use crate::auth::SessionStore;
use crate::entitlements::Entitlements;
use crate::resumable::StreamHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub registry: Arc<ProviderRegistry>,
    pub enricher: Arc<UsageEnricher>,
    pub logger: Logger,
    pub sessions: SessionStore,
    /// Present when streams can be resumed
    pub streams: Option<StreamHub>,
    pub entitlements: Entitlements,
    pub weather_host: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: ProviderRegistry,
        enricher: UsageEnricher,
        logger: Logger,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            enricher: Arc::new(enricher),
            logger,
            sessions: SessionStore::new(),
            streams: None,
            entitlements: Entitlements::default(),
            weather_host: DEFAULT_WEATHER_HOST.to_string(),
        }
    }

    pub fn with_streams(mut self, hub: StreamHub) -> Self {
        self.streams = Some(hub);
        self
    }

    pub fn with_entitlements(mut self, entitlements: Entitlements) -> Self {
        self.entitlements = entitlements;
        self
    }

    pub fn with_weather_host(mut self, host: impl Into<String>) -> Self {
        self.weather_host = host.into();
        self
    }
}
