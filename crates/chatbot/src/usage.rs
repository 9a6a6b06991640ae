//! Token usage enrichment against a cached model pricing catalog.
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::providers::base::Usage;

pub const DEFAULT_CATALOG_URL: &str = "https://models.dev/api.json";
pub const CATALOG_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// After a failed fetch the catalog counts as unavailable for this long
pub const CATALOG_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub input_usd: f64,
    pub output_usd: f64,
    pub total_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub context_window: u64,
    pub remaining_tokens: u64,
}

/// Usage as shown to the client and stored as a chat's last context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUsage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextSummary>,
}

impl From<&Usage> for AppUsage {
    fn from(usage: &Usage) -> Self {
        AppUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            ..Default::default()
        }
    }
}

/// Price per million tokens, in USD
#[derive(Debug, Clone, Deserialize)]
pub struct ModelCost {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelLimit {
    pub context: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogModel {
    pub cost: Option<ModelCost>,
    pub limit: Option<ModelLimit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogProvider {
    #[serde(default)]
    pub models: HashMap<String, CatalogModel>,
}

/// Providers keyed by id, each listing its models
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Catalog(pub HashMap<String, CatalogProvider>);

impl Catalog {
    /// Look a model up by `provider/model`, falling back to a bare model id in any provider
    pub fn find(&self, model_id: &str) -> Option<&CatalogModel> {
        if let Some((provider, model)) = model_id.split_once('/') {
            if let Some(found) = self.0.get(provider).and_then(|p| p.models.get(model)) {
                return Some(found);
            }
        }
        self.0.values().find_map(|p| p.models.get(model_id))
    }
}

enum CacheEntry {
    Loaded {
        fetched_at: Instant,
        catalog: Arc<Catalog>,
    },
    Failed {
        failed_at: Instant,
    },
}

/// Attaches cost and context window information to raw token counts.
///
/// The catalog is fetched on first use and kept for the TTL. Only one fetch runs at a time;
/// callers waiting on it reuse its outcome. A failure is remembered for `retry_after` so an
/// unreachable catalog costs one timeout, not one per turn.
pub struct UsageEnricher {
    client: Client,
    url: String,
    ttl: Duration,
    retry_after: Duration,
    cache: RwLock<Option<CacheEntry>>,
}

impl UsageEnricher {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_ttl(url, CATALOG_TTL)
    }

    pub fn with_ttl(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.into(),
            ttl,
            retry_after: CATALOG_RETRY_AFTER,
            cache: RwLock::new(None),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    async fn fetch(&self) -> anyhow::Result<Catalog> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        Ok(response.json::<Catalog>().await?)
    }

    /// Some(answer) while the cached entry is still valid, None when a fetch is due
    fn cached(&self, entry: &Option<CacheEntry>) -> Option<Option<Arc<Catalog>>> {
        match entry {
            Some(CacheEntry::Loaded {
                fetched_at,
                catalog,
            }) if fetched_at.elapsed() < self.ttl => Some(Some(catalog.clone())),
            Some(CacheEntry::Failed { failed_at }) if failed_at.elapsed() < self.retry_after => {
                Some(None)
            }
            _ => None,
        }
    }

    /// The cached catalog, refreshed when stale. None when it cannot be fetched.
    pub async fn catalog(&self) -> Option<Arc<Catalog>> {
        if let Some(answer) = self.cached(&*self.cache.read().await) {
            return answer;
        }

        let mut cache = self.cache.write().await;
        // another task may have fetched, or failed to, while we waited for the lock
        if let Some(answer) = self.cached(&cache) {
            return answer;
        }

        match self.fetch().await {
            Ok(catalog) => {
                let catalog = Arc::new(catalog);
                *cache = Some(CacheEntry::Loaded {
                    fetched_at: Instant::now(),
                    catalog: catalog.clone(),
                });
                Some(catalog)
            }
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "model catalog unavailable");
                *cache = Some(CacheEntry::Failed {
                    failed_at: Instant::now(),
                });
                None
            }
        }
    }

    pub async fn enrich(&self, usage: &Usage, model_id: &str) -> AppUsage {
        let raw = AppUsage::from(usage);

        let Some(catalog) = self.catalog().await else {
            return raw;
        };
        let Some(model) = catalog.find(model_id) else {
            return raw;
        };

        let input = usage.input_tokens.unwrap_or(0).max(0) as f64;
        let output = usage.output_tokens.unwrap_or(0).max(0) as f64;
        let cost = model.cost.as_ref().map(|c| {
            let input_usd = input * c.input / 1_000_000.0;
            let output_usd = output * c.output / 1_000_000.0;
            CostSummary {
                input_usd,
                output_usd,
                total_usd: input_usd + output_usd,
            }
        });

        let context = model
            .limit
            .as_ref()
            .and_then(|l| l.context)
            .map(|window| {
                let used = usage
                    .total_tokens
                    .unwrap_or(usage.input_tokens.unwrap_or(0) + usage.output_tokens.unwrap_or(0))
                    .max(0) as u64;
                ContextSummary {
                    context_window: window,
                    remaining_tokens: window.saturating_sub(used),
                }
            });

        AppUsage {
            model_id: Some(model_id.to_string()),
            cost,
            context,
            ..raw
        }
    }
}
