//! Application logger: console output through `tracing`, optionally mirrored to a remote
//! log collector.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const BATCH_SIZE: usize = 50;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Install the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level))
        .add_directive(
            "hyper=warn"
                .parse()
                .unwrap_or_else(|_| tracing::Level::WARN.into()),
        )
        .add_directive(
            "sqlx=warn"
                .parse()
                .unwrap_or_else(|_| tracing::Level::WARN.into()),
        );

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Remote shipping settings; every field must be set for shipping to start
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShippingConfig {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub log_group: Option<String>,
    pub log_stream: Option<String>,
    /// Collector URL the JSON batches are posted to
    pub endpoint: Option<String>,
    /// Ship outside production too
    #[serde(default)]
    pub force_enable: bool,
}

#[derive(Debug, Error)]
pub enum ShipperError {
    #[error("missing log shipping setting: {0}")]
    MissingSetting(&'static str),

    #[error("log shipping needs a tokio runtime")]
    NoRuntime,

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
struct LogRecord {
    timestamp: i64,
    level: LogLevel,
    message: String,
    meta: Value,
}

enum ShipperCommand {
    Record(LogRecord),
    Flush(oneshot::Sender<()>),
}

/// Batches records on a background task and posts them to the collector
pub struct LogShipper {
    tx: mpsc::UnboundedSender<ShipperCommand>,
}

impl LogShipper {
    pub fn new(config: &ShippingConfig) -> Result<Self, ShipperError> {
        fn required<'a>(
            value: &'a Option<String>,
            name: &'static str,
        ) -> Result<&'a str, ShipperError> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or(ShipperError::MissingSetting(name))
        }

        required(&config.region, "region")?;
        let access_key_id = required(&config.access_key_id, "access_key_id")?.to_string();
        let secret_access_key =
            required(&config.secret_access_key, "secret_access_key")?.to_string();
        let log_group = required(&config.log_group, "log_group")?.to_string();
        let log_stream = required(&config.log_stream, "log_stream")?.to_string();
        let endpoint = required(&config.endpoint, "endpoint")?.to_string();

        let handle = tokio::runtime::Handle::try_current().map_err(|_| ShipperError::NoRuntime)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Sink {
            client,
            endpoint,
            access_key_id,
            secret_access_key,
            log_group,
            log_stream,
        };
        handle.spawn(sink.run(rx));

        Ok(Self { tx })
    }

    fn ship(&self, record: LogRecord) {
        let _ = self.tx.send(ShipperCommand::Record(record));
    }

    async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(ShipperCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

struct Sink {
    client: reqwest::Client,
    endpoint: String,
    access_key_id: String,
    secret_access_key: String,
    log_group: String,
    log_stream: String,
}

impl Sink {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<ShipperCommand>) {
        let mut batch: Vec<LogRecord> = Vec::new();
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(ShipperCommand::Record(record)) => {
                        batch.push(record);
                        if batch.len() >= BATCH_SIZE {
                            self.send(std::mem::take(&mut batch)).await;
                        }
                    }
                    Some(ShipperCommand::Flush(done)) => {
                        self.send(std::mem::take(&mut batch)).await;
                        let _ = done.send(());
                    }
                    None => {
                        self.send(std::mem::take(&mut batch)).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.send(std::mem::take(&mut batch)).await;
                }
            }
        }
    }

    async fn send(&self, batch: Vec<LogRecord>) {
        if batch.is_empty() {
            return;
        }

        let events: Vec<Value> = batch
            .iter()
            .map(|record| {
                json!({
                    "timestamp": record.timestamp,
                    "message": serde_json::to_string(record).unwrap_or_default(),
                })
            })
            .collect();
        let body = json!({
            "logGroupName": self.log_group,
            "logStreamName": self.log_stream,
            "logEvents": events,
        });

        let result = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.access_key_id, Some(&self.secret_access_key))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            tracing::warn!(error = %e, records = batch.len(), "failed to ship log batch");
        }
    }
}

/// Structured logger handed to handlers. Cheap to clone; calls never fail.
#[derive(Clone)]
pub struct Logger {
    shipper: Option<Arc<LogShipper>>,
    development: bool,
}

impl Logger {
    /// Console only logger
    pub fn console(development: bool) -> Self {
        Self {
            shipper: None,
            development,
        }
    }

    /// Pick transports for `environment`. Shipping runs in production, or anywhere when
    /// forced, and only with complete settings; otherwise the logger stays console only.
    pub fn new(environment: &str, shipping: &ShippingConfig) -> Self {
        let development = environment == "development";
        let wanted = environment == "production" || shipping.force_enable;
        if !wanted {
            return Self::console(development);
        }

        match LogShipper::new(shipping) {
            Ok(shipper) => Self {
                shipper: Some(Arc::new(shipper)),
                development,
            },
            Err(e) => {
                tracing::warn!(error = %e, "log shipping disabled, using console only");
                Self::console(development)
            }
        }
    }

    pub fn transport_name(&self) -> &'static str {
        if self.shipper.is_some() {
            "console+shipping"
        } else {
            "console"
        }
    }

    fn log(&self, level: LogLevel, message: &str, meta: Value) {
        match level {
            LogLevel::Debug => tracing::debug!(meta = %meta, "{}", message),
            LogLevel::Info => tracing::info!(meta = %meta, "{}", message),
            LogLevel::Warn => tracing::warn!(meta = %meta, "{}", message),
            LogLevel::Error => tracing::error!(meta = %meta, "{}", message),
        }

        if let Some(shipper) = &self.shipper {
            shipper.ship(LogRecord {
                timestamp: chrono::Utc::now().timestamp_millis(),
                level,
                message: message.to_string(),
                meta,
            });
        }
    }

    pub fn info(&self, message: &str, meta: Value) {
        self.log(LogLevel::Info, message, meta);
    }

    pub fn warn(&self, message: &str, meta: Value) {
        self.log(LogLevel::Warn, message, meta);
    }

    pub fn error(&self, message: &str, meta: Value) {
        self.log(LogLevel::Error, message, meta);
    }

    /// Dropped outside development
    pub fn debug(&self, message: &str, meta: Value) {
        if self.development {
            self.log(LogLevel::Debug, message, meta);
        }
    }

    /// Wait until records logged so far have been handed to the collector
    pub async fn flush(&self) {
        if let Some(shipper) = &self.shipper {
            shipper.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn complete_config(endpoint: String) -> ShippingConfig {
        ShippingConfig {
            region: Some("us-east-1".to_string()),
            access_key_id: Some("AKIA".to_string()),
            secret_access_key: Some("secret".to_string()),
            log_group: Some("chatbot".to_string()),
            log_stream: Some("api".to_string()),
            endpoint: Some(endpoint),
            force_enable: false,
        }
    }

    #[tokio::test]
    async fn test_missing_region_falls_back_to_console() {
        let config = ShippingConfig {
            region: None,
            ..complete_config("http://localhost:1".to_string())
        };
        let logger = Logger::new("production", &config);
        assert_eq!(logger.transport_name(), "console");

        // still usable, nothing raised
        logger.info("hello", json!({"a": 1}));
        logger.error("boom", json!({}));
        logger.flush().await;
    }

    #[tokio::test]
    async fn test_missing_endpoint_falls_back_to_console() {
        let config = ShippingConfig {
            endpoint: None,
            ..complete_config("http://localhost:1".to_string())
        };
        assert!(matches!(
            LogShipper::new(&config),
            Err(ShipperError::MissingSetting("endpoint"))
        ));
        assert_eq!(Logger::new("production", &config).transport_name(), "console");

        let blank = ShippingConfig {
            endpoint: Some(String::new()),
            ..config
        };
        assert_eq!(Logger::new("production", &blank).transport_name(), "console");
    }

    #[tokio::test]
    async fn test_development_needs_force_flag() {
        let config = complete_config("http://localhost:1".to_string());
        assert_eq!(Logger::new("development", &config).transport_name(), "console");

        let forced = ShippingConfig {
            force_enable: true,
            ..config
        };
        assert_eq!(
            Logger::new("development", &forced).transport_name(),
            "console+shipping"
        );
    }

    #[test]
    fn test_no_runtime_falls_back_to_console() {
        let logger = Logger::new("production", &complete_config("http://localhost:1".to_string()));
        assert_eq!(logger.transport_name(), "console");
    }

    #[tokio::test]
    async fn test_records_are_shipped_and_debug_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let logger = Logger::new("production", &complete_config(format!("{}/logs", server.uri())));
        assert_eq!(logger.transport_name(), "console+shipping");

        logger.debug("hidden", json!({}));
        logger.info("request completed", json!({"status": 200}));
        logger.flush().await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["logGroupName"], "chatbot");
        let events = body["logEvents"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        let record: Value =
            serde_json::from_str(events[0]["message"].as_str().unwrap()).unwrap();
        assert_eq!(record["message"], "request completed");
        assert_eq!(record["level"], "info");
        assert_eq!(record["meta"]["status"], 200);
    }

    #[tokio::test]
    async fn test_collector_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let logger = Logger::new("production", &complete_config(server.uri()));
        logger.warn("still fine", json!({}));
        logger.flush().await;
    }
}
