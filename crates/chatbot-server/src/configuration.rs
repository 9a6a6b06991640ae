use crate::entitlements::Entitlements;
use crate::error::{to_env_var, ConfigError};
use chatbot::logging::ShippingConfig;
use chatbot::providers::configs::ModelSettings;
use chatbot::tools::DEFAULT_WEATHER_HOST;
use chatbot::usage::DEFAULT_CATALOG_URL;
use config::{Config, Environment};
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Ceiling on how long a request may take before a response starts
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::MissingEnvVar {
                env_var: to_env_var("server.host"),
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,
    #[serde(default = "default_title_model")]
    pub title_model: String,
    #[serde(default = "default_artifact_model")]
    pub artifact_model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl ProviderSettings {
    pub fn model_settings(&self) -> Result<ModelSettings, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar {
                env_var: to_env_var("provider.api_key"),
            })?;

        Ok(ModelSettings {
            host: self.host.clone(),
            api_key,
            chat_model: self.chat_model.clone(),
            reasoning_model: self.reasoning_model.clone(),
            title_model: self.title_model.clone(),
            artifact_model: self.artifact_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub shipping: ShippingConfig,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            shipping: ShippingConfig::default(),
        }
    }
}

impl LogSettings {
    pub fn json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamSettings {
    #[serde(default)]
    pub resumable: bool,
    /// Connection string of a stream backing store; setting it turns resumption on
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl StreamSettings {
    pub fn enabled(&self) -> bool {
        self.resumable || self.redis_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DatabaseSettings {
    /// sqlx sqlite url; in-memory storage when unset
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsageSettings {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_weather_host")]
    pub weather_host: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            weather_host: default_weather_host(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub streams: StreamSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub entitlements: Entitlements,
    #[serde(default)]
    pub usage: UsageSettings,
    #[serde(default)]
    pub tools: ToolSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Provider defaults
            .set_default("provider.host", default_provider_host())?
            .set_default("provider.chat_model", default_chat_model())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("CHATBOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = match config.try_deserialize() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // "missing field `api_key`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    return Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    });
                } else if let config::ConfigError::NotFound(field) = &err {
                    return Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    });
                }
                return Err(ConfigError::Other(err));
            }
        };

        // fail at startup rather than on the first chat request
        settings.provider.model_settings()?;
        Ok(settings)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_max_duration_secs() -> u64 {
    60
}

fn default_provider_host() -> String {
    "https://api.openai.com".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_reasoning_model() -> String {
    "deepseek-r1".to_string()
}

fn default_title_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_artifact_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_weather_host() -> String {
    DEFAULT_WEATHER_HOST.to_string()
}
