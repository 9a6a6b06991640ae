use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chatbot::store::StoreError;
use serde_json::json;
use strum_macros::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted config key, e.g. `server.port` -> `CHATBOT_SERVER__PORT`
pub fn to_env_var(field: &str) -> String {
    format!("CHATBOT_{}", field.to_uppercase().replace('.', "__"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorType {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimit,
    Offline,
}

impl ErrorType {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorType::BadRequest => StatusCode::BAD_REQUEST,
            ErrorType::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorType::Forbidden => StatusCode::FORBIDDEN,
            ErrorType::NotFound => StatusCode::NOT_FOUND,
            ErrorType::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorType::Offline => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// The part of the product an error is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Surface {
    Chat,
    Auth,
    Api,
    Stream,
    Database,
    History,
    Vote,
    Document,
    Suggestions,
    ActivateGateway,
}

/// Error returned to API clients as `{code: "<type>:<surface>", message, cause}`
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}:{surface}")]
pub struct ChatError {
    pub kind: ErrorType,
    pub surface: Surface,
    pub cause: Option<String>,
}

pub const ACTIVATE_GATEWAY_MESSAGE: &str = "AI Gateway requires a valid credit card on file to service requests. Please visit https://vercel.com/d?to=%2F%5Bteam%5D%2F%7E%2Fai%3Fmodal%3Dadd-credit-card to add a card and unlock your free credits.";

impl ChatError {
    pub fn new(kind: ErrorType, surface: Surface) -> Self {
        Self {
            kind,
            surface,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn code(&self) -> String {
        format!("{}:{}", self.kind, self.surface)
    }

    pub fn message(&self) -> &'static str {
        match (self.kind, self.surface) {
            (_, Surface::Database) => "An error occurred while executing a database query.",
            (ErrorType::BadRequest, Surface::Api) => {
                "The request couldn't be processed. Please check your input and try again."
            }
            (ErrorType::BadRequest, Surface::ActivateGateway) => ACTIVATE_GATEWAY_MESSAGE,
            (ErrorType::Unauthorized, Surface::Auth) => "You need to sign in before continuing.",
            (ErrorType::Forbidden, Surface::Auth) => {
                "Your account does not have access to this feature."
            }
            (ErrorType::RateLimit, Surface::Chat) => {
                "You have exceeded your maximum number of messages for the day. Please try again later."
            }
            (ErrorType::NotFound, Surface::Chat) => {
                "The requested chat was not found. Please check the chat ID and try again."
            }
            (ErrorType::Forbidden, Surface::Chat) => {
                "This chat belongs to another user. Please check the chat ID and try again."
            }
            (ErrorType::Unauthorized, Surface::Chat) => {
                "You need to sign in to view this chat. Please sign in and try again."
            }
            (ErrorType::Offline, Surface::Chat) => {
                "We're having trouble sending your message. Please check your internet connection and try again."
            }
            (ErrorType::NotFound, Surface::Document) => {
                "The requested document was not found. Please check the document ID and try again."
            }
            (ErrorType::Forbidden, Surface::Document) => {
                "This document belongs to another user. Please check the document ID and try again."
            }
            (ErrorType::Unauthorized, Surface::Document) => {
                "You need to sign in to view this document. Please sign in and try again."
            }
            (ErrorType::BadRequest, Surface::Document) => {
                "The request to create or update the document was invalid. Please check your input and try again."
            }
            _ => "Something went wrong. Please try again later.",
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        ChatError::new(ErrorType::BadRequest, Surface::Database).with_cause(e.to_string())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "code": self.code(),
            "message": self.message(),
        });
        if let Some(cause) = &self.cause {
            body["cause"] = json!(cause);
        }
        (self.kind.status(), Json(body)).into_response()
    }
}
