// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::error::{ErrorKind, WriteFailure};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Payment initiation failed: {0}")]
    PaymentInitiation(String),

    #[error("No transaction matches checkout request {0}")]
    CallbackCorrelation(String),

    #[error("Payment status still pending after {attempts} checks")]
    PaymentTimeout { attempts: u32 },

    #[error("Persistence error: {0}")]
    InternalPersistence(String),

    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("BSON serialization error: {0}")]
    BsonSerialization(#[from] mongodb::bson::ser::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate key error")]
    DuplicateKey,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::PaymentInitiation(_) => StatusCode::BAD_GATEWAY,
            AppError::CallbackCorrelation(_) => StatusCode::NOT_FOUND,
            AppError::PaymentTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::InternalPersistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MongoDB(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BsonSerialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateKey => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExternalApi(_) => StatusCode::BAD_GATEWAY,
            AppError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::HttpClientError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to a customer-facing client. Database and
    /// transport details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::ValidationError(msg) => msg.clone(),
            AppError::PaymentInitiation(_) => {
                "M-Pesa could not start the payment. Please try again.".to_string()
            }
            AppError::NotFound(what) => format!("{} not found", what),
            AppError::ServiceUnavailable(msg) => msg.clone(),
            AppError::PaymentTimeout { .. } => self.to_string(),
            AppError::DuplicateKey => "Duplicate entry".to_string(),
            AppError::CallbackCorrelation(_) => "Unknown payment request".to_string(),
            AppError::ExternalApi(_) => "Upstream service error".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    fn error_label(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "Validation failed",
            AppError::PaymentInitiation(_) => "M-Pesa error",
            AppError::CallbackCorrelation(_) => "Unknown checkout request",
            AppError::PaymentTimeout { .. } => "Payment timeout",
            AppError::InternalPersistence(_)
            | AppError::MongoDB(_)
            | AppError::BsonSerialization(_) => "Database error",
            AppError::NotFound(_) => "Not found",
            AppError::DuplicateKey => "Duplicate entry",
            AppError::ServiceUnavailable(_) => "Service unavailable",
            AppError::ExternalApi(_) => "External API error",
            AppError::ConfigurationError(_) => "Configuration error",
            AppError::HttpClientError(_) => "HTTP client error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.error_label(),
            "message": self.public_message(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON parsing error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::HttpClientError(format!("HTTP request failed: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .values()
            .flat_map(|errs| errs.iter())
            .map(|e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string())
            })
            .collect();
        AppError::ValidationError(messages.join("; "))
    }
}

// Helper conversion functions
impl AppError {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn mpesa(msg: impl Into<String>) -> Self {
        AppError::PaymentInitiation(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        AppError::InternalPersistence(msg.into())
    }

    pub fn external_api(msg: impl Into<String>) -> Self {
        AppError::ExternalApi(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }
}

/// True when the driver rejected a write because of a unique index.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_error)) if write_error.code == 11000
    )
}

pub type Result<T> = std::result::Result<T, AppError>;
