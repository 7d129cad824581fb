//! Customer-side checkout flow.
//!
//! The browser cannot receive Daraja's callback, so the client learns the
//! outcome of a payment by polling the status endpoint. [`StatusPoller`]
//! does the polling and [`PaymentDialog`] drives one product's checkout
//! from phone entry to a final message.
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::dtos::payment_dtos::{PaymentStatusResponse, StkPushRequest, StkPushResponse};
use crate::errors::{AppError, Result};

pub mod payment_dialog;
pub mod status_poller;

pub use payment_dialog::{DialogState, PaymentAttemptView, PaymentDialog};
pub use status_poller::{PollOutcome, StatusPoller};

#[derive(Debug, Clone)]
pub struct DialogConfig {
    pub api_base_url: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// How long a successful payment stays on screen.
    pub auto_dismiss: Duration,
    pub request_timeout: Duration,
}

impl Default for DialogConfig {
    fn default() -> Self {
        DialogConfig {
            api_base_url: "http://localhost:10000".to_string(),
            poll_interval: Duration::from_secs(3),
            max_attempts: 30,
            auto_dismiss: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl DialogConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = DialogConfig::default();

        if let Ok(url) = env::var("CHECKOUT_API_URL") {
            if !url.trim().is_empty() {
                config.api_base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(raw) = env::var("POLL_INTERVAL_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                AppError::configuration("POLL_INTERVAL_SECS must be a whole number of seconds")
            })?;
            config.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Ok(raw) = env::var("POLL_MAX_ATTEMPTS") {
            let attempts: u32 = raw
                .trim()
                .parse()
                .map_err(|_| AppError::configuration("POLL_MAX_ATTEMPTS must be a number"))?;
            config.max_attempts = attempts.max(1);
        }

        Ok(config)
    }

    /// Upper bound on how long a dialog waits for a callback, excluding
    /// request time.
    pub fn polling_budget(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

/// The two storefront endpoints the checkout flow talks to.
#[async_trait]
pub trait CheckoutApi: Send + Sync {
    async fn initiate(&self, request: &StkPushRequest) -> Result<StkPushResponse>;

    async fn payment_status(&self, checkout_request_id: &str) -> Result<PaymentStatusResponse>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Clone)]
pub struct HttpCheckoutApi {
    base_url: String,
    client: Client,
}

impl HttpCheckoutApi {
    pub fn new(config: &DialogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("HTTP client: {}", e)))?;
        Ok(HttpCheckoutApi {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn error_from(response: reqwest::Response) -> AppError {
        let status = response.status();
        let message = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("request failed with status {}", status));

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                AppError::ValidationError(message)
            }
            StatusCode::NOT_FOUND => AppError::NotFound(message),
            StatusCode::SERVICE_UNAVAILABLE => AppError::ServiceUnavailable(message),
            StatusCode::BAD_GATEWAY => AppError::PaymentInitiation(message),
            _ => AppError::HttpClientError(message),
        }
    }
}

#[async_trait]
impl CheckoutApi for HttpCheckoutApi {
    async fn initiate(&self, request: &StkPushRequest) -> Result<StkPushResponse> {
        let response = self
            .client
            .post(format!("{}/api/mpesa/stk-push", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }

    async fn payment_status(&self, checkout_request_id: &str) -> Result<PaymentStatusResponse> {
        let response = self
            .client
            .get(format!(
                "{}/api/mpesa/payment-status/{}",
                self.base_url, checkout_request_id
            ))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }
}
