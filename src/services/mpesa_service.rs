// services/mpesa_service.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};

/// Refresh the OAuth token this long before Daraja says it expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushPayload {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: i64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct DarajaStkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode", default)]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

#[derive(Debug, Deserialize)]
struct DarajaErrorBody {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// A validated push request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct StkPushCommand {
    pub phone_number: String,
    pub amount: i64,
    pub account_reference: String,
    pub transaction_desc: String,
}

/// The provider accepted the push and will call back later.
#[derive(Debug, Clone, PartialEq)]
pub struct StkPushAccepted {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: String,
}

#[async_trait]
pub trait StkPushGateway: Send + Sync {
    async fn initiate_stk_push(&self, command: &StkPushCommand) -> Result<StkPushAccepted>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MpesaService {
    config: MpesaConfig,
    client: Client,
    cached_token: RwLock<Option<CachedToken>>,
}

impl MpesaService {
    pub fn new(config: MpesaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(MpesaService {
            config,
            client,
            cached_token: RwLock::new(None),
        })
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let encoded_auth = base64.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));

        let response = self
            .client
            .get(self.config.auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await
            .map_err(|e| AppError::mpesa(format!("M-Pesa auth request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::mpesa(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response
            .json()
            .await
            .map_err(|e| AppError::mpesa(format!("Unreadable M-Pesa auth response: {}", e)))?;

        let expires_at = token_expiry(Utc::now(), &auth_response.expires_in);
        *self.cached_token.write().await = Some(CachedToken {
            value: auth_response.access_token.clone(),
            expires_at,
        });

        info!("Access token obtained, valid until {}", expires_at);
        Ok(auth_response.access_token)
    }

    fn build_payload(&self, command: &StkPushCommand, now: DateTime<Utc>) -> StkPushPayload {
        let timestamp = format_timestamp(now);
        StkPushPayload {
            business_short_code: self.config.short_code.clone(),
            password: generate_password(&self.config.short_code, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: command.amount,
            party_a: command.phone_number.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: command.phone_number.clone(),
            callback_url: self.config.callback_url.clone(),
            account_reference: command.account_reference.clone(),
            transaction_desc: command.transaction_desc.clone(),
        }
    }
}

#[async_trait]
impl StkPushGateway for MpesaService {
    async fn initiate_stk_push(&self, command: &StkPushCommand) -> Result<StkPushAccepted> {
        info!(
            "C2B: STK push for {} - KSh {} ({})",
            command.phone_number, command.amount, command.account_reference
        );

        let access_token = self.get_access_token().await?;
        let payload = self.build_payload(command, Utc::now());

        let response = self
            .client
            .post(self.config.stk_push_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::mpesa(format!("STK push request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::mpesa(format!("Unreadable STK push response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<DarajaErrorBody>(&body)
                .ok()
                .and_then(|b| {
                    if let Some(code) = &b.error_code {
                        warn!("Daraja error code {}", code);
                    }
                    b.error_message
                })
                .unwrap_or_else(|| format!("STK push failed with status {}", status));
            error!("C2B failed: {} - {}", status, body);
            if status == reqwest::StatusCode::UNAUTHORIZED {
                *self.cached_token.write().await = None;
            }
            return Err(AppError::mpesa(message));
        }

        let stk_response: DarajaStkPushResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::mpesa(format!("Unexpected STK push response: {}", e)))?;

        if stk_response.response_code != "0" || stk_response.checkout_request_id.is_empty() {
            error!(
                "C2B rejected: code={} desc={}",
                stk_response.response_code, stk_response.response_description
            );
            let message = if stk_response.response_description.is_empty() {
                "STK push failed".to_string()
            } else {
                stk_response.response_description
            };
            return Err(AppError::mpesa(message));
        }

        info!("C2B initiated: {}", stk_response.checkout_request_id);
        Ok(StkPushAccepted {
            merchant_request_id: stk_response.merchant_request_id,
            checkout_request_id: stk_response.checkout_request_id,
            customer_message: stk_response.customer_message,
        })
    }
}

/// Normalizes a Kenyan mobile number to `254` followed by nine digits.
///
/// Accepts `0712345678`, `254712345678`, `+254 712 345 678` and the bare
/// subscriber form `712345678`.
pub fn normalize_phone_number(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    // Spaces and dashes are the only separators accepted.
    if body.chars().any(|c| !(c.is_ascii_digit() || c == ' ' || c == '-')) {
        return Err(invalid_phone_number());
    }
    let digits: String = body.chars().filter(|c| c.is_ascii_digit()).collect();

    let normalized = if let Some(rest) = digits.strip_prefix("254") {
        format!("254{}", rest)
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("254{}", rest)
    } else if digits.starts_with('7') || digits.starts_with('1') {
        format!("254{}", digits)
    } else {
        digits
    };

    if normalized.len() == 12 && normalized.starts_with("254") {
        Ok(normalized)
    } else {
        Err(invalid_phone_number())
    }
}

fn invalid_phone_number() -> AppError {
    AppError::invalid_data("Please enter a valid Kenyan phone number (e.g., 0712345678)")
}

/// Base64 of short code, passkey and timestamp, as Daraja expects.
pub fn generate_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    base64.encode(format!("{}{}{}", short_code, passkey, timestamp))
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

fn token_expiry(now: DateTime<Utc>, expires_in: &str) -> DateTime<Utc> {
    let seconds = expires_in.trim().parse::<i64>().unwrap_or(3599);
    now + ChronoDuration::seconds((seconds - TOKEN_EXPIRY_MARGIN_SECS).max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MpesaEnvironment;
    use std::time::Duration;

    fn service() -> MpesaService {
        MpesaService::new(MpesaConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            short_code: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://shop.example.com/api/mpesa/callback".to_string(),
            environment: MpesaEnvironment::Sandbox,
            http_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn local_numbers_get_country_prefix() {
        assert_eq!(normalize_phone_number("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone_number("0110345678").unwrap(), "254110345678");
        assert_eq!(normalize_phone_number("712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone_number("+254 712 345 678").unwrap(), "254712345678");
        assert_eq!(normalize_phone_number("0712-345-678").unwrap(), "254712345678");
    }

    #[test]
    fn international_numbers_pass_through() {
        assert_eq!(normalize_phone_number("254712345678").unwrap(), "254712345678");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        for bad in [
            "",
            "12345",
            "07123456789",
            "0712",
            "255712345678",
            "phone",
            "2547123456789",
            "abc0712345678",
            "tel:0712345678",
            "07x12y34z5678",
            "0712345678 (home)",
            "++254712345678",
        ] {
            assert!(
                matches!(normalize_phone_number(bad), Err(AppError::ValidationError(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let password = generate_password("174379", "passkey", "20240601100000");
        let decoded = base64.decode(password).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "174379passkey20240601100000");
    }

    #[test]
    fn payload_uses_phone_for_both_parties_and_shortcode_as_receiver() {
        let now = DateTime::parse_from_rfc3339("2024-06-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = service().build_payload(
            &StkPushCommand {
                phone_number: "254712345678".to_string(),
                amount: 500,
                account_reference: "LT-1".to_string(),
                transaction_desc: "Payment for Case".to_string(),
            },
            now,
        );

        assert_eq!(payload.timestamp, "20240601100000");
        assert_eq!(payload.party_a, "254712345678");
        assert_eq!(payload.phone_number, "254712345678");
        assert_eq!(payload.party_b, "174379");
        assert_eq!(payload.transaction_type, "CustomerPayBillOnline");
        assert_eq!(payload.callback_url, "https://shop.example.com/api/mpesa/callback");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["Amount"], 500);
        assert_eq!(json["AccountReference"], "LT-1");
    }

    #[test]
    fn token_expiry_keeps_safety_margin() {
        let now = Utc::now();
        assert_eq!(token_expiry(now, "3599"), now + ChronoDuration::seconds(3539));
        assert_eq!(token_expiry(now, "garbage"), now + ChronoDuration::seconds(3539));
        assert_eq!(token_expiry(now, "30"), now);
    }
}
