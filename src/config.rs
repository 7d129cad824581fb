// config.rs
use std::env;
use std::time::Duration;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpesaEnvironment {
    Sandbox,
    Production,
}

impl MpesaEnvironment {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(MpesaEnvironment::Sandbox),
            "production" => Ok(MpesaEnvironment::Production),
            other => Err(AppError::configuration(format!(
                "MPESA_ENVIRONMENT must be 'sandbox' or 'production', got '{}'",
                other
            ))),
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => "https://sandbox.safaricom.co.ke",
            MpesaEnvironment::Production => "https://api.safaricom.co.ke",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => "sandbox",
            MpesaEnvironment::Production => "production",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub environment: MpesaEnvironment,
    pub http_timeout: Duration,
}

impl MpesaConfig {
    /// Reads the Daraja credentials. Returns `Ok(None)` when none of the
    /// credential variables are set so the API can boot with payments disabled.
    pub fn from_env() -> Result<Option<Self>> {
        let key = optional("MPESA_CONSUMER_KEY");
        let secret = optional("MPESA_CONSUMER_SECRET");
        let passkey = optional("MPESA_PASSKEY");

        if key.is_none() && secret.is_none() && passkey.is_none() {
            return Ok(None);
        }

        let environment =
            MpesaEnvironment::parse(&optional("MPESA_ENVIRONMENT").unwrap_or_else(|| "sandbox".to_string()))?;

        Ok(Some(MpesaConfig {
            consumer_key: key.ok_or_else(|| missing("MPESA_CONSUMER_KEY"))?,
            consumer_secret: secret.ok_or_else(|| missing("MPESA_CONSUMER_SECRET"))?,
            passkey: passkey.ok_or_else(|| missing("MPESA_PASSKEY"))?,
            short_code: optional("MPESA_SHORT_CODE").unwrap_or_else(|| "174379".to_string()),
            callback_url: required("MPESA_CALLBACK_URL")?,
            environment,
            http_timeout: Duration::from_secs(parse_or("MPESA_HTTP_TIMEOUT_SECS", 20)?),
        }))
    }

    pub fn auth_url(&self) -> String {
        format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.environment.base_url()
        )
    }

    pub fn stk_push_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.environment.base_url())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo { url: String, database: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub resend_api_key: String,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa: Option<MpesaConfig>,
    pub storage: StorageBackend,
    pub email: Option<EmailConfig>,
    pub account_reference_prefix: String,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let storage = match optional("STORAGE_BACKEND")
            .unwrap_or_else(|| "mongo".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "mongo" | "mongodb" => StorageBackend::Mongo {
                url: required("DATABASE_URL")?,
                database: optional("DATABASE_NAME").unwrap_or_else(|| "lifetime_store".to_string()),
            },
            "memory" => StorageBackend::Memory,
            other => {
                return Err(AppError::configuration(format!(
                    "STORAGE_BACKEND must be 'mongo' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let email = match optional("RESEND_API_KEY") {
            Some(resend_api_key) => Some(EmailConfig {
                resend_api_key,
                from: optional("ORDER_EMAIL_FROM")
                    .unwrap_or_else(|| "onboarding@resend.dev".to_string()),
                to: required("ORDER_EMAIL_TO")?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            }),
            None => None,
        };

        Ok(AppConfig {
            mpesa: MpesaConfig::from_env()?,
            storage,
            email,
            account_reference_prefix: reference_prefix(
                optional("ACCOUNT_REFERENCE_PREFIX").as_deref().unwrap_or("LT"),
            )?,
            port: parse_or("PORT", 10000)?,
            host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
        })
    }

    pub fn get_config_info(&self) -> serde_json::Value {
        serde_json::json!({
            "mpesa_enabled": self.mpesa.is_some(),
            "environment": self.mpesa.as_ref().map(|m| m.environment.as_str()),
            "business_shortcode": self.mpesa.as_ref().map(|m| m.short_code.clone()),
            "callback_url": self.mpesa.as_ref().map(|m| m.callback_url.clone()),
            "storage": match self.storage {
                StorageBackend::Mongo { .. } => "mongo",
                StorageBackend::Memory => "memory",
            },
            "email_notifications": self.email.is_some(),
            "port": self.port,
            "host": self.host,
        })
    }
}

/// Generated references are the prefix plus at least six random characters
/// and must fit Daraja's 12-character AccountReference.
pub const MAX_REFERENCE_PREFIX_LEN: usize = 6;

pub fn reference_prefix(raw: &str) -> Result<String> {
    let prefix = raw.trim();
    if prefix.is_empty()
        || prefix.len() > MAX_REFERENCE_PREFIX_LEN
        || !prefix.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(AppError::configuration(format!(
            "ACCOUNT_REFERENCE_PREFIX must be 1-{} letters or digits, got '{}'",
            MAX_REFERENCE_PREFIX_LEN, prefix
        )));
    }
    Ok(prefix.to_string())
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| missing(name))
}

fn missing(name: &str) -> AppError {
    AppError::configuration(format!("{} must be set", name))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::configuration(format!("{} must be a number", name))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_selects_base_url() {
        let sandbox = MpesaEnvironment::parse("Sandbox").unwrap();
        let production = MpesaEnvironment::parse("production").unwrap();
        assert_eq!(sandbox.base_url(), "https://sandbox.safaricom.co.ke");
        assert_eq!(production.base_url(), "https://api.safaricom.co.ke");
        assert!(MpesaEnvironment::parse("staging").is_err());
    }

    #[test]
    fn endpoint_urls_follow_environment() {
        let config = MpesaConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            short_code: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://example.com/api/mpesa/callback".to_string(),
            environment: MpesaEnvironment::Sandbox,
            http_timeout: Duration::from_secs(20),
        };
        assert_eq!(
            config.auth_url(),
            "https://sandbox.safaricom.co.ke/oauth/v1/generate?grant_type=client_credentials"
        );
        assert_eq!(
            config.stk_push_url(),
            "https://sandbox.safaricom.co.ke/mpesa/stkpush/v1/processrequest"
        );
        assert_eq!(config.environment, MpesaEnvironment::Sandbox);
    }

    #[test]
    fn reference_prefix_must_leave_room_for_the_random_part() {
        assert_eq!(reference_prefix(" LT ").unwrap(), "LT");
        assert_eq!(reference_prefix("SHOP01").unwrap(), "SHOP01");
        for bad in ["", "LIFETIME", "L-T"] {
            assert!(
                matches!(reference_prefix(bad), Err(AppError::ConfigurationError(_))),
                "{} should be rejected",
                bad
            );
        }
    }
}
