use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::EmailConfig;
use crate::errors::{AppError, Result};
use crate::models::order::Order;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify_new_order(&self, order: &Order) -> Result<()>;
}

/// Sends the shop's new-order email in the background. Failures are logged
/// and never reach the caller.
pub fn dispatch_order_notification(notifier: Arc<dyn OrderNotifier>, order: Order) {
    tokio::spawn(async move {
        match notifier.notify_new_order(&order).await {
            Ok(()) => info!("📧 Order email sent for {}", order.order_number),
            Err(e) => error!("Failed to send order email for {}: {}", order.order_number, e),
        }
    });
}

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: &'a [String],
    subject: String,
    html: String,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
    message: Option<String>,
}

#[derive(Clone)]
pub struct ResendNotifier {
    config: EmailConfig,
    client: Client,
}

impl ResendNotifier {
    pub fn new(config: EmailConfig) -> Self {
        ResendNotifier {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl OrderNotifier for ResendNotifier {
    async fn notify_new_order(&self, order: &Order) -> Result<()> {
        let email = ResendEmail {
            from: &self.config.from,
            to: &self.config.to,
            subject: order_email_subject(order),
            html: order_email_html(order),
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.config.resend_api_key)
            .json(&email)
            .send()
            .await
            .map_err(|e| AppError::external_api(format!("Email API error: {}", e)))?;

        let status = response.status();
        let body: ResendResponse = response.json().await.unwrap_or(ResendResponse {
            id: None,
            message: None,
        });

        if status.is_success() {
            info!("Resend accepted email {:?}", body.id);
            Ok(())
        } else {
            Err(AppError::external_api(format!(
                "Email sending failed with status {}: {}",
                status,
                body.message.unwrap_or_default()
            )))
        }
    }
}

/// Used when no email API key is configured.
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn notify_new_order(&self, order: &Order) -> Result<()> {
        info!(
            "New order {} for KSh {} (receipt {:?}), email notifications disabled",
            order.order_number, order.amount, order.mpesa_receipt_number
        );
        Ok(())
    }
}

pub fn order_email_subject(order: &Order) -> String {
    format!(
        "🛒 New Order Received - {} - KSh {}",
        order.order_number,
        format_ksh(order.amount)
    )
}

pub fn order_email_html(order: &Order) -> String {
    let receipt = order
        .mpesa_receipt_number
        .as_deref()
        .map(|r| format!("<p><strong>M-Pesa Receipt:</strong> {}</p>", escape_html(r)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333;">
  <h1>New Order Received!</h1>
  <h2>Order Summary</h2>
  <p><strong>Order Number:</strong> {order_number}</p>
  <p><strong>Date:</strong> {date}</p>
  {receipt}
  <h3>Customer Information</h3>
  <p><strong>Name:</strong> {name}</p>
  <p><strong>Phone:</strong> <a href="tel:{phone}">{phone}</a></p>
  <p><strong>Email:</strong> {email}</p>
  <p><strong>Delivery Address:</strong> {address}</p>
  <h3>Order Items</h3>
  <ul><li><strong>{product}</strong> x 1 = KSh {amount}</li></ul>
  <h3>Payment Details</h3>
  <p><strong>Payment Method:</strong> {method}</p>
  <p><strong>Total Amount: KSh {amount}</strong></p>
</body>
</html>"#,
        order_number = escape_html(&order.order_number),
        date = order.created_at.format("%Y-%m-%d %H:%M UTC"),
        receipt = receipt,
        name = escape_html(&order.full_name),
        phone = escape_html(&order.phone_number),
        email = escape_html(&order.email),
        address = escape_html(&order.delivery_address),
        product = escape_html(&order.product_name),
        amount = format_ksh(order.amount),
        method = escape_html(&order.payment_method),
    )
}

fn format_ksh(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if amount < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
