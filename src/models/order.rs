use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::mpesa_transactions::MpesaTransaction;

pub const MPESA_PAYMENT_METHOD: &str = "M-Pesa";

/// Added to paid orders whose callback carried no receipt number.
pub const MISSING_RECEIPT_NOTE: &str = "M-Pesa receipt missing, reconcile against the statement";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Paid => "paid",
        }
    }

    /// Paid and delivered orders count as settled revenue.
    pub fn is_settled(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Paid)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            "paid" => Ok(OrderStatus::Paid),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_number: String,
    pub full_name: String,
    pub phone_number: String,
    pub email: String,
    pub delivery_address: String,
    pub product_name: String,
    pub payment_method: String,
    pub amount: i64,
    pub status: OrderStatus,
    #[serde(default)]
    pub mpesa_receipt_number: Option<String>,
    #[serde(default)]
    pub checkout_request_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds the paid order for a completed STK push. Customer details are
    /// not collected in the payment prompt, so placeholders are stored until
    /// the shop follows up by phone.
    pub fn from_completed_transaction(tx: &MpesaTransaction) -> Self {
        let now = Utc::now();
        Order {
            order_number: generate_order_number(now),
            full_name: "M-Pesa Customer".to_string(),
            phone_number: tx.phone_number.clone(),
            email: "mpesa@customer.com".to_string(),
            delivery_address: "To be provided".to_string(),
            product_name: if tx.product_name.is_empty() {
                tx.transaction_desc.clone()
            } else {
                tx.product_name.clone()
            },
            payment_method: MPESA_PAYMENT_METHOD.to_string(),
            amount: tx.amount,
            status: OrderStatus::Paid,
            mpesa_receipt_number: tx.mpesa_receipt_number.clone(),
            checkout_request_id: Some(tx.checkout_request_id.clone()),
            notes: Some(match &tx.mpesa_receipt_number {
                Some(_) => format!("Account reference {}", tx.account_reference),
                None => format!(
                    "Account reference {}. {}",
                    tx.account_reference, MISSING_RECEIPT_NOTE
                ),
            }),
            created_at: now,
            updated_at: now,
        }
    }
}

/// `ORD-YYYYMMDD-XXXXXXXX`, date in UTC plus a random suffix.
pub fn generate_order_number(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    format!("ORD-{}-{}", at.format("%Y%m%d"), suffix)
}

#[derive(Debug, Deserialize, Default)]
pub struct OrderQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct OrderStats {
    pub total_orders: u64,
    pub pending_orders: u64,
    pub completed_orders: u64,
    pub total_revenue: i64,
    pub paid_revenue: i64,
    pub pending_revenue: i64,
}

impl OrderStats {
    pub fn tally<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut stats = OrderStats::default();
        for order in orders {
            stats.total_orders += 1;
            stats.total_revenue += order.amount;
            if order.status.is_settled() {
                stats.completed_orders += 1;
                stats.paid_revenue += order.amount;
            } else if order.status == OrderStatus::Pending {
                stats.pending_orders += 1;
                stats.pending_revenue += order.amount;
            }
        }
        stats
    }
}
