use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a push-payment attempt. `Pending` is the only non-terminal
/// state and every transition leaves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" | "canceled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MpesaTransaction {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone_number: String,
    pub amount: i64,
    pub account_reference: String,
    pub transaction_desc: String,
    pub product_name: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub mpesa_receipt_number: Option<String>,
    #[serde(default)]
    pub result_code: Option<i64>,
    #[serde(default)]
    pub result_desc: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MpesaTransaction {
    /// Applies a terminal outcome. Callers must only do this to a pending row;
    /// the stores enforce that with a conditional write.
    pub fn apply(&mut self, update: &TerminalUpdate) {
        self.status = update.status;
        self.result_code = Some(update.result_code);
        self.result_desc = Some(update.result_desc.clone());
        self.updated_at = update.updated_at;
        if let Some(receipt) = &update.mpesa_receipt_number {
            self.mpesa_receipt_number = Some(receipt.clone());
        }
        if let Some(amount) = update.amount {
            self.amount = amount;
        }
        if let Some(phone) = &update.phone_number {
            self.phone_number = phone.clone();
        }
        if let Some(date) = &update.transaction_date {
            self.transaction_date = Some(date.clone());
        }
    }
}

/// Fields written by the callback receiver when a transaction leaves `pending`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TerminalUpdate {
    pub status: TransactionStatus,
    pub result_code: i64,
    pub result_desc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpesa_receipt_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TransactionQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct TransactionStats {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,
    /// Failed and cancelled attempts together.
    pub failed: u64,
    pub completed_revenue: i64,
}

impl TransactionStats {
    pub fn tally<'a>(transactions: impl IntoIterator<Item = &'a MpesaTransaction>) -> Self {
        let mut stats = TransactionStats::default();
        for tx in transactions {
            stats.total += 1;
            match tx.status {
                TransactionStatus::Completed => {
                    stats.completed += 1;
                    stats.completed_revenue += tx.amount;
                }
                TransactionStatus::Pending => stats.pending += 1,
                TransactionStatus::Failed | TransactionStatus::Cancelled => stats.failed += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(amount: i64) -> MpesaTransaction {
        let now = Utc::now();
        MpesaTransaction {
            checkout_request_id: "ws_CO_1".to_string(),
            merchant_request_id: "29115-1".to_string(),
            phone_number: "254712345678".to_string(),
            amount,
            account_reference: "LT-1".to_string(),
            transaction_desc: "Payment for Case".to_string(),
            product_name: "Case".to_string(),
            status: TransactionStatus::Pending,
            mpesa_receipt_number: None,
            result_code: None,
            result_desc: None,
            transaction_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TransactionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!("Completed".parse::<TransactionStatus>().unwrap(), TransactionStatus::Completed);
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
    }

    #[test]
    fn apply_keeps_fields_the_callback_did_not_send() {
        let mut tx = pending(500);
        tx.apply(&TerminalUpdate {
            status: TransactionStatus::Cancelled,
            result_code: 1032,
            result_desc: "Request cancelled by user".to_string(),
            mpesa_receipt_number: None,
            amount: None,
            phone_number: None,
            transaction_date: None,
            updated_at: Utc::now(),
        });
        assert_eq!(tx.status, TransactionStatus::Cancelled);
        assert_eq!(tx.amount, 500);
        assert_eq!(tx.phone_number, "254712345678");
        assert!(tx.mpesa_receipt_number.is_none());
    }

    #[test]
    fn stats_group_cancelled_with_failed() {
        let mut done = pending(500);
        done.status = TransactionStatus::Completed;
        let mut cancelled = pending(200);
        cancelled.status = TransactionStatus::Cancelled;
        let open = pending(100);

        let stats = TransactionStats::tally([&done, &cancelled, &open]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed_revenue, 500);
    }
}
