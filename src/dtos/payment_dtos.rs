use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::mpesa_transactions::{MpesaTransaction, TransactionStatus};

pub const MIN_AMOUNT: i64 = 1;
pub const MAX_AMOUNT: i64 = 70_000;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StkPushRequest {
    pub phone_number: String,

    #[validate(range(min = 1, max = 70000, message = "Amount must be between KSh 1 and KSh 70,000"))]
    pub amount: i64,

    #[validate(length(min = 1, max = 100, message = "Product name is required"))]
    pub product_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 12, message = "Account reference must be 1-12 characters"))]
    pub account_reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 100, message = "Transaction description must be 1-100 characters"))]
    pub transaction_desc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StkPushResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_reference: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub status: TransactionStatus,
    /// M-Pesa receipt number, present once the payment completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&MpesaTransaction> for PaymentStatusResponse {
    fn from(tx: &MpesaTransaction) -> Self {
        let message = match tx.status {
            TransactionStatus::Pending => Some("Waiting for M-Pesa confirmation".to_string()),
            _ => tx.result_desc.clone(),
        };
        PaymentStatusResponse {
            status: tx.status,
            transaction_id: tx.mpesa_receipt_number.clone(),
            message,
        }
    }
}

/// Body Daraja expects back from the callback URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        CallbackAck {
            result_code: 0,
            result_desc: "Callback received successfully".to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        CallbackAck {
            result_code: 1,
            result_desc: reason.into(),
        }
    }
}
