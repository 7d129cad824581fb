// Daraja STK callback payloads.
//
// The provider posts `Body.stkCallback`; field presence depends on the result
// code, so the raw shape is all-optional and `StkCallback::parse` turns it into
// a typed outcome before anything touches the store.
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{AppError, Result};
use crate::models::mpesa_transactions::{TerminalUpdate, TransactionStatus};

/// Result code Daraja sends when the customer dismisses the PIN prompt.
pub const RESULT_CODE_CANCELLED_BY_USER: i64 = 1032;

#[derive(Debug, Deserialize)]
pub struct CallbackData {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: RawStkCallback,
}

#[derive(Debug, Deserialize)]
pub struct RawStkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", default)]
    pub result_code: Option<Value>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

impl CallbackMetadata {
    fn get(&self, name: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentMetadata {
    /// Daraja normally sends one; a success without it still means the
    /// customer was charged.
    pub receipt_number: Option<String>,
    pub amount: Option<i64>,
    pub phone_number: Option<String>,
    pub transaction_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Paid(PaymentMetadata),
    Cancelled,
    Failed,
}

impl CallbackOutcome {
    pub fn status(&self) -> TransactionStatus {
        match self {
            CallbackOutcome::Paid(_) => TransactionStatus::Completed,
            CallbackOutcome::Cancelled => TransactionStatus::Cancelled,
            CallbackOutcome::Failed => TransactionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StkCallback {
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    pub outcome: CallbackOutcome,
}

impl StkCallback {
    pub fn parse(payload: Value) -> Result<Self> {
        let data: CallbackData = serde_json::from_value(payload)
            .map_err(|e| AppError::invalid_data(format!("Malformed callback body: {}", e)))?;
        Self::from_raw(data.body.stk_callback)
    }

    pub fn from_raw(raw: RawStkCallback) -> Result<Self> {
        let checkout_request_id = raw
            .checkout_request_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::invalid_data("Callback is missing CheckoutRequestID"))?;

        let result_code = raw
            .result_code
            .as_ref()
            .and_then(value_as_i64)
            .ok_or_else(|| AppError::invalid_data("Callback is missing a numeric ResultCode"))?;

        let result_desc = raw.result_desc.unwrap_or_default();

        let outcome = if result_code == 0 {
            let metadata = raw.callback_metadata.as_ref();
            let item = |name: &str| metadata.and_then(|m| m.get(name));

            CallbackOutcome::Paid(PaymentMetadata {
                receipt_number: item("MpesaReceiptNumber")
                    .and_then(value_as_string)
                    .filter(|r| !r.is_empty()),
                amount: item("Amount").and_then(value_as_i64),
                phone_number: item("PhoneNumber").and_then(value_as_string),
                transaction_date: item("TransactionDate").and_then(value_as_string),
            })
        } else if result_code == RESULT_CODE_CANCELLED_BY_USER
            || result_desc.to_ascii_lowercase().contains("cancel")
        {
            CallbackOutcome::Cancelled
        } else {
            CallbackOutcome::Failed
        };

        Ok(StkCallback {
            merchant_request_id: raw.merchant_request_id,
            checkout_request_id,
            result_code,
            result_desc,
            outcome,
        })
    }

    pub fn terminal_update(&self) -> TerminalUpdate {
        let metadata = match &self.outcome {
            CallbackOutcome::Paid(metadata) => Some(metadata),
            _ => None,
        };

        TerminalUpdate {
            status: self.outcome.status(),
            result_code: self.result_code,
            result_desc: self.result_desc.clone(),
            mpesa_receipt_number: metadata.and_then(|m| m.receipt_number.clone()),
            amount: metadata.and_then(|m| m.amount),
            phone_number: metadata.and_then(|m| m.phone_number.clone()),
            transaction_date: metadata.and_then(|m| m.transaction_date.clone()),
            updated_at: Utc::now(),
        }
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_payload() -> Value {
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 500.00 },
                            { "Name": "MpesaReceiptNumber", "Value": "QGH7X8Y9Z0" },
                            { "Name": "Balance" },
                            { "Name": "TransactionDate", "Value": 20191219102115u64 },
                            { "Name": "PhoneNumber", "Value": 254712345678u64 }
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn parses_successful_callback_metadata() {
        let callback = StkCallback::parse(success_payload()).unwrap();
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.result_code, 0);
        assert_eq!(
            callback.outcome,
            CallbackOutcome::Paid(PaymentMetadata {
                receipt_number: Some("QGH7X8Y9Z0".to_string()),
                amount: Some(500),
                phone_number: Some("254712345678".to_string()),
                transaction_date: Some("20191219102115".to_string()),
            })
        );

        let update = callback.terminal_update();
        assert_eq!(update.status, TransactionStatus::Completed);
        assert_eq!(update.mpesa_receipt_number.as_deref(), Some("QGH7X8Y9Z0"));
        assert_eq!(update.amount, Some(500));
    }

    #[test]
    fn cancellation_is_detected_from_code_or_description() {
        let by_code = json!({
            "Body": { "stkCallback": {
                "MerchantRequestID": "1", "CheckoutRequestID": "ws_CO_2",
                "ResultCode": 1032, "ResultDesc": "Request cancelled by user"
            }}
        });
        let by_desc = json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_CO_3",
                "ResultCode": 1, "ResultDesc": "cancelled by user"
            }}
        });
        let insufficient = json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_CO_4",
                "ResultCode": "1", "ResultDesc": "The balance is insufficient for the transaction."
            }}
        });

        assert_eq!(StkCallback::parse(by_code).unwrap().outcome, CallbackOutcome::Cancelled);
        assert_eq!(StkCallback::parse(by_desc).unwrap().outcome, CallbackOutcome::Cancelled);
        let failed = StkCallback::parse(insufficient).unwrap();
        assert_eq!(failed.outcome, CallbackOutcome::Failed);
        assert_eq!(failed.terminal_update().mpesa_receipt_number, None);
    }

    #[test]
    fn rejects_payloads_without_correlation_id() {
        let missing_id = json!({
            "Body": { "stkCallback": { "ResultCode": 0, "ResultDesc": "ok" } }
        });
        let blank_id = json!({
            "Body": { "stkCallback": { "CheckoutRequestID": "  ", "ResultCode": 0 } }
        });
        assert!(StkCallback::parse(missing_id).is_err());
        assert!(StkCallback::parse(blank_id).is_err());
        assert!(StkCallback::parse(json!({ "hello": "world" })).is_err());
    }

    #[test]
    fn success_without_metadata_still_completes() {
        let bare = json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_CO_1",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully."
            }}
        });
        let callback = StkCallback::parse(bare).unwrap();
        assert_eq!(
            callback.outcome,
            CallbackOutcome::Paid(PaymentMetadata {
                receipt_number: None,
                amount: None,
                phone_number: None,
                transaction_date: None,
            })
        );
        let update = callback.terminal_update();
        assert_eq!(update.status, TransactionStatus::Completed);
        assert_eq!(update.mpesa_receipt_number, None);
        assert_eq!(update.amount, None);

        let amount_only = json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_CO_5",
                "ResultCode": 0,
                "ResultDesc": "ok",
                "CallbackMetadata": { "Item": [ { "Name": "Amount", "Value": 10 } ] }
            }}
        });
        let callback = StkCallback::parse(amount_only).unwrap();
        assert_eq!(callback.outcome.status(), TransactionStatus::Completed);
        assert_eq!(callback.terminal_update().amount, Some(10));
    }
}
