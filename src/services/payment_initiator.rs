use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::database::TransactionStore;
use crate::dtos::payment_dtos::StkPushRequest;
use crate::errors::{AppError, Result};
use crate::models::mpesa_transactions::{MpesaTransaction, TransactionStatus};
use crate::services::mpesa_service::{normalize_phone_number, StkPushCommand, StkPushGateway};

const REFERENCE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct InitiatedPayment {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub account_reference: String,
    pub customer_message: String,
}

/// Validates a checkout intent, asks Daraja for the STK prompt and records the
/// pending transaction once the provider has accepted it.
pub struct PaymentInitiator {
    gateway: Arc<dyn StkPushGateway>,
    transactions: Arc<dyn TransactionStore>,
    reference_prefix: String,
}

impl PaymentInitiator {
    pub fn new(
        gateway: Arc<dyn StkPushGateway>,
        transactions: Arc<dyn TransactionStore>,
        reference_prefix: impl Into<String>,
    ) -> Self {
        PaymentInitiator {
            gateway,
            transactions,
            reference_prefix: reference_prefix.into(),
        }
    }

    pub async fn initiate(&self, request: StkPushRequest) -> Result<InitiatedPayment> {
        let (command, product_name) = self.prepare(request).await?;

        // No retry here: resending a push Daraja may already have accepted
        // would prompt the customer twice.
        let accepted = self.gateway.initiate_stk_push(&command).await?;

        let now = Utc::now();
        let transaction = MpesaTransaction {
            checkout_request_id: accepted.checkout_request_id.clone(),
            merchant_request_id: accepted.merchant_request_id.clone(),
            phone_number: command.phone_number.clone(),
            amount: command.amount,
            account_reference: command.account_reference.clone(),
            transaction_desc: command.transaction_desc.clone(),
            product_name,
            status: TransactionStatus::Pending,
            mpesa_receipt_number: None,
            result_code: None,
            result_desc: None,
            transaction_date: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.transactions.insert_pending(&transaction).await {
            error!(
                "❌ STK push {} accepted by M-Pesa but not recorded: {}",
                accepted.checkout_request_id, e
            );
            return Err(AppError::persistence(format!(
                "could not record transaction {}: {}",
                accepted.checkout_request_id, e
            )));
        }

        info!(
            "✅ Pending transaction {} recorded for {} (KSh {})",
            transaction.checkout_request_id, transaction.phone_number, transaction.amount
        );

        Ok(InitiatedPayment {
            checkout_request_id: accepted.checkout_request_id,
            merchant_request_id: accepted.merchant_request_id,
            account_reference: command.account_reference,
            customer_message: accepted.customer_message,
        })
    }

    /// Everything that must hold before the provider is contacted.
    async fn prepare(&self, request: StkPushRequest) -> Result<(StkPushCommand, String)> {
        request.validate()?;

        let phone_number = normalize_phone_number(&request.phone_number)?;

        let product_name = request.product_name.trim().to_string();
        if product_name.is_empty() {
            return Err(AppError::invalid_data("Product name is required"));
        }

        let transaction_desc = request
            .transaction_desc
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("Payment for {}", product_name));

        let account_reference = match request.account_reference.map(|r| r.trim().to_string()) {
            Some(reference) if !reference.is_empty() => {
                if self.transactions.reference_exists(&reference).await? {
                    return Err(AppError::invalid_data(
                        "Account reference has already been used for another payment",
                    ));
                }
                reference
            }
            _ => self.unused_reference().await?,
        };

        Ok((
            StkPushCommand {
                phone_number,
                amount: request.amount,
                account_reference,
                transaction_desc,
            },
            product_name,
        ))
    }

    async fn unused_reference(&self) -> Result<String> {
        for _ in 0..REFERENCE_ATTEMPTS {
            let candidate = generate_account_reference(&self.reference_prefix);
            if !self.transactions.reference_exists(&candidate).await? {
                return Ok(candidate);
            }
            warn!("Generated account reference {} collided, retrying", candidate);
        }
        Err(AppError::persistence(
            "could not generate an unused account reference",
        ))
    }
}

/// Daraja's AccountReference limit.
pub const ACCOUNT_REFERENCE_LEN: usize = 12;

/// Prefix followed by random hex, padded to exactly twelve characters.
/// `config::reference_prefix` keeps the prefix short enough for this.
pub fn generate_account_reference(prefix: &str) -> String {
    let suffix_len = ACCOUNT_REFERENCE_LEN.saturating_sub(prefix.len());
    let random = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("{}{}", prefix, &random[..suffix_len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryTransactionStore;
    use crate::services::mpesa_service::StkPushAccepted;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        calls: AtomicUsize,
        reject_with: Option<String>,
        last_command: Mutex<Option<StkPushCommand>>,
    }

    #[async_trait]
    impl StkPushGateway for FakeGateway {
        async fn initiate_stk_push(&self, command: &StkPushCommand) -> Result<StkPushAccepted> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_command.lock().unwrap() = Some(command.clone());
            if let Some(message) = &self.reject_with {
                return Err(AppError::mpesa(message.clone()));
            }
            Ok(StkPushAccepted {
                merchant_request_id: format!("29115-{}", n),
                checkout_request_id: format!("ws_CO_{}", n),
                customer_message: "Success. Request accepted for processing".to_string(),
            })
        }
    }

    fn request(phone: &str, amount: i64, product: &str) -> StkPushRequest {
        StkPushRequest {
            phone_number: phone.to_string(),
            amount,
            product_name: product.to_string(),
            account_reference: None,
            transaction_desc: None,
        }
    }

    fn initiator(gateway: Arc<FakeGateway>) -> (PaymentInitiator, Arc<MemoryTransactionStore>) {
        let store = Arc::new(MemoryTransactionStore::new());
        (PaymentInitiator::new(gateway, store.clone(), "LT"), store)
    }

    #[tokio::test]
    async fn accepted_push_creates_pending_transaction() {
        let gateway = Arc::new(FakeGateway::default());
        let (initiator, store) = initiator(gateway.clone());

        let initiated = initiator
            .initiate(request("0712345678", 500, "Case"))
            .await
            .unwrap();

        let tx = store
            .find_by_checkout_id(&initiated.checkout_request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.phone_number, "254712345678");
        assert_eq!(tx.amount, 500);
        assert_eq!(tx.transaction_desc, "Payment for Case");
        assert_eq!(tx.account_reference, initiated.account_reference);
        assert!(tx.account_reference.starts_with("LT"));

        let sent = gateway.last_command.lock().unwrap().clone().unwrap();
        assert_eq!(sent.phone_number, "254712345678");
    }

    #[tokio::test]
    async fn amount_above_ceiling_never_reaches_provider() {
        let gateway = Arc::new(FakeGateway::default());
        let (initiator, store) = initiator(gateway.clone());

        let result = initiator.initiate(request("0712345678", 185_000, "Laptop")).await;

        assert!(matches!(result, Err(AppError::ValidationError(_))));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        assert!(store.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_phone_and_blank_product_are_rejected_early() {
        let gateway = Arc::new(FakeGateway::default());
        let (initiator, _store) = initiator(gateway.clone());

        assert!(matches!(
            initiator.initiate(request("12345", 500, "Case")).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            initiator.initiate(request("0712345678", 500, "   ")).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            initiator.initiate(request("0712345678", 0, "Case")).await,
            Err(AppError::ValidationError(_))
        ));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_rejection_persists_nothing() {
        let gateway = Arc::new(FakeGateway {
            reject_with: Some("Invalid Access Token".to_string()),
            ..Default::default()
        });
        let (initiator, store) = initiator(gateway.clone());

        let result = initiator.initiate(request("0712345678", 500, "Case")).await;

        match result {
            Err(AppError::PaymentInitiation(message)) => assert_eq!(message, "Invalid Access Token"),
            other => panic!("expected initiation error, got {:?}", other),
        }
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert!(store.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reused_account_reference_is_rejected_before_provider_call() {
        let gateway = Arc::new(FakeGateway::default());
        let (initiator, _store) = initiator(gateway.clone());

        let mut first = request("0712345678", 500, "Case");
        first.account_reference = Some("ORDER42".to_string());
        initiator.initiate(first.clone()).await.unwrap();

        let result = initiator.initiate(first).await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resubmission_gets_a_fresh_reference() {
        let gateway = Arc::new(FakeGateway::default());
        let (initiator, _store) = initiator(gateway);

        let a = initiator.initiate(request("0712345678", 500, "Case")).await.unwrap();
        let b = initiator.initiate(request("0712345678", 500, "Case")).await.unwrap();
        assert_ne!(a.account_reference, b.account_reference);
        assert_ne!(a.checkout_request_id, b.checkout_request_id);
    }

    #[test]
    fn generated_reference_fits_provider_limit() {
        let reference = generate_account_reference("LT");
        assert_eq!(reference.len(), ACCOUNT_REFERENCE_LEN);
        assert!(reference.starts_with("LT"));

        let longest = crate::config::reference_prefix("SHOP01").unwrap();
        assert_eq!(generate_account_reference(&longest).len(), ACCOUNT_REFERENCE_LEN);
    }
}
