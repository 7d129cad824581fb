use std::sync::Arc;

use tracing::{error, info, warn};

use crate::database::{OrderStore, TransactionStore};
use crate::errors::{AppError, Result};
use crate::models::callback::{CallbackOutcome, StkCallback};
use crate::models::mpesa_transactions::{MpesaTransaction, TransactionStatus};
use crate::models::order::Order;
use crate::services::email_service::{dispatch_order_notification, OrderNotifier};

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Payment confirmed by this callback and its order created.
    Completed { transaction: MpesaTransaction, order: Option<Order> },
    /// Customer declined, cancelled or the prompt timed out.
    Declined(MpesaTransaction),
    /// A redelivered callback for a transaction that is already terminal.
    AlreadyProcessed(MpesaTransaction),
    /// No transaction matches the checkout request id.
    UnknownCheckout(String),
}

/// The single writer of terminal transaction state and the only place orders
/// are created from M-Pesa payments.
pub struct CallbackReconciler {
    transactions: Arc<dyn TransactionStore>,
    orders: Arc<dyn OrderStore>,
    notifier: Arc<dyn OrderNotifier>,
}

impl CallbackReconciler {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        orders: Arc<dyn OrderStore>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        CallbackReconciler {
            transactions,
            orders,
            notifier,
        }
    }

    pub async fn reconcile(&self, callback: &StkCallback) -> Result<ReconcileOutcome> {
        let checkout_id = callback.checkout_request_id.as_str();

        let Some(existing) = self.transactions.find_by_checkout_id(checkout_id).await? else {
            let err = AppError::CallbackCorrelation(checkout_id.to_string());
            warn!("⚠️ {}; acknowledging without changes", err);
            return Ok(ReconcileOutcome::UnknownCheckout(checkout_id.to_string()));
        };

        if existing.status.is_terminal() {
            return self.already_terminal(existing).await;
        }

        if let CallbackOutcome::Paid(metadata) = &callback.outcome {
            if let Some(paid) = metadata.amount {
                if paid != existing.amount {
                    warn!(
                        "Amount mismatch on {}: requested KSh {}, M-Pesa reports KSh {}",
                        checkout_id, existing.amount, paid
                    );
                }
            }
        }

        let update = callback.terminal_update();
        let Some(transaction) = self.transactions.complete_pending(checkout_id, &update).await?
        else {
            // Another delivery of this callback won the conditional update.
            let current = self
                .transactions
                .find_by_checkout_id(checkout_id)
                .await?
                .ok_or_else(|| AppError::CallbackCorrelation(checkout_id.to_string()))?;
            return self.already_terminal(current).await;
        };

        match transaction.status {
            TransactionStatus::Completed => {
                match &transaction.mpesa_receipt_number {
                    Some(receipt) => {
                        info!("✅ Payment {} completed, receipt {}", checkout_id, receipt)
                    }
                    None => error!(
                        "❌ Payment {} completed without an M-Pesa receipt; order needs manual reconciliation",
                        checkout_id
                    ),
                }
                let order = self.materialize_order(&transaction).await?;
                Ok(ReconcileOutcome::Completed { transaction, order })
            }
            status => {
                info!(
                    "Payment {} ended as {} ({}): {}",
                    checkout_id,
                    status.as_str(),
                    callback.result_code,
                    callback.result_desc
                );
                Ok(ReconcileOutcome::Declined(transaction))
            }
        }
    }

    async fn already_terminal(&self, transaction: MpesaTransaction) -> Result<ReconcileOutcome> {
        info!(
            "Callback for {} ignored, transaction already {}",
            transaction.checkout_request_id,
            transaction.status.as_str()
        );

        // Covers a crash between the terminal write and the order insert.
        if transaction.status == TransactionStatus::Completed
            && self
                .orders
                .find_by_checkout_id(&transaction.checkout_request_id)
                .await?
                .is_none()
        {
            warn!(
                "Completed transaction {} has no order, creating it now",
                transaction.checkout_request_id
            );
            self.materialize_order(&transaction).await?;
        }

        Ok(ReconcileOutcome::AlreadyProcessed(transaction))
    }

    async fn materialize_order(&self, transaction: &MpesaTransaction) -> Result<Option<Order>> {
        let order = Order::from_completed_transaction(transaction);
        match self.orders.insert(&order).await? {
            Some(created) => {
                info!(
                    "🧾 Order {} created for receipt {:?}",
                    created.order_number, created.mpesa_receipt_number
                );
                dispatch_order_notification(self.notifier.clone(), created.clone());
                Ok(Some(created))
            }
            None => Ok(None),
        }
    }
}
