use std::sync::Arc;

use crate::database::{OrderStore, TransactionStore};
use crate::services::callback_reconciler::CallbackReconciler;
use crate::services::email_service::OrderNotifier;
use crate::services::mpesa_service::StkPushGateway;
use crate::services::payment_initiator::PaymentInitiator;

#[derive(Clone)]
pub struct AppState {
    pub transactions: Arc<dyn TransactionStore>,
    pub orders: Arc<dyn OrderStore>,
    pub reconciler: Arc<CallbackReconciler>,
    /// `None` when no Daraja credentials are configured; STK push then
    /// answers 503 while callbacks and status reads keep working.
    pub payment_initiator: Option<Arc<PaymentInitiator>>,
}

impl AppState {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        orders: Arc<dyn OrderStore>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        let reconciler = Arc::new(CallbackReconciler::new(
            transactions.clone(),
            orders.clone(),
            notifier,
        ));
        AppState {
            transactions,
            orders,
            reconciler,
            payment_initiator: None,
        }
    }

    pub fn with_mpesa(
        mut self,
        gateway: Arc<dyn StkPushGateway>,
        account_reference_prefix: impl Into<String>,
    ) -> Self {
        self.payment_initiator = Some(Arc::new(PaymentInitiator::new(
            gateway,
            self.transactions.clone(),
            account_reference_prefix,
        )));
        self
    }
}
