use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use validator::Validate;

use crate::client::status_poller::{PollOutcome, StatusPoller};
use crate::client::{CheckoutApi, DialogConfig};
use crate::dtos::payment_dtos::StkPushRequest;
use crate::errors::AppError;
use crate::models::mpesa_transactions::TransactionStatus;
use crate::services::mpesa_service::normalize_phone_number;

pub const PROCESSING_MESSAGE: &str =
    "Check your phone and enter your M-Pesa PIN to complete the payment.";
pub const TIMEOUT_MESSAGE: &str = "We haven't received confirmation from M-Pesa yet. \
     If you completed the payment, check your M-Pesa messages before trying again.";
const INITIATION_FAILED_MESSAGE: &str = "We couldn't start the M-Pesa payment. Please try again.";
const UNAVAILABLE_MESSAGE: &str = "M-Pesa payments are unavailable right now. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Idle,
    Processing,
    Success,
    Failed,
}

/// What the customer sees.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentAttemptView {
    pub state: DialogState,
    pub message: Option<String>,
    /// M-Pesa receipt once the payment succeeded.
    pub transaction_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub dismissed: bool,
}

impl PaymentAttemptView {
    fn idle() -> Self {
        PaymentAttemptView {
            state: DialogState::Idle,
            message: None,
            transaction_id: None,
            checkout_request_id: None,
            dismissed: false,
        }
    }
}

/// Checkout dialog for a single product.
///
/// `idle -> processing -> {success, failed}`. A failed attempt can be
/// resubmitted, which starts a new payment with a fresh account reference.
/// Success is final and dismisses itself after `auto_dismiss`.
pub struct PaymentDialog {
    api: Arc<dyn CheckoutApi>,
    poller: StatusPoller,
    config: DialogConfig,
    product_name: String,
    amount: i64,
    view: Arc<watch::Sender<PaymentAttemptView>>,
    closed: CancellationToken,
}

impl PaymentDialog {
    pub fn new(
        api: Arc<dyn CheckoutApi>,
        config: DialogConfig,
        product_name: impl Into<String>,
        amount: i64,
    ) -> Self {
        let (view, _) = watch::channel(PaymentAttemptView::idle());
        PaymentDialog {
            poller: StatusPoller::from_config(api.clone(), &config),
            api,
            config,
            product_name: product_name.into(),
            amount,
            view: Arc::new(view),
            closed: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PaymentAttemptView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> PaymentAttemptView {
        self.view.borrow().clone()
    }

    /// Runs one payment attempt to completion and returns the resulting
    /// state. Ignored while an attempt is in flight, after success, or once
    /// the dialog is closed.
    pub async fn submit(&self, phone_number: &str) -> DialogState {
        let started = self.view.send_if_modified(|view| {
            let busy = matches!(view.state, DialogState::Processing | DialogState::Success);
            if busy || view.dismissed || self.closed.is_cancelled() {
                return false;
            }
            *view = PaymentAttemptView {
                state: DialogState::Processing,
                message: None,
                ..PaymentAttemptView::idle()
            };
            true
        });
        if !started {
            return self.view.borrow().state;
        }

        let request = StkPushRequest {
            phone_number: phone_number.trim().to_string(),
            amount: self.amount,
            product_name: self.product_name.clone(),
            account_reference: None,
            transaction_desc: None,
        };

        if let Err(message) = validate_locally(&request) {
            return self.fail(message);
        }

        let checkout_request_id = match self.api.initiate(&request).await {
            Ok(response) => match response.checkout_request_id {
                Some(id) if response.success => id,
                _ => {
                    warn!("Initiation returned no checkout request: {}", response.message);
                    return self.fail(INITIATION_FAILED_MESSAGE.to_string());
                }
            },
            Err(e) => {
                warn!("STK push initiation failed: {}", e);
                return self.fail(initiation_failure_message(&e));
            }
        };

        self.view.send_modify(|view| {
            view.message = Some(PROCESSING_MESSAGE.to_string());
            view.checkout_request_id = Some(checkout_request_id.clone());
        });

        let attempt = self.closed.child_token();
        match self.poller.poll(&checkout_request_id, &attempt).await {
            PollOutcome::Completed { receipt } => {
                self.view.send_modify(|view| {
                    view.state = DialogState::Success;
                    view.message = Some(match &receipt {
                        Some(r) => format!("Payment successful! M-Pesa receipt: {}", r),
                        None => "Payment successful!".to_string(),
                    });
                    view.transaction_id = receipt.clone();
                });
                self.schedule_dismiss();
                DialogState::Success
            }
            PollOutcome::Declined { status, message } => {
                info!(
                    "Payment {} declined ({}): {:?}",
                    checkout_request_id,
                    status.as_str(),
                    message
                );
                self.fail(decline_message(status).to_string())
            }
            PollOutcome::TimedOut { attempts } => {
                warn!("{}", AppError::PaymentTimeout { attempts });
                self.fail(TIMEOUT_MESSAGE.to_string())
            }
            PollOutcome::Cancelled => self.view.borrow().state,
        }
    }

    /// Stops polling. A prompt already on the customer's phone can still be
    /// paid and will be settled by the callback.
    pub fn close(&self) {
        self.closed.cancel();
        self.view.send_modify(|view| view.dismissed = true);
    }

    fn fail(&self, message: String) -> DialogState {
        self.view.send_modify(|view| {
            view.state = DialogState::Failed;
            view.message = Some(message);
        });
        DialogState::Failed
    }

    fn schedule_dismiss(&self) {
        let view = self.view.clone();
        let closed = self.closed.clone();
        let delay = self.config.auto_dismiss;
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    view.send_modify(|v| v.dismissed = true);
                }
            }
        });
    }
}

fn validate_locally(request: &StkPushRequest) -> Result<(), String> {
    normalize_phone_number(&request.phone_number).map_err(|e| e.public_message())?;
    request
        .validate()
        .map_err(|e| AppError::from(e).public_message())
}

fn initiation_failure_message(err: &AppError) -> String {
    match err {
        // Our own validation messages are written for customers.
        AppError::ValidationError(message) => message.clone(),
        AppError::ServiceUnavailable(_) => UNAVAILABLE_MESSAGE.to_string(),
        _ => INITIATION_FAILED_MESSAGE.to_string(),
    }
}

fn decline_message(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Cancelled => "The payment was cancelled. You can try again.",
        _ => "The payment was not completed. Please try again.",
    }
}
