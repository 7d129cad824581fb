use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{CheckoutApi, DialogConfig};
use crate::models::mpesa_transactions::TransactionStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed { receipt: Option<String> },
    /// M-Pesa reported a failure or the customer cancelled the prompt.
    Declined {
        status: TransactionStatus,
        message: Option<String>,
    },
    /// Still pending after every attempt. The customer may yet pay.
    TimedOut { attempts: u32 },
    Cancelled,
}

/// Polls the payment status endpoint on a fixed interval until the
/// transaction leaves `pending`, the attempt budget runs out, or the caller
/// cancels. Never writes anything.
///
/// The budget is also a wall-clock deadline of `interval * max_attempts`:
/// slow status requests eat into it rather than extending it.
pub struct StatusPoller {
    api: Arc<dyn CheckoutApi>,
    interval: Duration,
    max_attempts: u32,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn CheckoutApi>, interval: Duration, max_attempts: u32) -> Self {
        StatusPoller {
            api,
            interval,
            max_attempts,
        }
    }

    pub fn from_config(api: Arc<dyn CheckoutApi>, config: &DialogConfig) -> Self {
        Self::new(api, config.poll_interval, config.max_attempts)
    }

    pub async fn poll(&self, checkout_request_id: &str, cancel: &CancellationToken) -> PollOutcome {
        let deadline = Instant::now() + self.interval * self.max_attempts;

        for attempt in 1..=self.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
                _ = sleep_until(deadline) => {
                    return self.out_of_time(checkout_request_id, attempt - 1);
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                result = self.api.payment_status(checkout_request_id) => result,
                _ = sleep_until(deadline) => {
                    return self.out_of_time(checkout_request_id, attempt);
                }
            };

            match result {
                Ok(response) => match response.status {
                    TransactionStatus::Completed => {
                        info!(
                            "Payment {} confirmed after {} checks",
                            checkout_request_id, attempt
                        );
                        return PollOutcome::Completed {
                            receipt: response.transaction_id,
                        };
                    }
                    TransactionStatus::Failed | TransactionStatus::Cancelled => {
                        return PollOutcome::Declined {
                            status: response.status,
                            message: response.message,
                        };
                    }
                    TransactionStatus::Pending => {
                        debug!(
                            "Payment {} still pending ({}/{})",
                            checkout_request_id, attempt, self.max_attempts
                        );
                    }
                },
                // Counts against the budget; the next tick tries again.
                Err(e) => warn!(
                    "Status check {}/{} for {} failed: {}",
                    attempt, self.max_attempts, checkout_request_id, e
                ),
            }
        }

        PollOutcome::TimedOut {
            attempts: self.max_attempts,
        }
    }

    fn out_of_time(&self, checkout_request_id: &str, attempts: u32) -> PollOutcome {
        warn!(
            "Payment {} still unconfirmed when the {:?} polling window closed ({} checks)",
            checkout_request_id,
            self.interval * self.max_attempts,
            attempts
        );
        PollOutcome::TimedOut { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{status, FakeCheckoutApi};
    use crate::errors::AppError;

    const INTERVAL: Duration = Duration::from_secs(3);

    fn poller(api: Arc<FakeCheckoutApi>, max_attempts: u32) -> StatusPoller {
        StatusPoller::new(api, INTERVAL, max_attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn reports_receipt_once_completed() {
        let api = Arc::new(FakeCheckoutApi::with_statuses(vec![
            Ok(status(TransactionStatus::Pending, None)),
            Ok(status(TransactionStatus::Pending, None)),
            Ok(status(TransactionStatus::Completed, Some("QGH7X8Y9Z0"))),
        ]));

        let outcome = poller(api.clone(), 30)
            .poll("ws_CO_1", &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            PollOutcome::Completed {
                receipt: Some("QGH7X8Y9Z0".to_string())
            }
        );
        assert_eq!(api.polled(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_payment_is_a_decline_not_a_timeout() {
        let mut cancelled = status(TransactionStatus::Cancelled, None);
        cancelled.message = Some("Request cancelled by user".to_string());
        let api = Arc::new(FakeCheckoutApi::with_statuses(vec![Ok(cancelled)]));

        let outcome = poller(api, 30).poll("ws_CO_1", &CancellationToken::new()).await;

        assert_eq!(
            outcome,
            PollOutcome::Declined {
                status: TransactionStatus::Cancelled,
                message: Some("Request cancelled by user".to_string()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_attempt_budget() {
        let api = Arc::new(FakeCheckoutApi::default());
        let started = Instant::now();

        let outcome = poller(api.clone(), 5).poll("ws_CO_1", &CancellationToken::new()).await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 5 });
        assert_eq!(api.polled(), 5);
        assert!(started.elapsed() <= INTERVAL * 5 + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_use_up_attempts_but_polling_continues() {
        let api = Arc::new(FakeCheckoutApi::with_statuses(vec![
            Err(AppError::HttpClientError("connection reset".to_string())),
            Err(AppError::HttpClientError("connection reset".to_string())),
            Ok(status(TransactionStatus::Completed, Some("QGH7X8Y9Z0"))),
        ]));

        let outcome = poller(api.clone(), 3).poll("ws_CO_1", &CancellationToken::new()).await;
        assert!(matches!(outcome, PollOutcome::Completed { .. }));

        let api = Arc::new(FakeCheckoutApi::with_statuses(vec![
            Err(AppError::HttpClientError("connection reset".to_string())),
            Err(AppError::HttpClientError("connection reset".to_string())),
        ]));
        let outcome = poller(api.clone(), 2).poll("ws_CO_1", &CancellationToken::new()).await;
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_further_requests() {
        let api = Arc::new(FakeCheckoutApi::default());
        let cancel = CancellationToken::new();
        let poller = Arc::new(poller(api.clone(), 30));

        let task = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.poll("ws_CO_1", &cancel).await })
        };

        tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(500)).await;
        let seen = api.polled();
        cancel.cancel();

        assert_eq!(task.await.unwrap(), PollOutcome::Cancelled);
        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(api.polled(), seen);
        assert_eq!(seen, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_status_responses_do_not_stretch_the_window() {
        let api = Arc::new(FakeCheckoutApi {
            status_delay: Some(Duration::from_secs(29)),
            ..Default::default()
        });
        let started = Instant::now();

        let outcome = poller(api.clone(), 30).poll("ws_CO_1", &CancellationToken::new()).await;

        // Requests start at 3s, 35s and 67s; the third is cut off at 90s.
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 3 });
        assert_eq!(api.polled(), 3);
        assert!(started.elapsed() <= INTERVAL * 30 + Duration::from_millis(10));
        assert!(started.elapsed() >= INTERVAL * 30);
    }
}
