use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use storefront_api::build_router;
use storefront_api::database::memory::{MemoryOrderStore, MemoryTransactionStore};
use storefront_api::errors::{AppError, Result};
use storefront_api::services::email_service::LogNotifier;
use storefront_api::services::mpesa_service::{StkPushAccepted, StkPushCommand, StkPushGateway};
use storefront_api::state::AppState;

/// Accepts every push and hands out sequential checkout ids, unless
/// `reject_with` is set.
#[derive(Default)]
pub struct FakeGateway {
    pub calls: AtomicUsize,
    pub reject_with: Option<String>,
}

impl FakeGateway {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StkPushGateway for FakeGateway {
    async fn initiate_stk_push(&self, _command: &StkPushCommand) -> Result<StkPushAccepted> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.reject_with {
            return Err(AppError::mpesa(message.clone()));
        }
        Ok(StkPushAccepted {
            merchant_request_id: format!("29115-34620561-{}", n),
            checkout_request_id: format!("ws_CO_19122024_{}", n),
            customer_message: "Success. Request accepted for processing".to_string(),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<FakeGateway>,
    pub transactions: Arc<MemoryTransactionStore>,
    pub orders: Arc<MemoryOrderStore>,
}

pub fn test_app(mpesa_enabled: bool) -> TestApp {
    test_app_with(FakeGateway::default(), mpesa_enabled)
}

pub fn test_app_with(gateway: FakeGateway, mpesa_enabled: bool) -> TestApp {
    let transactions = Arc::new(MemoryTransactionStore::new());
    let orders = Arc::new(MemoryOrderStore::new());
    let gateway = Arc::new(gateway);

    let mut state = AppState::new(transactions.clone(), orders.clone(), Arc::new(LogNotifier));
    if mpesa_enabled {
        state = state.with_mpesa(gateway.clone(), "LT");
    }

    TestApp {
        router: build_router(state),
        gateway,
        transactions,
        orders,
    }
}

impl TestApp {
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send_request(builder.body(body).expect("request")).await
    }

    pub async fn send_raw(&self, uri: &str, raw: &'static str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(raw))
            .expect("request");
        self.send_request(request).await
    }

    async fn send_request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

pub fn success_callback(checkout_request_id: &str, amount: i64, receipt: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": amount },
                        { "Name": "MpesaReceiptNumber", "Value": receipt },
                        { "Name": "Balance" },
                        { "Name": "TransactionDate", "Value": 20241219102115u64 },
                        { "Name": "PhoneNumber", "Value": 254712345678u64 }
                    ]
                }
            }
        }
    })
}

pub fn cancelled_callback(checkout_request_id: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 1,
                "ResultDesc": "cancelled by user"
            }
        }
    })
}
