//! Persistence seams for payment attempts and orders.
//!
//! Handlers and services only see the traits below. `transaction_store` and
//! `order_store` back them with MongoDB collections; `memory` keeps everything
//! in process for local runs and tests.
use async_trait::async_trait;

use crate::errors::Result;
use crate::models::mpesa_transactions::{
    MpesaTransaction, TerminalUpdate, TransactionStats, TransactionStatus,
};
use crate::models::order::{Order, OrderStats, OrderStatus};

pub mod connection;
pub mod memory;
pub mod order_store;
pub mod transaction_store;

pub const TRANSACTIONS_COLLECTION: &str = "mpesa_transactions";
pub const ORDERS_COLLECTION: &str = "orders";

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Records a provider-accepted push request. Fails with
    /// `AppError::DuplicateKey` if the checkout id or account reference exists.
    async fn insert_pending(&self, transaction: &MpesaTransaction) -> Result<()>;

    async fn find_by_checkout_id(&self, checkout_request_id: &str)
        -> Result<Option<MpesaTransaction>>;

    async fn reference_exists(&self, account_reference: &str) -> Result<bool>;

    /// Moves a transaction out of `pending` in one conditional write.
    ///
    /// Returns the updated row only to the caller whose write performed the
    /// transition. `None` means the row is missing or was already terminal.
    async fn complete_pending(
        &self,
        checkout_request_id: &str,
        update: &TerminalUpdate,
    ) -> Result<Option<MpesaTransaction>>;

    async fn list(
        &self,
        status: Option<TransactionStatus>,
        limit: i64,
    ) -> Result<Vec<MpesaTransaction>>;

    async fn stats(&self) -> Result<TransactionStats>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts an order. Returns `Ok(None)` when an order already exists for
    /// the same checkout request or receipt, so a replayed callback cannot
    /// create a second one.
    async fn insert(&self, order: &Order) -> Result<Option<Order>>;

    async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<Order>>;

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>>;

    async fn list(&self, status: Option<OrderStatus>, limit: i64) -> Result<Vec<Order>>;

    async fn update_status(
        &self,
        order_number: &str,
        status: OrderStatus,
        notes: Option<String>,
    ) -> Result<Option<Order>>;

    async fn stats(&self) -> Result<OrderStats>;
}
