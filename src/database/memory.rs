use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::database::{OrderStore, TransactionStore};
use crate::errors::{AppError, Result};
use crate::models::mpesa_transactions::{
    MpesaTransaction, TerminalUpdate, TransactionStats, TransactionStatus,
};
use crate::models::order::{Order, OrderStats, OrderStatus};

/// Process-local transaction store. The write lock plays the role of the
/// database's per-document atomicity.
#[derive(Default)]
pub struct MemoryTransactionStore {
    rows: RwLock<HashMap<String, MpesaTransaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn insert_pending(&self, transaction: &MpesaTransaction) -> Result<()> {
        let mut rows = self.rows.write().await;
        let reference_taken = rows
            .values()
            .any(|tx| tx.account_reference == transaction.account_reference);
        if reference_taken || rows.contains_key(&transaction.checkout_request_id) {
            return Err(AppError::DuplicateKey);
        }
        rows.insert(transaction.checkout_request_id.clone(), transaction.clone());
        Ok(())
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransaction>> {
        Ok(self.rows.read().await.get(checkout_request_id).cloned())
    }

    async fn reference_exists(&self, account_reference: &str) -> Result<bool> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .any(|tx| tx.account_reference == account_reference))
    }

    async fn complete_pending(
        &self,
        checkout_request_id: &str,
        update: &TerminalUpdate,
    ) -> Result<Option<MpesaTransaction>> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(checkout_request_id) {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                tx.apply(update);
                Ok(Some(tx.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list(
        &self,
        status: Option<TransactionStatus>,
        limit: i64,
    ) -> Result<Vec<MpesaTransaction>> {
        let rows = self.rows.read().await;
        let mut matching: Vec<MpesaTransaction> = rows
            .values()
            .filter(|tx| status.map_or(true, |s| tx.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn stats(&self) -> Result<TransactionStats> {
        Ok(TransactionStats::tally(self.rows.read().await.values()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<Vec<Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<Option<Order>> {
        let mut orders = self.orders.write().await;
        let duplicate = orders.iter().any(|existing| {
            existing.order_number == order.order_number
                || (order.checkout_request_id.is_some()
                    && existing.checkout_request_id == order.checkout_request_id)
                || (order.mpesa_receipt_number.is_some()
                    && existing.mpesa_receipt_number == order.mpesa_receipt_number)
        });
        if duplicate {
            return Ok(None);
        }
        orders.push(order.clone());
        Ok(Some(order.clone()))
    }

    async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .find(|o| o.checkout_request_id.as_deref() == Some(checkout_request_id))
            .cloned())
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn list(&self, status: Option<OrderStatus>, limit: i64) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders
            .iter()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn update_status(
        &self,
        order_number: &str,
        status: OrderStatus,
        notes: Option<String>,
    ) -> Result<Option<Order>> {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.iter_mut().find(|o| o.order_number == order_number) else {
            return Ok(None);
        };
        order.status = status;
        if notes.is_some() {
            order.notes = notes;
        }
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn stats(&self) -> Result<OrderStats> {
        Ok(OrderStats::tally(self.orders.read().await.iter()))
    }
}
