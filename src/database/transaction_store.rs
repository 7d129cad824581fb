use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{self, doc, Document},
    options::ReturnDocument,
    Collection, Database,
};

use crate::database::{TransactionStore, TRANSACTIONS_COLLECTION};
use crate::errors::{is_duplicate_key, AppError, Result};
use crate::models::mpesa_transactions::{
    MpesaTransaction, TerminalUpdate, TransactionStats, TransactionStatus,
};

#[derive(Clone)]
pub struct MongoTransactionStore {
    db: Database,
    collection: Collection<MpesaTransaction>,
}

impl MongoTransactionStore {
    pub fn new(db: Database) -> Self {
        let collection = db.collection(TRANSACTIONS_COLLECTION);
        MongoTransactionStore { db, collection }
    }
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn insert_pending(&self, transaction: &MpesaTransaction) -> Result<()> {
        match self.collection.insert_one(transaction).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(AppError::DuplicateKey),
            Err(e) => Err(AppError::persistence(format!(
                "insert of transaction {} failed: {}",
                transaction.checkout_request_id, e
            ))),
        }
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransaction>> {
        let found = self
            .collection
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?;
        Ok(found)
    }

    async fn reference_exists(&self, account_reference: &str) -> Result<bool> {
        let count = self
            .collection
            .count_documents(doc! { "account_reference": account_reference })
            .await?;
        Ok(count > 0)
    }

    async fn complete_pending(
        &self,
        checkout_request_id: &str,
        update: &TerminalUpdate,
    ) -> Result<Option<MpesaTransaction>> {
        // The status predicate makes this a compare-and-swap: of two concurrent
        // callbacks only one matches a pending row.
        let filter = doc! {
            "checkout_request_id": checkout_request_id,
            "status": TransactionStatus::Pending.as_str(),
        };
        let update_doc = doc! { "$set": bson::to_document(update)? };

        self.collection
            .find_one_and_update(filter, update_doc)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| {
                AppError::persistence(format!(
                    "terminal update of {} failed: {}",
                    checkout_request_id, e
                ))
            })
    }

    async fn list(
        &self,
        status: Option<TransactionStatus>,
        limit: i64,
    ) -> Result<Vec<MpesaTransaction>> {
        let mut filter = Document::new();
        if let Some(status) = status {
            filter.insert("status", status.as_str());
        }

        let cursor = self
            .collection
            .find(filter)
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .await?;
        let transactions: Vec<MpesaTransaction> = cursor.try_collect().await?;
        Ok(transactions)
    }

    async fn stats(&self) -> Result<TransactionStats> {
        let cursor = self.collection.find(doc! {}).await?;
        let transactions: Vec<MpesaTransaction> = cursor.try_collect().await?;
        Ok(TransactionStats::tally(&transactions))
    }

    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
