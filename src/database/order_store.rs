use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{self, doc, Document},
    options::ReturnDocument,
    Collection,
};
use tracing::info;

use crate::database::{OrderStore, ORDERS_COLLECTION};
use crate::errors::{is_duplicate_key, AppError, Result};
use crate::models::order::{Order, OrderStats, OrderStatus};

#[derive(Clone)]
pub struct MongoOrderStore {
    collection: Collection<Order>,
}

impl MongoOrderStore {
    pub fn new(db: &mongodb::Database) -> Self {
        MongoOrderStore {
            collection: db.collection(ORDERS_COLLECTION),
        }
    }
}

#[async_trait]
impl OrderStore for MongoOrderStore {
    async fn insert(&self, order: &Order) -> Result<Option<Order>> {
        match self.collection.insert_one(order).await {
            Ok(_) => Ok(Some(order.clone())),
            Err(e) if is_duplicate_key(&e) => {
                info!(
                    "Order for checkout {:?} already exists, skipping insert",
                    order.checkout_request_id
                );
                Ok(None)
            }
            Err(e) => Err(AppError::persistence(format!(
                "insert of order {} failed: {}",
                order.order_number, e
            ))),
        }
    }

    async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<Order>> {
        Ok(self
            .collection
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?)
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .collection
            .find_one(doc! { "order_number": order_number })
            .await?)
    }

    async fn list(&self, status: Option<OrderStatus>, limit: i64) -> Result<Vec<Order>> {
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
        let orders: Vec<Order> = cursor.try_collect().await?;
        Ok(orders)
    }

    async fn update_status(
        &self,
        order_number: &str,
        status: OrderStatus,
        notes: Option<String>,
    ) -> Result<Option<Order>> {
        let mut set = doc! {
            "status": status.as_str(),
            "updated_at": bson::to_bson(&Utc::now())?,
        };
        if let Some(notes) = notes {
            set.insert("notes", notes);
        }

        let updated = self
            .collection
            .find_one_and_update(doc! { "order_number": order_number }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?;
        Ok(updated)
    }

    async fn stats(&self) -> Result<OrderStats> {
        let cursor = self.collection.find(doc! {}).await?;
        let orders: Vec<Order> = cursor.try_collect().await?;
        Ok(OrderStats::tally(&orders))
    }
}
