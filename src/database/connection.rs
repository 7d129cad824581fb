use mongodb::{
    bson::doc,
    options::IndexOptions,
    Client, Database, IndexModel,
};
use tracing::{info, warn};

use crate::database::{ORDERS_COLLECTION, TRANSACTIONS_COLLECTION};
use crate::errors::Result;

pub async fn get_db_client(database_url: &str, db_name: &str) -> Result<Database> {
    let client = Client::with_uri_str(database_url).await?;
    let db = client.database(db_name);

    match db.list_collection_names().await {
        Ok(collections) => {
            info!("✅ Connected to database: {}", db_name);
            info!("📂 Collections found: {:?}", collections);
            if !collections.iter().any(|c| c == TRANSACTIONS_COLLECTION) {
                warn!("'{}' collection not found, it will be created", TRANSACTIONS_COLLECTION);
            }
        }
        Err(e) => {
            warn!("Database '{}' may not exist or is inaccessible: {}", db_name, e);
        }
    }

    ensure_indexes(&db).await?;
    Ok(db)
}

/// Unique indexes the payment flow relies on for exactly-once semantics.
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let transactions = db.collection::<mongodb::bson::Document>(TRANSACTIONS_COLLECTION);
    transactions
        .create_index(unique_index(doc! { "checkout_request_id": 1 }, None))
        .await?;
    transactions
        .create_index(unique_index(doc! { "account_reference": 1 }, None))
        .await?;
    transactions
        .create_index(IndexModel::builder().keys(doc! { "status": 1, "created_at": -1 }).build())
        .await?;

    let orders = db.collection::<mongodb::bson::Document>(ORDERS_COLLECTION);
    orders
        .create_index(unique_index(doc! { "order_number": 1 }, None))
        .await?;
    // Only M-Pesa orders carry these; pay-on-delivery orders store null.
    orders
        .create_index(unique_index(
            doc! { "checkout_request_id": 1 },
            Some(doc! { "checkout_request_id": { "$type": "string" } }),
        ))
        .await?;
    orders
        .create_index(unique_index(
            doc! { "mpesa_receipt_number": 1 },
            Some(doc! { "mpesa_receipt_number": { "$type": "string" } }),
        ))
        .await?;

    info!("✅ Payment indexes ensured");
    Ok(())
}

fn unique_index(keys: mongodb::bson::Document, partial: Option<mongodb::bson::Document>) -> IndexModel {
    let options = IndexOptions::builder()
        .unique(true)
        .partial_filter_expression(partial)
        .build();
    IndexModel::builder().keys(keys).options(options).build()
}
