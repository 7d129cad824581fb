use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use storefront_api::build_router;
use storefront_api::config::{AppConfig, StorageBackend};
use storefront_api::database::connection::get_db_client;
use storefront_api::database::memory::{MemoryOrderStore, MemoryTransactionStore};
use storefront_api::database::order_store::MongoOrderStore;
use storefront_api::database::transaction_store::MongoTransactionStore;
use storefront_api::database::{OrderStore, TransactionStore};
use storefront_api::services::email_service::{LogNotifier, OrderNotifier, ResendNotifier};
use storefront_api::services::mpesa_service::MpesaService;
use storefront_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    tracing::info!("⚙️ Configuration: {}", config.get_config_info());

    let app_state = initialize_app_state(&config).await?;
    let app = build_router(app_state);

    start_server(app, &config).await
}

async fn initialize_app_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let (transactions, orders): (Arc<dyn TransactionStore>, Arc<dyn OrderStore>) =
        match &config.storage {
            StorageBackend::Mongo { url, database } => {
                let db = get_db_client(url, database)
                    .await
                    .context("failed to connect to MongoDB")?;
                (
                    Arc::new(MongoTransactionStore::new(db.clone())),
                    Arc::new(MongoOrderStore::new(&db)),
                )
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage, data is lost on restart");
                (
                    Arc::new(MemoryTransactionStore::new()),
                    Arc::new(MemoryOrderStore::new()),
                )
            }
        };

    let notifier: Arc<dyn OrderNotifier> = match &config.email {
        Some(email) => {
            tracing::info!("📧 Order emails go to {:?}", email.to);
            Arc::new(ResendNotifier::new(email.clone()))
        }
        None => {
            tracing::warn!("RESEND_API_KEY not set, order emails will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let mut app_state = AppState::new(transactions, orders, notifier);

    tracing::info!("🔧 Attempting to initialize M-Pesa service...");
    match &config.mpesa {
        Some(mpesa_config) => {
            tracing::info!("📱 Short code: {}", mpesa_config.short_code);
            tracing::info!("🌐 Environment: {}", mpesa_config.environment.as_str());

            let mpesa_service = Arc::new(
                MpesaService::new(mpesa_config.clone())
                    .context("failed to build M-Pesa client")?,
            );

            // Tokens are fetched lazily per push, so a failure here is only a warning.
            match mpesa_service.get_access_token().await {
                Ok(_) => tracing::info!("✅ M-Pesa access token obtained"),
                Err(e) => tracing::warn!("⚠️ M-Pesa credentials could not be verified: {}", e),
            }

            app_state = app_state.with_mpesa(mpesa_service, config.account_reference_prefix.clone());
            tracing::info!("✅ M-Pesa service initialized and ready");
        }
        None => {
            tracing::warn!("M-Pesa credentials not set, STK push will be disabled");
        }
    }

    Ok(app_state)
}

async fn start_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;

    tracing::info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
