//! Pays for one product from the terminal, the same way the storefront's
//! payment dialog does: STK push, then poll until M-Pesa answers.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use storefront_api::client::{DialogConfig, DialogState, HttpCheckoutApi, PaymentDialog};

#[derive(Parser)]
#[command(about = "Pay for a product with M-Pesa STK push")]
struct Args {
    /// Customer phone number, e.g. 0712345678
    #[arg(long)]
    phone: String,

    /// Amount in whole shillings
    #[arg(long)]
    amount: i64,

    #[arg(long)]
    product: String,

    /// Storefront API base URL, overrides CHECKOUT_API_URL
    #[arg(long)]
    api_url: Option<String>,

    /// Seconds between status checks, overrides POLL_INTERVAL_SECS
    #[arg(long)]
    interval: Option<u64>,

    /// Status checks before giving up, overrides POLL_MAX_ATTEMPTS
    #[arg(long)]
    max_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = DialogConfig::from_env().context("invalid checkout configuration")?;
    if let Some(url) = args.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(secs) = args.interval {
        config.poll_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(attempts) = args.max_attempts {
        config.max_attempts = attempts.max(1);
    }

    let api = Arc::new(HttpCheckoutApi::new(&config).context("failed to build HTTP client")?);
    let dialog = Arc::new(PaymentDialog::new(api, config, args.product, args.amount));

    let mut updates = dialog.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let view = updates.borrow_and_update().clone();
            if let Some(message) = view.message {
                println!("[{:?}] {}", view.state, message);
            }
        }
    });

    let state = tokio::select! {
        state = dialog.submit(&args.phone) => state,
        _ = tokio::signal::ctrl_c() => {
            dialog.close();
            println!("Stopped waiting. If you approve the prompt on your phone the order is still recorded.");
            DialogState::Processing
        }
    };

    drop(dialog);
    let _ = printer.await;

    match state {
        DialogState::Success => Ok(()),
        DialogState::Failed => anyhow::bail!("payment was not completed"),
        DialogState::Processing | DialogState::Idle => {
            anyhow::bail!("stopped before M-Pesa confirmed the payment")
        }
    }
}
