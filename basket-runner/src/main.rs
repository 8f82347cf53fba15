use anyhow::Result;
use basket_api::run as run_api;
use basket_core::{BasketContext, Config};
use basket_notify::{run_dispatch, run_sweep, LogSender};
use std::sync::Arc;
use tokio;
use tracing;
use tracing_subscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting Basket order service");

    let config = Config::from_env();
    let ctx = BasketContext::new(config).await?;

    tracing::info!("Basket context initialized");

    let ctx_clone = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_sweep(ctx_clone).await {
            tracing::error!("Notification sweep error: {}", e);
        }
    });

    let ctx_clone = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_dispatch(ctx_clone, Arc::new(LogSender)).await {
            tracing::error!("Reminder dispatch error: {}", e);
        }
    });

    tracing::info!("Starting API server");
    run_api(ctx).await?;

    Ok(())
}
