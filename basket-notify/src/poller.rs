use anyhow::Result;
use basket_core::BasketContext;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing;

use crate::sender::ReminderSender;
use crate::service::NotificationScheduler;
use crate::store::PgNotificationStore;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

fn scheduler(ctx: &BasketContext) -> NotificationScheduler {
    let store = Arc::new(PgNotificationStore::new(ctx.db_pool.clone()));
    NotificationScheduler::new(store, ctx.ids.clone())
}

/// Periodically queues users whose reminder time has come. Safe to run on
/// several nodes at once.
pub async fn run_sweep(ctx: BasketContext) -> Result<()> {
    let interval = Duration::from_secs(ctx.config.scheduler.sweep_interval_secs);
    let batch_size = ctx.config.scheduler.batch_size;
    let scheduler = scheduler(&ctx);

    tracing::info!("Starting notification sweep every {:?}", interval);

    loop {
        match scheduler.sweep(Utc::now(), batch_size).await {
            Ok(report) => {
                if report.examined > 0 {
                    tracing::debug!(
                        examined = report.examined,
                        queued = report.queued,
                        already_queued = report.already_queued,
                        scheduled = report.scheduled,
                        "Sweep finished"
                    );
                }
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                tracing::error!("Error in notification sweep: {}", e);
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

/// Periodically delivers queued reminders through `sender`.
pub async fn run_dispatch(ctx: BasketContext, sender: Arc<dyn ReminderSender>) -> Result<()> {
    let interval = Duration::from_secs(ctx.config.scheduler.dispatch_interval_secs);
    let batch_size = ctx.config.scheduler.batch_size;
    let claim_timeout =
        chrono::Duration::from_std(Duration::from_secs(ctx.config.scheduler.claim_timeout_secs))?;
    let scheduler = scheduler(&ctx);

    tracing::info!("Starting reminder dispatch every {:?}", interval);

    loop {
        match scheduler.dispatch(sender.as_ref(), batch_size, claim_timeout).await {
            Ok(report) => {
                if report.attempted > 0 {
                    tracing::info!(
                        "Dispatched {} reminders ({} failed, {} superseded)",
                        report.sent,
                        report.failed,
                        report.superseded
                    );
                }
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                tracing::error!("Error in reminder dispatch: {}", e);
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}
