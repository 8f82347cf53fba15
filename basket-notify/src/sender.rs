use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing;
use uuid::Uuid;

/// A reorder reminder handed to the delivery side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reminder {
    pub user_id: Uuid,
    pub email: String,
    pub via_email: bool,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Delivery collaborator. An `Err` leaves the user pending for the next pass.
#[async_trait]
pub trait ReminderSender: Send + Sync {
    async fn send(&self, reminder: &Reminder) -> Result<()>;
}

/// Writes reminders to the log instead of delivering them.
pub struct LogSender;

#[async_trait]
impl ReminderSender for LogSender {
    async fn send(&self, reminder: &Reminder) -> Result<()> {
        tracing::info!(
            user = %reminder.user_id,
            via_email = reminder.via_email,
            scheduled_for = ?reminder.scheduled_for,
            "Reorder reminder due"
        );
        Ok(())
    }
}
