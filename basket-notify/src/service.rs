use basket_core::{BasketError, BasketResult, EntityType, IdentityAllocator};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing;

use crate::schedule::NotificationSettings;
use crate::sender::{Reminder, ReminderSender};
use crate::store::{NotificationStore, ScheduleBasis, UserSchedule};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub queued: usize,
    pub already_queued: usize,
    pub scheduled: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Sent, but settings changed before the delivery could be recorded.
    pub superseded: usize,
}

#[derive(Debug, Default)]
struct SweepStep {
    scheduled: bool,
    queued: Option<bool>,
}

enum Delivery {
    Recorded(Option<DateTime<Utc>>),
    Superseded,
}

pub struct NotificationScheduler {
    store: Arc<dyn NotificationStore>,
    ids: Arc<IdentityAllocator>,
}

impl NotificationScheduler {
    pub fn new(store: Arc<dyn NotificationStore>, ids: Arc<IdentityAllocator>) -> Self {
        Self { store, ids }
    }

    pub fn evaluate_due(&self, user: &UserSchedule, now: DateTime<Utc>) -> bool {
        user.state.evaluate_due(now)
    }

    /// Queues the user for delivery if still due at `now`. `false` means another
    /// sweep got there first or the user no longer qualifies.
    pub async fn mark_pending(&self, user_id: i64, now: DateTime<Utc>) -> BasketResult<bool> {
        self.store.mark_pending(user_id, now).await
    }

    /// Records a successful delivery and returns the next reminder time. A user
    /// who is no longer pending or whose settings changed mid-send is left
    /// untouched and `None` comes back.
    pub async fn mark_sent(&self, user_id: i64, sent_at: DateTime<Utc>) -> BasketResult<Option<DateTime<Utc>>> {
        match self.record_delivery(user_id, sent_at).await? {
            Delivery::Recorded(next) => Ok(next),
            Delivery::Superseded => Ok(None),
        }
    }

    async fn record_delivery(&self, user_id: i64, sent_at: DateTime<Utc>) -> BasketResult<Delivery> {
        let mut user = self
            .store
            .load(user_id)
            .await?
            .ok_or_else(|| BasketError::not_found(EntityType::User, user_id))?;

        let basis = ScheduleBasis::of(&user.state);
        user.state.record_sent(sent_at)?;
        let next = user.state.next_scheduled_at;

        if !self.store.complete_delivery(user_id, basis, sent_at, next).await? {
            tracing::debug!("User {} no longer pending, delivery not recorded", user.external_id);
            return Ok(Delivery::Superseded);
        }
        Ok(Delivery::Recorded(next))
    }

    /// Boundary entry point for settings changes.
    pub async fn update_settings(
        &self,
        external_user_id: &str,
        settings: NotificationSettings,
        now: DateTime<Utc>,
    ) -> BasketResult<Option<DateTime<Utc>>> {
        let user_id = self.ids.resolve_str(EntityType::User, external_user_id).await?;
        let mut user = self
            .store
            .load(user_id)
            .await?
            .ok_or_else(|| BasketError::not_found(EntityType::User, external_user_id))?;

        if user.state.pending_notification {
            tracing::info!("Discarding queued reminder for {} after settings change", user.external_id);
        }
        user.state.apply_settings(&settings, now)?;
        if !self.store.write_settings(user_id, &user.state).await? {
            return Err(BasketError::not_found(EntityType::User, external_user_id));
        }

        Ok(user.state.next_scheduled_at)
    }

    /// One pass over users whose reminder may be due.
    pub async fn sweep(&self, now: DateTime<Utc>, batch_size: i64) -> BasketResult<SweepReport> {
        let candidates = self.store.due_candidates(now, batch_size).await?;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for user in candidates {
            match self.sweep_user(user, now).await {
                Ok(step) => {
                    report.scheduled += usize::from(step.scheduled);
                    match step.queued {
                        Some(true) => report.queued += 1,
                        Some(false) => report.already_queued += 1,
                        None => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("Sweep skipped a user: {}", e);
                }
            }
        }

        Ok(report)
    }

    async fn sweep_user(&self, mut user: UserSchedule, now: DateTime<Utc>) -> BasketResult<SweepStep> {
        let mut step = SweepStep::default();

        if user.state.next_scheduled_at.is_none() {
            // enabled but never scheduled, e.g. imported with settings only
            let Some(next) = user.state.compute_next(now)? else {
                return Ok(step);
            };
            let basis = ScheduleBasis::of(&user.state);
            if !self.store.backfill_schedule(user.user_id, basis, next).await? {
                tracing::debug!("Schedule for {} changed during sweep", user.external_id);
                return Ok(step);
            }
            user.state.next_scheduled_at = Some(next);
            step.scheduled = true;
        }

        if self.evaluate_due(&user, now) {
            let flipped = self.mark_pending(user.user_id, now).await?;
            if flipped {
                tracing::debug!("Queued reminder for {}", user.external_id);
            }
            step.queued = Some(flipped);
        }

        Ok(step)
    }

    /// Claims pending users and hands them to the sender, so concurrent
    /// dispatchers never send the same reminder twice. Failures release the
    /// claim and stay pending without advancing the schedule. A claim left by
    /// a crashed dispatcher lapses after `claim_timeout`.
    pub async fn dispatch(
        &self,
        sender: &dyn ReminderSender,
        batch_size: i64,
        claim_timeout: Duration,
    ) -> BasketResult<DispatchReport> {
        let now = Utc::now();
        let claimed = self
            .store
            .claim_pending(now, now - claim_timeout, batch_size)
            .await?;
        let mut report = DispatchReport::default();

        for user in claimed {
            report.attempted += 1;
            let reminder = Reminder {
                user_id: user.external_id,
                email: user.email.clone(),
                via_email: user.state.notify_via_email,
                scheduled_for: user.state.next_scheduled_at,
            };

            match sender.send(&reminder).await {
                Ok(()) => match self.record_delivery(user.user_id, Utc::now()).await {
                    Ok(Delivery::Recorded(_)) => report.sent += 1,
                    Ok(Delivery::Superseded) => report.superseded += 1,
                    Err(e) => {
                        tracing::error!("Reminder sent to {} but not recorded: {}", user.external_id, e);
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!("Reminder delivery failed for {}: {}", user.external_id, e);
                    if let Err(e) = self.store.release_claim(user.user_id).await {
                        tracing::warn!("Could not release claim on {}: {}", user.external_id, e);
                    }
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
