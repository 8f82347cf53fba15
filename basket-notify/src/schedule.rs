//! Anchor-aligned reminder schedule.
//!
//! Reminders fall on `anchor + k * interval` for integer `k`. The next
//! reminder is always the smallest such instant at or after "now", so a late
//! or skipped sweep never shifts later cycles.

use basket_core::{BasketError, BasketResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_INTERVAL_DAYS: i32 = 1;
pub const MAX_INTERVAL_DAYS: i32 = 365;

const MICROS_PER_DAY: i128 = 86_400 * 1_000_000;

fn micros(delta: Duration) -> i128 {
    i128::from(delta.num_seconds()) * 1_000_000 + i128::from(delta.subsec_nanos()) / 1_000
}

/// `anchor + ceil((now - anchor) / interval) * interval`, or `None` if the
/// result is not representable.
pub fn next_scheduled_at(
    anchor: DateTime<Utc>,
    interval_days: i32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if interval_days < MIN_INTERVAL_DAYS {
        return None;
    }
    let interval = i128::from(interval_days) * MICROS_PER_DAY;
    let elapsed = micros(now - anchor);
    let cycles = -((-elapsed).div_euclid(interval));
    let offset = i64::try_from(cycles * interval).ok()?;
    anchor.checked_add_signed(Duration::microseconds(offset))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub days_between_notifications: Option<i32>,
    pub notifications_start_at: Option<DateTime<Utc>>,
    pub notify_via_email: bool,
}

impl NotificationSettings {
    pub fn validate(&self) -> BasketResult<()> {
        if let Some(days) = self.days_between_notifications {
            if !(MIN_INTERVAL_DAYS..=MAX_INTERVAL_DAYS).contains(&days) {
                return Err(BasketError::InvalidSettings(format!(
                    "days_between_notifications must be between {} and {}, got {}",
                    MIN_INTERVAL_DAYS, MAX_INTERVAL_DAYS, days
                )));
            }
        }
        Ok(())
    }
}

/// Per-user scheduling fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NotificationState {
    pub days_between_notifications: Option<i32>,
    pub notifications_start_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub pending_notification: bool,
    pub last_notification_sent_at: Option<DateTime<Utc>>,
    pub notify_via_email: bool,
}

impl NotificationState {
    pub fn is_enabled(&self) -> bool {
        self.days_between_notifications.is_some() && self.notifications_start_at.is_some()
    }

    pub fn evaluate_due(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled()
            && !self.pending_notification
            && self.next_scheduled_at.is_some_and(|next| now >= next)
    }

    /// Schedule computed from the current anchor and interval.
    pub fn compute_next(&self, now: DateTime<Utc>) -> BasketResult<Option<DateTime<Utc>>> {
        match (self.notifications_start_at, self.days_between_notifications) {
            (Some(anchor), Some(days)) => next_scheduled_at(anchor, days, now)
                .map(Some)
                .ok_or_else(|| BasketError::InvalidSettings("schedule out of range".to_string())),
            _ => Ok(None),
        }
    }

    /// Applies a settings update. Any in-flight reminder is discarded and the
    /// schedule is recomputed from `now`.
    pub fn apply_settings(&mut self, settings: &NotificationSettings, now: DateTime<Utc>) -> BasketResult<()> {
        settings.validate()?;

        self.days_between_notifications = settings.days_between_notifications;
        self.notify_via_email = settings.notify_via_email;
        self.pending_notification = false;

        if settings.days_between_notifications.is_some() {
            self.notifications_start_at = settings
                .notifications_start_at
                .or(self.notifications_start_at)
                .or(Some(now));
        } else if settings.notifications_start_at.is_some() {
            self.notifications_start_at = settings.notifications_start_at;
        }

        self.next_scheduled_at = self.compute_next(now)?;
        Ok(())
    }

    /// Records a delivered reminder and advances to the next cycle.
    pub fn record_sent(&mut self, sent_at: DateTime<Utc>) -> BasketResult<()> {
        self.last_notification_sent_at = Some(sent_at);
        self.pending_notification = false;

        let mut next = self.compute_next(sent_at)?;
        if let (Some(at), Some(days)) = (next, self.days_between_notifications) {
            // sent exactly on a boundary: that cycle is the one just delivered
            if at <= sent_at {
                next = at.checked_add_signed(Duration::days(i64::from(days)));
            }
        }
        self.next_scheduled_at = next;
        Ok(())
    }
}
