#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use basket_core::config::IdAllocationConfig;
use basket_core::identity::{IdentityStore, ObservedRange};
use basket_core::{BasketResult, EntityType, IdentityAllocator};
use basket_notify::{
    NotificationScheduler, NotificationState, NotificationStore, Reminder, ReminderSender, ScheduleBasis,
    UserSchedule,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Users table held in memory. Guarded updates check and write under one lock.
#[derive(Default)]
pub struct MemoryUsers {
    users: Mutex<BTreeMap<i64, UserSchedule>>,
    next_id: AtomicI64,
}

impl MemoryUsers {
    pub fn add(&self, state: NotificationState) -> (i64, Uuid) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let external_id = Uuid::new_v4();
        self.users.lock().unwrap().insert(
            id,
            UserSchedule {
                user_id: id,
                external_id,
                email: format!("user{}@example.com", id),
                state,
                claimed_at: None,
            },
        );
        (id, external_id)
    }

    pub fn state(&self, id: i64) -> NotificationState {
        self.users.lock().unwrap()[&id].state
    }

    pub fn claimed_at(&self, id: i64) -> Option<DateTime<Utc>> {
        self.users.lock().unwrap()[&id].claimed_at
    }
}

#[async_trait]
impl NotificationStore for MemoryUsers {
    async fn load(&self, user_id: i64) -> BasketResult<Option<UserSchedule>> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn due_candidates(&self, now: DateTime<Utc>, limit: i64) -> BasketResult<Vec<UserSchedule>> {
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .filter(|u| u.state.is_enabled() && !u.state.pending_notification)
            .filter(|u| u.state.next_scheduled_at.map_or(true, |next| next <= now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn backfill_schedule(
        &self,
        user_id: i64,
        basis: ScheduleBasis,
        next_scheduled_at: DateTime<Utc>,
    ) -> BasketResult<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user_id) {
            Some(user)
                if user.state.next_scheduled_at.is_none()
                    && !user.state.pending_notification
                    && basis.matches(&user.state) =>
            {
                user.state.next_scheduled_at = Some(next_scheduled_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_pending(&self, user_id: i64, now: DateTime<Utc>) -> BasketResult<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user_id) {
            Some(user)
                if !user.state.pending_notification
                    && user.state.is_enabled()
                    && user.state.next_scheduled_at.map_or(false, |next| next <= now) =>
            {
                user.state.pending_notification = true;
                user.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_pending(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> BasketResult<Vec<UserSchedule>> {
        let mut users = self.users.lock().unwrap();
        Ok(users
            .values_mut()
            .filter(|u| u.state.pending_notification)
            .filter(|u| u.claimed_at.map_or(true, |at| at < stale_before))
            .take(limit as usize)
            .map(|u| {
                u.claimed_at = Some(now);
                u.clone()
            })
            .collect())
    }

    async fn release_claim(&self, user_id: i64) -> BasketResult<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.claimed_at = None;
        }
        Ok(())
    }

    async fn complete_delivery(
        &self,
        user_id: i64,
        basis: ScheduleBasis,
        sent_at: DateTime<Utc>,
        next_scheduled_at: Option<DateTime<Utc>>,
    ) -> BasketResult<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user_id) {
            Some(user) if user.state.pending_notification && basis.matches(&user.state) => {
                user.state.pending_notification = false;
                user.state.last_notification_sent_at = Some(sent_at);
                user.state.next_scheduled_at = next_scheduled_at;
                user.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn write_settings(&self, user_id: i64, state: &NotificationState) -> BasketResult<bool> {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.state.days_between_notifications = state.days_between_notifications;
        user.state.notifications_start_at = state.notifications_start_at;
        user.state.notify_via_email = state.notify_via_email;
        user.state.next_scheduled_at = state.next_scheduled_at;
        user.state.pending_notification = false;
        user.claimed_at = None;
        Ok(true)
    }
}

/// Serves sweep candidates from a snapshot taken at `freeze`, the way a slow
/// reader sees rows that other workers have since changed. Writes go through.
pub struct FrozenCandidates {
    pub inner: Arc<MemoryUsers>,
    snapshot: Mutex<Vec<UserSchedule>>,
}

impl FrozenCandidates {
    pub fn new(inner: Arc<MemoryUsers>) -> Self {
        Self {
            inner,
            snapshot: Mutex::new(Vec::new()),
        }
    }

    pub async fn freeze(&self, now: DateTime<Utc>) {
        let rows = self.inner.due_candidates(now, i64::MAX).await.unwrap();
        *self.snapshot.lock().unwrap() = rows;
    }
}

#[async_trait]
impl NotificationStore for FrozenCandidates {
    async fn load(&self, user_id: i64) -> BasketResult<Option<UserSchedule>> {
        self.inner.load(user_id).await
    }

    async fn due_candidates(&self, _now: DateTime<Utc>, limit: i64) -> BasketResult<Vec<UserSchedule>> {
        let rows = self.snapshot.lock().unwrap();
        Ok(rows.iter().take(limit as usize).cloned().collect())
    }

    async fn backfill_schedule(
        &self,
        user_id: i64,
        basis: ScheduleBasis,
        next_scheduled_at: DateTime<Utc>,
    ) -> BasketResult<bool> {
        self.inner.backfill_schedule(user_id, basis, next_scheduled_at).await
    }

    async fn mark_pending(&self, user_id: i64, now: DateTime<Utc>) -> BasketResult<bool> {
        self.inner.mark_pending(user_id, now).await
    }

    async fn claim_pending(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> BasketResult<Vec<UserSchedule>> {
        self.inner.claim_pending(now, stale_before, limit).await
    }

    async fn release_claim(&self, user_id: i64) -> BasketResult<()> {
        self.inner.release_claim(user_id).await
    }

    async fn complete_delivery(
        &self,
        user_id: i64,
        basis: ScheduleBasis,
        sent_at: DateTime<Utc>,
        next_scheduled_at: Option<DateTime<Utc>>,
    ) -> BasketResult<bool> {
        self.inner
            .complete_delivery(user_id, basis, sent_at, next_scheduled_at)
            .await
    }

    async fn write_settings(&self, user_id: i64, state: &NotificationState) -> BasketResult<bool> {
        self.inner.write_settings(user_id, state).await
    }
}

#[async_trait]
impl IdentityStore for MemoryUsers {
    async fn external_id_exists(&self, entity: EntityType, external_id: Uuid) -> BasketResult<bool> {
        Ok(self.lookup_internal(entity, external_id).await?.is_some())
    }

    async fn lookup_internal(&self, entity: EntityType, external_id: Uuid) -> BasketResult<Option<i64>> {
        if entity != EntityType::User {
            return Ok(None);
        }
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .find(|u| u.external_id == external_id)
            .map(|u| u.user_id))
    }

    async fn observe_range(&self, _entity: EntityType) -> BasketResult<ObservedRange> {
        Ok(ObservedRange::default())
    }
}

/// Collects reminders, or fails every send while `fail` is set. A non-zero
/// `delay` keeps each send in flight long enough for another task to run.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<Reminder>>,
    pub fail: AtomicBool,
    pub delay: Duration,
}

#[async_trait]
impl ReminderSender for RecordingSender {
    async fn send(&self, reminder: &Reminder) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("mail relay unavailable"));
        }
        self.sent.lock().unwrap().push(reminder.clone());
        Ok(())
    }
}

pub fn scheduler() -> (Arc<MemoryUsers>, Arc<NotificationScheduler>) {
    let store = Arc::new(MemoryUsers::default());
    let scheduler = Arc::new(scheduler_over(store.clone(), store.clone()));
    (store, scheduler)
}

/// Scheduler whose reads and writes go through `store`, resolving ids from `users`.
pub fn scheduler_over(store: Arc<dyn NotificationStore>, users: Arc<MemoryUsers>) -> NotificationScheduler {
    let config = IdAllocationConfig {
        user_start: 1_000,
        order_start: 50_000,
        cart_start: 50_000,
    };
    let ids = Arc::new(
        IdentityAllocator::new(config, |_| ObservedRange::default(), users).unwrap(),
    );
    NotificationScheduler::new(store, ids)
}

pub fn enabled(days: i32, anchor: DateTime<Utc>, next: Option<DateTime<Utc>>) -> NotificationState {
    NotificationState {
        days_between_notifications: Some(days),
        notifications_start_at: Some(anchor),
        next_scheduled_at: next,
        notify_via_email: true,
        ..Default::default()
    }
}
