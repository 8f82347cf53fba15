use async_trait::async_trait;
use basket_core::schema::users;
use basket_core::types::UserRow;
use basket_core::{BasketError, BasketResult, DbPool};
use chrono::{DateTime, Utc};
use diesel::PgExpressionMethods;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use std::sync::Arc;
use uuid::Uuid;

use crate::schedule::NotificationState;

#[derive(Debug, Clone, PartialEq)]
pub struct UserSchedule {
    pub user_id: i64,
    pub external_id: Uuid,
    pub email: String,
    pub state: NotificationState,
    /// Set while a dispatcher holds the queued reminder.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for UserSchedule {
    fn from(row: UserRow) -> Self {
        UserSchedule {
            user_id: row.id,
            external_id: row.external_id,
            email: row.email,
            state: NotificationState {
                days_between_notifications: row.days_between_notifications,
                notifications_start_at: row.notifications_start_at,
                next_scheduled_at: row.next_scheduled_at,
                pending_notification: row.pending_notification,
                last_notification_sent_at: row.last_notification_sent_at,
                notify_via_email: row.notify_via_email,
            },
            claimed_at: row.notification_claimed_at,
        }
    }
}

/// Interval and anchor a computed schedule was derived from. Writes carrying
/// a basis only land while the row still has the same settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleBasis {
    pub days_between_notifications: Option<i32>,
    pub notifications_start_at: Option<DateTime<Utc>>,
}

impl ScheduleBasis {
    pub fn of(state: &NotificationState) -> Self {
        Self {
            days_between_notifications: state.days_between_notifications,
            notifications_start_at: state.notifications_start_at,
        }
    }

    pub fn matches(&self, state: &NotificationState) -> bool {
        *self == Self::of(state)
    }
}

/// Every write is a single guarded statement against the current row, so a
/// caller holding an old snapshot can lose a race but never undo a newer write.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn load(&self, user_id: i64) -> BasketResult<Option<UserSchedule>>;

    /// Enabled, not pending, and either unscheduled or scheduled at or before `now`.
    async fn due_candidates(&self, now: DateTime<Utc>, limit: i64) -> BasketResult<Vec<UserSchedule>>;

    /// Fills in `next_scheduled_at` for an enabled user that has none. Returns
    /// false if the row was scheduled, queued, or reconfigured meanwhile.
    async fn backfill_schedule(
        &self,
        user_id: i64,
        basis: ScheduleBasis,
        next_scheduled_at: DateTime<Utc>,
    ) -> BasketResult<bool>;

    /// Sets `pending_notification` only if the row is enabled, not pending and
    /// due at `now`. Returns whether this call flipped it.
    async fn mark_pending(&self, user_id: i64, now: DateTime<Utc>) -> BasketResult<bool>;

    /// Claims up to `limit` pending users nobody holds, or whose claim is older
    /// than `stale_before`. A claimed user is not handed to another dispatcher.
    async fn claim_pending(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> BasketResult<Vec<UserSchedule>>;

    /// Gives a claimed user back after a failed send.
    async fn release_claim(&self, user_id: i64) -> BasketResult<()>;

    /// Records a delivery only if the user is still pending under `basis`.
    async fn complete_delivery(
        &self,
        user_id: i64,
        basis: ScheduleBasis,
        sent_at: DateTime<Utc>,
        next_scheduled_at: Option<DateTime<Utc>>,
    ) -> BasketResult<bool>;

    /// Writes the settings fields and the schedule derived from them, drops any
    /// queued reminder. Delivery history is left alone.
    async fn write_settings(&self, user_id: i64, state: &NotificationState) -> BasketResult<bool>;
}

pub struct PgNotificationStore {
    pool: Arc<DbPool>,
}

impl PgNotificationStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn load(&self, user_id: i64) -> BasketResult<Option<UserSchedule>> {
        let mut conn = self.pool.get().await?;

        let row: Option<UserRow> = users::table
            .find(user_id)
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(row.map(UserSchedule::from))
    }

    async fn due_candidates(&self, now: DateTime<Utc>, limit: i64) -> BasketResult<Vec<UserSchedule>> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<UserRow> = users::table
            .filter(users::days_between_notifications.is_not_null())
            .filter(users::notifications_start_at.is_not_null())
            .filter(users::pending_notification.eq(false))
            .filter(
                users::next_scheduled_at
                    .is_null()
                    .or(users::next_scheduled_at.le(now)),
            )
            .order(users::id.asc())
            .limit(limit)
            .select(UserRow::as_select())
            .load(&mut conn)
            .await?;

        Ok(rows.into_iter().map(UserSchedule::from).collect())
    }

    async fn backfill_schedule(
        &self,
        user_id: i64,
        basis: ScheduleBasis,
        next_scheduled_at: DateTime<Utc>,
    ) -> BasketResult<bool> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            users::table
                .filter(users::id.eq(user_id))
                .filter(users::next_scheduled_at.is_null())
                .filter(users::pending_notification.eq(false))
                .filter(users::days_between_notifications.is_not_distinct_from(basis.days_between_notifications))
                .filter(users::notifications_start_at.is_not_distinct_from(basis.notifications_start_at)),
        )
        .set((
            users::next_scheduled_at.eq(Some(next_scheduled_at)),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated == 1)
    }

    async fn mark_pending(&self, user_id: i64, now: DateTime<Utc>) -> BasketResult<bool> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            users::table
                .filter(users::id.eq(user_id))
                .filter(users::pending_notification.eq(false))
                .filter(users::days_between_notifications.is_not_null())
                .filter(users::notifications_start_at.is_not_null())
                .filter(users::next_scheduled_at.le(now)),
        )
        .set((
            users::pending_notification.eq(true),
            users::notification_claimed_at.eq(None::<DateTime<Utc>>),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated == 1)
    }

    async fn claim_pending(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> BasketResult<Vec<UserSchedule>> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let rows = conn
            .transaction::<_, BasketError, _>(|conn| {
                async move {
                    let ids: Vec<i64> = users::table
                        .filter(users::pending_notification.eq(true))
                        .filter(
                            users::notification_claimed_at
                                .is_null()
                                .or(users::notification_claimed_at.lt(stale_before)),
                        )
                        .order(users::id.asc())
                        .limit(limit)
                        .select(users::id)
                        .for_update()
                        .skip_locked()
                        .load(conn)
                        .await?;

                    if ids.is_empty() {
                        return Ok(Vec::new());
                    }

                    let rows: Vec<UserRow> = diesel::update(users::table.filter(users::id.eq_any(ids)))
                        .set(users::notification_claimed_at.eq(Some(now)))
                        .returning(UserRow::as_returning())
                        .get_results(conn)
                        .await?;

                    Ok(rows)
                }
                .scope_boxed()
            })
            .await?;

        let mut claimed: Vec<UserSchedule> = rows.into_iter().map(UserSchedule::from).collect();
        claimed.sort_by_key(|u| u.user_id);
        Ok(claimed)
    }

    async fn release_claim(&self, user_id: i64) -> BasketResult<()> {
        let mut conn = self.pool.get().await?;

        diesel::update(users::table.filter(users::id.eq(user_id)))
            .set(users::notification_claimed_at.eq(None::<DateTime<Utc>>))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn complete_delivery(
        &self,
        user_id: i64,
        basis: ScheduleBasis,
        sent_at: DateTime<Utc>,
        next_scheduled_at: Option<DateTime<Utc>>,
    ) -> BasketResult<bool> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            users::table
                .filter(users::id.eq(user_id))
                .filter(users::pending_notification.eq(true))
                .filter(users::days_between_notifications.is_not_distinct_from(basis.days_between_notifications))
                .filter(users::notifications_start_at.is_not_distinct_from(basis.notifications_start_at)),
        )
        .set((
            users::pending_notification.eq(false),
            users::notification_claimed_at.eq(None::<DateTime<Utc>>),
            users::last_notification_sent_at.eq(Some(sent_at)),
            users::next_scheduled_at.eq(next_scheduled_at),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated == 1)
    }

    async fn write_settings(&self, user_id: i64, state: &NotificationState) -> BasketResult<bool> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(users::table.filter(users::id.eq(user_id)))
            .set((
                users::days_between_notifications.eq(state.days_between_notifications),
                users::notifications_start_at.eq(state.notifications_start_at),
                users::notify_via_email.eq(state.notify_via_email),
                users::next_scheduled_at.eq(state.next_scheduled_at),
                users::pending_notification.eq(false),
                users::notification_claimed_at.eq(None::<DateTime<Utc>>),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(updated == 1)
    }
}
