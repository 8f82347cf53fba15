use async_trait::async_trait;
use basket_core::schema::{carts, order_status_history, orders, users};
use basket_core::types::{
    HistoryRow, NewCartRow, NewHistoryRow, NewOrderRow, NewUserRow, OrderRow,
};
use basket_core::{
    AuditEntry, BasketError, BasketResult, DbPool, EntityType, OrderSnapshot, OrderStatus,
};
use chrono::{DateTime, Utc};
use diesel::dsl;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::state_machine::{plan_transition, HistoryDraft, TransitionOutcome, TransitionRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub id: i64,
    pub external_id: Uuid,
    pub user_id: i64,
    pub status: OrderStatus,
    pub total_items: i32,
    pub imported: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub id: i64,
    pub external_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub imported: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCart {
    pub id: i64,
    pub external_id: Uuid,
    pub user_id: i64,
    pub imported: bool,
}

/// Order persistence. Implementations must apply a transition's status update
/// and its history row atomically: both or neither.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(
        &self,
        order: NewOrder,
        creation: Option<HistoryDraft>,
    ) -> BasketResult<OrderSnapshot>;

    async fn apply_transition(
        &self,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> BasketResult<TransitionOutcome>;
}

/// Users and carts. Only identity bookkeeping lives here.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> BasketResult<()>;

    async fn insert_cart(&self, cart: NewCart) -> BasketResult<()>;
}

pub struct PgOrderStore {
    pool: Arc<DbPool>,
}

impl PgOrderStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

async fn user_external_id(conn: &mut AsyncPgConnection, user_id: i64) -> QueryResult<Uuid> {
    users::table
        .find(user_id)
        .select(users::external_id)
        .first(conn)
        .await
}

async fn insert_history(
    conn: &mut AsyncPgConnection,
    draft: &HistoryDraft,
    order_external_id: Uuid,
) -> BasketResult<AuditEntry> {
    let row: HistoryRow = diesel::insert_into(order_status_history::table)
        .values(NewHistoryRow {
            order_id: draft.order_id,
            old_status: draft.old_status.map(|s| s.as_str()),
            new_status: draft.new_status.as_str(),
            changed_at: draft.changed_at,
            changed_by: draft.changed_by,
            note: draft.note.as_deref(),
        })
        .returning(HistoryRow::as_returning())
        .get_result(conn)
        .await?;

    let actor = match row.changed_by {
        Some(actor_id) => Some(user_external_id(conn, actor_id).await?),
        None => None,
    };
    row.into_entry(order_external_id, actor)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert_order(
        &self,
        order: NewOrder,
        creation: Option<HistoryDraft>,
    ) -> BasketResult<OrderSnapshot> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, BasketError, _>(|conn| {
            async move {
                let owner = user_external_id(conn, order.user_id)
                    .await
                    .optional()?
                    .ok_or_else(|| BasketError::not_found(EntityType::User, order.user_id))?;

                let row: OrderRow = diesel::insert_into(orders::table)
                    .values(NewOrderRow {
                        id: order.id,
                        external_id: order.external_id,
                        user_id: order.user_id,
                        status: order.status.as_str(),
                        total_items: order.total_items,
                        imported: order.imported,
                        created_at: order.created_at,
                        updated_at: order.created_at,
                    })
                    .returning(OrderRow::as_returning())
                    .get_result(conn)
                    .await?;

                if let Some(draft) = &creation {
                    insert_history(conn, draft, row.external_id).await?;
                }

                row.into_snapshot(owner)
            }
            .scope_boxed()
        })
        .await
    }

    async fn apply_transition(
        &self,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> BasketResult<TransitionOutcome> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, BasketError, _>(|conn| {
            async move {
                let row: OrderRow = orders::table
                    .filter(orders::id.eq(request.order_id))
                    .select(OrderRow::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(BasketError::OrderNotFound(request.order_id))?;

                let owner = user_external_id(conn, row.user_id).await?;
                let current = row.into_snapshot(owner)?;

                let last_changed_at: Option<DateTime<Utc>> = order_status_history::table
                    .filter(order_status_history::order_id.eq(current.id))
                    .select(dsl::max(order_status_history::changed_at))
                    .first(conn)
                    .await?;

                let Some(change) = plan_transition(&current, last_changed_at, &request, now) else {
                    return Ok(TransitionOutcome::Unchanged(current));
                };

                let updated: OrderRow = diesel::update(orders::table.find(current.id))
                    .set((
                        orders::status.eq(change.to.as_str()),
                        orders::updated_at.eq(change.at),
                    ))
                    .returning(OrderRow::as_returning())
                    .get_result(conn)
                    .await?;

                // Any error from here on rolls back the status update above.
                let entry = match &change.history {
                    Some(draft) => Some(insert_history(conn, draft, current.external_id).await?),
                    None => None,
                };

                Ok(TransitionOutcome::Changed {
                    previous: change.from,
                    order: updated.into_snapshot(owner)?,
                    entry,
                })
            }
            .scope_boxed()
        })
        .await
    }
}

#[async_trait]
impl AuditLog for PgOrderStore {
    async fn entries_for_order(&self, order_id: i64) -> BasketResult<Vec<AuditEntry>> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(HistoryRow, Uuid, Option<Uuid>)> = order_status_history::table
            .inner_join(orders::table)
            .left_join(users::table.on(order_status_history::changed_by.eq(users::id.nullable())))
            .filter(order_status_history::order_id.eq(order_id))
            .order((order_status_history::changed_at.asc(), order_status_history::id.asc()))
            .select((
                HistoryRow::as_select(),
                orders::external_id,
                users::external_id.nullable(),
            ))
            .load(&mut conn)
            .await?;

        rows.into_iter()
            .map(|(row, order, actor)| row.into_entry(order, actor))
            .collect()
    }

    async fn entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> BasketResult<Vec<AuditEntry>> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(HistoryRow, Uuid, Option<Uuid>)> = order_status_history::table
            .inner_join(orders::table)
            .left_join(users::table.on(order_status_history::changed_by.eq(users::id.nullable())))
            .filter(order_status_history::changed_at.ge(from))
            .filter(order_status_history::changed_at.lt(to))
            .order((order_status_history::changed_at.asc(), order_status_history::id.asc()))
            .limit(limit)
            .select((
                HistoryRow::as_select(),
                orders::external_id,
                users::external_id.nullable(),
            ))
            .load(&mut conn)
            .await?;

        rows.into_iter()
            .map(|(row, order, actor)| row.into_entry(order, actor))
            .collect()
    }
}

#[async_trait]
impl RecordStore for PgOrderStore {
    async fn insert_user(&self, user: NewUser) -> BasketResult<()> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(users::table)
            .values(NewUserRow {
                id: user.id,
                external_id: user.external_id,
                email: &user.email,
                display_name: user.display_name.as_deref(),
                imported: user.imported,
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn insert_cart(&self, cart: NewCart) -> BasketResult<()> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(carts::table)
            .values(NewCartRow {
                id: cart.id,
                external_id: cart.external_id,
                user_id: cart.user_id,
                imported: cart.imported,
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
