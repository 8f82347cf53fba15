use basket_core::identity::IdOrigin;
use basket_core::{
    AuditEntry, AuditMode, BasketError, BasketResult, EntityType, IdentityAllocator,
    OrderSnapshot, OrderStatus,
};
use chrono::{DateTime, Duration, Timelike, Utc};
use std::sync::Arc;
use tracing;

use crate::store::{NewOrder, OrderStore};

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub order_id: i64,
    pub new_status: OrderStatus,
    pub actor: Option<i64>,
    pub note: Option<String>,
    pub mode: AuditMode,
}

/// A history row that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryDraft {
    pub order_id: i64,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<i64>,
    pub note: Option<String>,
}

/// Everything a store writes for one accepted transition, in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
    pub history: Option<HistoryDraft>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Changed {
        previous: OrderStatus,
        order: OrderSnapshot,
        entry: Option<AuditEntry>,
    },
    /// Requested status equals the current one. Nothing was written.
    Unchanged(OrderSnapshot),
}

impl TransitionOutcome {
    pub fn order(&self) -> &OrderSnapshot {
        match self {
            TransitionOutcome::Changed { order, .. } => order,
            TransitionOutcome::Unchanged(order) => order,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, TransitionOutcome::Changed { .. })
    }
}

/// Drops sub-microsecond precision, matching what Postgres stores.
pub fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(at.nanosecond() / 1_000 * 1_000).unwrap_or(at)
}

/// Decides what a transition writes. `last_changed_at` is the newest history
/// timestamp for the order; the new row is placed strictly after it.
pub fn plan_transition(
    current: &OrderSnapshot,
    last_changed_at: Option<DateTime<Utc>>,
    request: &TransitionRequest,
    now: DateTime<Utc>,
) -> Option<StatusChange> {
    if current.status == request.new_status {
        return None;
    }

    let now = truncate_to_micros(now);
    let at = match last_changed_at {
        Some(last) if last >= now => last + Duration::microseconds(1),
        _ => now,
    };

    let history = match request.mode {
        AuditMode::Record => Some(HistoryDraft {
            order_id: current.id,
            old_status: Some(current.status),
            new_status: request.new_status,
            changed_at: at,
            changed_by: request.actor,
            note: request.note.clone(),
        }),
        AuditMode::Bulk => None,
    };

    Some(StatusChange {
        from: current.status,
        to: request.new_status,
        at,
        history,
    })
}

pub struct OrderStateMachine {
    store: Arc<dyn OrderStore>,
    ids: Arc<IdentityAllocator>,
    mode: AuditMode,
}

impl OrderStateMachine {
    pub fn new(store: Arc<dyn OrderStore>, ids: Arc<IdentityAllocator>) -> Self {
        Self {
            store,
            ids,
            mode: AuditMode::Record,
        }
    }

    /// Same machine with a different audit mode. Bulk mode suppresses history
    /// rows and is meant for historical backfills only.
    pub fn with_mode(&self, mode: AuditMode) -> Self {
        Self {
            store: self.store.clone(),
            ids: self.ids.clone(),
            mode,
        }
    }

    pub fn mode(&self) -> AuditMode {
        self.mode
    }

    pub async fn apply_transition(
        &self,
        order_id: i64,
        new_status: &str,
        actor: Option<i64>,
        note: Option<String>,
    ) -> BasketResult<TransitionOutcome> {
        let new_status: OrderStatus = new_status.parse()?;
        let request = TransitionRequest {
            order_id,
            new_status,
            actor,
            note,
            mode: self.mode,
        };

        let outcome = self.store.apply_transition(request, Utc::now()).await?;

        match &outcome {
            TransitionOutcome::Changed { previous, order, .. } => {
                if !previous.is_sanctioned(order.status) {
                    tracing::warn!(
                        "Order {} moved along an unexpected path: {} -> {}",
                        order.external_id,
                        previous,
                        order.status
                    );
                }
                tracing::info!(
                    "Order {} status {} -> {} ({:?})",
                    order.external_id,
                    previous,
                    order.status,
                    self.mode
                );
            }
            TransitionOutcome::Unchanged(order) => {
                tracing::debug!("Order {} already {}, no transition", order.external_id, order.status);
            }
        }

        Ok(outcome)
    }

    /// Boundary entry point: resolves external order and actor ids first.
    pub async fn update_status(
        &self,
        external_order_id: &str,
        new_status: &str,
        external_actor_id: Option<&str>,
        note: Option<String>,
    ) -> BasketResult<TransitionOutcome> {
        let order_id = self.ids.resolve_str(EntityType::Order, external_order_id).await?;
        let actor = match external_actor_id {
            Some(actor) => Some(self.ids.resolve_str(EntityType::User, actor).await?),
            None => None,
        };
        self.apply_transition(order_id, new_status, actor, note).await
    }

    /// Creates a new order in `pending`, recording the creation row unless in
    /// bulk mode.
    pub async fn create_order(&self, user_id: i64, total_items: i32) -> BasketResult<OrderSnapshot> {
        let id = self.ids.allocate_internal_id(EntityType::Order, IdOrigin::New)?;
        let created_at = truncate_to_micros(Utc::now());
        self.insert(id, user_id, OrderStatus::INITIAL, total_items, false, created_at)
            .await
    }

    /// Loads an order from a historical data set, keeping its original id.
    pub async fn import_order(
        &self,
        historical_id: i64,
        user_id: i64,
        status: &str,
        total_items: i32,
        created_at: DateTime<Utc>,
    ) -> BasketResult<OrderSnapshot> {
        let status: OrderStatus = status.parse()?;
        let id = self
            .ids
            .allocate_internal_id(EntityType::Order, IdOrigin::Historical(historical_id))?;
        self.insert(id, user_id, status, total_items, true, created_at)
            .await
    }

    async fn insert(
        &self,
        id: i64,
        user_id: i64,
        status: OrderStatus,
        total_items: i32,
        imported: bool,
        created_at: DateTime<Utc>,
    ) -> BasketResult<OrderSnapshot> {
        if total_items < 0 {
            return Err(BasketError::InvalidSettings(format!(
                "total_items must not be negative, got {}",
                total_items
            )));
        }
        let external_id = self.ids.issue_external_id(EntityType::Order).await?;
        let creation = match self.mode {
            AuditMode::Record => Some(HistoryDraft {
                order_id: id,
                old_status: None,
                new_status: status,
                changed_at: created_at,
                changed_by: None,
                note: None,
            }),
            AuditMode::Bulk => None,
        };

        let order = self
            .store
            .insert_order(
                NewOrder {
                    id,
                    external_id,
                    user_id,
                    status,
                    total_items,
                    imported,
                    created_at,
                },
                creation,
            )
            .await?;

        tracing::info!("Created order {} in {}", order.external_id, order.status);
        Ok(order)
    }
}
