//! Append-only status history. Rows are only ever inserted by the state
//! machine; this module reads them back and checks the chain invariants.

use async_trait::async_trait;
use basket_core::{AuditEntry, BasketResult, EntityType, IdentityAllocator, OrderStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

pub const MAX_RANGE_ENTRIES: i64 = 1_000;

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// All rows for one order, oldest first.
    async fn entries_for_order(&self, order_id: i64) -> BasketResult<Vec<AuditEntry>>;

    /// Rows with `from <= changed_at < to`, oldest first.
    async fn entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> BasketResult<Vec<AuditEntry>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainViolation {
    #[error("no creation row")]
    MissingCreation,

    #[error("{count} rows without an old status")]
    MultipleCreations { count: usize },

    #[error("row {index} is not later than the row before it")]
    NotIncreasing { index: usize },

    #[error("row {index} starts from {found:?} but the previous row ended in {expected}")]
    BrokenLink {
        index: usize,
        expected: OrderStatus,
        found: Option<OrderStatus>,
    },
}

/// Checks one order's history, given oldest first.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainViolation> {
    let creations = entries.iter().filter(|e| e.old_status.is_none()).count();
    match creations {
        0 => return Err(ChainViolation::MissingCreation),
        1 => {}
        count => return Err(ChainViolation::MultipleCreations { count }),
    }

    for (index, pair) in entries.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.changed_at <= prev.changed_at {
            return Err(ChainViolation::NotIncreasing { index: index + 1 });
        }
        if next.old_status != Some(prev.new_status) {
            return Err(ChainViolation::BrokenLink {
                index: index + 1,
                expected: prev.new_status,
                found: next.old_status,
            });
        }
    }

    Ok(())
}

pub struct AuditTrail {
    log: Arc<dyn AuditLog>,
    ids: Arc<IdentityAllocator>,
}

impl AuditTrail {
    pub fn new(log: Arc<dyn AuditLog>, ids: Arc<IdentityAllocator>) -> Self {
        Self { log, ids }
    }

    pub async fn history_for_order(&self, external_order_id: &str) -> BasketResult<Vec<AuditEntry>> {
        let order_id = self.ids.resolve_str(EntityType::Order, external_order_id).await?;
        self.log.entries_for_order(order_id).await
    }

    pub async fn history_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<i64>,
    ) -> BasketResult<Vec<AuditEntry>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let limit = limit.unwrap_or(MAX_RANGE_ENTRIES).clamp(1, MAX_RANGE_ENTRIES);
        self.log.entries_between(from, to, limit).await
    }

    pub async fn verify_order(&self, external_order_id: &str) -> BasketResult<Result<(), ChainViolation>> {
        let entries = self.history_for_order(external_order_id).await?;
        Ok(verify_chain(&entries))
    }
}
