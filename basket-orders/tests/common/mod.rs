#![allow(dead_code)]

use async_trait::async_trait;
use basket_core::config::IdAllocationConfig;
use basket_core::identity::{IdOrigin, IdentityStore, ObservedRange};
use basket_core::{
    AuditEntry, BasketError, BasketResult, EntityType, IdentityAllocator, OrderSnapshot,
};
use basket_orders::state_machine::{plan_transition, HistoryDraft, TransitionOutcome, TransitionRequest};
use basket_orders::store::{NewCart, NewOrder, NewUser};
use basket_orders::{AuditLog, AuditTrail, OrderStateMachine, OrderStore, RecordStore, Registry};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, Uuid>,
    carts: BTreeMap<i64, (Uuid, i64)>,
    orders: BTreeMap<i64, OrderSnapshot>,
    history: Vec<AuditEntry>,
}

/// In-memory store with the same all-or-nothing semantics as Postgres: each
/// call holds the lock for its whole unit of work and mutates nothing on error.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pub fail_history_writes: AtomicBool,
}

impl MemoryStore {
    pub fn history_len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }

    pub fn order(&self, id: i64) -> Option<OrderSnapshot> {
        self.inner.lock().unwrap().orders.get(&id).cloned()
    }

    fn entry(inner: &Inner, id: i64, draft: &HistoryDraft) -> AuditEntry {
        AuditEntry {
            id,
            order_id: draft.order_id,
            order_external_id: inner
                .orders
                .get(&draft.order_id)
                .map(|o| o.external_id)
                .unwrap_or_default(),
            old_status: draft.old_status,
            new_status: draft.new_status,
            changed_at: draft.changed_at,
            changed_by: draft.changed_by,
            changed_by_external_id: draft.changed_by.and_then(|u| inner.users.get(&u).copied()),
            note: draft.note.clone(),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn external_id_exists(&self, entity: EntityType, external_id: Uuid) -> BasketResult<bool> {
        Ok(self.lookup_internal(entity, external_id).await?.is_some())
    }

    async fn lookup_internal(&self, entity: EntityType, external_id: Uuid) -> BasketResult<Option<i64>> {
        let inner = self.inner.lock().unwrap();
        let found = match entity {
            EntityType::User => inner.users.iter().find(|(_, e)| **e == external_id).map(|(id, _)| *id),
            EntityType::Cart => inner.carts.iter().find(|(_, (e, _))| *e == external_id).map(|(id, _)| *id),
            EntityType::Order => inner
                .orders
                .values()
                .find(|o| o.external_id == external_id)
                .map(|o| o.id),
        };
        Ok(found)
    }

    async fn observe_range(&self, _entity: EntityType) -> BasketResult<ObservedRange> {
        Ok(ObservedRange::default())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(
        &self,
        order: NewOrder,
        creation: Option<HistoryDraft>,
    ) -> BasketResult<OrderSnapshot> {
        let mut inner = self.inner.lock().unwrap();
        let owner = *inner
            .users
            .get(&order.user_id)
            .ok_or_else(|| BasketError::not_found(EntityType::User, order.user_id))?;
        if creation.is_some() && self.fail_history_writes.load(Ordering::SeqCst) {
            return Err(BasketError::Transient("history insert failed".into()));
        }

        let snapshot = OrderSnapshot {
            id: order.id,
            external_id: order.external_id,
            user_id: order.user_id,
            user_external_id: owner,
            status: order.status,
            total_items: order.total_items,
            imported: order.imported,
            created_at: order.created_at,
            updated_at: order.created_at,
        };
        inner.orders.insert(order.id, snapshot.clone());
        if let Some(draft) = creation {
            let id = inner.history.len() as i64 + 1;
            let entry = Self::entry(&inner, id, &draft);
            inner.history.push(entry);
        }
        Ok(snapshot)
    }

    async fn apply_transition(
        &self,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> BasketResult<TransitionOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner
            .orders
            .get(&request.order_id)
            .cloned()
            .ok_or(BasketError::OrderNotFound(request.order_id))?;
        let last_changed_at = inner
            .history
            .iter()
            .filter(|e| e.order_id == current.id)
            .map(|e| e.changed_at)
            .max();

        let Some(change) = plan_transition(&current, last_changed_at, &request, now) else {
            return Ok(TransitionOutcome::Unchanged(current));
        };
        if change.history.is_some() && self.fail_history_writes.load(Ordering::SeqCst) {
            return Err(BasketError::Transient("history insert failed".into()));
        }

        let mut order = current;
        order.status = change.to;
        order.updated_at = change.at;
        inner.orders.insert(order.id, order.clone());

        let entry = change.history.as_ref().map(|draft| {
            let id = inner.history.len() as i64 + 1;
            Self::entry(&inner, id, draft)
        });
        if let Some(entry) = &entry {
            inner.history.push(entry.clone());
        }

        Ok(TransitionOutcome::Changed {
            previous: change.from,
            order,
            entry,
        })
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn entries_for_order(&self, order_id: i64) -> BasketResult<Vec<AuditEntry>> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<_> = inner
            .history
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.changed_at, e.id));
        Ok(entries)
    }

    async fn entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> BasketResult<Vec<AuditEntry>> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<_> = inner
            .history
            .iter()
            .filter(|e| e.changed_at >= from && e.changed_at < to)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.changed_at, e.id));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> BasketResult<()> {
        self.inner.lock().unwrap().users.insert(user.id, user.external_id);
        Ok(())
    }

    async fn insert_cart(&self, cart: NewCart) -> BasketResult<()> {
        self.inner
            .lock()
            .unwrap()
            .carts
            .insert(cart.id, (cart.external_id, cart.user_id));
        Ok(())
    }
}

pub const USER_START: i64 = 1_000;
pub const ORDER_START: i64 = 50_000;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ids: Arc<IdentityAllocator>,
    pub machine: OrderStateMachine,
    pub registry: Registry,
    pub audit: AuditTrail,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let config = IdAllocationConfig {
            user_start: USER_START,
            order_start: ORDER_START,
            cart_start: ORDER_START,
        };
        let ids = Arc::new(
            IdentityAllocator::new(config, |_| ObservedRange::default(), store.clone()).unwrap(),
        );
        Self {
            machine: OrderStateMachine::new(store.clone(), ids.clone()),
            registry: Registry::new(store.clone(), ids.clone()),
            audit: AuditTrail::new(store.clone(), ids.clone()),
            store,
            ids,
        }
    }

    pub async fn user(&self) -> (i64, Uuid) {
        let user = self
            .registry
            .register_user("shopper@example.com", None, IdOrigin::New)
            .await
            .unwrap();
        (user.id, user.external_id)
    }
}
