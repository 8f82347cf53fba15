use basket_core::{AuditMode, BasketContext, IdentityAllocator};
use basket_notify::{NotificationScheduler, NotificationStore, PgNotificationStore};
use basket_orders::{AuditLog, AuditTrail, OrderStateMachine, OrderStore, PgOrderStore, RecordStore, Registry};
use std::sync::Arc;

/// Everything a handler needs, shared through an `Extension`.
pub struct ApiState {
    pub jwt_secret: String,
    pub ids: Arc<IdentityAllocator>,
    /// Always records history.
    pub orders: OrderStateMachine,
    /// Always in bulk mode; used only for historical imports.
    pub importer: OrderStateMachine,
    pub audit: AuditTrail,
    pub registry: Registry,
    pub notifications: NotificationScheduler,
}

impl ApiState {
    pub fn new(
        jwt_secret: String,
        ids: Arc<IdentityAllocator>,
        order_store: Arc<dyn OrderStore>,
        audit_log: Arc<dyn AuditLog>,
        records: Arc<dyn RecordStore>,
        schedules: Arc<dyn NotificationStore>,
    ) -> Self {
        let orders = OrderStateMachine::new(order_store, ids.clone());
        let importer = orders.with_mode(AuditMode::Bulk);

        Self {
            jwt_secret,
            orders,
            importer,
            audit: AuditTrail::new(audit_log, ids.clone()),
            registry: Registry::new(records, ids.clone()),
            notifications: NotificationScheduler::new(schedules, ids.clone()),
            ids,
        }
    }

    pub fn from_context(ctx: &BasketContext) -> Self {
        let store = Arc::new(PgOrderStore::new(ctx.db_pool.clone()));
        let schedules = Arc::new(PgNotificationStore::new(ctx.db_pool.clone()));

        Self::new(
            ctx.config.server.jwt_secret.clone(),
            ctx.ids.clone(),
            store.clone(),
            store.clone(),
            store,
            schedules,
        )
    }
}
