//! Internal/external identifier allocation for users, orders and carts.
//!
//! Internal ids are `BIGINT` keys used for joins. Historical records keep the
//! id they were bulk-loaded with; new records draw from a per-entity counter
//! that starts at a configured offset above every historical id. External ids
//! are random UUIDs issued for every record and are never derived from the
//! internal key.

use async_trait::async_trait;
use diesel::dsl::{self, exists};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::IdAllocationConfig;
use crate::db::DbPool;
use crate::error::{BasketError, BasketResult};
use crate::schema::{carts, orders, users};
use crate::types::EntityType;

pub const EXTERNAL_ID_ATTEMPTS: u32 = 3;

/// Where an internal id comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOrigin {
    New,
    Historical(i64),
}

/// Max ids currently in use for one entity type, split by origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedRange {
    pub max_historical: Option<i64>,
    pub max_new: Option<i64>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn external_id_exists(&self, entity: EntityType, external_id: Uuid) -> BasketResult<bool>;

    async fn lookup_internal(&self, entity: EntityType, external_id: Uuid) -> BasketResult<Option<i64>>;

    async fn observe_range(&self, entity: EntityType) -> BasketResult<ObservedRange>;
}

struct Counter {
    start: i64,
    next: AtomicI64,
}

type Generator = Box<dyn Fn() -> Uuid + Send + Sync>;

pub struct IdentityAllocator {
    users: Counter,
    orders: Counter,
    carts: Counter,
    store: Arc<dyn IdentityStore>,
    generate: Generator,
}

impl IdentityAllocator {
    /// Builds the allocator from ranges already observed in storage.
    pub fn new(
        config: IdAllocationConfig,
        observed: impl Fn(EntityType) -> ObservedRange,
        store: Arc<dyn IdentityStore>,
    ) -> BasketResult<Self> {
        let counter = |entity: EntityType| -> BasketResult<Counter> {
            let start = config.start_for(entity);
            let range = observed(entity);
            if start <= 0 {
                return Err(BasketError::Allocation {
                    entity,
                    reason: format!("new-record offset must be positive, got {}", start),
                });
            }
            if let Some(max_historical) = range.max_historical {
                if max_historical >= start {
                    return Err(BasketError::Allocation {
                        entity,
                        reason: format!(
                            "historical id {} reaches the new-record offset {}",
                            max_historical, start
                        ),
                    });
                }
            }
            let next = range.max_new.map_or(start, |max_new| start.max(max_new + 1));
            tracing::info!("{} ids: new records start at {}", entity, next);
            Ok(Counter {
                start,
                next: AtomicI64::new(next),
            })
        };

        Ok(Self {
            users: counter(EntityType::User)?,
            orders: counter(EntityType::Order)?,
            carts: counter(EntityType::Cart)?,
            store,
            generate: Box::new(Uuid::new_v4),
        })
    }

    /// Reads the current id ranges from the store and builds the allocator.
    pub async fn initialize(
        config: IdAllocationConfig,
        store: Arc<dyn IdentityStore>,
    ) -> BasketResult<Self> {
        let user_range = store.observe_range(EntityType::User).await?;
        let order_range = store.observe_range(EntityType::Order).await?;
        let cart_range = store.observe_range(EntityType::Cart).await?;

        Self::new(
            config,
            |entity| match entity {
                EntityType::User => user_range,
                EntityType::Order => order_range,
                EntityType::Cart => cart_range,
            },
            store,
        )
    }

    pub fn with_generator(mut self, generate: impl Fn() -> Uuid + Send + Sync + 'static) -> Self {
        self.generate = Box::new(generate);
        self
    }

    fn counter(&self, entity: EntityType) -> &Counter {
        match entity {
            EntityType::User => &self.users,
            EntityType::Order => &self.orders,
            EntityType::Cart => &self.carts,
        }
    }

    pub fn allocate_internal_id(&self, entity: EntityType, origin: IdOrigin) -> BasketResult<i64> {
        let counter = self.counter(entity);
        match origin {
            IdOrigin::Historical(value) => {
                if value <= 0 || value >= counter.start {
                    return Err(BasketError::Allocation {
                        entity,
                        reason: format!(
                            "historical id {} is outside 1..{}",
                            value, counter.start
                        ),
                    });
                }
                Ok(value)
            }
            IdOrigin::New => Ok(counter.next.fetch_add(1, Ordering::SeqCst)),
        }
    }

    pub async fn issue_external_id(&self, entity: EntityType) -> BasketResult<Uuid> {
        for attempt in 1..=EXTERNAL_ID_ATTEMPTS {
            let candidate = (self.generate)();
            if !self.store.external_id_exists(entity, candidate).await? {
                return Ok(candidate);
            }
            tracing::warn!(
                "External id collision for {} on attempt {}: {}",
                entity,
                attempt,
                candidate
            );
        }
        Err(BasketError::ExhaustedRetries {
            entity,
            attempts: EXTERNAL_ID_ATTEMPTS,
        })
    }

    pub async fn resolve_internal(&self, entity: EntityType, external_id: Uuid) -> BasketResult<i64> {
        self.store
            .lookup_internal(entity, external_id)
            .await?
            .ok_or_else(|| BasketError::not_found(entity, external_id))
    }

    /// Parses a boundary-supplied id; anything that is not a UUID cannot
    /// resolve to a record.
    pub async fn resolve_str(&self, entity: EntityType, external_id: &str) -> BasketResult<i64> {
        let parsed = Uuid::parse_str(external_id)
            .map_err(|_| BasketError::not_found(entity, external_id))?;
        self.resolve_internal(entity, parsed).await
    }
}

pub struct PgIdentityStore {
    pool: Arc<DbPool>,
}

impl PgIdentityStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn external_id_exists(&self, entity: EntityType, external_id: Uuid) -> BasketResult<bool> {
        let mut conn = self.pool.get().await?;
        let found = match entity {
            EntityType::User => {
                diesel::select(exists(users::table.filter(users::external_id.eq(external_id))))
                    .get_result(&mut conn)
                    .await?
            }
            EntityType::Order => {
                diesel::select(exists(orders::table.filter(orders::external_id.eq(external_id))))
                    .get_result(&mut conn)
                    .await?
            }
            EntityType::Cart => {
                diesel::select(exists(carts::table.filter(carts::external_id.eq(external_id))))
                    .get_result(&mut conn)
                    .await?
            }
        };
        Ok(found)
    }

    async fn lookup_internal(&self, entity: EntityType, external_id: Uuid) -> BasketResult<Option<i64>> {
        let mut conn = self.pool.get().await?;
        let id = match entity {
            EntityType::User => {
                users::table
                    .filter(users::external_id.eq(external_id))
                    .select(users::id)
                    .first(&mut conn)
                    .await
                    .optional()?
            }
            EntityType::Order => {
                orders::table
                    .filter(orders::external_id.eq(external_id))
                    .select(orders::id)
                    .first(&mut conn)
                    .await
                    .optional()?
            }
            EntityType::Cart => {
                carts::table
                    .filter(carts::external_id.eq(external_id))
                    .select(carts::id)
                    .first(&mut conn)
                    .await
                    .optional()?
            }
        };
        Ok(id)
    }

    async fn observe_range(&self, entity: EntityType) -> BasketResult<ObservedRange> {
        let mut conn = self.pool.get().await?;
        let (max_historical, max_new): (Option<i64>, Option<i64>) = match entity {
            EntityType::User => (
                users::table
                    .filter(users::imported.eq(true))
                    .select(dsl::max(users::id))
                    .first(&mut conn)
                    .await?,
                users::table
                    .filter(users::imported.eq(false))
                    .select(dsl::max(users::id))
                    .first(&mut conn)
                    .await?,
            ),
            EntityType::Order => (
                orders::table
                    .filter(orders::imported.eq(true))
                    .select(dsl::max(orders::id))
                    .first(&mut conn)
                    .await?,
                orders::table
                    .filter(orders::imported.eq(false))
                    .select(dsl::max(orders::id))
                    .first(&mut conn)
                    .await?,
            ),
            EntityType::Cart => (
                carts::table
                    .filter(carts::imported.eq(true))
                    .select(dsl::max(carts::id))
                    .first(&mut conn)
                    .await?,
                carts::table
                    .filter(carts::imported.eq(false))
                    .select(dsl::max(carts::id))
                    .first(&mut conn)
                    .await?,
            ),
        };
        Ok(ObservedRange {
            max_historical,
            max_new,
        })
    }
}
