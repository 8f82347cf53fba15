use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool, run_migrations, DbPool};
use crate::identity::{IdentityAllocator, PgIdentityStore};

#[derive(Clone)]
pub struct BasketContext {
    pub config: Arc<Config>,
    pub db_pool: Arc<DbPool>,
    pub ids: Arc<IdentityAllocator>,
}

impl BasketContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        run_migrations(&config.database).await?;
        let db_pool = create_pool(&config.database).await?;

        let store = Arc::new(PgIdentityStore::new(db_pool.clone()));
        let ids = IdentityAllocator::initialize(config.ids, store).await?;

        Ok(BasketContext {
            config: Arc::new(config),
            db_pool,
            ids: Arc::new(ids),
        })
    }
}
