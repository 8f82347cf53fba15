use diesel_async::pooled_connection::deadpool::PoolError;
use thiserror::Error;

use crate::types::EntityType;

pub type BasketResult<T> = Result<T, BasketError>;

/// Failures scoped to a single user, order or cart. None of them are fatal to
/// the process.
#[derive(Debug, Error)]
pub enum BasketError {
    #[error("{entity} {external_id} not found")]
    NotFound {
        entity: EntityType,
        external_id: String,
    },

    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("invalid order status: {0}")]
    InvalidStatus(String),

    #[error("id allocation failed for {entity}: {reason}")]
    Allocation { entity: EntityType, reason: String },

    #[error("no unique external id for {entity} after {attempts} attempts")]
    ExhaustedRetries { entity: EntityType, attempts: u32 },

    #[error("invalid notification settings: {0}")]
    InvalidSettings(String),

    #[error("transient storage failure: {0}")]
    Transient(String),
}

impl BasketError {
    pub fn not_found(entity: EntityType, external_id: impl ToString) -> Self {
        BasketError::NotFound {
            entity,
            external_id: external_id.to_string(),
        }
    }

    /// The caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BasketError::Transient(_))
    }
}

impl From<diesel::result::Error> for BasketError {
    fn from(e: diesel::result::Error) -> Self {
        tracing::debug!("diesel operation failed: {}", e);
        BasketError::Transient(e.to_string())
    }
}

impl From<PoolError> for BasketError {
    fn from(e: PoolError) -> Self {
        tracing::warn!("database pool checkout failed: {}", e);
        BasketError::Transient(format!("connection pool: {}", e))
    }
}
