pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod identity;
pub mod schema;
pub mod types;

pub use config::Config;
pub use context::BasketContext;
pub use db::DbPool;
pub use error::{BasketError, BasketResult};
pub use identity::{IdOrigin, IdentityAllocator, IdentityStore};
pub use types::{AuditEntry, AuditMode, EntityType, OrderSnapshot, OrderStatus};
