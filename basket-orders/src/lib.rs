pub mod audit;
pub mod registry;
pub mod state_machine;
pub mod store;

pub use audit::{verify_chain, AuditLog, AuditTrail, ChainViolation};
pub use registry::{RecordRef, Registry};
pub use state_machine::{OrderStateMachine, TransitionOutcome};
pub use store::{OrderStore, PgOrderStore, RecordStore};
