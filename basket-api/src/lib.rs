pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{router, run};
pub use state::ApiState;
