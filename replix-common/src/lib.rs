pub mod auth;
pub mod config;
pub mod error;
pub mod message;
pub mod utils;

pub use error::{ConfigurationError, InfrastructureError, QuorumError, ReplixError};
pub use utils::{NodeId, RequestId};
