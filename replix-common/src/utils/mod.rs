//! Common identifiers and helpers shared across the Replix crates.

pub mod node_id;
pub mod time;

pub use node_id::{NodeId, RequestId};
