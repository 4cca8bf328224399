pub mod cli;
pub mod client;
pub mod comm_log;
pub mod diagnostics;
pub mod node;
pub mod runtime;

pub use node::Node;
pub use runtime::builder::NodeBuilder;
