pub mod builder;
pub mod dispatcher;
pub mod inbound;
pub mod outbound;
pub mod pools;
