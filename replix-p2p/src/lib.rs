pub mod gate;
pub mod in_memory;
pub mod message;
pub mod ports;

pub use gate::{ActivityGate, ActivityState, GatedService, ALLOWED_WHILE_INACTIVE};
pub use in_memory::InMemoryNetwork;
pub use message::{Frame, Operation, Response};
pub use ports::{Endpoint, ProtocolService, Transport};
