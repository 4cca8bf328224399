use std::time::Duration;

use async_trait::async_trait;
use replix_common::{
    message::{ClientReply, ClientRequest},
    InfrastructureError, NodeId,
};

use crate::message::{Frame, Response};

/// Protocol surface of a node, independent of any RPC framework.
#[async_trait]
pub trait ProtocolService: Send + Sync {
    async fn deliver_request(&self, request: ClientRequest);
    async fn deliver_reply(&self, reply: ClientReply);
    async fn set_active(&self, active: bool) -> bool;
    async fn get_log(&self) -> String;
    async fn get_db(&self) -> String;
    async fn get_status(&self, sequence: u64) -> String;
    async fn get_new_views(&self) -> String;
}

/// Receiving side of a transport. `None` means the call is swallowed and
/// the caller never gets an answer.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn dispatch(&self, frame: Frame) -> Option<Response>;
}

/// Sending side of a transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(
        &self,
        target: &NodeId,
        frame: Frame,
        deadline: Duration,
    ) -> Result<Response, InfrastructureError>;
}
