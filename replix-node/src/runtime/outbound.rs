use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use replix_common::{
    auth::MessageAuthenticator,
    message::{ClientReply, ClientRequest, SignedEnvelope},
    InfrastructureError, NodeId, ReplixError,
};
use replix_p2p::{ActivityGate, Frame, Transport};
use tracing::{debug, warn};

use super::{
    dispatcher::{Delivery, PeerDispatcher, Routable},
    pools::ExecutionPools,
};

/// Envelope that can be put on the wire as a [`Frame`].
pub trait IntoFrame: SignedEnvelope + Send + 'static {
    fn into_frame(self) -> Frame;
}

impl IntoFrame for ClientRequest {
    fn into_frame(self) -> Frame {
        Frame::Request(self)
    }
}

impl IntoFrame for ClientReply {
    fn into_frame(self) -> Frame {
        Frame::Reply(self)
    }
}

#[derive(Debug)]
pub struct OutboundEvent {
    pub target: NodeId,
    pub frame: Frame,
}

impl Routable for OutboundEvent {
    fn route_key(&self) -> NodeId {
        self.target.clone()
    }
}

/// Delivers queued frames through the transport, inside a network slot.
pub struct NetworkDelivery {
    transport: Arc<dyn Transport>,
    pools: Arc<ExecutionPools>,
    deadline: Duration,
}

impl NetworkDelivery {
    pub fn new(transport: Arc<dyn Transport>, pools: Arc<ExecutionPools>, deadline: Duration) -> Self {
        Self { transport, pools, deadline }
    }
}

#[async_trait]
impl Delivery<OutboundEvent> for NetworkDelivery {
    async fn deliver(&self, event: OutboundEvent) -> Result<(), InfrastructureError> {
        let transport = Arc::clone(&self.transport);
        let deadline = self.deadline;
        let target = event.target.clone();
        let op = event.frame.operation();

        let outcome = self
            .pools
            .run_network_io(async move { transport.call(&event.target, event.frame, deadline).await })
            .await;

        // An unanswered call still reached the peer's boundary.
        match outcome.and_then(|call| call) {
            Ok(_) => {
                debug!("📤 {:?} delivered to {}", op, target);
                Ok(())
            }
            Err(InfrastructureError::DeadlineExceeded(_)) => {
                debug!("{:?} to {} got no answer within {:?}", op, target, deadline);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to deliver {:?} to {}: {}", op, target, e);
                Err(e)
            }
        }
    }
}

/// Signs outgoing envelopes and queues them per target peer.
///
/// Nothing leaves a node whose gate is inactive.
pub struct OutboundSender {
    gate: Arc<ActivityGate>,
    auth: Arc<MessageAuthenticator>,
    dispatcher: Arc<PeerDispatcher<OutboundEvent>>,
}

impl OutboundSender {
    pub fn new(
        gate: Arc<ActivityGate>,
        auth: Arc<MessageAuthenticator>,
        dispatcher: Arc<PeerDispatcher<OutboundEvent>>,
    ) -> Self {
        Self { gate, auth, dispatcher }
    }

    /// Returns `Ok(false)` when the node is inactive and the message was
    /// suppressed.
    pub fn sign_and_send<M: IntoFrame>(&self, target: &NodeId, message: &M) -> Result<bool, ReplixError> {
        if !self.gate.is_active() {
            debug!("Node is inactive, not sending to {}", target);
            return Ok(false);
        }

        let signed = self.auth.sign(message)?;
        self.dispatcher.submit(OutboundEvent { target: target.clone(), frame: signed.into_frame() })?;
        Ok(true)
    }

    /// Signs once and queues a copy for every target.
    pub fn broadcast<M: IntoFrame>(&self, targets: &[NodeId], message: &M) -> Result<usize, ReplixError> {
        if !self.gate.is_active() {
            debug!("Node is inactive, not broadcasting to {} peers", targets.len());
            return Ok(0);
        }

        let signed = self.auth.sign(message)?;
        for target in targets {
            self.dispatcher.submit(OutboundEvent {
                target: target.clone(),
                frame: signed.clone().into_frame(),
            })?;
        }
        Ok(targets.len())
    }

    pub fn dispatcher(&self) -> &Arc<PeerDispatcher<OutboundEvent>> {
        &self.dispatcher
    }
}
