use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use replix_common::{
    auth::MessageAuthenticator, config::NodeConfig, message::ClientReply,
    utils::time::current_time_millis, NodeId, RequestId,
};
use replix_consensus::QuorumTracker;
use replix_p2p::{ActivityGate, ActivityState, Endpoint, GatedService};
use tokio::time::Instant;
use tracing::info;

use crate::{
    comm_log::CommunicationLog,
    diagnostics::ReplicaState,
    runtime::{
        dispatcher::DispatchStatus, inbound::NodeService, outbound::OutboundSender,
        pools::ExecutionPools,
    },
};

/// A fully assembled cluster participant. Built by
/// [`NodeBuilder`](crate::runtime::builder::NodeBuilder).
pub struct Node {
    pub(crate) config: Arc<NodeConfig>,
    pub(crate) gate: Arc<ActivityGate>,
    pub(crate) auth: Arc<MessageAuthenticator>,
    pub(crate) tracker: Arc<QuorumTracker<RequestId, ClientReply>>,
    pub(crate) pools: Arc<ExecutionPools>,
    pub(crate) outbound: Arc<OutboundSender>,
    pub(crate) comm_log: Arc<CommunicationLog>,
    pub(crate) state: Arc<ReplicaState>,
    pub(crate) service: Arc<NodeService>,
    pub(crate) last_timestamp: AtomicU64,
}

impl Node {
    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn is_replica(&self) -> bool {
        self.config.peers.contains_key(&self.config.node_id)
    }

    /// Replicas this node talks to, excluding itself.
    pub fn replicas(&self) -> Vec<NodeId> {
        self.config.peer_ids_except(&self.config.node_id)
    }

    pub fn activity(&self) -> ActivityState {
        self.gate.state()
    }

    pub fn set_active(&self, active: bool) {
        self.gate.set_active(active);
    }

    pub fn tracker(&self) -> &Arc<QuorumTracker<RequestId, ClientReply>> {
        &self.tracker
    }

    pub fn state(&self) -> &Arc<ReplicaState> {
        &self.state
    }

    pub fn comm_log(&self) -> &Arc<CommunicationLog> {
        &self.comm_log
    }

    pub fn authenticator(&self) -> &Arc<MessageAuthenticator> {
        &self.auth
    }

    pub fn dispatch_status(&self) -> DispatchStatus {
        self.outbound.dispatcher().snapshot_status()
    }

    /// Gated receiving side to register with a transport.
    pub fn endpoint(&self) -> Arc<dyn Endpoint> {
        Arc::new(GatedService::new(Arc::clone(&self.gate), Arc::clone(&self.service)))
    }

    /// Millisecond timestamp, strictly increasing per node so that two
    /// rounds never share a `client:timestamp` key.
    pub(crate) fn next_timestamp(&self) -> u64 {
        let now = current_time_millis();
        let mut last = self.last_timestamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_timestamp.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    /// Drains outbound queues, then the execution pools, all within one
    /// `grace` period. Returns `false` if anything had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("🛑 Shutting down node {}", self.node_id());
        let deadline = Instant::now() + grace;
        let drained = self.outbound.dispatcher().close(deadline).await;
        let clean = self.pools.shutdown(deadline.saturating_duration_since(Instant::now())).await;
        drained && clean
    }
}
