use std::{collections::BTreeSet, fmt, sync::Arc};

use async_trait::async_trait;
use replix_common::{
    auth::MessageAuthenticator,
    message::{ClientReply, ClientRequest, SignedEnvelope},
    NodeId, ReplixError, RequestId,
};
use replix_consensus::QuorumTracker;
use replix_p2p::{ActivityGate, ProtocolService};
use tracing::{debug, info, warn};

use crate::{comm_log::CommunicationLog, diagnostics::ReplicaState};

use super::{outbound::OutboundSender, pools::ExecutionPools};

/// Inbound side of a node: verify, then either execute a client request or
/// feed a replica's reply to the quorum tracker.
///
/// Everything past signature verification runs on the message pool; balance
/// changes go through the state worker and ledger appends through the log
/// worker.
pub struct NodeService {
    node_id: NodeId,
    replicas: BTreeSet<NodeId>,
    gate: Arc<ActivityGate>,
    auth: Arc<MessageAuthenticator>,
    tracker: Arc<QuorumTracker<RequestId, ClientReply>>,
    pools: Arc<ExecutionPools>,
    outbound: Arc<OutboundSender>,
    comm_log: Arc<CommunicationLog>,
    state: Arc<ReplicaState>,
}

impl NodeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        replicas: BTreeSet<NodeId>,
        gate: Arc<ActivityGate>,
        auth: Arc<MessageAuthenticator>,
        tracker: Arc<QuorumTracker<RequestId, ClientReply>>,
        pools: Arc<ExecutionPools>,
        outbound: Arc<OutboundSender>,
        comm_log: Arc<CommunicationLog>,
        state: Arc<ReplicaState>,
    ) -> Self {
        Self { node_id, replicas, gate, auth, tracker, pools, outbound, comm_log, state }
    }

    fn is_replica(&self) -> bool {
        self.replicas.contains(&self.node_id)
    }

    /// `true` only for a valid signature from a known signer.
    fn authentic<M: SignedEnvelope>(&self, message: &M, what: &str, context: &dyn fmt::Display) -> bool {
        match self.auth.verify(message) {
            Ok(true) => true,
            Ok(false) => {
                warn!("Invalid signature on {} from {} ({})", what, message.signer_id(), context);
                false
            }
            Err(e) => {
                warn!("Rejected {} from {} ({}): {}", what, message.signer_id(), context, e);
                false
            }
        }
    }

    async fn execute_request(
        node_id: NodeId,
        request: ClientRequest,
        pools: Arc<ExecutionPools>,
        state: Arc<ReplicaState>,
        outbound: Arc<OutboundSender>,
    ) -> Result<(), ReplixError> {
        let execution = {
            let state = Arc::clone(&state);
            let request = request.clone();
            pools.run_state_transition(async move { state.execute(&request) }).await?
        };

        if execution.fresh {
            let entry = request.to_string();
            let sequence = execution.sequence;
            pools
                .run_log_operation(async move { state.append_ledger(sequence, entry) })
                .await?;
            info!("⚙️ Executed {} as sequence {} -> {}", request.request_id(), sequence, execution.result);
        } else {
            debug!("Round {} already executed, resending cached reply", request.request_id());
        }

        let reply = ClientReply::for_request(&request, node_id, execution.result);
        outbound.sign_and_send(&request.client_id, &reply)?;
        Ok(())
    }
}

#[async_trait]
impl ProtocolService for NodeService {
    async fn deliver_request(&self, request: ClientRequest) {
        self.comm_log.add_request(&request);
        info!("MESSAGE: {} received from client {}", request, request.client_id);

        if !self.authentic(&request, "client request", &request.request_id()) {
            return;
        }
        if request.signer_id != request.client_id {
            warn!("Request {} signed by {} on behalf of another client", request.request_id(), request.signer_id);
            return;
        }
        if !self.is_replica() {
            debug!("{} is not a replica, dropping request {}", self.node_id, request.request_id());
            return;
        }

        let node_id = self.node_id.clone();
        let pools = Arc::clone(&self.pools);
        let state = Arc::clone(&self.state);
        let outbound = Arc::clone(&self.outbound);
        let round = request.request_id();
        let submitted = self.pools.submit_message_processing(async move {
            if let Err(e) = Self::execute_request(node_id, request, pools, state, outbound).await {
                warn!("Failed to process request {}: {}", round, e);
            }
        });
        if let Err(e) = submitted {
            warn!("Dropping client request: {}", e);
        }
    }

    async fn deliver_reply(&self, reply: ClientReply) {
        self.comm_log.add_reply(&reply);

        if !self.authentic(&reply, "client reply", &reply.request_id()) {
            return;
        }
        if reply.signer_id != reply.replica_id {
            warn!("Reply for {} signed by {} claims replica {}", reply.request_id(), reply.signer_id, reply.replica_id);
            return;
        }
        // Only replicas vote, whatever keys the manifest holds.
        if !self.replicas.contains(&reply.signer_id) {
            warn!("Reply for {} from non-replica {}, dropping", reply.request_id(), reply.signer_id);
            return;
        }

        let tracker = Arc::clone(&self.tracker);
        let submitted = self.pools.submit_message_processing(async move {
            let round = reply.request_id();
            tracker.record_reply(&round, reply);
        });
        if let Err(e) = submitted {
            warn!("Dropping client reply: {}", e);
        }
    }

    async fn set_active(&self, active: bool) -> bool {
        let previous = self.gate.set_active(active);
        if previous != active {
            info!("🔌 {} is now {}", self.node_id, if active { "active" } else { "inactive" });
        }
        true
    }

    async fn get_log(&self) -> String {
        self.comm_log.render()
    }

    async fn get_db(&self) -> String {
        self.state.render_db()
    }

    async fn get_status(&self, sequence: u64) -> String {
        self.state.status_of(sequence).code().to_string()
    }

    async fn get_new_views(&self) -> String {
        self.state.render_new_views()
    }
}
