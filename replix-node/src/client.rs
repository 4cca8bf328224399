use std::{sync::Arc, time::Duration};

use replix_common::{
    message::{ClientReply, ClientRequest, Command, Transaction},
    NodeId, QuorumError, ReplixError, RequestId,
};
use replix_consensus::QuorumTracker;
use tracing::{info, warn};

use crate::{node::Node, runtime::outbound::OutboundSender};

/// Client side of a round: broadcast a signed request to every replica and
/// wait for `f + 1` matching replies.
///
/// Retries re-broadcast the same request (same timestamp), so replicas answer
/// from their reply cache instead of executing twice.
pub struct ReplyCollector {
    tracker: Arc<QuorumTracker<RequestId, ClientReply>>,
    outbound: Arc<OutboundSender>,
    replicas: Vec<NodeId>,
    quorum: usize,
    timeout: Duration,
    max_retries: u32,
}

impl ReplyCollector {
    pub fn new(
        tracker: Arc<QuorumTracker<RequestId, ClientReply>>,
        outbound: Arc<OutboundSender>,
        replicas: Vec<NodeId>,
        quorum: usize,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self { tracker, outbound, replicas, quorum, timeout, max_retries }
    }

    pub async fn collect(&self, request: ClientRequest) -> Result<ClientReply, ReplixError> {
        let round = request.request_id();
        self.tracker.start_tracking(
            round.clone(),
            self.quorum,
            |reply: &ClientReply| reply.result.clone(),
            |reply: &ClientReply| reply.signer_id.clone(),
        )?;

        for attempt in 0..=self.max_retries {
            if let Err(e) = self.outbound.broadcast(&self.replicas, &request) {
                self.tracker.cancel(&round);
                return Err(e);
            }

            match self.tracker.await_consensus(&round, self.timeout).await {
                Ok(reply) => {
                    info!("🤝 Consensus on {}: {}", round, reply.result);
                    return Ok(reply);
                }
                Err(QuorumError::Timeout(_)) => {
                    warn!(
                        "No quorum for {} after attempt {}/{}",
                        round,
                        attempt + 1,
                        self.max_retries + 1
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.tracker.cancel(&round);
        Err(QuorumError::Timeout(round.to_string()).into())
    }
}

impl Node {
    pub fn reply_collector(&self) -> ReplyCollector {
        ReplyCollector::new(
            Arc::clone(&self.tracker),
            Arc::clone(&self.outbound),
            self.replicas(),
            self.config.reply_quorum(),
            self.config.client_timeout(),
            self.config.max_retries,
        )
    }

    /// Submits `command` as this node's client and waits for the agreed reply.
    pub async fn submit(&self, command: Command) -> Result<ClientReply, ReplixError> {
        let request = ClientRequest::new(self.node_id().clone(), self.next_timestamp(), command);
        self.reply_collector().collect(request).await
    }

    pub async fn submit_transfer(
        &self,
        receiver: &str,
        amount: u64,
    ) -> Result<ClientReply, ReplixError> {
        self.submit(Command::Transfer(Transaction {
            sender: self.node_id().to_string(),
            receiver: receiver.to_string(),
            amount,
        }))
        .await
    }

    pub async fn query_balance(&self, account: &str) -> Result<ClientReply, ReplixError> {
        self.submit(Command::Balance { account: account.to_string() }).await
    }
}
