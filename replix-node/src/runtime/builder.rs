use std::sync::{atomic::AtomicU64, Arc};

use replix_common::{
    auth::{KeyStore, MessageAuthenticator},
    config::NodeConfig,
    ConfigurationError, ReplixError,
};
use replix_consensus::QuorumTracker;
use replix_p2p::{ActivityGate, ActivityState, Transport};
use tracing::info;

use crate::{comm_log::CommunicationLog, diagnostics::ReplicaState, node::Node};

use super::{
    dispatcher::{Delivery, PeerDispatcher},
    inbound::NodeService,
    outbound::{NetworkDelivery, OutboundEvent, OutboundSender},
    pools::{ExecutionPools, PoolConfig},
};

/// Assembles a [`Node`] from its configuration, key material and transport.
pub struct NodeBuilder {
    config: NodeConfig,
    keystore: Option<KeyStore>,
    transport: Option<Arc<dyn Transport>>,
    initial_state: Option<ActivityState>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            keystore: None,
            transport: None,
            initial_state: None,
        }
    }

    /// Uses already loaded keys instead of reading them from disk.
    pub fn with_keystore(mut self, keystore: KeyStore) -> Self {
        self.keystore = Some(keystore);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Overrides `start_active` from the configuration.
    pub fn with_initial_state(mut self, state: ActivityState) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Must run inside a tokio runtime; the execution pools spawn their
    /// workers here.
    pub fn build(self) -> Result<Arc<Node>, ReplixError> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| ConfigurationError::Invalid("transport not set".into()))?;

        let keystore = match self.keystore {
            Some(keystore) => keystore,
            None => KeyStore::load(
                self.config.node_id.clone(),
                &self.config.private_key_dir,
                &self.config.public_key_manifest,
            )?,
        };
        if keystore.node_id() != &self.config.node_id {
            return Err(ConfigurationError::Invalid(format!(
                "key material belongs to {}, config is for {}",
                keystore.node_id(),
                self.config.node_id
            ))
            .into());
        }

        let initial = self.initial_state.unwrap_or(if self.config.start_active {
            ActivityState::Active
        } else {
            ActivityState::Inactive
        });

        let config = Arc::new(self.config);
        let gate = Arc::new(ActivityGate::new(initial));
        let auth = Arc::new(MessageAuthenticator::new(keystore));
        let tracker = Arc::new(QuorumTracker::new());
        let pools = Arc::new(ExecutionPools::new(PoolConfig::for_node(&config)));
        let comm_log = Arc::new(CommunicationLog::new());
        let state = Arc::new(ReplicaState::new(config.client_balances.clone()));

        let delivery: Arc<dyn Delivery<OutboundEvent>> = Arc::new(NetworkDelivery::new(
            transport,
            Arc::clone(&pools),
            config.client_timeout(),
        ));
        let dispatcher = Arc::new(PeerDispatcher::new(delivery));
        let outbound = Arc::new(OutboundSender::new(
            Arc::clone(&gate),
            Arc::clone(&auth),
            dispatcher,
        ));

        let is_replica = config.peers.contains_key(&config.node_id);
        let service = Arc::new(NodeService::new(
            config.node_id.clone(),
            config.peers.keys().cloned().collect(),
            Arc::clone(&gate),
            Arc::clone(&auth),
            Arc::clone(&tracker),
            Arc::clone(&pools),
            Arc::clone(&outbound),
            Arc::clone(&comm_log),
            Arc::clone(&state),
        ));

        info!(
            "✅ Node {} built ({}, {:?}, {} replicas, quorum {})",
            config.node_id,
            if is_replica { "replica" } else { "client" },
            initial,
            config.peers.len(),
            config.reply_quorum()
        );

        Ok(Arc::new(Node {
            config,
            gate,
            auth,
            tracker,
            pools,
            outbound,
            comm_log,
            state,
            service,
            last_timestamp: AtomicU64::new(0),
        }))
    }
}
