use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use replix_common::{InfrastructureError, NodeId};
use tracing::debug;

use crate::{
    message::{Frame, Response},
    ports::{Endpoint, Transport},
};

/// Loopback transport connecting endpoints that live in one process.
///
/// A swallowed call (endpoint returned `None`) is held open until the
/// caller's deadline, mirroring a silent remote peer.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    endpoints: Arc<RwLock<HashMap<NodeId, Arc<dyn Endpoint>>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_id: NodeId, endpoint: Arc<dyn Endpoint>) {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id, endpoint);
    }

    pub fn unregister(&self, node_id: &NodeId) -> bool {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node_id)
            .is_some()
    }

    pub fn connected_peers(&self) -> Vec<NodeId> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn endpoint(&self, node_id: &NodeId) -> Option<Arc<dyn Endpoint>> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .cloned()
    }
}

#[async_trait]
impl Transport for InMemoryNetwork {
    async fn call(
        &self,
        target: &NodeId,
        frame: Frame,
        deadline: Duration,
    ) -> Result<Response, InfrastructureError> {
        let endpoint = self
            .endpoint(target)
            .ok_or_else(|| InfrastructureError::PeerNotFound(target.clone()))?;

        let exchange = async move {
            match endpoint.dispatch(frame).await {
                Some(response) => response,
                None => std::future::pending::<Response>().await,
            }
        };

        tokio::time::timeout(deadline, exchange).await.map_err(|_| {
            debug!("No answer from {} within {:?}", target, deadline);
            InfrastructureError::DeadlineExceeded(target.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn dispatch(&self, frame: Frame) -> Option<Response> {
            match frame {
                Frame::GetStatus { sequence } => Some(Response::Text(sequence.to_string())),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn test_call_reaches_registered_endpoint() {
        let net = InMemoryNetwork::new();
        net.register(NodeId::from("n1"), Arc::new(Echo));

        let response = net
            .call(&NodeId::from("n1"), Frame::GetStatus { sequence: 7 }, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(response, Response::Text("7".into()));
        assert_eq!(net.connected_peers(), vec![NodeId::from("n1")]);
    }

    #[tokio::test]
    async fn test_swallowed_call_surfaces_as_deadline() {
        let net = InMemoryNetwork::new();
        net.register(NodeId::from("n1"), Arc::new(Echo));

        let err = net
            .call(&NodeId::from("n1"), Frame::GetLog, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, InfrastructureError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let net = InMemoryNetwork::new();
        net.register(NodeId::from("n1"), Arc::new(Echo));
        assert!(net.unregister(&NodeId::from("n1")));

        let err = net
            .call(&NodeId::from("n1"), Frame::GetLog, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, InfrastructureError::PeerNotFound(_)));
    }
}
