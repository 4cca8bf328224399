use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    message::{Frame, Operation, Response},
    ports::{Endpoint, ProtocolService},
};

/// Operations still served while a node is inactive.
pub const ALLOWED_WHILE_INACTIVE: &[Operation] = &[
    Operation::SetActive,
    Operation::GetLog,
    Operation::GetDb,
    Operation::GetStatus,
    Operation::GetNewViews,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Active,
    Inactive,
}

/// Runtime switch that silences a node's protocol participation.
#[derive(Debug)]
pub struct ActivityGate {
    active: AtomicBool,
}

impl ActivityGate {
    pub fn new(initial: ActivityState) -> Self {
        Self { active: AtomicBool::new(initial == ActivityState::Active) }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ActivityState {
        if self.is_active() {
            ActivityState::Active
        } else {
            ActivityState::Inactive
        }
    }

    /// Idempotent; returns the previous value.
    pub fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::SeqCst)
    }

    pub fn permits(&self, op: Operation) -> bool {
        self.is_active() || ALLOWED_WHILE_INACTIVE.contains(&op)
    }
}

/// Puts an [`ActivityGate`] in front of a [`ProtocolService`].
///
/// Blocked calls are accepted and dropped without an answer, so a caller
/// only ever observes its own deadline expiring.
pub struct GatedService<S> {
    gate: Arc<ActivityGate>,
    service: Arc<S>,
}

impl<S: ProtocolService> GatedService<S> {
    pub fn new(gate: Arc<ActivityGate>, service: Arc<S>) -> Self {
        Self { gate, service }
    }
}

#[async_trait]
impl<S: ProtocolService + 'static> Endpoint for GatedService<S> {
    async fn dispatch(&self, frame: Frame) -> Option<Response> {
        let op = frame.operation();
        if !self.gate.permits(op) {
            debug!("Node is inactive. Blocking request for method: {:?}", op);
            return None;
        }

        let response = match frame {
            Frame::Request(request) => {
                self.service.deliver_request(request).await;
                Response::Empty
            }
            Frame::Reply(reply) => {
                self.service.deliver_reply(reply).await;
                Response::Empty
            }
            Frame::SetActive { active } => Response::Ack(self.service.set_active(active).await),
            Frame::GetLog => Response::Text(self.service.get_log().await),
            Frame::GetDb => Response::Text(self.service.get_db().await),
            Frame::GetStatus { sequence } => Response::Text(self.service.get_status(sequence).await),
            Frame::GetNewViews => Response::Text(self.service.get_new_views().await),
        };
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replix_common::{
        message::{ClientReply, ClientRequest, Command},
        NodeId,
    };
    use std::sync::Mutex;

    struct Recorder {
        gate: Arc<ActivityGate>,
        seen: Mutex<Vec<Operation>>,
    }

    #[async_trait]
    impl ProtocolService for Recorder {
        async fn deliver_request(&self, _request: ClientRequest) {
            self.seen.lock().unwrap().push(Operation::Request);
        }
        async fn deliver_reply(&self, _reply: ClientReply) {
            self.seen.lock().unwrap().push(Operation::Reply);
        }
        async fn set_active(&self, active: bool) -> bool {
            self.gate.set_active(active);
            true
        }
        async fn get_log(&self) -> String {
            "log".into()
        }
        async fn get_db(&self) -> String {
            "db".into()
        }
        async fn get_status(&self, _sequence: u64) -> String {
            "X".into()
        }
        async fn get_new_views(&self) -> String {
            String::new()
        }
    }

    fn gated(initial: ActivityState) -> (Arc<ActivityGate>, Arc<Recorder>, GatedService<Recorder>) {
        let gate = Arc::new(ActivityGate::new(initial));
        let recorder = Arc::new(Recorder { gate: gate.clone(), seen: Mutex::new(Vec::new()) });
        let service = GatedService::new(gate.clone(), recorder.clone());
        (gate, recorder, service)
    }

    fn request_frame() -> Frame {
        Frame::Request(ClientRequest::new(
            NodeId::from("C1"),
            1,
            Command::Balance { account: "C1".into() },
        ))
    }

    #[test]
    fn test_permits_follows_allow_list() {
        let gate = ActivityGate::new(ActivityState::Inactive);
        assert!(!gate.permits(Operation::Request));
        assert!(!gate.permits(Operation::Reply));
        for op in ALLOWED_WHILE_INACTIVE {
            assert!(gate.permits(*op));
        }

        gate.set_active(true);
        assert!(gate.permits(Operation::Request));
        assert_eq!(gate.state(), ActivityState::Active);
    }

    #[test]
    fn test_set_active_is_idempotent() {
        let gate = ActivityGate::new(ActivityState::Active);
        assert!(gate.set_active(true));
        assert!(gate.set_active(false));
        assert!(!gate.set_active(false));
        assert!(!gate.is_active());
    }

    #[tokio::test]
    async fn test_inactive_swallows_protocol_traffic() {
        let (_gate, recorder, service) = gated(ActivityState::Inactive);

        assert_eq!(service.dispatch(request_frame()).await, None);
        assert!(recorder.seen.lock().unwrap().is_empty());

        assert_eq!(service.dispatch(Frame::GetLog).await, Some(Response::Text("log".into())));
        assert_eq!(
            service.dispatch(Frame::GetStatus { sequence: 4 }).await,
            Some(Response::Text("X".into()))
        );
    }

    #[tokio::test]
    async fn test_reactivation_through_gate() {
        let (gate, recorder, service) = gated(ActivityState::Inactive);

        let ack = service.dispatch(Frame::SetActive { active: true }).await;
        assert_eq!(ack, Some(Response::Ack(true)));
        assert!(gate.is_active());

        assert_eq!(service.dispatch(request_frame()).await, Some(Response::Empty));
        assert_eq!(*recorder.seen.lock().unwrap(), vec![Operation::Request]);
    }
}
