use std::{
    collections::HashMap,
    mem,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use futures::FutureExt;
use replix_common::{InfrastructureError, NodeId};
use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{timeout_at, Instant},
};
use tracing::{debug, error, info, warn};

/// Work unit that knows which peer queue it belongs to.
pub trait Routable: Send + 'static {
    fn route_key(&self) -> NodeId;
}

/// Performs one queued unit. Called from the peer's worker, one unit at a
/// time.
#[async_trait]
pub trait Delivery<E>: Send + Sync {
    async fn deliver(&self, event: E) -> Result<(), InfrastructureError>;
}

/// `outstanding = submitted - completed - failed`, never below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStatus {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub outstanding: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Per-peer FIFO dispatcher.
///
/// Each peer gets its own unbounded queue and worker, created on first use.
/// Units for one peer are delivered strictly in submission order; there is
/// no ordering between peers.
pub struct PeerDispatcher<E> {
    queues: Mutex<HashMap<NodeId, mpsc::UnboundedSender<E>>>,
    workers: Mutex<JoinSet<()>>,
    delivery: Arc<dyn Delivery<E>>,
    counters: Arc<Counters>,
    closed: AtomicBool,
}

impl<E: Routable> PeerDispatcher<E> {
    pub fn new(delivery: Arc<dyn Delivery<E>>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            workers: Mutex::new(JoinSet::new()),
            delivery,
            counters: Arc::new(Counters::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues `event` on its peer's queue without waiting for delivery.
    pub fn submit(&self, event: E) -> Result<(), InfrastructureError> {
        let peer = event.route_key();
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the queue lock so no worker is spawned after `close`.
        if self.closed.load(Ordering::SeqCst) {
            return Err(InfrastructureError::PoolClosed("dispatcher"));
        }
        let queue = queues
            .entry(peer.clone())
            .or_insert_with(|| self.spawn_worker(peer.clone()));

        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        if queue.send(event).is_err() {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            queues.remove(&peer);
            return Err(InfrastructureError::SendError(peer));
        }
        Ok(())
    }

    fn spawn_worker(&self, peer: NodeId) -> mpsc::UnboundedSender<E> {
        let (tx, mut rx) = mpsc::unbounded_channel::<E>();
        let delivery = Arc::clone(&self.delivery);
        let counters = Arc::clone(&self.counters);

        debug!("Opening dispatch queue for {}", peer);
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(async move {
                while let Some(event) = rx.recv().await {
                    let outcome = AssertUnwindSafe(delivery.deliver(event)).catch_unwind().await;
                    let counter = match outcome {
                        Ok(Ok(())) => &counters.completed,
                        Ok(Err(_)) => &counters.failed,
                        Err(_) => {
                            error!("💥 Delivery to {} panicked", peer);
                            &counters.failed
                        }
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                debug!("Dispatch queue for {} drained", peer);
            });
        tx
    }

    pub fn snapshot_status(&self) -> DispatchStatus {
        let submitted = self.counters.submitted.load(Ordering::SeqCst);
        let completed = self.counters.completed.load(Ordering::SeqCst);
        let failed = self.counters.failed.load(Ordering::SeqCst);
        DispatchStatus {
            submitted,
            completed,
            failed,
            outstanding: submitted.saturating_sub(completed + failed),
        }
    }

    pub fn queue_count(&self) -> usize {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Stops intake and drops every queue, then waits until `deadline` for
    /// the units already queued to drain. Workers still running at the
    /// deadline are aborted and `false` is returned.
    pub async fn close(&self, deadline: Instant) -> bool {
        {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::SeqCst);
            queues.clear();
        }
        let mut workers = mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));

        info!("Draining {} dispatch queues", workers.len());
        let drained = timeout_at(deadline, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Dispatch queues did not drain in time, aborting {} workers ({:?})",
                workers.len(),
                self.snapshot_status()
            );
            workers.abort_all();
            return false;
        }
        true
    }
}
