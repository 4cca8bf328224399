//! Execution domains of a node.
//!
//! Work is split by kind so that one kind cannot starve another:
//!
//! - **state**: one worker, strict FIFO. All balance mutations go here.
//! - **log**: one worker, strict FIFO. Replica log appends go here.
//! - **network**: bounded by `network_io_slots`.
//! - **streaming**: bounded by `max(5, peer count)`.
//! - **message**: elastic, one task per inbound message.
//!
//! Pools spawn onto the ambient tokio runtime, so [`ExecutionPools::new`]
//! must be called from inside one.

use std::{
    future::Future,
    mem,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use replix_common::{config::NodeConfig, InfrastructureError};
use tokio::{
    sync::{mpsc, oneshot, Semaphore},
    task::{JoinHandle, JoinSet},
    time::{timeout_at, Instant},
};
use tracing::{error, info, warn};

type Job = BoxFuture<'static, ()>;

const MIN_STREAMING_SLOTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub network_io_slots: usize,
    pub streaming_slots: usize,
}

impl PoolConfig {
    pub fn for_node(config: &NodeConfig) -> Self {
        let others = config.peer_ids_except(&config.node_id).len();
        Self {
            network_io_slots: config.network_io_slots(),
            streaming_slots: others.max(MIN_STREAMING_SLOTS),
        }
    }
}

/// Single worker draining an unbounded queue in submission order.
struct SerialLane {
    name: &'static str,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialLane {
    fn spawn(name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    error!("💥 Task panicked in {} pool", name);
                }
            }
        });

        Self {
            name,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    fn submit(&self, job: Job) -> Result<(), InfrastructureError> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| InfrastructureError::PoolClosed(self.name)),
            None => Err(InfrastructureError::PoolClosed(self.name)),
        }
    }

    /// Stops intake. Already queued jobs still run.
    fn close(&self) -> Option<JoinHandle<()>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.worker.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Concurrent pool, optionally capped by a semaphore.
struct TaskPool {
    name: &'static str,
    slots: Option<Arc<Semaphore>>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl TaskPool {
    fn bounded(name: &'static str, slots: usize) -> Self {
        Self::with_slots(name, Some(Arc::new(Semaphore::new(slots.max(1)))))
    }

    fn elastic(name: &'static str) -> Self {
        Self::with_slots(name, None)
    }

    fn with_slots(name: &'static str, slots: Option<Arc<Semaphore>>) -> Self {
        Self {
            name,
            slots,
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn submit(&self, job: Job) -> Result<(), InfrastructureError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(InfrastructureError::PoolClosed(self.name));
        }

        let slots = self.slots.clone();
        let name = self.name;
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            let _permit = match slots {
                Some(sem) => match sem.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!("{} pool semaphore closed, dropping task", name);
                        return;
                    }
                },
                None => None,
            };
            job.await;
        });
        Ok(())
    }

    fn close(&self) -> JoinSet<()> {
        self.closed.store(true, Ordering::SeqCst);
        mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// The five execution domains of a node.
pub struct ExecutionPools {
    config: PoolConfig,
    state: SerialLane,
    log: SerialLane,
    network: TaskPool,
    streaming: TaskPool,
    message: TaskPool,
}

impl ExecutionPools {
    pub fn new(config: PoolConfig) -> Self {
        info!(
            "🧵 Execution pools: state=1 log=1 network={} streaming={} message=elastic",
            config.network_io_slots, config.streaming_slots
        );
        Self {
            config,
            state: SerialLane::spawn("state"),
            log: SerialLane::spawn("log"),
            network: TaskPool::bounded("network", config.network_io_slots),
            streaming: TaskPool::bounded("streaming", config.streaming_slots),
            message: TaskPool::elastic("message"),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn submit_state_transition<F>(&self, task: F) -> Result<(), InfrastructureError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.submit(task.boxed())
    }

    pub fn submit_log_operation<F>(&self, task: F) -> Result<(), InfrastructureError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.log.submit(task.boxed())
    }

    pub fn submit_network_io<F>(&self, task: F) -> Result<(), InfrastructureError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.network.submit(task.boxed())
    }

    pub fn submit_streaming_io<F>(&self, task: F) -> Result<(), InfrastructureError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.streaming.submit(task.boxed())
    }

    pub fn submit_message_processing<F>(&self, task: F) -> Result<(), InfrastructureError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.message.submit(task.boxed())
    }

    /// Runs `task` on the state worker and waits for its output.
    pub async fn run_state_transition<F, T>(&self, task: F) -> Result<T, InfrastructureError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (job, rx) = with_reply(task);
        self.state.submit(job)?;
        rx.await.map_err(|_| dropped(self.state.name))
    }

    /// Runs `task` on the log worker and waits for its output.
    pub async fn run_log_operation<F, T>(&self, task: F) -> Result<T, InfrastructureError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (job, rx) = with_reply(task);
        self.log.submit(job)?;
        rx.await.map_err(|_| dropped(self.log.name))
    }

    /// Runs `task` in a network slot and waits for its output.
    pub async fn run_network_io<F, T>(&self, task: F) -> Result<T, InfrastructureError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (job, rx) = with_reply(task);
        self.network.submit(job)?;
        rx.await.map_err(|_| dropped(self.network.name))
    }

    /// Closes every domain, lets queued work finish for up to `grace`, then
    /// aborts what is left. Returns `true` when nothing had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        let mut clean = true;

        for pool in [&self.network, &self.streaming, &self.message] {
            info!("Shutting down {} pool", pool.name);
            let mut tasks = pool.close();
            let drained = timeout_at(deadline, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("{} pool did not terminate in time, aborting {} tasks", pool.name, tasks.len());
                tasks.abort_all();
                clean = false;
            }
        }

        for lane in [&self.log, &self.state] {
            info!("Shutting down {} pool", lane.name);
            let Some(mut worker) = lane.close() else { continue };
            if timeout_at(deadline, &mut worker).await.is_err() {
                warn!("{} pool did not terminate in time, aborting", lane.name);
                worker.abort();
                clean = false;
            }
        }

        clean
    }
}

fn with_reply<F, T>(task: F) -> (Job, oneshot::Receiver<T>)
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let job = async move {
        let _ = tx.send(task.await);
    }
    .boxed();
    (job, rx)
}

fn dropped(pool: &'static str) -> InfrastructureError {
    InfrastructureError::TaskFailed(pool, "task dropped before completing".into())
}
