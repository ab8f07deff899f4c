//! Fixed-size encoder worker pool.
//!
//! Each worker is an OS thread owning one loaded backend, so a crash
//! affects only its slot. Requests carry unique ids, are routed
//! round-robin over live slots, and replies come back on a shared results
//! channel demultiplexed by id. A reply reporting excessive memory, a
//! worker panic, or a dead inbox schedules a per-slot restart guarded by a
//! single-flight future.

pub mod backend;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

pub use backend::BackendFactory;
pub use backend::EncodeReply;
pub use backend::EncodeRequest;
pub use backend::EncoderBackend;

use self::worker::PoolEvent;
use self::worker::WorkerMessage;
use crate::config::PoolSettings;
use crate::error::Result;
use crate::error::RetrievalErr;
use crate::types::Encoding;
use crate::types::LateInteractionMatrix;

/// Resolved runtime settings for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub request_timeout: Duration,
    pub max_worker_rss_bytes: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            request_timeout: Duration::from_secs(90),
            max_worker_rss_bytes: 6 * 1024 * 1024 * 1024,
        }
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            workers: if settings.workers == 0 {
                default_worker_count()
            } else {
                settings.workers
            },
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            max_worker_rss_bytes: settings.max_worker_rss_bytes,
        }
    }
}

/// `clamp(logical_cpus - 1, 1, 4)`.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .clamp(1, 4)
}

const MAX_ROUTE_ATTEMPTS: usize = 4;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type RestartFuture = Shared<BoxFuture<'static, bool>>;

/// Handle to the encoder worker pool. Cheap to clone.
#[derive(Clone)]
pub struct EncoderPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    factory: BackendFactory,
    config: PoolConfig,
    state: StdMutex<PoolState>,
    events_tx: UnboundedSender<PoolEvent>,
    shutdown: AtomicBool,
}

struct PoolState {
    slots: Vec<Slot>,
    pending: HashMap<u64, PendingRequest>,
    next_request_id: u64,
    cursor: usize,
    restarts_completed: u64,
}

#[derive(Default)]
struct Slot {
    sender: Option<std::sync::mpsc::Sender<WorkerMessage>>,
    handle: Option<std::thread::JoinHandle<()>>,
    restart: Option<RestartFuture>,
}

struct PendingRequest {
    slot: usize,
    reply_tx: oneshot::Sender<Result<EncodeReply>>,
}

enum Route {
    Dispatch {
        slot: usize,
        sender: std::sync::mpsc::Sender<WorkerMessage>,
    },
    AwaitRestart(RestartFuture),
    Closed,
}

impl EncoderPool {
    /// Start the pool. Must run inside a tokio runtime; the reply
    /// demultiplexer is spawned here.
    pub fn new(factory: BackendFactory, config: PoolConfig) -> Result<Self> {
        let workers = config.workers.max(1);
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

        let mut slots = Vec::with_capacity(workers);
        slots.resize_with(workers, Slot::default);

        let shared = Arc::new(PoolShared {
            factory,
            config,
            state: StdMutex::new(PoolState {
                slots,
                pending: HashMap::new(),
                next_request_id: 1,
                cursor: 0,
                restarts_completed: 0,
            }),
            events_tx,
            shutdown: AtomicBool::new(false),
        });

        for slot in 0..workers {
            let backend = (shared.factory)(slot)?;
            if !shared.install_worker(slot, backend) {
                return Err(RetrievalErr::WorkerFailed {
                    cause: format!("failed to start worker {slot}"),
                });
            }
        }

        let _ = tokio::spawn(demux_loop(Arc::downgrade(&shared), events_rx));
        tracing::info!(workers, "Encoder pool started");
        Ok(Self { shared })
    }

    pub fn worker_count(&self) -> usize {
        self.shared.lock_state().slots.len()
    }

    /// Completed slot restarts since startup.
    pub fn restarts_completed(&self) -> u64 {
        self.shared.lock_state().restarts_completed
    }

    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        match self
            .request(EncodeRequest::EmbedSingle(text.to_string()))
            .await?
        {
            EncodeReply::Vector(vector) => Ok(vector),
            other => Err(unexpected_reply("vector", &other)),
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Encoding>> {
        match self.request(EncodeRequest::EmbedBatch(texts)).await? {
            EncodeReply::Encodings(encodings) => Ok(encodings),
            other => Err(unexpected_reply("encodings", &other)),
        }
    }

    pub async fn encode_query(&self, text: &str) -> Result<Encoding> {
        match self
            .request(EncodeRequest::EncodeQuery(text.to_string()))
            .await?
        {
            EncodeReply::Query(encoding) => Ok(encoding),
            other => Err(unexpected_reply("query encoding", &other)),
        }
    }

    pub async fn rerank(
        &self,
        query: LateInteractionMatrix,
        docs: Vec<LateInteractionMatrix>,
    ) -> Result<Vec<f32>> {
        match self.request(EncodeRequest::Rerank { query, docs }).await? {
            EncodeReply::Scores(scores) => Ok(scores),
            other => Err(unexpected_reply("scores", &other)),
        }
    }

    /// Dispatch one request and await its reply or deadline.
    pub async fn request(&self, request: EncodeRequest) -> Result<EncodeReply> {
        let mut request = Some(request);
        for _ in 0..MAX_ROUTE_ATTEMPTS {
            match self.route() {
                Route::Dispatch { slot, sender } => {
                    let request = request.take().ok_or(RetrievalErr::PoolClosed)?;
                    return self.dispatch(slot, sender, request).await;
                }
                Route::AwaitRestart(restart) => {
                    restart.await;
                }
                Route::Closed => return Err(RetrievalErr::PoolClosed),
            }
        }
        Err(RetrievalErr::WorkerFailed {
            cause: "no live worker after restart waits".to_string(),
        })
    }

    /// Round-robin over live slots; a slot under restart yields its
    /// restart future instead.
    fn route(&self) -> Route {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Route::Closed;
        }
        let mut state = self.shared.lock_state();
        let n = state.slots.len();
        let mut restart = None;
        for i in 0..n {
            let idx = (state.cursor + i) % n;
            if let Some(sender) = state.slots[idx].sender.clone() {
                state.cursor = (idx + 1) % n;
                return Route::Dispatch { slot: idx, sender };
            }
            if restart.is_none() {
                restart = state.slots[idx].restart.clone();
            }
        }
        match restart {
            Some(future) => Route::AwaitRestart(future),
            None => Route::Closed,
        }
    }

    async fn dispatch(
        &self,
        slot: usize,
        sender: std::sync::mpsc::Sender<WorkerMessage>,
        request: EncodeRequest,
    ) -> Result<EncodeReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = {
            let mut state = self.shared.lock_state();
            let id = state.next_request_id;
            state.next_request_id += 1;
            state.pending.insert(id, PendingRequest { slot, reply_tx });
            id
        };

        if sender.send(WorkerMessage { id, request }).is_err() {
            self.shared.lock_state().pending.remove(&id);
            PoolShared::schedule_restart(&self.shared, slot);
            return Err(RetrievalErr::WorkerRestarting {
                slot,
                reason: "worker inbox closed".to_string(),
            });
        }

        let timeout = self.shared.config.request_timeout;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RetrievalErr::WorkerRestarting {
                slot,
                reason: "reply channel closed".to_string(),
            }),
            Err(_) => {
                // Drop the pending entry; a late reply is discarded by id
                // lookup. The worker is not killed for one timeout.
                self.shared.lock_state().pending.remove(&id);
                Err(RetrievalErr::WorkerTimeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Restart `slot` (or join a restart already in flight). Resolves to
    /// true once a fresh worker occupies the slot.
    pub async fn restart_slot(&self, slot: usize) -> bool {
        match PoolShared::schedule_restart(&self.shared, slot) {
            Some(restart) => restart.await,
            None => false,
        }
    }

    /// Stop all workers: close inboxes, fail pending requests, wait a
    /// short grace period for threads to drain, then detach. Idempotent.
    pub async fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let (handles, pending) = {
            let mut state = self.shared.lock_state();
            let handles: Vec<std::thread::JoinHandle<()>> = state
                .slots
                .iter_mut()
                .filter_map(|slot| {
                    slot.sender = None;
                    slot.handle.take()
                })
                .collect();
            let pending: Vec<PendingRequest> =
                state.pending.drain().map(|(_, pending)| pending).collect();
            (handles, pending)
        };
        for entry in pending {
            let _ = entry.reply_tx.send(Err(RetrievalErr::PoolClosed));
        }
        let join = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        });
        if tokio::time::timeout(SHUTDOWN_GRACE, join).await.is_err() {
            tracing::warn!("Encoder workers did not stop within grace period; detaching");
        }
    }
}

impl PoolShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a worker thread into `slot`.
    fn install_worker(&self, slot: usize, backend: Box<dyn EncoderBackend>) -> bool {
        let (tx, rx) = std::sync::mpsc::channel();
        match worker::spawn_worker(slot, backend, rx, self.events_tx.clone()) {
            Ok(handle) => {
                let mut state = self.lock_state();
                state.slots[slot].sender = Some(tx);
                state.slots[slot].handle = Some(handle);
                true
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Failed to spawn worker thread");
                false
            }
        }
    }

    /// Single-flight restart: the first caller installs the restart
    /// future under the state lock (never held across an await); later
    /// callers join the same future.
    fn schedule_restart(shared: &Arc<PoolShared>, slot: usize) -> Option<RestartFuture> {
        if shared.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let mut state = shared.lock_state();
        if slot >= state.slots.len() {
            return None;
        }
        if let Some(existing) = &state.slots[slot].restart {
            return Some(existing.clone());
        }

        // Reject in-flight requests on this slot before tearing it down.
        let stale: Vec<u64> = state
            .pending
            .iter()
            .filter(|(_, p)| p.slot == slot)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(entry) = state.pending.remove(&id) {
                let _ = entry.reply_tx.send(Err(RetrievalErr::WorkerRestarting {
                    slot,
                    reason: "worker restarted".to_string(),
                }));
            }
        }

        // Closing the inbox terminates the worker thread.
        state.slots[slot].sender = None;
        let old_handle = state.slots[slot].handle.take();

        let weak = Arc::downgrade(shared);
        let restart: RestartFuture = async move { rebuild_slot(weak, slot, old_handle).await }
            .boxed()
            .shared();
        state.slots[slot].restart = Some(restart.clone());
        drop(state);

        // Drive the restart even if no caller awaits it.
        let _ = tokio::spawn(restart.clone());
        Some(restart)
    }
}

/// Join the old worker, build a fresh backend, and install it.
async fn rebuild_slot(
    weak: Weak<PoolShared>,
    slot: usize,
    old_handle: Option<std::thread::JoinHandle<()>>,
) -> bool {
    if let Some(handle) = old_handle {
        let _ = tokio::task::spawn_blocking(move || {
            let _ = handle.join();
        })
        .await;
    }

    let Some(shared) = weak.upgrade() else {
        return false;
    };
    if shared.shutdown.load(Ordering::Acquire) {
        shared.lock_state().slots[slot].restart = None;
        return false;
    }

    let factory = Arc::clone(&shared.factory);
    let built = tokio::task::spawn_blocking(move || factory(slot)).await;
    let backend = match built {
        Ok(Ok(backend)) => backend,
        Ok(Err(e)) => {
            tracing::error!(slot, error = %e, "Backend rebuild failed; slot disabled");
            shared.lock_state().slots[slot].restart = None;
            return false;
        }
        Err(e) => {
            tracing::error!(slot, error = %e, "Backend rebuild task failed; slot disabled");
            shared.lock_state().slots[slot].restart = None;
            return false;
        }
    };

    let installed = shared.install_worker(slot, backend);
    {
        let mut state = shared.lock_state();
        state.slots[slot].restart = None;
        if installed {
            state.restarts_completed += 1;
        }
    }
    tracing::info!(slot, installed, "Worker slot restarted");
    installed
}

/// Demultiplex worker replies by request id and watch for memory
/// pressure and worker exits.
async fn demux_loop(weak: Weak<PoolShared>, mut events_rx: UnboundedReceiver<PoolEvent>) {
    while let Some(event) = events_rx.recv().await {
        let Some(shared) = weak.upgrade() else {
            break;
        };
        match event {
            PoolEvent::Reply {
                id,
                slot,
                result,
                rss_bytes,
            } => {
                let entry = shared.lock_state().pending.remove(&id);
                match entry {
                    Some(entry) => {
                        let result =
                            result.map_err(|cause| RetrievalErr::WorkerFailed { cause });
                        let _ = entry.reply_tx.send(result);
                    }
                    None => tracing::debug!(id, slot, "Discarding late worker reply"),
                }
                if rss_bytes > shared.config.max_worker_rss_bytes {
                    tracing::warn!(
                        slot,
                        rss_bytes,
                        limit = shared.config.max_worker_rss_bytes,
                        "Worker over memory limit, scheduling restart"
                    );
                    PoolShared::schedule_restart(&shared, slot);
                }
            }
            PoolEvent::Exited { slot, error } => {
                if shared.shutdown.load(Ordering::Acquire) {
                    continue;
                }
                tracing::warn!(slot, error = ?error, "Worker exited, scheduling restart");
                PoolShared::schedule_restart(&shared, slot);
            }
        }
    }
}

fn unexpected_reply(expected: &str, got: &EncodeReply) -> RetrievalErr {
    RetrievalErr::WorkerFailed {
        cause: format!("expected {expected} reply, got {got:?}"),
    }
}
