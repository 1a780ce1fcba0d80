//! Fixed-size pool of chunk worker threads with per-request tickets.
//!
//! Each worker owns a private FIFO job channel. [`WorkerPool::dispatch`]
//! picks a worker round-robin, records the request in a pending table and
//! hands the caller a [`ChunkTicket`]. Workers report back on one shared
//! event channel drained by a router thread, which settles tickets by id.
//!
//! A panic inside a worker is caught at the thread boundary. The router then
//! starts a fresh worker in the same slot and rejects only the requests the
//! crashed worker owned, so the pool never shrinks.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::chunk::{ChunkData, ChunkGenerator, ChunkRequest, ChunkResponse, ChunkSource, GeneratorSettings};
use crate::error::ChunkError;

/// Smallest automatically chosen pool size.
pub const MIN_AUTO_WORKERS: usize = 2;
/// Largest automatically chosen pool size.
pub const MAX_AUTO_WORKERS: usize = 4;

/// Pool size used when none is configured: one core left for the caller,
/// clamped to `[MIN_AUTO_WORKERS, MAX_AUTO_WORKERS]`.
pub fn default_pool_size() -> usize {
    num_cpus::get()
        .saturating_sub(1)
        .clamp(MIN_AUTO_WORKERS, MAX_AUTO_WORKERS)
}

/// Construction options for [`WorkerPool`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoolOptions {
    /// Number of workers. `None` uses [`default_pool_size`].
    pub size: Option<usize>,
    /// Deadline applied by [`ChunkTicket::wait`]. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

type Settle = Sender<Result<ChunkData, ChunkError>>;

struct Job {
    request: ChunkRequest,
    cancelled: Arc<AtomicBool>,
}

enum WorkerEvent {
    Reply {
        slot: usize,
        response: ChunkResponse,
    },
    Fatal {
        slot: usize,
        generation: u64,
        reason: String,
    },
    Shutdown,
}

struct Pending {
    settle: Settle,
    slot: usize,
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

struct WorkerSlot {
    generation: u64,
    jobs: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

struct Shared {
    source: Arc<dyn ChunkSource>,
    pending: DashMap<u64, Pending>,
    slots: Mutex<Vec<WorkerSlot>>,
    events: Sender<WorkerEvent>,
    next_generation: AtomicU64,
    replacements: AtomicU64,
    shutting_down: AtomicBool,
    /// Worker spawns allowed before `spawn_worker` reports failure.
    #[cfg(test)]
    spawn_budget: AtomicUsize,
}

impl Shared {
    /// Settle request `id` if it is still pending. Returns whether it was.
    fn settle(&self, id: u64, result: Result<ChunkData, ChunkError>) -> bool {
        match self.pending.remove(&id) {
            Some((_, pending)) => {
                pending.cancelled.store(true, Ordering::Relaxed);
                // The ticket may already be gone; nobody is left to tell.
                let _ = pending.settle.send(result);
                true
            }
            None => false,
        }
    }

    fn spawn_worker(self: &Arc<Self>, slot: usize) -> Result<WorkerSlot, ChunkError> {
        #[cfg(test)]
        {
            if self
                .spawn_budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(ChunkError::WorkerSpawn {
                    worker: slot,
                    reason: "spawn budget exhausted".to_string(),
                });
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let events = self.events.clone();
        let source = Arc::clone(&self.source);

        let handle = thread::Builder::new()
            .name(format!("chunk-worker-{slot}"))
            .spawn(move || run_worker(slot, generation, jobs_rx, events, source))
            .map_err(|e| ChunkError::WorkerSpawn {
                worker: slot,
                reason: e.to_string(),
            })?;

        debug!(slot, generation, "chunk worker started");
        Ok(WorkerSlot {
            generation,
            jobs: jobs_tx,
            handle: Some(handle),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_worker(
    slot: usize,
    generation: u64,
    jobs: Receiver<Job>,
    events: Sender<WorkerEvent>,
    source: Arc<dyn ChunkSource>,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        while let Ok(job) = jobs.recv() {
            if job.cancelled.load(Ordering::Relaxed) {
                trace!(slot, id = job.request.id, "skipping cancelled request");
                continue;
            }
            let result = source.generate(&job.request);
            let response = ChunkResponse {
                id: job.request.id,
                result,
            };
            if events.send(WorkerEvent::Reply { slot, response }).is_err() {
                break;
            }
        }
    }));

    if let Err(payload) = outcome {
        // Close the job channel before reporting so that no dispatch can
        // slip a job in after the router has swept this worker's requests.
        drop(jobs);
        let reason = panic_message(&*payload);
        let _ = events.send(WorkerEvent::Fatal {
            slot,
            generation,
            reason,
        });
    }
}

fn route(shared: Arc<Shared>, events: Receiver<WorkerEvent>) {
    while let Ok(event) = events.recv() {
        match event {
            WorkerEvent::Reply { slot, response } => {
                let id = response.id;
                if shared.settle(id, response.result) {
                    trace!(id, slot, "chunk request settled");
                } else {
                    trace!(id, slot, "dropping reply for request that already settled");
                }
            }
            WorkerEvent::Fatal {
                slot,
                generation,
                reason,
            } => recover_slot(&shared, slot, generation, &reason),
            WorkerEvent::Shutdown => break,
        }
    }
}

fn recover_slot(shared: &Arc<Shared>, slot: usize, generation: u64, reason: &str) {
    error!(slot, generation, reason, "chunk worker crashed");

    // The slot must hold a live worker before any caller learns of the
    // crash, otherwise an immediate re-dispatch hits the dead channel.
    let old_handle = replace_worker(shared, slot, generation);

    let orphaned: Vec<u64> = shared
        .pending
        .iter()
        .filter(|entry| entry.slot == slot && entry.generation == generation)
        .map(|entry| *entry.key())
        .collect();
    if !orphaned.is_empty() {
        warn!(slot, rejected = orphaned.len(), "rejecting requests owned by crashed worker");
    }
    for id in orphaned {
        shared.settle(
            id,
            Err(ChunkError::WorkerFatal {
                worker: slot,
                reason: reason.to_string(),
            }),
        );
    }

    if let Some(handle) = old_handle {
        // The panic was already caught; the thread is just returning.
        let _ = handle.join();
    }
}

/// Swap a fresh worker into `slot` if it still holds `generation`.
/// Returns the crashed worker's handle for joining.
fn replace_worker(shared: &Arc<Shared>, slot: usize, generation: u64) -> Option<JoinHandle<()>> {
    let mut slots = shared.slots.lock();
    if shared.shutting_down.load(Ordering::Acquire) {
        return None;
    }
    let current = slots.get_mut(slot)?;
    if current.generation != generation {
        return None;
    }
    match shared.spawn_worker(slot) {
        Ok(fresh) => {
            let old = std::mem::replace(current, fresh);
            shared.replacements.fetch_add(1, Ordering::Relaxed);
            warn!(slot, "replaced crashed chunk worker");
            old.handle
        }
        Err(e) => {
            error!(slot, error = %e, "failed to replace crashed chunk worker");
            None
        }
    }
}

/// Pool of chunk worker threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
    size: usize,
    request_timeout: Option<Duration>,
    next_id: AtomicU64,
    next_slot: AtomicUsize,
    events_rx: Mutex<Option<Receiver<WorkerEvent>>>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool that runs `source` on every worker.
    ///
    /// No threads are started until [`warm_up`](Self::warm_up) or the first
    /// [`dispatch`](Self::dispatch).
    pub fn new(source: Arc<dyn ChunkSource>, options: PoolOptions) -> Self {
        let size = options.size.unwrap_or_else(default_pool_size).max(1);
        let (events_tx, events_rx) = unbounded();

        Self {
            shared: Arc::new(Shared {
                source,
                pending: DashMap::new(),
                slots: Mutex::new(Vec::with_capacity(size)),
                events: events_tx,
                next_generation: AtomicU64::new(0),
                replacements: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                #[cfg(test)]
                spawn_budget: AtomicUsize::new(usize::MAX),
            }),
            size,
            request_timeout: options.request_timeout,
            next_id: AtomicU64::new(0),
            next_slot: AtomicUsize::new(0),
            events_rx: Mutex::new(Some(events_rx)),
            router: Mutex::new(None),
        }
    }

    /// Create a pool running the terrain [`ChunkGenerator`].
    pub fn with_generator(settings: GeneratorSettings, options: PoolOptions) -> Self {
        Self::new(Arc::new(ChunkGenerator::new(settings)), options)
    }

    /// Start all workers now instead of on first dispatch.
    pub fn warm_up(&self) -> Result<(), ChunkError> {
        self.ensure_started()
    }

    fn ensure_started(&self) -> Result<(), ChunkError> {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(ChunkError::PoolShutDown);
        }

        let mut slots = self.shared.slots.lock();
        if !slots.is_empty() {
            return Ok(());
        }
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(ChunkError::PoolShutDown);
        }

        self.ensure_router()?;

        let mut workers = Vec::with_capacity(self.size);
        for slot in 0..self.size {
            match self.shared.spawn_worker(slot) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    error!(slot, error = %e, "chunk worker pool failed to start");
                    for worker in workers {
                        drop(worker.jobs);
                        if let Some(handle) = worker.handle {
                            let _ = handle.join();
                        }
                    }
                    return Err(e);
                }
            }
        }
        *slots = workers;

        info!(workers = self.size, "chunk worker pool started");
        Ok(())
    }

    /// Start the router thread if it is not running yet.
    fn ensure_router(&self) -> Result<(), ChunkError> {
        let mut router = self.router.lock();
        if router.is_some() {
            return Ok(());
        }
        let Some(events) = self.events_rx.lock().clone() else {
            return Err(ChunkError::PoolShutDown);
        };
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("chunk-router".into())
            .spawn(move || route(shared, events))
            .map_err(|e| ChunkError::WorkerSpawn {
                worker: usize::MAX,
                reason: e.to_string(),
            })?;
        *router = Some(handle);
        Ok(())
    }

    /// Queue a request on the next worker and return a ticket for its result.
    ///
    /// The request's `id` is overwritten with a fresh, strictly increasing id.
    pub fn dispatch(&self, mut request: ChunkRequest) -> Result<ChunkTicket, ChunkError> {
        self.ensure_started()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        request.id = id;
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.size;
        let (settle_tx, settle_rx) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let sent = {
            let slots = self.shared.slots.lock();
            let Some(worker) = slots.get(slot) else {
                return Err(ChunkError::PoolShutDown);
            };
            self.shared.pending.insert(
                id,
                Pending {
                    settle: settle_tx,
                    slot,
                    generation: worker.generation,
                    cancelled: Arc::clone(&cancelled),
                },
            );
            worker
                .jobs
                .send(Job {
                    request,
                    cancelled: Arc::clone(&cancelled),
                })
                .is_ok()
        };

        if sent {
            trace!(id, slot, "chunk request dispatched");
        } else {
            self.shared.settle(
                id,
                Err(ChunkError::WorkerFatal {
                    worker: slot,
                    reason: "worker stopped accepting jobs".to_string(),
                }),
            );
        }

        Ok(ChunkTicket {
            id,
            receiver: settle_rx,
            shared: Arc::clone(&self.shared),
            default_timeout: self.request_timeout,
        })
    }

    /// Reject a pending request with [`ChunkError::Cancelled`].
    ///
    /// Returns `false` if the request already settled. A request a worker has
    /// already started still runs to completion; its result is discarded.
    pub fn cancel(&self, id: u64) -> bool {
        self.shared.settle(id, Err(ChunkError::Cancelled { id }))
    }

    /// Configured number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the workers have been started.
    pub fn is_started(&self) -> bool {
        !self.shared.slots.lock().is_empty()
    }

    /// Workers whose threads are currently running.
    pub fn live_workers(&self) -> usize {
        self.shared
            .slots
            .lock()
            .iter()
            .filter(|slot| slot.is_alive())
            .count()
    }

    /// Requests dispatched but not yet settled.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Number of crashed workers that have been replaced.
    pub fn replacements(&self) -> u64 {
        self.shared.replacements.load(Ordering::Relaxed)
    }

    /// Stop the router and all workers.
    ///
    /// Workers finish the job they are running; everything still pending is
    /// rejected with [`ChunkError::PoolShutDown`]. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.shared.events.send(WorkerEvent::Shutdown);
        if let Some(router) = self.router.lock().take() {
            let _ = router.join();
        }
        // Last receiver; workers stop at their next reply.
        drop(self.events_rx.lock().take());

        let slots = std::mem::take(&mut *self.shared.slots.lock());
        for slot in slots {
            drop(slot.jobs);
            if let Some(handle) = slot.handle {
                let _ = handle.join();
            }
        }

        let leftover: Vec<u64> = self.shared.pending.iter().map(|e| *e.key()).collect();
        for id in &leftover {
            self.shared.settle(*id, Err(ChunkError::PoolShutDown));
        }
        info!(rejected = leftover.len(), "chunk worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to one dispatched request.
///
/// Dropping a ticket does not cancel the request; the result is discarded
/// when it arrives.
pub struct ChunkTicket {
    id: u64,
    receiver: Receiver<Result<ChunkData, ChunkError>>,
    shared: Arc<Shared>,
    default_timeout: Option<Duration>,
}

impl ChunkTicket {
    /// Id assigned to the request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the request settles, honouring the pool's request timeout.
    pub fn wait(self) -> Result<ChunkData, ChunkError> {
        match self.default_timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.receiver.recv().unwrap_or(Err(ChunkError::PoolShutDown)),
        }
    }

    /// Block for at most `timeout`.
    ///
    /// On expiry the request is removed from the pending table, so a late
    /// reply is discarded, and [`ChunkError::Timeout`] is returned.
    pub fn wait_timeout(self, timeout: Duration) -> Result<ChunkData, ChunkError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let error = ChunkError::Timeout {
                    id: self.id,
                    waited: timeout,
                };
                if self.shared.settle(self.id, Err(error.clone())) {
                    warn!(id = self.id, ?timeout, "chunk request timed out");
                }
                // Either our timeout or a result that raced it is now queued.
                self.receiver.recv().unwrap_or(Err(error))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ChunkError::PoolShutDown),
        }
    }

    /// Take the result if it has already arrived, otherwise hand the ticket back.
    #[allow(clippy::result_large_err)]
    pub fn try_take(self) -> Result<Result<ChunkData, ChunkError>, Self> {
        match self.receiver.try_recv() {
            Ok(result) => Ok(result),
            Err(crossbeam_channel::TryRecvError::Empty) => Err(self),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Ok(Err(ChunkError::PoolShutDown)),
        }
    }

    /// Cancel the request. Returns `false` if it had already settled.
    pub fn cancel(self) -> bool {
        self.shared
            .settle(self.id, Err(ChunkError::Cancelled { id: self.id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::height::TerrainType;
    use std::time::Instant;

    const CRASH_WIDTH: f64 = 666.0;
    const SLOW_WIDTH: f64 = 777.0;
    const SLOW_CRASH_WIDTH: f64 = 555.0;

    /// Terrain generator that panics or stalls on marker widths.
    struct Flaky {
        inner: ChunkGenerator,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: ChunkGenerator::new(GeneratorSettings {
                    erosion_droplets: 200,
                    ..Default::default()
                }),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ChunkSource for Flaky {
        fn generate(&self, request: &ChunkRequest) -> Result<ChunkData, ChunkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.width == CRASH_WIDTH {
                panic!("simulated worker failure");
            }
            if request.width == SLOW_WIDTH {
                thread::sleep(Duration::from_millis(400));
            }
            if request.width == SLOW_CRASH_WIDTH {
                thread::sleep(Duration::from_millis(200));
                panic!("simulated failure after stalling");
            }
            self.inner.generate(request)
        }
    }

    fn pool_of(size: usize, source: Arc<dyn ChunkSource>) -> WorkerPool {
        WorkerPool::new(
            source,
            PoolOptions {
                size: Some(size),
                request_timeout: Some(Duration::from_secs(60)),
            },
        )
    }

    fn small(terrain: TerrainType) -> ChunkRequest {
        ChunkRequest::new(16.0, 16.0, 8, 8).with_terrain(terrain)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_default_pool_size_is_clamped() {
        let size = default_pool_size();
        assert!((MIN_AUTO_WORKERS..=MAX_AUTO_WORKERS).contains(&size));
    }

    #[test]
    fn test_pool_starts_lazily() {
        let pool = pool_of(2, Flaky::new());
        assert!(!pool.is_started());
        assert_eq!(pool.live_workers(), 0);

        pool.warm_up().unwrap();
        assert!(pool.is_started());
        assert_eq!(pool.live_workers(), 2);

        // Warming twice is harmless.
        pool.warm_up().unwrap();
        assert_eq!(pool.live_workers(), 2);
    }

    #[test]
    fn test_ids_strictly_increase() {
        let pool = pool_of(2, Flaky::new());
        let tickets: Vec<_> = (0..5)
            .map(|_| pool.dispatch(small(TerrainType::Dunes)).unwrap())
            .collect();
        let ids: Vec<u64> = tickets.iter().map(ChunkTicket::id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing: {ids:?}");
        for ticket in tickets {
            ticket.wait().unwrap();
        }
    }

    #[test]
    fn test_more_requests_than_workers_all_resolve() {
        let pool = pool_of(2, Flaky::new());
        let tickets: Vec<_> = (0..16)
            .map(|i| {
                let terrain = TerrainType::ALL[i % TerrainType::ALL.len()];
                let req = small(terrain).with_offset(i as f64 * 16.0, 0.0);
                pool.dispatch(req).unwrap()
            })
            .collect();

        for ticket in tickets {
            let data = ticket.wait().expect("every request should resolve");
            assert_eq!(data.heights.len(), 81);
        }
        assert_eq!(pool.pending_count(), 0);
    }

    #[test]
    fn test_worker_crash_is_isolated_and_slot_replaced() {
        let pool = pool_of(2, Flaky::new());
        pool.warm_up().unwrap();

        let crash = pool
            .dispatch(ChunkRequest::new(CRASH_WIDTH, 16.0, 8, 8))
            .unwrap();
        let healthy = pool.dispatch(small(TerrainType::Islands)).unwrap();

        match crash.wait() {
            Err(ChunkError::WorkerFatal { worker, reason }) => {
                assert_eq!(worker, 0);
                assert!(reason.contains("simulated worker failure"));
            }
            other => panic!("expected worker crash, got {other:?}"),
        }
        assert!(healthy.wait().is_ok(), "other worker's request must succeed");

        assert!(wait_until(|| pool.replacements() == 1), "crashed worker was not replaced");
        assert!(wait_until(|| pool.live_workers() == 2), "pool should be back at full size");

        let followups: Vec<_> = (0..6)
            .map(|_| pool.dispatch(small(TerrainType::Volcano)).unwrap())
            .collect();
        for ticket in followups {
            assert!(ticket.wait().is_ok(), "requests after recovery should succeed");
        }
    }

    #[test]
    fn test_dispatch_right_after_crash_succeeds() {
        let pool = pool_of(1, Flaky::new());
        for round in 0..50 {
            let crash = pool
                .dispatch(ChunkRequest::new(CRASH_WIDTH, 16.0, 4, 4))
                .unwrap();
            assert!(
                matches!(crash.wait(), Err(ChunkError::WorkerFatal { worker: 0, .. })),
                "round {round}: crash request should be rejected"
            );

            // No waiting on replacements(): the slot is refilled before the
            // crash is reported.
            let next = pool.dispatch(small(TerrainType::Dunes)).unwrap();
            assert!(
                next.wait().is_ok(),
                "round {round}: request dispatched after a crash was rejected"
            );
        }
        assert_eq!(pool.replacements(), 50);
    }

    #[test]
    fn test_requests_queued_behind_crash_are_rejected() {
        let pool = pool_of(1, Flaky::new());
        let crash = pool
            .dispatch(ChunkRequest::new(SLOW_CRASH_WIDTH, 16.0, 4, 4))
            .unwrap();
        let queued_a = pool.dispatch(small(TerrainType::Dunes)).unwrap();
        let queued_b = pool.dispatch(small(TerrainType::Islands)).unwrap();

        for (name, ticket) in [("crash", crash), ("queued_a", queued_a), ("queued_b", queued_b)] {
            match ticket.wait() {
                Err(ChunkError::WorkerFatal { worker, reason }) => {
                    assert_eq!(worker, 0);
                    assert!(reason.contains("after stalling"), "{name}: reason was {reason}");
                }
                other => panic!("{name}: expected worker crash, got {other:?}"),
            }
        }

        assert!(wait_until(|| pool.replacements() == 1));
        assert_eq!(pool.pending_count(), 0);
        assert!(pool.dispatch(small(TerrainType::Volcano)).unwrap().wait().is_ok());
    }

    #[test]
    fn test_failed_start_leaves_pool_unstarted() {
        let pool = pool_of(3, Flaky::new());
        pool.shared.spawn_budget.store(1, Ordering::SeqCst);

        assert!(matches!(
            pool.warm_up(),
            Err(ChunkError::WorkerSpawn { worker: 1, .. })
        ));
        assert!(!pool.is_started(), "a partial worker set must not be kept");
        assert_eq!(pool.live_workers(), 0);
        assert!(matches!(
            pool.dispatch(small(TerrainType::Dunes)),
            Err(ChunkError::WorkerSpawn { .. })
        ));

        pool.shared.spawn_budget.store(usize::MAX, Ordering::SeqCst);
        let ticket = pool.dispatch(small(TerrainType::Dunes)).unwrap();
        assert!(ticket.wait().is_ok(), "retry after a failed start should route replies");
        assert_eq!(pool.live_workers(), 3);
    }

    #[test]
    fn test_invalid_request_does_not_kill_worker() {
        let pool = pool_of(1, Flaky::new());
        let bad = pool.dispatch(ChunkRequest::new(-4.0, 16.0, 8, 8)).unwrap();
        assert!(matches!(
            bad.wait(),
            Err(ChunkError::InvalidParameter { field: "width", .. })
        ));
        assert!(pool.dispatch(small(TerrainType::Dunes)).unwrap().wait().is_ok());
        assert_eq!(pool.replacements(), 0);
    }

    #[test]
    fn test_wait_timeout_settles_once() {
        let pool = pool_of(1, Flaky::new());
        let slow = pool.dispatch(ChunkRequest::new(SLOW_WIDTH, 16.0, 4, 4)).unwrap();
        let id = slow.id();

        match slow.wait_timeout(Duration::from_millis(20)) {
            Err(ChunkError::Timeout { id: timed_out, .. }) => assert_eq!(timed_out, id),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(pool.pending_count(), 0);
        assert!(!pool.cancel(id), "timed-out request must not settle twice");

        // The late reply is dropped and the worker keeps serving.
        assert!(pool.dispatch(small(TerrainType::Dunes)).unwrap().wait().is_ok());
    }

    #[test]
    fn test_pool_timeout_applies_to_wait() {
        let pool = WorkerPool::new(
            Flaky::new(),
            PoolOptions {
                size: Some(1),
                request_timeout: Some(Duration::from_millis(20)),
            },
        );
        let slow = pool.dispatch(ChunkRequest::new(SLOW_WIDTH, 16.0, 4, 4)).unwrap();
        assert!(matches!(slow.wait(), Err(ChunkError::Timeout { .. })));
    }

    #[test]
    fn test_cancelled_request_is_skipped() {
        let source = Flaky::new();
        let pool = pool_of(1, Arc::clone(&source) as Arc<dyn ChunkSource>);

        let slow = pool.dispatch(ChunkRequest::new(SLOW_WIDTH, 16.0, 4, 4)).unwrap();
        let doomed = pool.dispatch(small(TerrainType::Dunes)).unwrap();
        let after = pool.dispatch(small(TerrainType::Islands)).unwrap();

        assert!(doomed.cancel());
        assert!(slow.wait().is_ok());
        assert!(after.wait().is_ok());
        assert_eq!(
            source.calls.load(Ordering::SeqCst),
            2,
            "cancelled request should never reach the generator"
        );
    }

    #[test]
    fn test_cancel_by_id_rejects_waiting_ticket() {
        let pool = pool_of(1, Flaky::new());
        let slow = pool.dispatch(ChunkRequest::new(SLOW_WIDTH, 16.0, 4, 4)).unwrap();
        let queued = pool.dispatch(small(TerrainType::Dunes)).unwrap();

        assert!(pool.cancel(queued.id()));
        assert!(matches!(queued.wait(), Err(ChunkError::Cancelled { .. })));
        assert!(slow.wait().is_ok());
    }

    #[test]
    fn test_try_take_returns_ticket_until_ready() {
        let pool = pool_of(1, Flaky::new());
        let mut ticket = pool.dispatch(ChunkRequest::new(SLOW_WIDTH, 16.0, 4, 4)).unwrap();

        ticket = match ticket.try_take() {
            Err(ticket) => ticket,
            Ok(result) => panic!("slow request finished too early: {result:?}"),
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match ticket.try_take() {
                Ok(result) => {
                    assert!(result.is_ok());
                    break;
                }
                Err(pending) => {
                    assert!(Instant::now() < deadline, "request never settled");
                    ticket = pending;
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    #[test]
    fn test_shutdown_rejects_pending_and_new_work() {
        let pool = pool_of(1, Flaky::new());
        let slow = pool.dispatch(ChunkRequest::new(SLOW_WIDTH, 16.0, 4, 4)).unwrap();
        let queued = pool.dispatch(small(TerrainType::Dunes)).unwrap();

        pool.shutdown();

        assert!(matches!(slow.wait(), Err(ChunkError::PoolShutDown)));
        assert!(matches!(queued.wait(), Err(ChunkError::PoolShutDown)));
        assert!(matches!(
            pool.dispatch(small(TerrainType::Dunes)),
            Err(ChunkError::PoolShutDown)
        ));
        assert_eq!(pool.live_workers(), 0);
    }
}
