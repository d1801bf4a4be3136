//! Tile worker pool.
//!
//! A fixed set of named threads pull [`TileJob`]s from a bounded FIFO queue.
//! Each worker owns its own [`TileLoader`] (for HTTP: a keep-alive fetcher
//! plus a PNG decoder), so no per-tile state is shared between threads.
//!
//! # Job Lifecycle
//!
//! ```text
//! recv ─► batch timeout elapsed? ─yes─► invalidate ─┐
//!              │ no                                 │
//!              ▼                                    ▼
//!         load(remaining budget) ─► valid/invalid ─► clear busy, pending -= 1
//! ```
//!
//! The final step runs from a drop guard, so a panicking loader still
//! releases its slot and the batch barrier.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace, warn};

use super::clock::Clock;
use crate::error::{MapError, TileError};
use crate::io::TileFetcher;
use crate::tile::{PngTileDecoder, TileKey, TileProvider, TileSlot};

/// Default capacity of the job queue.
pub const DEFAULT_JOB_QUEUE_SIZE: usize = 50;

// =============================================================================
// Jobs and Batches
// =============================================================================

/// One tile to fetch into a slot the scheduler has marked busy.
#[derive(Debug, Clone)]
pub struct TileJob {
    pub key: TileKey,
    pub slot: Arc<TileSlot>,
}

/// Shared state of one fetch-map batch.
///
/// Tracks the number of unfinished jobs; [`Batch::wait`] blocks until it
/// reaches zero.
#[derive(Debug)]
pub struct Batch {
    started: Instant,
    timeout: Option<Duration>,
    provider: Arc<TileProvider>,
    pending: Mutex<usize>,
    done: Condvar,
    failures: AtomicUsize,
    shed: AtomicUsize,
}

impl Batch {
    pub fn new(
        started: Instant,
        timeout: Option<Duration>,
        provider: Arc<TileProvider>,
        jobs: usize,
    ) -> Self {
        Self {
            started,
            timeout,
            provider,
            pending: Mutex::new(jobs),
            done: Condvar::new(),
            failures: AtomicUsize::new(0),
            shed: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn provider(&self) -> &TileProvider {
        &self.provider
    }

    /// Jobs not yet finished or abandoned.
    pub fn pending(&self) -> usize {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs whose load failed.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Jobs dropped because the batch timeout had elapsed.
    pub fn shed(&self) -> usize {
        self.shed.load(Ordering::Relaxed)
    }

    /// Block until every job has finished.
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            pending = self.done.wait(pending).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remaining budget for a job starting now, or `None` if the batch is
    /// already out of time. `Some(None)` means no timeout was set.
    fn budget(&self, clock: &dyn Clock) -> Option<Option<Duration>> {
        match self.timeout {
            None => Some(None),
            Some(timeout) => {
                let elapsed = clock.elapsed_since(self.started);
                timeout.checked_sub(elapsed).filter(|d| !d.is_zero()).map(Some)
            }
        }
    }

    fn complete_one(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.done.notify_all();
        }
    }
}

/// Finishes a job when dropped: publishes `filled` as the slot's validity,
/// clears busy and counts the job off the batch.
struct JobGuard<'a> {
    slot: &'a TileSlot,
    batch: &'a Batch,
    filled: bool,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.slot.write().set_valid(self.filled);
        self.slot.release();
        self.batch.complete_one();
    }
}

/// Finish `job` without loading it.
pub(crate) fn abandon(job: &TileJob, batch: &Batch) {
    drop(JobGuard {
        slot: &job.slot,
        batch,
        filled: false,
    });
}

// =============================================================================
// Tile Loader
// =============================================================================

/// Fetches and decodes one tile into a pixel buffer.
///
/// `budget` is the time left in the batch, `None` when unbounded.
pub trait TileLoader: Send {
    fn load(
        &mut self,
        provider: &TileProvider,
        key: TileKey,
        budget: Option<Duration>,
        pixels: &mut [u16],
    ) -> Result<(), TileError>;
}

/// Loads tiles over HTTP(S) and decodes them as PNG.
#[derive(Default)]
pub struct HttpTileLoader {
    fetcher: TileFetcher,
    decoder: PngTileDecoder,
}

impl HttpTileLoader {
    pub fn new(fetcher: TileFetcher) -> Self {
        Self {
            fetcher,
            decoder: PngTileDecoder::new(),
        }
    }

    pub fn fetcher(&self) -> &TileFetcher {
        &self.fetcher
    }
}

impl TileLoader for HttpTileLoader {
    fn load(
        &mut self,
        provider: &TileProvider,
        key: TileKey,
        budget: Option<Duration>,
        pixels: &mut [u16],
    ) -> Result<(), TileError> {
        let url = provider.tile_url(key.x, key.y, key.z);
        let body = self.fetcher.fetch(&url, budget)?;
        self.decoder.decode_into(&body, provider.tile_size, pixels)?;
        Ok(())
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

struct WorkItem {
    job: TileJob,
    batch: Arc<Batch>,
}

enum WorkerMessage {
    Fetch(WorkItem),
    Shutdown,
}

/// Fixed pool of tile worker threads fed by a bounded queue.
///
/// Dropping the pool sends one shutdown message per worker and joins them.
pub struct WorkerPool {
    sender: Sender<WorkerMessage>,
    workers: Vec<JoinHandle<()>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Start `count` workers. `make_loader(i)` builds worker `i`'s loader.
    pub fn spawn<F>(
        count: usize,
        queue_size: usize,
        clock: Arc<dyn Clock>,
        mut make_loader: F,
    ) -> Result<Self, MapError>
    where
        F: FnMut(usize) -> Box<dyn TileLoader>,
    {
        let (sender, receiver) = crossbeam_channel::bounded(queue_size.max(1));
        let mut pool = Self {
            sender,
            workers: Vec::with_capacity(count),
            clock,
        };

        for id in 0..count.max(1) {
            let receiver = receiver.clone();
            let clock = Arc::clone(&pool.clock);
            let loader = make_loader(id);

            // On failure `pool` is dropped here, which stops the workers
            // already started.
            let handle = thread::Builder::new()
                .name(format!("tile-worker-{id}"))
                .spawn(move || run_worker(id, receiver, loader, clock))
                .map_err(|e| MapError::WorkerSpawn(e.to_string()))?;
            pool.workers.push(handle);
        }

        debug!(workers = pool.workers.len(), queue_size, "Tile worker pool started");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Queue `job`, blocking while the queue is full.
    ///
    /// If no worker is left to receive it the job is finished as failed.
    pub fn submit(&self, job: TileJob, batch: &Arc<Batch>) {
        let item = WorkItem {
            job,
            batch: Arc::clone(batch),
        };
        if let Err(err) = self.sender.send(WorkerMessage::Fetch(item)) {
            if let WorkerMessage::Fetch(item) = err.into_inner() {
                let key = item.job.key;
                warn!(x = key.x, y = key.y, z = key.z, "No tile worker available");
                item.batch.failures.fetch_add(1, Ordering::Relaxed);
                abandon(&item.job, &item.batch);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            if self.sender.send(WorkerMessage::Shutdown).is_err() {
                break;
            }
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Tile worker panicked");
            }
        }
        debug!("Tile worker pool stopped");
    }
}

fn run_worker(
    id: usize,
    receiver: Receiver<WorkerMessage>,
    mut loader: Box<dyn TileLoader>,
    clock: Arc<dyn Clock>,
) {
    trace!(worker = id, "Tile worker running");
    while let Ok(message) = receiver.recv() {
        match message {
            WorkerMessage::Fetch(item) => process(loader.as_mut(), clock.as_ref(), item),
            WorkerMessage::Shutdown => break,
        }
    }
    trace!(worker = id, "Tile worker exiting");
}

fn process(loader: &mut dyn TileLoader, clock: &dyn Clock, item: WorkItem) {
    let WorkItem { job, batch } = item;
    let key = job.key;
    let mut guard = JobGuard {
        slot: &job.slot,
        batch: &batch,
        filled: false,
    };

    let Some(budget) = batch.budget(clock) else {
        debug!(x = key.x, y = key.y, z = key.z, "Batch timeout elapsed, dropping tile");
        batch.shed.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let result = {
        let mut data = job.slot.write();
        loader.load(batch.provider(), key, budget, data.pixels_mut())
    };

    match result {
        Ok(()) => guard.filled = true,
        Err(e) => {
            warn!(x = key.x, y = key.y, z = key.z, error = %e, "Tile load failed");
            batch.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
