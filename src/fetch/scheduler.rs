//! Fetch scheduler.
//!
//! Turns a required-tile list into fetch jobs and runs them as one batch on
//! the worker pool.
//!
//! For each required tile, in order:
//!
//! 1. Row outside the world: no tile, drawn as background.
//! 2. Already scheduled earlier in this batch: share that slot.
//! 3. Valid in the cache: use the cached slot, no job.
//! 4. Otherwise claim an eviction victim and queue a job for it. If no slot
//!    is free the tile is drawn as background and the batch continues.
//!
//! The resulting slot list lines up index for index with the required-tile
//! list, so the compositor can derive draw positions from the index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::clock::Clock;
use super::worker::{Batch, TileJob, WorkerPool};
use crate::tile::{TileCache, TileCoord, TileKey, TileProvider, TileSlot};

/// Output of [`FetchScheduler::build_job_list`].
#[derive(Debug, Default)]
pub struct JobList {
    /// Jobs to run, in required-tile order
    pub jobs: Vec<TileJob>,
    /// One entry per required tile; `None` renders as background
    pub tiles: Vec<Option<Arc<TileSlot>>>,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub jobs: usize,
    pub failures: usize,
    pub shed: usize,
    pub elapsed: Duration,
}

/// Dispatches fetch jobs to a [`WorkerPool`] and waits for them.
pub struct FetchScheduler {
    pool: WorkerPool,
}

impl FetchScheduler {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Diff `required` against the cache and claim slots for missing tiles.
    ///
    /// Every slot referenced by a returned job is marked busy and carries
    /// the job's identity with `valid == false`.
    pub fn build_job_list(cache: &TileCache, required: &[TileCoord], zoom: u8) -> JobList {
        let mut list = JobList {
            jobs: Vec::new(),
            tiles: Vec::with_capacity(required.len()),
        };
        let mut seen: HashMap<TileKey, Arc<TileSlot>> = HashMap::new();

        for coord in required {
            let Some(row) = coord.row(zoom) else {
                list.tiles.push(None);
                continue;
            };
            let key = TileKey::new(coord.x, row, zoom);

            if let Some(slot) = seen.get(&key) {
                list.tiles.push(Some(Arc::clone(slot)));
                continue;
            }

            if let Some(slot) = cache.find(key) {
                debug!(x = key.x, y = key.y, z = key.z, "Tile cache hit");
                seen.insert(key, Arc::clone(&slot));
                list.tiles.push(Some(slot));
                continue;
            }

            match cache.find_unused(required, zoom) {
                Some(slot) => {
                    slot.assign(key);
                    seen.insert(key, Arc::clone(&slot));
                    list.jobs.push(TileJob {
                        key,
                        slot: Arc::clone(&slot),
                    });
                    list.tiles.push(Some(slot));
                }
                None => {
                    warn!(
                        x = key.x,
                        y = key.y,
                        z = key.z,
                        capacity = cache.capacity(),
                        "Tile cache exhausted, no slot for tile"
                    );
                    list.tiles.push(None);
                }
            }
        }

        list
    }

    /// Run `jobs` and block until every one has been filled or abandoned.
    ///
    /// Enqueueing blocks while the job queue is full. When `timeout` has
    /// elapsed, jobs not yet started are dropped without any network I/O.
    pub fn run(
        &self,
        jobs: Vec<TileJob>,
        provider: &Arc<TileProvider>,
        timeout: Option<Duration>,
    ) -> BatchReport {
        let clock = self.pool.clock();
        let started = clock.now();
        let count = jobs.len();

        if count > 0 {
            let batch = Arc::new(Batch::new(started, timeout, Arc::clone(provider), count));
            for job in jobs {
                self.pool.submit(job, &batch);
            }
            batch.wait();

            let report = BatchReport {
                jobs: count,
                failures: batch.failures(),
                shed: batch.shed(),
                elapsed: clock.elapsed_since(started),
            };
            info!(
                jobs = report.jobs,
                failures = report.failures,
                shed = report.shed,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Tile batch complete"
            );
            report
        } else {
            BatchReport {
                jobs: 0,
                failures: 0,
                shed: 0,
                elapsed: Duration::ZERO,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
