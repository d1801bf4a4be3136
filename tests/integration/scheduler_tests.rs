//! Scheduler and worker pool integration tests.
//!
//! Tests verify:
//! - `run` does not return before every job has finished
//! - Jobs starting after the batch timeout are dropped without loading
//! - Loaders receive the remaining budget
//! - Busy slots are never handed out twice

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use osm_tiles::fetch::{FetchScheduler, ManualClock, SystemClock, TileLoader, WorkerPool};
use osm_tiles::tile::{TileCache, TileCoord, TileKey, TileProvider};
use osm_tiles::{FetchError, TileError};

// =============================================================================
// Stub Loaders
// =============================================================================

/// Sleeps, fills the tile, and counts completions.
struct SlowLoader {
    delay: Duration,
    completed: Arc<AtomicUsize>,
}

impl TileLoader for SlowLoader {
    fn load(
        &mut self,
        _provider: &TileProvider,
        key: TileKey,
        _budget: Option<Duration>,
        pixels: &mut [u16],
    ) -> Result<(), TileError> {
        thread::sleep(self.delay);
        pixels.fill(key.x as u16);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records budgets and advances a manual clock on every load.
struct TickingLoader {
    clock: Arc<ManualClock>,
    step: Duration,
    budgets: Arc<Mutex<Vec<Option<Duration>>>>,
}

impl TileLoader for TickingLoader {
    fn load(
        &mut self,
        _provider: &TileProvider,
        _key: TileKey,
        budget: Option<Duration>,
        _pixels: &mut [u16],
    ) -> Result<(), TileError> {
        self.budgets.lock().unwrap().push(budget);
        self.clock.advance(self.step);
        Ok(())
    }
}

/// Fails every tile whose column is odd.
struct OddFailLoader;

impl TileLoader for OddFailLoader {
    fn load(
        &mut self,
        _provider: &TileProvider,
        key: TileKey,
        _budget: Option<Duration>,
        _pixels: &mut [u16],
    ) -> Result<(), TileError> {
        if key.x % 2 == 1 {
            Err(FetchError::ConnectionClosed.into())
        } else {
            Ok(())
        }
    }
}

fn provider(tile_size: u32) -> Arc<TileProvider> {
    let mut provider = TileProvider::osm_standard();
    provider.tile_size = tile_size;
    Arc::new(provider)
}

fn row(zoom_row: i64, columns: u32) -> Vec<TileCoord> {
    (0..columns).map(|x| TileCoord { x, y: zoom_row }).collect()
}

// =============================================================================
// Batch Barrier
// =============================================================================

#[test]
fn test_run_waits_for_delayed_workers() {
    let completed = Arc::new(AtomicUsize::new(0));
    let pool = {
        let completed = Arc::clone(&completed);
        WorkerPool::spawn(3, 2, Arc::new(SystemClock), move |_| {
            Box::new(SlowLoader {
                delay: Duration::from_millis(30),
                completed: Arc::clone(&completed),
            })
        })
        .unwrap()
    };
    let scheduler = FetchScheduler::new(pool);

    let cache = TileCache::with_capacity(8, 4).unwrap();
    let required = row(0, 8);
    let list = FetchScheduler::build_job_list(&cache, &required, 3);
    assert_eq!(list.jobs.len(), 8);

    let report = scheduler.run(list.jobs, &provider(4), None);

    assert_eq!(completed.load(Ordering::SeqCst), 8);
    assert_eq!(report.jobs, 8);
    assert_eq!(report.failures, 0);
    for (x, tile) in list.tiles.iter().enumerate() {
        let slot = tile.as_ref().unwrap();
        assert!(!slot.is_busy());
        assert!(slot.holds(TileKey::new(x as u32, 0, 3)));
        assert!(slot.read().pixels().iter().all(|&p| p == x as u16));
    }
}

#[test]
fn test_run_with_no_jobs_returns_immediately() {
    let pool = WorkerPool::spawn(1, 4, Arc::new(SystemClock), |_| Box::new(OddFailLoader)).unwrap();
    let scheduler = FetchScheduler::new(pool);

    let report = scheduler.run(Vec::new(), &provider(4), Some(Duration::from_millis(1)));
    assert_eq!(report.jobs, 0);
    assert_eq!(report.elapsed, Duration::ZERO);
}

#[test]
fn test_failures_are_local_to_their_tile() {
    let pool = WorkerPool::spawn(2, 4, Arc::new(SystemClock), |_| Box::new(OddFailLoader)).unwrap();
    let scheduler = FetchScheduler::new(pool);

    let cache = TileCache::with_capacity(4, 4).unwrap();
    let list = FetchScheduler::build_job_list(&cache, &row(1, 4), 2);
    let report = scheduler.run(list.jobs, &provider(4), None);

    assert_eq!(report.failures, 2);
    let valid: Vec<bool> = list
        .tiles
        .iter()
        .map(|t| t.as_ref().unwrap().is_valid())
        .collect();
    assert_eq!(valid, vec![true, false, true, false]);
    assert!(cache.slots().iter().all(|s| !s.is_busy()));
}

// =============================================================================
// Timeout Shedding
// =============================================================================

#[test]
fn test_expired_batch_sheds_remaining_jobs() {
    let clock = Arc::new(ManualClock::new());
    let budgets = Arc::new(Mutex::new(Vec::new()));
    let pool = {
        let clock = Arc::clone(&clock);
        let budgets = Arc::clone(&budgets);
        WorkerPool::spawn(1, 8, clock.clone(), move |_| {
            Box::new(TickingLoader {
                clock: Arc::clone(&clock),
                step: Duration::from_millis(100),
                budgets: Arc::clone(&budgets),
            })
        })
        .unwrap()
    };
    let scheduler = FetchScheduler::new(pool);

    let cache = TileCache::with_capacity(6, 4).unwrap();
    let list = FetchScheduler::build_job_list(&cache, &row(0, 6), 3);
    let report = scheduler.run(list.jobs, &provider(4), Some(Duration::from_millis(250)));

    // Loads start at 0, 100 and 200 ms; at 300 ms the batch is out of time.
    assert_eq!(report.jobs, 6);
    assert_eq!(report.shed, 3);
    assert_eq!(report.failures, 0);
    assert_eq!(
        *budgets.lock().unwrap(),
        vec![
            Some(Duration::from_millis(250)),
            Some(Duration::from_millis(150)),
            Some(Duration::from_millis(50)),
        ]
    );

    let valid: Vec<bool> = list
        .tiles
        .iter()
        .map(|t| t.as_ref().unwrap().is_valid())
        .collect();
    assert_eq!(valid, vec![true, true, true, false, false, false]);
    assert!(cache.slots().iter().all(|s| !s.is_busy()));
}

#[test]
fn test_no_timeout_passes_unbounded_budget() {
    let clock = Arc::new(ManualClock::new());
    let budgets = Arc::new(Mutex::new(Vec::new()));
    let pool = {
        let clock = Arc::clone(&clock);
        let budgets = Arc::clone(&budgets);
        WorkerPool::spawn(1, 8, clock.clone(), move |_| {
            Box::new(TickingLoader {
                clock: Arc::clone(&clock),
                step: Duration::from_secs(60),
                budgets: Arc::clone(&budgets),
            })
        })
        .unwrap()
    };
    let scheduler = FetchScheduler::new(pool);

    let cache = TileCache::with_capacity(3, 4).unwrap();
    let list = FetchScheduler::build_job_list(&cache, &row(0, 3), 2);
    let report = scheduler.run(list.jobs, &provider(4), None);

    assert_eq!(report.shed, 0);
    assert_eq!(*budgets.lock().unwrap(), vec![None, None, None]);
}

// =============================================================================
// Cache Interaction
// =============================================================================

#[test]
fn test_second_batch_hits_cache() {
    let completed = Arc::new(AtomicUsize::new(0));
    let pool = {
        let completed = Arc::clone(&completed);
        WorkerPool::spawn(2, 4, Arc::new(SystemClock), move |_| {
            Box::new(SlowLoader {
                delay: Duration::ZERO,
                completed: Arc::clone(&completed),
            })
        })
        .unwrap()
    };
    let scheduler = FetchScheduler::new(pool);
    let cache = TileCache::with_capacity(4, 4).unwrap();
    let required = row(2, 4);

    let first = FetchScheduler::build_job_list(&cache, &required, 4);
    scheduler.run(first.jobs, &provider(4), None);

    let second = FetchScheduler::build_job_list(&cache, &required, 4);
    assert!(second.jobs.is_empty());
    assert_eq!(completed.load(Ordering::SeqCst), 4);

    // Panning one column right evicts exactly the column that left view.
    let panned: Vec<TileCoord> = (1..5).map(|x| TileCoord { x, y: 2 }).collect();
    let third = FetchScheduler::build_job_list(&cache, &panned, 4);
    assert_eq!(third.jobs.len(), 1);
    assert_eq!(third.jobs[0].key, TileKey::new(4, 2, 4));
    assert!(Arc::ptr_eq(&third.jobs[0].slot, first.tiles[0].as_ref().unwrap()));
    scheduler.run(third.jobs, &provider(4), None);
}

#[test]
fn test_busy_slots_are_never_selected_twice() {
    let cache = TileCache::with_capacity(3, 4).unwrap();

    // First batch claims every slot and does not run yet.
    let first = FetchScheduler::build_job_list(&cache, &row(0, 3), 5);
    assert_eq!(first.jobs.len(), 3);

    // A second view while the first is in flight finds nothing to evict.
    let second = FetchScheduler::build_job_list(&cache, &row(7, 3), 5);
    assert!(second.jobs.is_empty());
    assert!(second.tiles.iter().all(Option::is_none));
}
