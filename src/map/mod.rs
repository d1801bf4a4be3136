//! Map rendering facade.
//!
//! [`TileMap`] ties the pieces together for a host application:
//!
//! ```text
//! fetch_map(surface, lon, lat, zoom, timeout)
//!   │
//!   ├─► project ─────────► required tiles (row-major)
//!   ├─► build_job_list ──► slot per tile + jobs for missing ones
//!   ├─► run ─────────────► workers fill slots, caller waits on barrier
//!   └─► compose ─────────► surface (background where no valid tile)
//! ```
//!
//! Per-tile failures only show up as background. Configuration and
//! allocation problems fail the whole call with a [`MapError`].

mod surface;

pub use surface::MapSurface;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::MapError;
use crate::fetch::{
    BatchReport, Clock, FetchScheduler, HttpTileLoader, SystemClock, TileLoader, WorkerPool,
    DEFAULT_JOB_QUEUE_SIZE,
};
use crate::io::{TileFetcher, DEFAULT_USER_AGENT};
use crate::tile::{project, rgb565, tiles_needed, TileCache, TileProvider};

/// Default viewport width in pixels.
pub const DEFAULT_WIDTH: u32 = 320;

/// Default viewport height in pixels.
pub const DEFAULT_HEIGHT: u32 = 240;

/// Background drawn where no tile is available.
pub const DEFAULT_BACKGROUND: u16 = rgb565(32, 32, 128);

/// Builds the loader for worker `i`.
pub type LoaderFactory = Box<dyn FnMut(usize) -> Box<dyn TileLoader> + Send>;

/// Library-level settings for a [`TileMap`].
#[derive(Debug, Clone)]
pub struct TileMapOptions {
    /// Worker thread count; `None` uses the available parallelism
    pub worker_count: Option<usize>,
    /// Run a single worker regardless of `worker_count`
    pub force_single_worker: bool,
    /// Capacity of the job queue
    pub job_queue_size: usize,
    /// RGB565 color for missing tiles
    pub background: u16,
    /// User agent sent to tile servers
    pub user_agent: String,
}

impl Default for TileMapOptions {
    fn default() -> Self {
        Self {
            worker_count: None,
            force_single_worker: false,
            job_queue_size: DEFAULT_JOB_QUEUE_SIZE,
            background: DEFAULT_BACKGROUND,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl TileMapOptions {
    /// Number of workers these options resolve to.
    pub fn resolved_worker_count(&self) -> usize {
        if self.force_single_worker {
            return 1;
        }
        self.worker_count
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1)
    }
}

/// A slippy-map view: viewport, provider, tile cache and worker pool.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use osm_tiles::{MapSurface, TileMap};
///
/// let mut map = TileMap::new();
/// map.set_size(320, 240)?;
/// let mut surface = MapSurface::default();
/// map.fetch_map(&mut surface, 2.3522, 48.8566, 12, Some(Duration::from_secs(2)))?;
/// # Ok::<(), osm_tiles::MapError>(())
/// ```
pub struct TileMap {
    options: TileMapOptions,
    width: u32,
    height: u32,
    provider: Arc<TileProvider>,
    cache: TileCache,
    clock: Arc<dyn Clock>,
    loader_factory: Option<LoaderFactory>,
    scheduler: Option<FetchScheduler>,
}

impl TileMap {
    /// A 320x240 map on OpenStreetMap with default options.
    pub fn new() -> Self {
        Self::with_options(TileMapOptions::default())
    }

    pub fn with_options(options: TileMapOptions) -> Self {
        let provider = TileProvider::default();
        Self {
            options,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            cache: TileCache::new(provider.tile_size),
            provider: Arc::new(provider),
            clock: Arc::new(SystemClock),
            loader_factory: None,
            scheduler: None,
        }
    }

    /// Replace the time source used for batch deadlines.
    ///
    /// Only affects workers started after this call.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the HTTP loader with a custom one per worker.
    ///
    /// Only affects workers started after this call.
    pub fn with_loader_factory<F>(mut self, factory: F) -> Self
    where
        F: FnMut(usize) -> Box<dyn TileLoader> + Send + 'static,
    {
        self.loader_factory = Some(Box::new(factory));
        self
    }

    pub fn options(&self) -> &TileMapOptions {
        &self.options
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Number of running workers, 0 before the first fetch.
    pub fn worker_count(&self) -> usize {
        self.scheduler.as_ref().map_or(0, FetchScheduler::worker_count)
    }

    /// Set the viewport size in pixels.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<(), MapError> {
        if width == 0 || height == 0 {
            return Err(crate::error::ProjectionError::ZeroViewport { width, height }.into());
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Cache slots needed to cover the viewport with the current provider.
    pub fn tiles_needed(&self) -> usize {
        tiles_needed(self.width, self.height, self.provider.tile_size)
    }

    /// Reallocate the tile cache with `capacity` slots.
    ///
    /// A no-op when the capacity is unchanged. On allocation failure the
    /// cache is left empty.
    pub fn resize_tiles_cache(&mut self, capacity: usize) -> Result<(), MapError> {
        if capacity == self.cache.capacity() && capacity > 0 {
            return Ok(());
        }
        self.cache.resize(capacity)?;
        if capacity < self.tiles_needed() {
            warn!(
                capacity,
                needed = self.tiles_needed(),
                "Tile cache smaller than viewport footprint"
            );
        }
        debug!(capacity, tile_size = self.cache.tile_size(), "Tile cache resized");
        Ok(())
    }

    /// Switch to `provider`. Every cached tile is discarded.
    ///
    /// An invalid provider is rejected and the current one kept. If the
    /// cache cannot be reallocated for the new tile size the provider is
    /// still switched and the cache left empty.
    pub fn set_tile_provider(&mut self, provider: TileProvider) -> Result<(), MapError> {
        provider.validate()?;

        info!(provider = %provider.name, tile_size = provider.tile_size, "Tile provider selected");
        let tile_size = provider.tile_size;
        self.provider = Arc::new(provider);

        let capacity = self.cache.capacity();
        if capacity > 0 {
            self.cache.reset(capacity, tile_size)?;
        } else {
            self.cache = TileCache::new(tile_size);
        }
        Ok(())
    }

    /// Switch to the built-in provider at `index`.
    pub fn set_tile_provider_index(&mut self, index: usize, api_key: &str) -> Result<(), MapError> {
        let provider = TileProvider::builtin_by_index(index, api_key)?;
        self.set_tile_provider(provider)
    }

    pub fn provider(&self) -> &TileProvider {
        &self.provider
    }

    pub fn provider_name(&self) -> &str {
        &self.provider.name
    }

    pub fn provider_attribution(&self) -> &str {
        &self.provider.attribution
    }

    pub fn provider_min_zoom(&self) -> u8 {
        self.provider.min_zoom
    }

    pub fn provider_max_zoom(&self) -> u8 {
        self.provider.max_zoom
    }

    /// Render the map centered on `(lon, lat)` at `zoom` into `surface`.
    ///
    /// Blocks until every tile of the batch has been fetched, has failed,
    /// or was dropped because `timeout` elapsed. The surface is resized to
    /// the viewport if needed.
    pub fn fetch_map(
        &mut self,
        surface: &mut MapSurface,
        lon: f64,
        lat: f64,
        zoom: u8,
        timeout: Option<Duration>,
    ) -> Result<BatchReport, MapError> {
        if !self.provider.supports_zoom(zoom) {
            return Err(MapError::ZoomOutOfRange {
                zoom,
                min_zoom: self.provider.min_zoom,
                max_zoom: self.provider.max_zoom,
            });
        }

        let grid = project(lon, lat, zoom, self.width, self.height, self.provider.tile_size)?;
        surface.resize(self.width, self.height)?;

        if self.cache.is_empty() {
            let capacity = self.tiles_needed();
            warn!(capacity, "Tile cache not sized, using viewport footprint");
            self.cache.resize(capacity)?;
        }

        self.start_workers()?;
        let Some(scheduler) = self.scheduler.as_ref() else {
            return Err(MapError::WorkerSpawn("worker pool unavailable".to_string()));
        };
        let list = FetchScheduler::build_job_list(&self.cache, &grid.tiles, zoom);
        debug!(
            tiles = grid.len(),
            jobs = list.jobs.len(),
            zoom,
            "Fetching map"
        );
        let report = scheduler.run(list.jobs, &self.provider, timeout);

        surface.compose(&grid, &list.tiles, self.options.background);
        Ok(report)
    }

    /// Start the worker pool unless it is already running.
    fn start_workers(&mut self) -> Result<(), MapError> {
        if self.scheduler.is_some() {
            return Ok(());
        }

        let count = self.options.resolved_worker_count();
        let queue_size = self.options.job_queue_size;
        let clock = Arc::clone(&self.clock);
        let user_agent = self.options.user_agent.as_str();

        let pool = match self.loader_factory.as_mut() {
            Some(make_loader) => WorkerPool::spawn(count, queue_size, clock, |i| make_loader(i))?,
            None => WorkerPool::spawn(count, queue_size, clock, |_| {
                Box::new(HttpTileLoader::new(TileFetcher::with_user_agent(user_agent)))
            })?,
        };
        info!(workers = pool.worker_count(), "Tile workers started");
        self.scheduler = Some(FetchScheduler::new(pool));
        Ok(())
    }
}

impl Default for TileMap {
    fn default() -> Self {
        Self::new()
    }
}
