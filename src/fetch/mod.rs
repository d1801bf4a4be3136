//! Concurrent tile fetching.
//!
//! ```text
//! ┌────────────────────┐   jobs    ┌──────────────────────────┐
//! │   FetchScheduler   │ ────────► │  bounded queue (FIFO)    │
//! │  build_job_list    │           └────────────┬─────────────┘
//! │  run ── wait ◄─────┼──────┐                 │
//! └────────────────────┘      │     ┌───────────┼───────────┐
//!                             │     ▼           ▼           ▼
//!                  pending == 0   worker 0    worker 1 ... worker N
//!                             │   (fetcher +  (fetcher +
//!                             │    decoder)    decoder)
//!                             └─────┴───────────┴───────────┘
//! ```
//!
//! - [`FetchScheduler`]: diffs required tiles against the cache, claims
//!   eviction victims and blocks on the batch barrier
//! - [`WorkerPool`]: fixed set of threads each owning a [`TileLoader`]
//! - [`Clock`]: time source for batch deadlines

mod clock;
mod scheduler;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use scheduler::{BatchReport, FetchScheduler, JobList};
pub use worker::{
    Batch, HttpTileLoader, TileJob, TileLoader, WorkerPool, DEFAULT_JOB_QUEUE_SIZE,
};
