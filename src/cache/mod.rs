//! Response caching for idempotent reads.
//!
//! Three pieces cooperate:
//!
//! - **ResponseCache**: key → value store with per-entry TTL
//! - **InFlightRegistry**: key → pending fetch, so concurrent identical reads
//!   trigger exactly one underlying call
//! - **CacheCoordinator**: the `get_or_fetch` read path composing the two
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! default_ttl_seconds = 300
//! metadata_ttl_seconds = 1800
//! sweep_interval_seconds = 60
//! max_entries = 1000
//! ```

mod config;
mod coordinator;
mod keys;
mod lock;
mod registry;
mod store;
mod sweeper;

pub(crate) use lock::{mutex_lock, rw_read, rw_write};

pub use config::CacheConfig;
pub use coordinator::CacheCoordinator;
pub use keys::{CacheKey, QueryParams};
pub use registry::{Claim, InFlightRegistry, Launch, SharedFetch};
pub use store::ResponseCache;
pub use sweeper::CacheSweeper;

pub(crate) mod metric_names {
    pub(crate) use super::coordinator::{METRIC_INFLIGHT_JOIN, METRIC_INFLIGHT_STARTED};
    pub(crate) use super::store::{
        METRIC_CACHE_EVICT, METRIC_CACHE_EXPIRED, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
        METRIC_CACHE_SWEPT,
    };
}
