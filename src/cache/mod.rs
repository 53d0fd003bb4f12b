//! Quire cache system
//!
//! A stale-while-revalidate read-through cache over a shared key-value store:
//!
//! - **Read path** ([`ReadThrough`]): fresh entries are served directly, stale
//!   entries are served and refreshed in the background, misses are fetched
//!   inline and written back.
//! - **Refresh** ([`RefreshCoordinator`], [`RefreshPool`]): at most one
//!   refresh per key across processes via an advisory `NX EX` lock, run on a
//!   bounded worker pool.
//! - **Invalidation** ([`Invalidator`]): scrubs removed content from every
//!   cached list and drops its detail entries.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! namespace = "ghost"
//! post_ttl_seconds = 3600
//! post_stale_after_seconds = 30
//! refresh_workers = 4
//! refresh_overflow = "drop_oldest"
//! invalidation_mode = "filter"
//! # ... see config.rs for all options
//! ```

mod clock;
mod config;
mod controller;
mod diagnostics;
mod entry;
mod invalidation;
mod keys;
mod lock;
mod pool;
mod refresh;
mod single_flight;
pub mod store;

pub use clock::{Clock, ClockControl};
pub use config::CacheConfig;
pub use controller::{Cached, Loader, ReadError, ReadThrough, ServedFrom};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, StoreOp};
pub use entry::{CacheEntry, Freshness, PolicyError, StalenessPolicy};
pub use invalidation::{InvalidationMode, Invalidator};
pub use keys::{CacheKey, ResourceKind, kind_prefix, namespace_prefix};
pub use pool::{OverflowPolicy, RefreshPool, Submission};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use single_flight::SingleFlight;
pub use store::{CacheStore, KeyValueStore, StoreBackend, StoreError};
