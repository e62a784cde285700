//! Dataset Cache Service
//!
//! Keeps a queryable mirror of a large, frequently-changing record
//! collection fresh:
//! - Atomic full reloads via a generation-pointer snapshot swap
//! - Cheap incremental updates, last-write-wins by primary key
//! - Cross-process propagation over a typed change bus
//! - Refresh progress tracking for pollers
//!
//! # Architecture
//!
//! ```text
//!  PageLoader (source of record)
//!        │ pages
//!   ┌────▼─────┐   generation write + pointer flip   ┌────────────┐
//!   │ refresh  ├────────────────────────────────────►│ CacheStore │
//!   └────┬─────┘                                     └─────┬──────┘
//!        │ swap                                            │ pull on cold
//!   ┌────▼─────┐          change bus (pub/sub)             │
//!   │  mirror  │◄──────────────────────────────────────────┤
//!   └────┬─────┘        deltas / refresh markers           │
//!        │ query                                  sibling processes
//! ```
//!
//! Store unavailability degrades every path to the in-process mirror; it
//! is never fatal and queries never block on a running refresh.

pub mod bus;
pub mod cache;
pub mod keys;
pub mod loader;
pub mod refresh;
pub mod registry;
pub mod store;

pub use bus::{spawn_change_listener, ChangeKind, ChangeMessage};
pub use cache::{CacheConfig, DatasetCache, QueryResult, RefreshOptions, SnapshotMeta};
pub use loader::{batch_size_for, LoadedPage, LoaderError, PageLoader};
pub use registry::CacheRegistry;
pub use store::{CacheStore, MemoryStore, StoreResult, Subscription};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
