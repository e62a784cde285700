//! Source-of-record page loader contract
//!
//! The caller supplies a `PageLoader`; the cache knows nothing about the
//! underlying storage technology. Pages are pulled sequentially during a
//! refresh with a batch size derived from the reported total count.

use async_trait::async_trait;
use thiserror::Error;

use types::record::Record;

/// A page-load failure from the source of record.
///
/// Any page failure aborts the whole refresh; there is no partial-batch
/// retry. The previous snapshot stays intact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("source page load failed: {0}")]
pub struct LoaderError(pub String);

impl LoaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One page of records from the source of record.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub records: Vec<Record>,
    /// Whether another page follows this one.
    pub has_more: bool,
}

/// Streaming access to the authoritative record collection.
#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Load up to `limit` records starting at `offset`.
    async fn load_page(&self, offset: u64, limit: u64) -> Result<LoadedPage, LoaderError>;

    /// Total record count hint, when the source can report one cheaply.
    ///
    /// Drives batch sizing and progress totals; `None` means progress
    /// totals grow as pages arrive.
    fn total_count(&self) -> Option<u64> {
        None
    }
}

/// Pick a page size from the total record count.
///
/// Very large datasets get smaller pages to bound memory and time per
/// source round-trip; small datasets load in fewer, larger pages.
pub fn batch_size_for(total: Option<u64>) -> u64 {
    match total {
        Some(t) if t > 100_000 => 200,
        Some(t) if t > 10_000 => 500,
        _ => 1_000,
    }
}
