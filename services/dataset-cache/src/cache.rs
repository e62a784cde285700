//! Dataset cache: queryable mirror of one record collection
//!
//! Owns one named dataset. A full refresh streams pages from the
//! source-of-record loader into a fresh snapshot generation in the shared
//! store, then flips a single pointer key: readers see either the old or
//! the new snapshot in full, never a mix. Reads are served from an
//! in-process mirror; small increments merge into mirror and store and
//! fan out to sibling processes over the change bus.
//!
//! Store unavailability is never fatal: every path degrades to the
//! in-process mirror and logs the degradation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use types::dataset::DatasetName;
use types::errors::{CacheError, StoreUnavailable};
use types::record::{FieldValue, Record};
use types::refresh::RefreshJobView;

use crate::bus::{ChangeKind, ChangeMessage};
use crate::keys;
use crate::loader::{batch_size_for, PageLoader};
use crate::refresh::RefreshTracker;
use crate::store::{CacheStore, StoreResult};

/// Tuning knobs for one dataset cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Bound on every individual store call; a timeout counts as
    /// unavailability.
    pub store_timeout: Duration,
    /// TTL on snapshot metadata keys; the pointer itself never expires.
    pub snapshot_ttl: Option<Duration>,
    /// A refresh without `force_full` is skipped while the stored
    /// snapshot is younger than this.
    pub freshness_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            snapshot_ttl: Some(Duration::from_secs(6 * 3600)),
            freshness_window: Duration::from_secs(3600),
        }
    }
}

/// Options for a refresh request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Rebuild even when the stored snapshot is still fresh.
    pub force_full: bool,
}

/// Metadata describing one snapshot generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub generation: Uuid,
    pub record_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of a query against the mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub records: Vec<Record>,
    /// True when nothing is loaded anywhere: empty mirror and no snapshot
    /// reachable in the store. Not an error.
    pub cold: bool,
}

/// In-process copy of the current snapshot, keyed by primary key.
struct Mirror {
    records: HashMap<String, Record>,
    generation: Option<Uuid>,
}

/// Queryable mirror of one named dataset.
pub struct DatasetCache {
    name: DatasetName,
    primary_key: String,
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    mirror: RwLock<Option<Mirror>>,
    tracker: RefreshTracker,
    /// Identity on the change bus; our own messages are dropped on receipt.
    origin: Uuid,
    /// Generation retired by the previous pointer flip, deleted on the next
    /// one. Keeping one old generation gives concurrent readers that
    /// resolved the old pointer time to finish.
    last_retired: std::sync::Mutex<Option<Uuid>>,
}

impl DatasetCache {
    pub fn new(
        name: DatasetName,
        primary_key: impl Into<String>,
        store: Arc<dyn CacheStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            name,
            primary_key: primary_key.into(),
            store,
            config,
            mirror: RwLock::new(None),
            tracker: RefreshTracker::new(),
            origin: Uuid::now_v7(),
            last_retired: std::sync::Mutex::new(None),
        }
    }

    /// Dataset this cache mirrors.
    pub fn name(&self) -> &DatasetName {
        &self.name
    }

    /// Primary-key field name.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// The shared store, for the change-bus listener.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Current refresh job view for pollers.
    pub fn refresh_status(&self) -> RefreshJobView {
        self.tracker.view()
    }

    /// Start a full refresh on a background task.
    ///
    /// Returns immediately with the join handle once the job is admitted;
    /// callers poll [`refresh_status`](Self::refresh_status) or listen on
    /// the change bus for completion. At most one job runs per dataset; a
    /// concurrent attempt gets `RefreshInProgress` and leaves the in-flight
    /// job untouched. Jobs are not cancellable mid-flight.
    pub fn refresh(
        self: &Arc<Self>,
        loader: Arc<dyn PageLoader>,
        options: RefreshOptions,
    ) -> Result<JoinHandle<()>, CacheError> {
        if !self.tracker.try_start() {
            return Err(CacheError::RefreshInProgress {
                dataset: self.name.to_string(),
            });
        }

        info!(
            dataset = %self.name,
            force_full = options.force_full,
            "refresh admitted"
        );

        let cache = Arc::clone(self);
        Ok(tokio::spawn(async move {
            cache.run_refresh(loader, options.force_full).await;
        }))
    }

    /// Query the mirror.
    ///
    /// Serves from the in-process mirror when populated, otherwise pulls
    /// the current snapshot from the store and populates it. Never blocks
    /// on a concurrent refresh and never errors: with the store down and
    /// an empty mirror the result is empty with `cold = true`.
    ///
    /// Output is sorted by `sort_key` (numeric-aware) with ties broken by
    /// primary key, then truncated to `limit`.
    pub async fn query<F>(
        &self,
        predicate: F,
        limit: Option<usize>,
        sort_key: Option<&str>,
    ) -> QueryResult
    where
        F: Fn(&Record) -> bool,
    {
        {
            let guard = self.mirror.read().await;
            if let Some(mirror) = guard.as_ref() {
                return self.select(mirror, &predicate, limit, sort_key);
            }
        }

        match self.pull_snapshot().await {
            Some(pulled) => {
                let mut guard = self.mirror.write().await;
                // A refresh may have swapped a newer snapshot in while we
                // were pulling; that one wins.
                let mirror = guard.get_or_insert(pulled);
                self.select(mirror, &predicate, limit, sort_key)
            }
            None => {
                debug!(dataset = %self.name, "query on cold cache");
                QueryResult {
                    records: Vec::new(),
                    cold: true,
                }
            }
        }
    }

    /// Merge a small batch of newly observed records.
    ///
    /// Keyed by primary key, last-write-wins, idempotent. Merges into the
    /// mirror and the store's current snapshot hash, then publishes the
    /// delta so sibling processes apply it without re-reading the dataset.
    /// Records missing the primary-key field are skipped. Returns the
    /// number of records applied.
    pub async fn apply_increment(&self, records: Vec<Record>) -> usize {
        let mut keyed: Vec<(String, Record)> = Vec::with_capacity(records.len());
        for record in records {
            match record.key(&self.primary_key) {
                Some(key) => keyed.push((key, record)),
                None => {
                    warn!(
                        dataset = %self.name,
                        primary_key = %self.primary_key,
                        "increment record without primary key skipped"
                    );
                }
            }
        }
        if keyed.is_empty() {
            return 0;
        }

        {
            let mut guard = self.mirror.write().await;
            if let Some(mirror) = guard.as_mut() {
                for (key, record) in &keyed {
                    mirror.records.insert(key.clone(), record.clone());
                }
            }
        }

        self.merge_into_store(&keyed).await;

        let delta = ChangeMessage::new(
            self.name.clone(),
            self.origin,
            ChangeKind::DeltaApplied {
                records: keyed.iter().map(|(_, r)| r.clone()).collect(),
            },
        );
        self.publish(delta).await;

        debug!(dataset = %self.name, applied = keyed.len(), "increment applied");
        keyed.len()
    }

    /// Handle a change-bus message from a sibling process.
    pub async fn on_change_notification(&self, msg: ChangeMessage) {
        if msg.origin == self.origin {
            debug!(dataset = %self.name, "ignoring own change-bus message");
            return;
        }
        if msg.dataset != self.name {
            warn!(
                dataset = %self.name,
                received = %msg.dataset,
                "change-bus message for foreign dataset dropped"
            );
            return;
        }

        match msg.kind {
            ChangeKind::DeltaApplied { records } => {
                let mut guard = self.mirror.write().await;
                if let Some(mirror) = guard.as_mut() {
                    let mut merged = 0usize;
                    for record in records {
                        if let Some(key) = record.key(&self.primary_key) {
                            mirror.records.insert(key, record);
                            merged += 1;
                        }
                    }
                    debug!(dataset = %self.name, merged, "remote delta merged");
                }
                // Cold mirror: nothing to merge, the next query pulls the
                // store's already-updated snapshot.
            }
            ChangeKind::SnapshotRefreshed { generation } => {
                {
                    let guard = self.mirror.read().await;
                    if let Some(mirror) = guard.as_ref() {
                        // Replayed markers for the snapshot we already hold
                        // carry no new data; keep the warm mirror.
                        if mirror.generation == Some(generation) {
                            debug!(
                                dataset = %self.name,
                                %generation,
                                "refresh marker matches mirror generation; keeping mirror"
                            );
                            return;
                        }
                    }
                }
                info!(
                    dataset = %self.name,
                    %generation,
                    "remote refresh observed; discarding local mirror"
                );
                self.invalidate_mirror().await;
            }
        }
    }

    /// Drop the in-process mirror; the next query re-pulls from the store.
    pub async fn invalidate_mirror(&self) {
        let mut guard = self.mirror.write().await;
        *guard = None;
    }

    // ─── refresh internals ──────────────────────────────────────────────

    async fn run_refresh(self: Arc<Self>, loader: Arc<dyn PageLoader>, force_full: bool) {
        if !force_full {
            if let Some(meta) = self.current_meta().await {
                let age = Utc::now() - meta.created_at;
                if age.to_std().unwrap_or(Duration::MAX) < self.config.freshness_window {
                    info!(
                        dataset = %self.name,
                        generation = %meta.generation,
                        age_seconds = age.num_seconds(),
                        "stored snapshot still fresh; reload skipped"
                    );
                    self.tracker.complete("snapshot still fresh; reload skipped");
                    return;
                }
            }
        }

        let generation = Uuid::now_v7();
        let generation_key = keys::generation_key(&self.name, generation);
        let total_hint = loader.total_count();
        let batch_size = batch_size_for(total_hint);
        let total_batches_hint = total_hint
            .map(|t| t.div_ceil(batch_size) as u32)
            .unwrap_or(0);

        let mut records: HashMap<String, Record> = HashMap::new();
        let mut offset = 0u64;
        let mut batch = 0u32;
        let mut missing_key = 0u64;
        let mut degraded = false;

        loop {
            let page = match loader.load_page(offset, batch_size).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(
                        dataset = %self.name,
                        offset,
                        error = %err,
                        "refresh aborted by loader failure; previous snapshot untouched"
                    );
                    self.discard_generation(generation).await;
                    self.tracker.fail(err.to_string());
                    return;
                }
            };

            batch += 1;
            offset += page.records.len() as u64;
            let exhausted = !page.has_more || page.records.is_empty();

            if !degraded && !page.records.is_empty() {
                let fields = self.encode_records(&page.records);
                if let Err(err) = self
                    .bounded(self.store.hash_set_many(&generation_key, fields))
                    .await
                {
                    warn!(
                        dataset = %self.name,
                        error = %err,
                        "store write failed; refresh continues mirror-only"
                    );
                    degraded = true;
                }
            }

            for record in page.records {
                match record.key(&self.primary_key) {
                    Some(key) => {
                        records.insert(key, record);
                    }
                    None => missing_key += 1,
                }
            }

            self.tracker.record_batch(
                offset,
                total_hint.unwrap_or(0),
                batch,
                total_batches_hint.max(batch),
            );

            if exhausted {
                break;
            }
        }

        if missing_key > 0 {
            warn!(
                dataset = %self.name,
                skipped = missing_key,
                primary_key = %self.primary_key,
                "records without primary key skipped during refresh"
            );
        }

        let record_count = records.len() as u64;
        // Final totals: when the source gave no count hint, the processed
        // count becomes the total.
        self.tracker
            .record_batch(offset, total_hint.unwrap_or(offset), batch, batch);

        if !degraded {
            degraded = !self.commit_generation(generation, record_count).await;
        } else {
            self.discard_generation(generation).await;
        }

        // Swap the mirror; the exclusive lock covers only the pointer-sized
        // replace, never the batch load above.
        {
            let mut guard = self.mirror.write().await;
            *guard = Some(Mirror {
                records,
                generation: (!degraded).then_some(generation),
            });
        }

        if degraded {
            warn!(
                dataset = %self.name,
                record_count,
                "refresh completed degraded: mirror rebuilt, store not updated"
            );
            self.tracker
                .complete("completed degraded: store unavailable, mirror-only");
            return;
        }

        self.retire_previous(generation).await;

        self.publish(ChangeMessage::new(
            self.name.clone(),
            self.origin,
            ChangeKind::SnapshotRefreshed { generation },
        ))
        .await;

        info!(
            dataset = %self.name,
            %generation,
            record_count,
            batches = batch,
            "refresh completed"
        );
        self.tracker.complete(format!("loaded {} records", record_count));
    }

    /// Write metadata and flip the pointer. Returns false (and cleans up
    /// the half-written generation) when the store is unreachable.
    async fn commit_generation(&self, generation: Uuid, record_count: u64) -> bool {
        let meta = SnapshotMeta {
            generation,
            record_count,
            created_at: Utc::now(),
        };
        let meta_json = match serde_json::to_string(&meta) {
            Ok(json) => json,
            Err(err) => {
                warn!(dataset = %self.name, error = %err, "snapshot metadata encode failed");
                self.discard_generation(generation).await;
                return false;
            }
        };

        let previous = self.resolve_generation().await;

        let meta_write = self
            .bounded(self.store.set(
                &keys::metadata_key(&self.name, generation),
                &meta_json,
                self.config.snapshot_ttl,
            ))
            .await;
        let pointer_write = match meta_write {
            Ok(()) => {
                self.bounded(self.store.set(
                    &keys::pointer_key(&self.name),
                    &generation.to_string(),
                    None,
                ))
                .await
            }
            Err(err) => Err(err),
        };

        match pointer_write {
            Ok(()) => {
                if let Some(prev) = previous {
                    let mut retired = self.last_retired.lock().unwrap_or_else(|e| e.into_inner());
                    *retired = Some(prev);
                }
                true
            }
            Err(err) => {
                warn!(
                    dataset = %self.name,
                    error = %err,
                    "generation commit failed; discarding partial snapshot"
                );
                self.discard_generation(generation).await;
                false
            }
        }
    }

    /// Delete the generation retired two flips ago, keeping exactly one
    /// old generation for in-flight readers.
    async fn retire_previous(&self, current: Uuid) {
        let stale = {
            let retired = self.last_retired.lock().unwrap_or_else(|e| e.into_inner());
            *retired
        };
        if let Some(stale) = stale.filter(|g| *g != current) {
            let _ = self
                .bounded(self.store.delete(&keys::generation_key(&self.name, stale)))
                .await;
            let _ = self
                .bounded(self.store.delete(&keys::metadata_key(&self.name, stale)))
                .await;
            debug!(dataset = %self.name, generation = %stale, "stale generation deleted");
        }
    }

    /// Best-effort removal of a half-written generation.
    async fn discard_generation(&self, generation: Uuid) {
        let _ = self
            .bounded(
                self.store
                    .delete(&keys::generation_key(&self.name, generation)),
            )
            .await;
        let _ = self
            .bounded(
                self.store
                    .delete(&keys::metadata_key(&self.name, generation)),
            )
            .await;
    }

    // ─── store access helpers ───────────────────────────────────────────

    async fn bounded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreUnavailable::new(format!(
                "timed out after {:?}",
                self.config.store_timeout
            ))),
        }
    }

    /// Resolve the current generation from the pointer key; store
    /// unavailability and absent or corrupt pointers all read as `None`.
    async fn resolve_generation(&self) -> Option<Uuid> {
        let pointer = match self
            .bounded(self.store.get(&keys::pointer_key(&self.name)))
            .await
        {
            Ok(value) => value?,
            Err(err) => {
                debug!(dataset = %self.name, error = %err, "pointer lookup degraded to miss");
                return None;
            }
        };
        match pointer.parse::<Uuid>() {
            Ok(generation) => Some(generation),
            Err(_) => {
                warn!(dataset = %self.name, pointer, "corrupt generation pointer ignored");
                None
            }
        }
    }

    async fn current_meta(&self) -> Option<SnapshotMeta> {
        let generation = self.resolve_generation().await?;
        let raw = self
            .bounded(self.store.get(&keys::metadata_key(&self.name, generation)))
            .await
            .ok()??;
        match serde_json::from_str::<SnapshotMeta>(&raw) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!(dataset = %self.name, error = %err, "corrupt snapshot metadata ignored");
                None
            }
        }
    }

    /// Pull the full current snapshot from the store. `None` when the
    /// store is down or no snapshot exists.
    async fn pull_snapshot(&self) -> Option<Mirror> {
        let generation = self.resolve_generation().await?;
        let hash = match self
            .bounded(
                self.store
                    .hash_get_all(&keys::generation_key(&self.name, generation)),
            )
            .await
        {
            Ok(hash) => hash,
            Err(err) => {
                warn!(dataset = %self.name, error = %err, "snapshot pull degraded to miss");
                return None;
            }
        };

        let mut records = HashMap::with_capacity(hash.len());
        let mut corrupt = 0u64;
        for (key, raw) in hash {
            match serde_json::from_str::<Record>(&raw) {
                Ok(record) => {
                    records.insert(key, record);
                }
                Err(err) => {
                    corrupt += 1;
                    debug!(
                        dataset = %self.name,
                        key,
                        error = %err,
                        "corrupt snapshot entry skipped"
                    );
                }
            }
        }
        if corrupt > 0 {
            warn!(
                dataset = %self.name,
                corrupt,
                loaded = records.len(),
                "corrupt snapshot entries skipped during pull"
            );
        }

        info!(
            dataset = %self.name,
            %generation,
            record_count = records.len(),
            "mirror populated from store"
        );
        Some(Mirror {
            records,
            generation: Some(generation),
        })
    }

    async fn merge_into_store(&self, keyed: &[(String, Record)]) {
        let Some(generation) = self.resolve_generation().await else {
            warn!(
                dataset = %self.name,
                "increment not persisted: no snapshot generation reachable"
            );
            return;
        };

        let mut fields = Vec::with_capacity(keyed.len());
        for (key, record) in keyed {
            match serde_json::to_string(record) {
                Ok(json) => fields.push((key.clone(), json)),
                Err(err) => {
                    warn!(dataset = %self.name, key, error = %err, "record encode failed");
                }
            }
        }

        if let Err(err) = self
            .bounded(
                self.store
                    .hash_set_many(&keys::generation_key(&self.name, generation), fields),
            )
            .await
        {
            warn!(
                dataset = %self.name,
                error = %err,
                "increment persisted mirror-only: store unavailable"
            );
        }
    }

    async fn publish(&self, msg: ChangeMessage) {
        let payload = match msg.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(dataset = %self.name, error = %err, "change-bus encode failed");
                return;
            }
        };
        if let Err(err) = self
            .bounded(
                self.store
                    .publish(&keys::change_channel(&self.name), &payload),
            )
            .await
        {
            debug!(dataset = %self.name, error = %err, "change-bus publish degraded");
        }
    }

    /// Encode a page for the store hash. Keyless records are silently
    /// skipped here; the mirror-population loop counts them once per page.
    fn encode_records(&self, records: &[Record]) -> Vec<(String, String)> {
        let mut fields = Vec::with_capacity(records.len());
        for record in records {
            let Some(key) = record.key(&self.primary_key) else {
                continue;
            };
            match serde_json::to_string(record) {
                Ok(json) => fields.push((key, json)),
                Err(err) => {
                    warn!(dataset = %self.name, key, error = %err, "record encode failed");
                }
            }
        }
        fields
    }

    // ─── query internals ────────────────────────────────────────────────

    fn select<F>(
        &self,
        mirror: &Mirror,
        predicate: &F,
        limit: Option<usize>,
        sort_key: Option<&str>,
    ) -> QueryResult
    where
        F: Fn(&Record) -> bool,
    {
        let mut records: Vec<Record> = mirror
            .records
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            let by_key = match sort_key {
                Some(field) => compare_field(a.get(field), b.get(field)),
                None => std::cmp::Ordering::Equal,
            };
            by_key.then_with(|| a.key(&self.primary_key).cmp(&b.key(&self.primary_key)))
        });

        if let Some(limit) = limit {
            records.truncate(limit);
        }

        QueryResult {
            records,
            cold: false,
        }
    }
}

/// Numeric-aware field comparison: numbers compare numerically, everything
/// else falls back to string comparison; absent values sort first.
fn compare_field(a: Option<&FieldValue>, b: Option<&FieldValue>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{LoadedPage, LoaderError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn listing(id: &str, price: f64, level: i64) -> Record {
        let mut r = Record::new();
        r.set("id", id).set("price", price).set("level", level);
        r
    }

    /// Loader serving a fixed record set in pages.
    struct StaticLoader {
        records: Vec<Record>,
        report_count: bool,
    }

    impl StaticLoader {
        fn new(records: Vec<Record>) -> Self {
            Self {
                records,
                report_count: true,
            }
        }
    }

    #[async_trait]
    impl PageLoader for StaticLoader {
        async fn load_page(&self, offset: u64, limit: u64) -> Result<LoadedPage, LoaderError> {
            let offset = offset as usize;
            let limit = limit as usize;
            let end = (offset + limit).min(self.records.len());
            let records = self.records.get(offset..end).unwrap_or(&[]).to_vec();
            Ok(LoadedPage {
                records,
                has_more: end < self.records.len(),
            })
        }

        fn total_count(&self) -> Option<u64> {
            self.report_count.then_some(self.records.len() as u64)
        }
    }

    /// Loader that fails partway through.
    struct FailingLoader;

    #[async_trait]
    impl PageLoader for FailingLoader {
        async fn load_page(&self, offset: u64, _limit: u64) -> Result<LoadedPage, LoaderError> {
            if offset == 0 {
                Ok(LoadedPage {
                    records: vec![listing("X", 1.0, 1)],
                    has_more: true,
                })
            } else {
                Err(LoaderError::new("source connection reset"))
            }
        }
    }

    fn new_cache(store: Arc<MemoryStore>) -> Arc<DatasetCache> {
        Arc::new(DatasetCache::new(
            DatasetName::new("equipment").unwrap(),
            "id",
            store,
            CacheConfig::default(),
        ))
    }

    async fn refresh_and_wait(cache: &Arc<DatasetCache>, loader: Arc<dyn PageLoader>) {
        let handle = cache
            .refresh(loader, RefreshOptions { force_full: true })
            .unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_then_query() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);

        let loader = Arc::new(StaticLoader::new(vec![
            listing("A", 100.0, 10),
            listing("B", 200.0, 12),
            listing("C", 150.0, 11),
        ]));
        refresh_and_wait(&cache, loader).await;

        let status = cache.refresh_status();
        assert_eq!(status.status, types::refresh::RefreshStatus::Completed);
        assert_eq!(status.processed_count, 3);
        assert!((status.progress_percent - 100.0).abs() < 1e-9);

        let result = cache.query(|_| true, None, Some("price")).await;
        assert!(!result.cold);
        assert_eq!(result.records.len(), 3);
        assert_eq!(result.records[0].key("id"), Some("A".to_string()));
        assert_eq!(result.records[1].key("id"), Some("C".to_string()));
        assert_eq!(result.records[2].key("id"), Some("B".to_string()));
    }

    #[tokio::test]
    async fn test_query_limit_and_predicate() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);
        refresh_and_wait(
            &cache,
            Arc::new(StaticLoader::new(vec![
                listing("A", 100.0, 10),
                listing("B", 200.0, 12),
                listing("C", 150.0, 11),
            ])),
        )
        .await;

        let result = cache
            .query(
                |r| r.numeric("price").is_some_and(|p| p >= 150.0),
                Some(1),
                Some("price"),
            )
            .await;
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].key("id"), Some("C".to_string()));
    }

    #[tokio::test]
    async fn test_empty_loader_completes() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![]))).await;

        let status = cache.refresh_status();
        assert_eq!(status.status, types::refresh::RefreshStatus::Completed);
        assert!(status.message.is_some());

        let result = cache.query(|_| true, None, None).await;
        assert!(!result.cold);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn test_loader_failure_keeps_previous_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        let handle = cache
            .refresh(Arc::new(FailingLoader), RefreshOptions { force_full: true })
            .unwrap();
        handle.await.unwrap();

        let status = cache.refresh_status();
        assert_eq!(status.status, types::refresh::RefreshStatus::Error);
        assert!(status
            .message
            .as_deref()
            .unwrap()
            .contains("source connection reset"));

        // Prior snapshot still served
        let result = cache.query(|_| true, None, None).await;
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].key("id"), Some("A".to_string()));
    }

    #[tokio::test]
    async fn test_second_refresh_rejected_while_running() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);

        /// Loader that parks until released, keeping the job running.
        struct SlowLoader {
            release: tokio::sync::Semaphore,
        }

        #[async_trait]
        impl PageLoader for SlowLoader {
            async fn load_page(
                &self,
                _offset: u64,
                _limit: u64,
            ) -> Result<LoadedPage, LoaderError> {
                let _permit = self.release.acquire().await.map_err(|_| {
                    LoaderError::new("release semaphore closed")
                })?;
                Ok(LoadedPage {
                    records: vec![listing("A", 100.0, 10)],
                    has_more: false,
                })
            }
        }

        let slow = Arc::new(SlowLoader {
            release: tokio::sync::Semaphore::new(0),
        });
        let handle = cache
            .refresh(slow.clone(), RefreshOptions { force_full: true })
            .unwrap();

        let err = cache
            .refresh(
                Arc::new(StaticLoader::new(vec![])),
                RefreshOptions { force_full: true },
            )
            .unwrap_err();
        assert!(matches!(err, CacheError::RefreshInProgress { .. }));

        slow.release.add_permits(1);
        handle.await.unwrap();
        assert_eq!(
            cache.refresh_status().status,
            types::refresh::RefreshStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_increment_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        let applied = cache.apply_increment(vec![listing("B", 200.0, 12)]).await;
        assert_eq!(applied, 1);
        let applied = cache.apply_increment(vec![listing("B", 200.0, 12)]).await;
        assert_eq!(applied, 1);

        let result = cache.query(|_| true, None, None).await;
        assert_eq!(result.records.len(), 2);

        // Replacement, not duplication: same key, new price
        cache.apply_increment(vec![listing("B", 250.0, 12)]).await;
        let result = cache.query(|_| true, None, None).await;
        assert_eq!(result.records.len(), 2);
        let b = result
            .records
            .iter()
            .find(|r| r.key("id") == Some("B".to_string()))
            .unwrap();
        assert_eq!(b.numeric("price"), Some(250.0));
    }

    #[tokio::test]
    async fn test_increment_skips_missing_primary_key() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![]))).await;

        let mut keyless = Record::new();
        keyless.set("price", 5.0);
        let applied = cache
            .apply_increment(vec![keyless, listing("A", 10.0, 1)])
            .await;
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_cold_query_with_store_down() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let cache = new_cache(store);

        let result = cache.query(|_| true, None, None).await;
        assert!(result.cold);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn test_warm_mirror_survives_store_outage() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store.clone());
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        store.set_available(false);
        let result = cache.query(|_| true, None, None).await;
        assert!(!result.cold);
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_refresh_completes_mirror_only() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store.clone());

        store.set_available(false);
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        let status = cache.refresh_status();
        assert_eq!(status.status, types::refresh::RefreshStatus::Completed);
        assert!(status.message.as_deref().unwrap().contains("degraded"));

        // Mirror serves even though the store never saw the snapshot
        let result = cache.query(|_| true, None, None).await;
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn test_query_populates_mirror_from_store() {
        let store = Arc::new(MemoryStore::new());
        let warm = new_cache(store.clone());
        refresh_and_wait(&warm, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        // Fresh instance, empty mirror, same store
        let cold = new_cache(store);
        let result = cold.query(|_| true, None, None).await;
        assert!(!result.cold);
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_entry_skipped() {
        let store = Arc::new(MemoryStore::new());
        let warm = new_cache(store.clone());
        refresh_and_wait(
            &warm,
            Arc::new(StaticLoader::new(vec![
                listing("A", 100.0, 10),
                listing("B", 200.0, 12),
            ])),
        )
        .await;

        // Corrupt one entry behind the cache's back
        let generation = warm.resolve_generation().await.unwrap();
        let gen_key = keys::generation_key(warm.name(), generation);
        store
            .hash_set_many(&gen_key, vec![("B".to_string(), "{broken".to_string())])
            .await
            .unwrap();

        let cold = new_cache(store);
        let result = cold.query(|_| true, None, None).await;
        assert!(!result.cold);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].key("id"), Some("A".to_string()));
    }

    #[tokio::test]
    async fn test_fresh_snapshot_skips_reload() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        // Non-forced refresh against a changed source: skipped while fresh
        let handle = cache
            .refresh(
                Arc::new(StaticLoader::new(vec![
                    listing("A", 100.0, 10),
                    listing("B", 200.0, 12),
                ])),
                RefreshOptions::default(),
            )
            .unwrap();
        handle.await.unwrap();

        let status = cache.refresh_status();
        assert_eq!(status.status, types::refresh::RefreshStatus::Completed);
        assert!(status.message.as_deref().unwrap().contains("fresh"));

        let result = cache.query(|_| true, None, None).await;
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn test_atomic_swap_old_generation_retained_once() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store.clone());

        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;
        let first_gen = cache.resolve_generation().await.unwrap();

        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("B", 200.0, 12)])))
            .await;
        let second_gen = cache.resolve_generation().await.unwrap();
        assert_ne!(first_gen, second_gen);

        // First generation retained for in-flight readers
        assert!(store
            .exists(&keys::generation_key(cache.name(), first_gen))
            .await
            .unwrap());

        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("C", 300.0, 14)])))
            .await;

        // Two flips later the first generation is gone
        assert!(!store
            .exists(&keys::generation_key(cache.name(), first_gen))
            .await
            .unwrap());
        assert!(store
            .exists(&keys::generation_key(cache.name(), second_gen))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_notification_from_self_ignored() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        let msg = ChangeMessage::new(
            cache.name().clone(),
            cache.origin,
            ChangeKind::SnapshotRefreshed {
                generation: Uuid::now_v7(),
            },
        );
        cache.on_change_notification(msg).await;

        // Mirror not invalidated: still warm even with store untouched
        let result = cache.query(|_| true, None, None).await;
        assert!(!result.cold);
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_refresh_marker_invalidates_mirror() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store.clone());
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        let msg = ChangeMessage::new(
            cache.name().clone(),
            Uuid::now_v7(), // foreign origin
            ChangeKind::SnapshotRefreshed {
                generation: Uuid::now_v7(),
            },
        );
        cache.on_change_notification(msg).await;

        // Next query re-pulls from the store and still sees the snapshot
        let result = cache.query(|_| true, None, None).await;
        assert!(!result.cold);
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn test_marker_for_held_generation_keeps_mirror() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store.clone());
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;
        let generation = cache.resolve_generation().await.unwrap();

        // With the store down, an invalidation would leave the next query
        // cold, so the marker being a no-op is observable.
        store.set_available(false);

        let replayed = ChangeMessage::new(
            cache.name().clone(),
            Uuid::now_v7(),
            ChangeKind::SnapshotRefreshed { generation },
        );
        cache.on_change_notification(replayed).await;

        let result = cache.query(|_| true, None, None).await;
        assert!(!result.cold);
        assert_eq!(result.records.len(), 1);

        // A genuinely new generation still invalidates
        let fresh = ChangeMessage::new(
            cache.name().clone(),
            Uuid::now_v7(),
            ChangeKind::SnapshotRefreshed {
                generation: Uuid::now_v7(),
            },
        );
        cache.on_change_notification(fresh).await;

        let result = cache.query(|_| true, None, None).await;
        assert!(result.cold);
    }

    #[tokio::test]
    async fn test_refresh_skips_keyless_records_in_mirror_and_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store.clone());

        let mut keyless = Record::new();
        keyless.set("price", 5.0);
        refresh_and_wait(
            &cache,
            Arc::new(StaticLoader::new(vec![
                listing("A", 100.0, 10),
                keyless,
                listing("B", 200.0, 12),
            ])),
        )
        .await;

        let result = cache.query(|_| true, None, None).await;
        assert_eq!(result.records.len(), 2);

        let generation = cache.resolve_generation().await.unwrap();
        let hash = store
            .hash_get_all(&keys::generation_key(cache.name(), generation))
            .await
            .unwrap();
        let mut stored: Vec<&String> = hash.keys().collect();
        stored.sort();
        assert_eq!(stored, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_remote_delta_merged_into_warm_mirror() {
        let store = Arc::new(MemoryStore::new());
        let cache = new_cache(store);
        refresh_and_wait(&cache, Arc::new(StaticLoader::new(vec![listing("A", 100.0, 10)])))
            .await;

        let msg = ChangeMessage::new(
            cache.name().clone(),
            Uuid::now_v7(),
            ChangeKind::DeltaApplied {
                records: vec![listing("B", 200.0, 12)],
            },
        );
        cache.on_change_notification(msg).await;

        let result = cache.query(|_| true, None, None).await;
        assert_eq!(result.records.len(), 2);
    }
}
