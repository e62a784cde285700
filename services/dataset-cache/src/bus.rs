//! Cross-process change bus
//!
//! Sibling processes sharing a dataset exchange one well-typed message
//! kind over the store's pub/sub channel: either a small record delta to
//! merge into the local mirror, or a marker that a full refresh happened
//! elsewhere and the local mirror must be discarded.
//!
//! Messages are JSON with an explicit `kind` tag. Malformed payloads are
//! logged and dropped; they never crash the listener.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use types::dataset::DatasetName;
use types::errors::CacheError;
use types::record::Record;

use crate::cache::DatasetCache;
use crate::keys;

/// Message kinds carried on the change bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    /// A small batch of records was merged somewhere; apply the same delta
    /// locally without re-reading the whole dataset.
    DeltaApplied { records: Vec<Record> },
    /// A full refresh replaced the snapshot; discard the local mirror so
    /// the next query re-pulls the named generation.
    SnapshotRefreshed { generation: Uuid },
}

impl ChangeKind {
    /// Kind as a string label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::DeltaApplied { .. } => "delta_applied",
            ChangeKind::SnapshotRefreshed { .. } => "snapshot_refreshed",
        }
    }
}

/// One change-bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// Dataset the change belongs to.
    pub dataset: DatasetName,
    /// Identity of the publishing cache instance; receivers drop their own
    /// messages since the change was already applied locally.
    pub origin: Uuid,
    /// When the change was published.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl ChangeMessage {
    pub fn new(dataset: DatasetName, origin: Uuid, kind: ChangeKind) -> Self {
        Self {
            dataset,
            origin,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Serialize for publication.
    pub fn encode(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|e| CacheError::Deserialization {
            key: keys::change_channel(&self.dataset),
            reason: e.to_string(),
        })
    }

    /// Parse a received payload.
    pub fn decode(channel: &str, payload: &str) -> Result<Self, CacheError> {
        serde_json::from_str(payload).map_err(|e| CacheError::Deserialization {
            key: channel.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Spawn the change-bus listener task for a cache instance.
///
/// Runs until the channel closes. Subscribing requires the store to be up;
/// when it is not, the listener is skipped and the process falls back to
/// re-pulling on cold queries.
pub async fn spawn_change_listener(cache: Arc<DatasetCache>) -> Option<JoinHandle<()>> {
    let channel = keys::change_channel(cache.name());
    let mut subscription = match cache.store().subscribe(&channel).await {
        Ok(sub) => sub,
        Err(err) => {
            warn!(
                dataset = %cache.name(),
                error = %err,
                "change-bus subscribe failed; running without cross-process updates"
            );
            return None;
        }
    };

    info!(dataset = %cache.name(), channel, "change-bus listener started");

    Some(tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(payload) => match ChangeMessage::decode(&channel, &payload) {
                    Ok(msg) => cache.on_change_notification(msg).await,
                    Err(err) => {
                        warn!(
                            dataset = %cache.name(),
                            error = %err,
                            "dropping malformed change-bus payload"
                        );
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    // Missed deltas cannot be replayed; drop the mirror so
                    // the next query resyncs from the store.
                    warn!(
                        dataset = %cache.name(),
                        skipped,
                        "change-bus listener lagged; invalidating mirror"
                    );
                    cache.invalidate_mirror().await;
                }
                Err(RecvError::Closed) => {
                    debug!(dataset = %cache.name(), "change-bus channel closed");
                    break;
                }
            }
        }
    }))
}
