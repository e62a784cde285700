//! Cache key layout
//!
//! Generation-pointer scheme: each full snapshot is written under a
//! generation-suffixed hash key plus a metadata key, and a single pointer
//! key names the current generation. Readers resolve the pointer first, so
//! a snapshot swap is one atomic pointer write and never races a reader's
//! key lookup.
//!
//! ```text
//! ds:{name}:ptr              → current generation id (UUID v7)
//! ds:{name}:gen:{gen}        → hash: primary key → JSON record
//! ds:{name}:gen:{gen}:meta   → JSON SnapshotMeta
//! ds:{name}:changes          → pub/sub channel for the change bus
//! ```

use uuid::Uuid;

use types::dataset::DatasetName;

/// Pointer key naming the current snapshot generation.
pub fn pointer_key(dataset: &DatasetName) -> String {
    format!("ds:{}:ptr", dataset)
}

/// Hash key holding one generation's full snapshot.
pub fn generation_key(dataset: &DatasetName, generation: Uuid) -> String {
    format!("ds:{}:gen:{}", dataset, generation)
}

/// Metadata key for one generation.
pub fn metadata_key(dataset: &DatasetName, generation: Uuid) -> String {
    format!("ds:{}:gen:{}:meta", dataset, generation)
}

/// Pub/sub channel carrying change-bus messages for a dataset.
pub fn change_channel(dataset: &DatasetName) -> String {
    format!("ds:{}:changes", dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let ds = DatasetName::new("equipment").unwrap();
        let gen = Uuid::now_v7();

        assert_eq!(pointer_key(&ds), "ds:equipment:ptr");
        assert_eq!(generation_key(&ds, gen), format!("ds:equipment:gen:{gen}"));
        assert_eq!(
            metadata_key(&ds, gen),
            format!("ds:equipment:gen:{gen}:meta")
        );
        assert_eq!(change_channel(&ds), "ds:equipment:changes");
    }

    #[test]
    fn test_keys_disjoint_across_datasets() {
        let a = DatasetName::new("equipment").unwrap();
        let b = DatasetName::new("pets").unwrap();
        assert_ne!(pointer_key(&a), pointer_key(&b));
        assert_ne!(change_channel(&a), change_channel(&b));
    }
}
