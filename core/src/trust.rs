//! Persistent trust store: the set of paired peers, keyed by PeerId.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::{Error, Result};

/// A record of a trusted peer.
///
/// Invariant: `peer_id` is derivable from `identity_pk`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
    pub peer_id: String,
    #[serde(with = "crate::crypto::serde_utils::base64_bytes")]
    pub identity_pk: Vec<u8>,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl TrustRecord {
    pub fn new(peer_id: String, identity_pk: Vec<u8>, display_name: String) -> Self {
        Self {
            peer_id,
            identity_pk,
            display_name,
            created_at: Utc::now(),
        }
    }

    pub fn identity_pk_b64(&self) -> String {
        BASE64.encode(&self.identity_pk)
    }
}

/// File-backed trust store.
///
/// The on-disk form is a single JSON array of records. Every mutation
/// rewrites the whole document atomically (write temp, then rename), so a
/// crash mid-write leaves either the old or the new state on disk. A missing
/// file is equivalent to an empty set.
pub struct TrustStore {
    path: PathBuf,
    records: Mutex<HashMap<String, TrustRecord>>,
}

impl TrustStore {
    /// Open the store at `path`, loading existing records if the file exists.
    pub fn open(path: PathBuf) -> Result<Self> {
        let records = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let list: Vec<TrustRecord> = serde_json::from_str(&data)?;
            list.into_iter().map(|r| (r.peer_id.clone(), r)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Add or replace a record. Flushes to disk before returning.
    pub fn add(&self, peer_id: &str, identity_pk_b64: &str, display_name: &str) -> Result<()> {
        let pk = BASE64
            .decode(identity_pk_b64)
            .map_err(|e| Error::Crypto(format!("bad identity key encoding: {}", e)))?;
        self.add_record(TrustRecord::new(
            peer_id.to_string(),
            pk,
            display_name.to_string(),
        ))
    }

    /// Add or replace a pre-built record. Flushes to disk before returning.
    pub fn add_record(&self, record: TrustRecord) -> Result<()> {
        {
            let mut records = self.records.lock().expect("trust store mutex poisoned");
            records.insert(record.peer_id.clone(), record);
        }
        self.flush()
    }

    pub fn get(&self, peer_id: &str) -> Option<TrustRecord> {
        self.records
            .lock()
            .expect("trust store mutex poisoned")
            .get(peer_id)
            .cloned()
    }

    pub fn is_trusted(&self, peer_id: &str) -> bool {
        self.get(peer_id).is_some()
    }

    /// Remove a record; returns whether it existed. Flushes on removal.
    pub fn remove(&self, peer_id: &str) -> Result<bool> {
        let removed = {
            let mut records = self.records.lock().expect("trust store mutex poisoned");
            records.remove(peer_id).is_some()
        };
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    /// All records, sorted by display name then PeerId for determinism.
    pub fn list(&self) -> Vec<TrustRecord> {
        let mut list: Vec<TrustRecord> = self
            .records
            .lock()
            .expect("trust store mutex poisoned")
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        list
    }

    /// Remove every record. Flushes to disk before returning.
    pub fn clear(&self) -> Result<()> {
        self.records
            .lock()
            .expect("trust store mutex poisoned")
            .clear();
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        let list: Vec<TrustRecord> = {
            let records = self.records.lock().expect("trust store mutex poisoned");
            records.values().cloned().collect()
        };
        let data = serde_json::to_string_pretty(&list)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn store_in(dir: &tempfile::TempDir) -> TrustStore {
        TrustStore::open(dir.path().join("trust.json")).unwrap()
    }

    #[test]
    fn test_add_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add("peer-a", &BASE64.encode([1u8; 32]), "Alice").unwrap();
        assert!(store.is_trusted("peer-a"));
        assert!(!store.is_trusted("peer-b"));

        let record = store.get("peer-a").unwrap();
        assert_eq!(record.display_name, "Alice");
        assert_eq!(record.identity_pk, vec![1u8; 32]);

        assert!(store.remove("peer-a").unwrap());
        assert!(!store.remove("peer-a").unwrap());
        assert!(store.get("peer-a").is_none());
    }

    #[test]
    fn test_duplicate_add_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add("peer-a", &BASE64.encode([1u8; 32]), "Old Name").unwrap();
        store.add("peer-a", &BASE64.encode([1u8; 32]), "New Name").unwrap();

        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].display_name, "New Name");
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");

        {
            let store = TrustStore::open(path.clone()).unwrap();
            store.add("peer-x", &BASE64.encode([9u8; 32]), "Xavier").unwrap();
        }

        let reopened = TrustStore::open(path).unwrap();
        assert_eq!(reopened.get("peer-x").unwrap().display_name, "Xavier");
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("absent.json")).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_list_sorted_by_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add("p3", &BASE64.encode([3u8; 32]), "charlie").unwrap();
        store.add("p1", &BASE64.encode([1u8; 32]), "alice").unwrap();
        store.add("p2", &BASE64.encode([2u8; 32]), "bob").unwrap();

        let names: Vec<_> = store.list().into_iter().map(|r| r.display_name).collect();
        assert_eq!(names, vec!["alice", "bob", "charlie"]);
    }

    #[test]
    fn test_no_partial_writes_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("peer-a", &BASE64.encode([1u8; 32]), "Alice").unwrap();

        // The temp file used for atomic replacement must not linger.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("peer-a", &BASE64.encode([1u8; 32]), "Alice").unwrap();
        store.clear().unwrap();
        assert!(store.list().is_empty());
    }
}
