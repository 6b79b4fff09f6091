//! Peer persistence: JSON record format and the stores that hold it.
//!
//! File format: `[{"name": "lamp", "mac": "24:0a:c4:00:00:01", "softap": true, "channel": 6}, ...]`.
//! `softap` defaults to `true` and `channel` to `-1` (use the AP channel) when absent.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One persisted peer, as it appears in the peers file. The address stays
/// text here; the registry parses it on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPeer {
    pub name: String,
    pub mac: String,
    #[serde(default = "default_softap")]
    pub softap: bool,
    #[serde(default = "default_channel")]
    pub channel: i32,
}

fn default_softap() -> bool {
    true
}

fn default_channel() -> i32 {
    -1
}

/// Where the peer list lives between runs.
pub trait PeerStore {
    /// Read every record. A missing source is an empty list, not an error.
    fn load(&self) -> Result<Vec<StoredPeer>, StoreError>;

    /// Replace the stored list with `peers`.
    fn save(&mut self, peers: &[StoredPeer]) -> Result<(), StoreError>;
}

impl<S: PeerStore + ?Sized> PeerStore for Box<S> {
    fn load(&self) -> Result<Vec<StoredPeer>, StoreError> {
        (**self).load()
    }

    fn save(&mut self, peers: &[StoredPeer]) -> Result<(), StoreError> {
        (**self).save(peers)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("peers file is not a JSON array")]
    NotAnArray,
}

/// Decode a peers document. Elements that are not valid records (missing
/// `name` or `mac`, wrong types) are skipped with a warning.
pub fn decode_peers(json: &str) -> Result<Vec<StoredPeer>, StoreError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let serde_json::Value::Array(items) = value else {
        return Err(StoreError::NotAnArray);
    };
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<StoredPeer>(item) {
            Ok(peer) => out.push(peer),
            Err(e) => tracing::warn!(index, error = %e, "skipping malformed peer record"),
        }
    }
    Ok(out)
}

pub fn encode_peers(peers: &[StoredPeer]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(peers)?)
}

/// Peers file on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PeerStore for JsonFileStore {
    fn load(&self) -> Result<Vec<StoredPeer>, StoreError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        decode_peers(&json)
    }

    fn save(&mut self, peers: &[StoredPeer]) -> Result<(), StoreError> {
        let json = encode_peers(peers)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Store kept in memory; starts empty unless seeded.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    peers: Vec<StoredPeer>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers(peers: Vec<StoredPeer>) -> Self {
        Self { peers, saves: 0 }
    }

    pub fn peers(&self) -> &[StoredPeer] {
        &self.peers
    }

    /// How many times `save` has been called.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl PeerStore for MemoryStore {
    fn load(&self) -> Result<Vec<StoredPeer>, StoreError> {
        Ok(self.peers.clone())
    }

    fn save(&mut self, peers: &[StoredPeer]) -> Result<(), StoreError> {
        self.peers = peers.to_vec();
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "espnow-store-{}-{}.json",
            tag,
            std::process::id()
        ))
    }

    #[test]
    fn decode_applies_defaults() {
        let peers = decode_peers(r#"[{"name": "lamp", "mac": "24:0a:c4:00:00:01"}]"#).unwrap();
        assert_eq!(
            peers,
            vec![StoredPeer {
                name: "lamp".into(),
                mac: "24:0a:c4:00:00:01".into(),
                softap: true,
                channel: -1,
            }]
        );
    }

    #[test]
    fn decode_skips_incomplete_records() {
        let json = r#"[
            {"name": "a", "mac": "aa:aa:aa:aa:aa:aa", "softap": false, "channel": 3},
            {"name": "no-mac"},
            {"mac": "bb:bb:bb:bb:bb:bb"},
            42,
            {"name": "b", "mac": "not-a-mac"}
        ]"#;
        let peers = decode_peers(json).unwrap();
        let names: Vec<&str> = peers.iter().map(|p| p.name.as_str()).collect();
        // Address validity is checked by the registry, not here.
        assert_eq!(names, vec!["a", "b"]);
        assert!(!peers[0].softap);
        assert_eq!(peers[0].channel, 3);
    }

    #[test]
    fn decode_rejects_non_array() {
        assert!(matches!(
            decode_peers(r#"{"name": "a"}"#),
            Err(StoreError::NotAnArray)
        ));
        assert!(matches!(decode_peers("[oops"), Err(StoreError::Json(_))));
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let store = JsonFileStore::new(temp_path("missing"));
        let _ = std::fs::remove_file(store.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn file_store_save_then_load() {
        let path = temp_path("roundtrip");
        let mut store = JsonFileStore::new(&path);
        let peers = vec![
            StoredPeer {
                name: "a".into(),
                mac: "aa:aa:aa:aa:aa:aa".into(),
                softap: false,
                channel: 1,
            },
            StoredPeer {
                name: "b".into(),
                mac: "bb:bb:bb:bb:bb:bb".into(),
                softap: true,
                channel: 11,
            },
        ];
        store.save(&peers).unwrap();
        assert_eq!(store.load().unwrap(), peers);
        store.save(&peers[..1]).unwrap();
        assert_eq!(store.load().unwrap(), peers[..1].to_vec());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn memory_store_counts_saves() {
        let mut store = MemoryStore::new();
        assert!(store.load().unwrap().is_empty());
        store.save(&[]).unwrap();
        store.save(&[]).unwrap();
        assert_eq!(store.saves(), 2);
    }
}
