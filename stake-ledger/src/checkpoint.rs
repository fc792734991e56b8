//! Per-epoch balance checkpoints
//!
//! A checkpoint is the union of the legacy delegation and staking ledgers
//! at the end of an epoch, with amounts summed for addresses present in
//! both. Checkpoints are written once; a second write for the same epoch
//! leaves the stored one untouched.

use crate::types::Snapshot;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Checkpoint persistence
pub trait CheckpointStore: Send + Sync {
    /// Checkpoint of `epoch`, if one was written
    fn get(&self, epoch: u32) -> Result<Option<Snapshot>>;

    /// Store the checkpoint of `epoch`; returns `false` when one already exists
    fn put(&self, epoch: u32, snapshot: &Snapshot) -> Result<bool>;
}

/// `epoch{N}.json` files in one folder
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store rooted at `dir`, created if missing
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// File holding the checkpoint of `epoch`
    pub fn path_for(&self, epoch: u32) -> PathBuf {
        self.dir.join(format!("epoch{}.json", epoch))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, epoch: u32) -> Result<Option<Snapshot>> {
        let path = self.path_for(epoch);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_str(&content).map_err(|e| {
            Error::Checkpoint(format!("cannot parse {}: {}", path.display(), e))
        })?;
        Ok(Some(snapshot))
    }

    fn put(&self, epoch: u32, snapshot: &Snapshot) -> Result<bool> {
        let path = self.path_for(epoch);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        tracing::debug!(epoch, entries = snapshot.len(), path = %path.display(), "checkpoint written");
        Ok(true)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<BTreeMap<u32, Snapshot>>,
}

impl MemoryCheckpointStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Epochs with a checkpoint, ascending
    pub fn epochs(&self) -> Vec<u32> {
        self.checkpoints.read().keys().copied().collect()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, epoch: u32) -> Result<Option<Snapshot>> {
        Ok(self.checkpoints.read().get(&epoch).cloned())
    }

    fn put(&self, epoch: u32, snapshot: &Snapshot) -> Result<bool> {
        let mut checkpoints = self.checkpoints.write();
        if checkpoints.contains_key(&epoch) {
            return Ok(false);
        }
        checkpoints.insert(epoch, snapshot.clone());
        Ok(true)
    }
}

#[cfg(feature = "rocksdb-store")]
pub use rocks::RocksCheckpointStore;

#[cfg(feature = "rocksdb-store")]
mod rocks {
    use super::CheckpointStore;
    use crate::types::Snapshot;
    use crate::{Error, Result};
    use parking_lot::Mutex;
    use rocksdb::{Options, DB};
    use std::path::Path;

    /// RocksDB store keyed by big-endian epoch
    pub struct RocksCheckpointStore {
        db: DB,
        // serializes the exists-then-put check
        write_lock: Mutex<()>,
    }

    impl RocksCheckpointStore {
        /// Open or create the database at `path`
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            std::fs::create_dir_all(path)?;

            let mut opts = Options::default();
            opts.create_if_missing(true);
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

            let db = DB::open(&opts, path)?;
            tracing::info!("Opened checkpoint RocksDB at {:?}", path);
            Ok(Self {
                db,
                write_lock: Mutex::new(()),
            })
        }
    }

    impl CheckpointStore for RocksCheckpointStore {
        fn get(&self, epoch: u32) -> Result<Option<Snapshot>> {
            let Some(value) = self.db.get(epoch.to_be_bytes())? else {
                return Ok(None);
            };
            let snapshot = serde_json::from_slice(&value)
                .map_err(|e| Error::Checkpoint(format!("epoch {}: {}", epoch, e)))?;
            Ok(Some(snapshot))
        }

        fn put(&self, epoch: u32, snapshot: &Snapshot) -> Result<bool> {
            let _guard = self.write_lock.lock();
            let key = epoch.to_be_bytes();
            if self.db.get_pinned(key)?.is_some() {
                return Ok(false);
            }
            self.db.put(key, serde_json::to_vec(snapshot)?)?;
            Ok(true)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Amount;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert("erd1a".to_string(), Amount::parse("2500000000000000000000").unwrap());
        snapshot.insert("erd1b".to_string(), Amount::from(1));
        snapshot
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();

        assert_eq!(store.get(5).unwrap(), None);
        assert!(store.put(5, &sample()).unwrap());
        assert_eq!(store.get(5).unwrap(), Some(sample()));

        let raw = fs::read_to_string(store.path_for(5)).unwrap();
        assert!(raw.contains("\"erd1a\": \"2500000000000000000000\""));
    }

    #[test]
    fn test_file_store_is_write_once() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        assert!(store.put(1, &sample()).unwrap());
        assert!(!store.put(1, &Snapshot::new()).unwrap());
        assert_eq!(store.get(1).unwrap(), Some(sample()));
    }

    #[test]
    fn test_corrupt_file_is_checkpoint_error() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        fs::write(store.path_for(2), "{not json").unwrap();
        assert!(matches!(store.get(2), Err(Error::Checkpoint(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        assert!(store.put(0, &sample()).unwrap());
        assert!(!store.put(0, &Snapshot::new()).unwrap());
        assert_eq!(store.epochs(), vec![0]);
    }
}
