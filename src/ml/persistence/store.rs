use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::error::{Result, SignalError};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Weights,
    Normalizer,
}

impl PayloadKind {
    pub fn file_extension(&self) -> &'static str {
        match self {
            PayloadKind::Weights => "weights.json",
            PayloadKind::Normalizer => "normalizer.json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Weights => "model",
            PayloadKind::Normalizer => "normalizer",
        }
    }
}

/// Byte-level storage for checkpoints. A reader never observes a partially
/// written payload.
pub trait CheckpointStore: Send + Sync {
    fn put(&self, kind: PayloadKind, key: &str, bytes: &[u8]) -> Result<()>;

    /// `Ok(None)` when nothing is stored under `key`.
    fn get(&self, kind: PayloadKind, key: &str) -> Result<Option<Vec<u8>>>;

    fn exists(&self, kind: PayloadKind, key: &str) -> Result<bool>;

    /// Returns whether anything was removed.
    fn remove(&self, kind: PayloadKind, key: &str) -> Result<bool>;

    /// Stored keys of one kind, sorted.
    fn keys(&self, kind: PayloadKind) -> Result<Vec<String>>;
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
        return Err(SignalError::input(format!("invalid storage key: {:?}", key)));
    }
    Ok(())
}

/// Writes `bytes` to a uniquely named sibling of `target`, syncs it, then
/// renames it over `target`.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SignalError::input(format!("bad target path {}", target.display())))?;
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let temp = dir.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp, target)
    })();

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&temp) {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!("Failed to remove temp file {}: {}", temp.display(), cleanup);
            }
        }
        return Err(e.into());
    }
    Ok(())
}

/// One JSON file per payload under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, kind: PayloadKind, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, kind.file_extension()))
    }
}

impl CheckpointStore for FileStore {
    fn put(&self, kind: PayloadKind, key: &str, bytes: &[u8]) -> Result<()> {
        check_key(key)?;
        let path = self.path_for(kind, key);
        write_atomic(&path, bytes)?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn get(&self, kind: PayloadKind, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        match fs::read(self.path_for(kind, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, kind: PayloadKind, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.path_for(kind, key).is_file())
    }

    fn remove(&self, kind: PayloadKind, key: &str) -> Result<bool> {
        check_key(key)?;
        match fs::remove_file(self.path_for(kind, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, kind: PayloadKind) -> Result<Vec<String>> {
        let suffix = format!(".{}", kind.file_extension());
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(&suffix) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process store, mainly for tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(PayloadKind, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn put(&self, kind: PayloadKind, key: &str, bytes: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut entries = self.entries.write().map_err(|_| SignalError::poisoned("memory store"))?;
        entries.insert((kind, key.to_string()), bytes.to_vec());
        Ok(())
    }

    fn get(&self, kind: PayloadKind, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        let entries = self.entries.read().map_err(|_| SignalError::poisoned("memory store"))?;
        Ok(entries.get(&(kind, key.to_string())).cloned())
    }

    fn exists(&self, kind: PayloadKind, key: &str) -> Result<bool> {
        check_key(key)?;
        let entries = self.entries.read().map_err(|_| SignalError::poisoned("memory store"))?;
        Ok(entries.contains_key(&(kind, key.to_string())))
    }

    fn remove(&self, kind: PayloadKind, key: &str) -> Result<bool> {
        check_key(key)?;
        let mut entries = self.entries.write().map_err(|_| SignalError::poisoned("memory store"))?;
        Ok(entries.remove(&(kind, key.to_string())).is_some())
    }

    fn keys(&self, kind: PayloadKind) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(|_| SignalError::poisoned("memory store"))?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn CheckpointStore) {
        assert_eq!(store.get(PayloadKind::Weights, "AAPL_5m_lstm").unwrap(), None);
        assert!(!store.exists(PayloadKind::Weights, "AAPL_5m_lstm").unwrap());

        store.put(PayloadKind::Weights, "AAPL_5m_lstm", b"one").unwrap();
        store.put(PayloadKind::Weights, "AAPL_5m_lstm", b"two").unwrap();
        store.put(PayloadKind::Normalizer, "AAPL_5m", b"norm").unwrap();

        assert_eq!(store.get(PayloadKind::Weights, "AAPL_5m_lstm").unwrap(), Some(b"two".to_vec()));
        assert!(store.exists(PayloadKind::Normalizer, "AAPL_5m").unwrap());
        assert!(!store.exists(PayloadKind::Weights, "AAPL_5m").unwrap());
        assert_eq!(store.keys(PayloadKind::Weights).unwrap(), vec!["AAPL_5m_lstm".to_string()]);

        assert!(store.remove(PayloadKind::Weights, "AAPL_5m_lstm").unwrap());
        assert!(!store.remove(PayloadKind::Weights, "AAPL_5m_lstm").unwrap());
        assert!(store.keys(PayloadKind::Weights).unwrap().is_empty());

        assert!(store.put(PayloadKind::Weights, "../escape", b"x").is_err());
    }

    #[test]
    fn test_file_store_contract() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("models")).unwrap();
        for i in 0..5 {
            store
                .put(PayloadKind::Normalizer, "ETH-USDT_1h", format!("v{}", i).as_bytes())
                .unwrap();
        }

        let names: Vec<String> = fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["ETH-USDT_1h.normalizer.json".to_string()]);
        assert_eq!(
            store.get(PayloadKind::Normalizer, "ETH-USDT_1h").unwrap(),
            Some(b"v4".to_vec())
        );
    }
}
