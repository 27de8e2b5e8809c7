use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use rusty_ulid::Ulid;

use crate::bookmarks::EnhancedMetadata;

const KEY_PREFIX: &str = "bookmark_";

/// Cache key for a bookmark's enrichment record.
pub fn cache_key(bookmark_id: &str) -> String {
    format!("{KEY_PREFIX}{bookmark_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    #[error("Cache lock poisoned")]
    Poisoned,
}

/// Key-value store holding per-bookmark enrichment data.
/// Writes overwrite the whole value for a key.
pub trait MetadataCache: Send + Sync {
    fn set(&self, key: &str, value: &EnhancedMetadata) -> Result<(), CacheError>;
    fn get(&self, key: &str) -> Result<Option<EnhancedMetadata>, CacheError>;
}

/// Directory-backed cache, one JSON file per key.
#[derive(Clone)]
pub struct LocalCache {
    pub base_dir: PathBuf,
}

impl LocalCache {
    pub fn new(cache_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        Ok(LocalCache {
            base_dir: cache_dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(format!("{key}.json")))
    }
}

impl MetadataCache for LocalCache {
    fn set(&self, key: &str, value: &EnhancedMetadata) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        let temp_path = self
            .base_dir
            .join(format!(".{}-{key}.tmp", Ulid::generate()));

        let data = serde_json::to_vec(value)?;
        std::fs::write(&temp_path, data)?;

        if let Err(err) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err.into());
        }

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<EnhancedMetadata>, CacheError> {
        let path = self.path_for(key)?;

        match std::fs::read(&path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process cache, used when the host keeps enrichment data in memory.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, EnhancedMetadata>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataCache for MemoryCache {
    fn set(&self, key: &str, value: &EnhancedMetadata) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<EnhancedMetadata>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }
}
