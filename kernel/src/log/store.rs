// Match Log Storage
//
// Defines the durability contract for the authoritative match log.
// Implementations may persist to disk, object storage, databases, etc.

use std::fs;
use std::path::{Path, PathBuf};

use super::{LogError, MatchLog};

/// Storage backend for the match log.
///
/// Properties required from implementations:
/// - `persist` replaces the stored log as a whole, or not at all
/// - `load` returns the log exactly as last persisted
///
/// Implementations MUST NOT:
/// - Reorder matches
/// - Rewrite records on their own
pub trait MatchLogStore: Send + Sync {
    /// Load the full log. An absent log is an empty one.
    fn load(&self) -> Result<MatchLog, LogError>;

    /// Persist the full log.
    fn persist(&mut self, log: &MatchLog) -> Result<(), LogError>;
}

/// Volatile store, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    log: Option<MatchLog>,
}

impl InMemoryLogStore {
    pub fn with_log(log: MatchLog) -> Self {
        Self { log: Some(log) }
    }
}

impl MatchLogStore for InMemoryLogStore {
    fn load(&self) -> Result<MatchLog, LogError> {
        Ok(self.log.clone().unwrap_or_default())
    }

    fn persist(&mut self, log: &MatchLog) -> Result<(), LogError> {
        self.log = Some(log.clone());
        Ok(())
    }
}

/// Whole-file JSON store.
///
/// Writes go to a sibling temp file which is then renamed over the target.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl MatchLogStore for JsonFileStore {
    fn load(&self) -> Result<MatchLog, LogError> {
        if !self.path.exists() {
            return Ok(MatchLog::new());
        }

        let data = fs::read_to_string(&self.path)?;
        let log: MatchLog = serde_json::from_str(&data)?;
        Ok(log.normalized())
    }

    fn persist(&mut self, log: &MatchLog) -> Result<(), LogError> {
        let temp = self.temp_path();
        fs::write(&temp, serde_json::to_string_pretty(log)?)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Registration;
    use chrono::Utc;

    #[test]
    fn empty_memory_store_loads_empty_log() {
        let store = InMemoryLogStore::default();
        let log = store.load().unwrap();

        assert!(log.is_empty());
        assert_eq!(log.next_sequence(), 1);
    }

    #[test]
    fn file_store_round_trip() {
        let path = std::env::temp_dir().join(format!("ladder-store-{}.json", uuid::Uuid::new_v4()));
        let mut store = JsonFileStore::new(&path);

        assert!(store.load().unwrap().users().is_empty());

        let mut log = MatchLog::new();
        log.register_user(Registration {
            name: "alice".into(),
            joined: Utc::now(),
        });
        store.persist(&log).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.users().len(), 1);
        assert_eq!(loaded.users()[0].name, "alice");

        fs::remove_file(&path).unwrap();
    }
}
