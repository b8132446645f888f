//! Pluggable persistence behind the memory bank.
//!
//! Per-student state is stored as JSON keyed by student id. The sled backend
//! makes state durable across restarts; the null backend is for explicitly
//! configured ephemeral deployments.

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::settings::MemoryConfig;

use super::StudentState;

pub trait ProfileStore: Send + Sync + std::fmt::Debug {
    fn load(&self, student_id: &str) -> Result<Option<StudentState>>;
    fn save(&self, student_id: &str, state: &StudentState) -> Result<()>;
}

/// Ephemeral deployments: nothing is persisted.
#[derive(Debug)]
pub struct NullStore;

impl ProfileStore for NullStore {
    fn load(&self, _student_id: &str) -> Result<Option<StudentState>> {
        Ok(None)
    }

    fn save(&self, _student_id: &str, _state: &StudentState) -> Result<()> {
        Ok(())
    }
}

/// On-disk store keyed by student id, values serde_json. Flushing is left to
/// sled's background thread; persistence is best-effort.
#[derive(Debug)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

impl ProfileStore for SledStore {
    fn load(&self, student_id: &str) -> Result<Option<StudentState>> {
        match self.db.get(student_id.as_bytes())? {
            Some(bytes) => {
                let state: StudentState = serde_json::from_slice(&bytes)?;
                debug!(student_id, records = state.records.len(), "loaded student state");
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    fn save(&self, student_id: &str, state: &StudentState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.db.insert(student_id.as_bytes(), bytes)?;
        Ok(())
    }
}

/// Open the store named by configuration. Ephemeral operation requires the
/// explicit "in_memory" provider; anything unrecognized is an error, never a
/// silent fallback.
pub fn open_store(config: &MemoryConfig) -> Result<Box<dyn ProfileStore>> {
    match config.provider.as_str() {
        "in_memory" => Ok(Box::new(NullStore)),
        "sled" => {
            let path = config.persistence_path.as_deref().ok_or_else(|| {
                crate::error::ConciergeError::Storage(
                    "sled provider configured without a persistence path".to_string(),
                )
            })?;
            Ok(Box::new(SledStore::open(path)?))
        }
        other => Err(crate::error::ConciergeError::Storage(format!(
            "unknown memory provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StudentProfile;

    #[test]
    fn null_store_loads_nothing() {
        let store = NullStore;
        let state = StudentState::new(StudentProfile::new("s1"));
        store.save("s1", &state).unwrap();
        assert!(store.load("s1").unwrap().is_none());
    }

    #[test]
    fn unknown_provider_is_an_error_not_a_fallback() {
        let config = MemoryConfig {
            provider: "sledd".to_string(),
            ..MemoryConfig::default()
        };
        let err = open_store(&config).unwrap_err();
        assert!(matches!(err, crate::error::ConciergeError::Storage(_)));
        assert!(err.to_string().contains("unknown memory provider"));
    }

    #[test]
    fn sled_store_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let state = StudentState::new(StudentProfile::new("s1"));
        store.save("s1", &state).unwrap();

        let loaded = store.load("s1").unwrap().unwrap();
        assert_eq!(loaded.profile.student_id, "s1");
        assert!(loaded.records.is_empty());
        assert!(store.load("s2").unwrap().is_none());
    }
}
