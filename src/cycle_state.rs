//! Cycle State Store (C6, §4.6): persists `last_commit` and `failed_info`
//! across cycles to `<mydir>/store`.
//!
//! Grounded on `arch-pkg-repo-updater/src/state.rs`'s
//! `State::from_filesystem`/`write_to_filesystem` split (missing file →
//! default, TOML (de)serialize otherwise) and its paired
//! `LoadStateError`/`SaveStateError` enums. Unlike that file, saving here
//! is atomic: write to a temp file in the same directory, then rename
//! over the target, so a crash mid-write never corrupts `store`.

use std::{collections::HashMap, io::Write, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Pkgbase;

/// Per-package memory of a failure that blocked on missing internal
/// dependencies (§3 "Cycle state").
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FailedEntry {
    pub missing: Vec<Pkgbase>,
    pub version: Option<String>,
}

/// Persisted across cycles (§3, §6 `store` file).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CycleState {
    pub last_commit: Option<String>,
    #[serde(default)]
    pub failed: HashMap<Pkgbase, FailedEntry>,
}

#[derive(Error, Debug)]
pub enum LoadStateError {
    #[error("failed to read state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse state file {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Error, Debug)]
pub enum SaveStateError {
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write temp state file: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to persist state file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl CycleState {
    pub fn load(path: &Path) -> Result<CycleState, LoadStateError> {
        if !path.exists() {
            return Ok(CycleState::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| LoadStateError::Io {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| LoadStateError::Toml {
            path: path.display().to_string(),
            source,
        })
    }

    /// Atomic write-temp + rename (§4.6 "must be atomic").
    pub fn save(&self, path: &Path) -> Result<(), SaveStateError> {
        let content = toml::to_string_pretty(self)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(SaveStateError::Write)?;
        temp.write_all(content.as_bytes())
            .map_err(SaveStateError::Write)?;
        temp.flush().map_err(SaveStateError::Write)?;
        temp.persist(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let state = CycleState::load(&path).unwrap();
        assert_eq!(state, CycleState::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");

        let mut state = CycleState::default();
        state.last_commit = Some("a".repeat(40));
        state.failed.insert(
            Pkgbase::from("pkga"),
            FailedEntry {
                missing: vec![Pkgbase::from("pkgb")],
                version: Some("1.0-1".to_string()),
            },
        );

        state.save(&path).unwrap();
        let loaded = CycleState::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn save_is_atomic_via_temp_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        std::fs::write(&path, "last_commit = \"old\"\n").unwrap();

        let state = CycleState::default();
        state.save(&path).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1, "no leftover temp file should remain");
    }
}
