use derive_more::{AsRef, Display};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod cycle;
pub mod cycle_state;
pub mod db;
pub mod dep_graph;
pub mod git_sync;
pub mod lock;
pub mod notify;
pub mod outcome;
pub mod publish;
pub mod reason;
pub mod recipe;
pub mod result_handler;
pub mod sorter;
#[cfg(test)]
pub mod testutil;
pub mod tracing;
pub mod worker_pool;

/// Unique identifier of a package recipe within the repository.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, AsRef, Display, Ord, PartialOrd)]
#[serde(transparent)]
pub struct Pkgbase(String);

impl From<String> for Pkgbase {
    fn from(value: String) -> Self {
        Pkgbase(value)
    }
}

impl From<&str> for Pkgbase {
    fn from(value: &str) -> Self {
        Pkgbase(value.to_string())
    }
}

/// An unambiguous git commit hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, AsRef, Display)]
pub struct CommitHash(String);

impl From<String> for CommitHash {
    fn from(value: String) -> Self {
        CommitHash(value)
    }
}

impl CommitHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
