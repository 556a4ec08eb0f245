//! Startup configuration (§6). Loaded once from `<mydir>/config.toml`.

use std::{collections::HashMap, fs, path::Path};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Toml {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RepositorySection {
    pub destdir: Option<Utf8PathBuf>,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct LilacSection {
    pub name: Option<String>,
    pub dburl: Option<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub rebuild_failed_pkgs: bool,
    #[serde(default)]
    pub git_push: bool,
}

impl std::fmt::Debug for LilacSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LilacSection")
            .field("name", &self.name)
            .field("dburl", &self.dburl.as_ref().map(|_| redact::Secret::new("")))
            .field("max_concurrency", &self.max_concurrency)
            .field("rebuild_failed_pkgs", &self.rebuild_failed_pkgs)
            .field("git_push", &self.git_push)
            .finish()
    }
}

fn default_max_concurrency() -> usize {
    1
}

impl Default for LilacSection {
    fn default() -> Self {
        LilacSection {
            name: None,
            dburl: None,
            max_concurrency: default_max_concurrency(),
            rebuild_failed_pkgs: false,
            git_push: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NvcheckerSection {
    pub proxy: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MiscSection {
    #[serde(default)]
    pub prerun: Vec<Vec<String>>,
    #[serde(default)]
    pub postrun: Vec<Vec<String>>,
}

/// Startup configuration, recognized keys per §6.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub envvars: HashMap<String, String>,
    #[serde(default)]
    pub bindmounts: HashMap<Utf8PathBuf, Utf8PathBuf>,
    #[serde(default)]
    pub repository: RepositorySection,
    #[serde(default)]
    pub lilac: LilacSection,
    #[serde(default)]
    pub nvchecker: NvcheckerSection,
    #[serde(default)]
    pub misc: MiscSection,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let utf8_path = Utf8PathBuf::from_path_buf(path.to_path_buf())
            .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned()));
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: utf8_path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: utf8_path,
            source,
        })
    }

    /// Bind mounts formatted as `src:dst`, expanded and sorted descending by
    /// source path before being handed to the package builder (§6).
    pub fn formatted_bindmounts(&self) -> Vec<String> {
        let mut mounts: Vec<_> = self.bindmounts.iter().collect();
        mounts.sort_by(|(a, _), (b, _)| b.cmp(a));
        mounts
            .into_iter()
            .map(|(src, dst)| format!("{src}:{dst}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindmounts_are_sorted_descending_by_source() {
        let mut config = Config::default();
        config
            .bindmounts
            .insert(Utf8PathBuf::from("/a"), Utf8PathBuf::from("/mnt/a"));
        config
            .bindmounts
            .insert(Utf8PathBuf::from("/c"), Utf8PathBuf::from("/mnt/c"));
        config
            .bindmounts
            .insert(Utf8PathBuf::from("/b"), Utf8PathBuf::from("/mnt/b"));

        assert_eq!(
            config.formatted_bindmounts(),
            vec![
                "/c:/mnt/c".to_string(),
                "/b:/mnt/b".to_string(),
                "/a:/mnt/a".to_string(),
            ]
        );
    }

    #[test]
    fn missing_sections_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.lilac.max_concurrency, 1);
        assert!(!config.lilac.git_push);
    }
}
