//! Artifact publishing (§4.7 step 13's implicit precondition, §6
//! `repository.destdir`): moves a staged build's artifacts into the
//! repository's destination directory.
//!
//! Grounded on the teacher's `pacman_repo.rs`, which manages a pacman
//! repository database under a `destdir`-equivalent path via `repo-add`.
//! Maintaining a pacman database is out of scope here (package building
//! itself is an external collaborator); this module only does the final
//! copy step the Cycle Driver is responsible for once a build is staged.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to read staged artifact directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Copies every regular file directly under `staged_dir` into `destdir`,
/// creating `destdir` if needed. Grounded on the teacher's iterative
/// `copy_dir_all` (a work-queue copy rather than async recursion), but
/// flattened to one directory level since a single staged build produces
/// a flat set of package files.
pub fn publish_artifacts(staged_dir: &Path, destdir: &Path) -> Result<Vec<PathBuf>, PublishError> {
    std::fs::create_dir_all(destdir).map_err(|source| PublishError::ReadDir {
        path: destdir.to_path_buf(),
        source,
    })?;

    let entries = std::fs::read_dir(staged_dir).map_err(|source| PublishError::ReadDir {
        path: staged_dir.to_path_buf(),
        source,
    })?;

    let mut published = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PublishError::ReadDir {
            path: staged_dir.to_path_buf(),
            source,
        })?;

        let file_type = entry
            .file_type()
            .map_err(|source| PublishError::ReadDir {
                path: entry.path(),
                source,
            })?;
        if !file_type.is_file() {
            continue;
        }

        let to = destdir.join(entry.file_name());
        std::fs::copy(entry.path(), &to).map_err(|source| PublishError::Copy {
            from: entry.path(),
            to: to.clone(),
            source,
        })?;
        published.push(to);
    }

    Ok(published)
}
