//! Versioned store for the canonical snapshot.
//!
//! `LocalArchive` keeps one directory per version under its root:
//!
//! ```text
//! archive/
//!   v0001/jobs_combined.csv
//!   v0001/meta.json
//!   v0002/...
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bad metadata in {path}: {source}")]
    Meta {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} has no file name")]
    NoFileName(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    pub version: u32,
    pub file: String,
    pub created_at: DateTime<Utc>,
    pub notes: String,
}

/// A version copied out of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pulled {
    pub version: u32,
    pub path: PathBuf,
}

pub trait DatasetArchive {
    /// Copy the newest version's file into `dest_dir`. `None` when nothing was pushed yet.
    fn pull_latest(&self, dest_dir: &Path) -> Result<Option<Pulled>, ArchiveError>;
    /// Store `file` as a new version and return its number.
    fn push_version(&self, file: &Path, notes: &str) -> Result<u32, ArchiveError>;
}

pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn version_dir(&self, version: u32) -> PathBuf {
        self.root.join(format!("v{:04}", version))
    }

    /// Version numbers present on disk, ascending.
    pub fn versions(&self) -> Result<Vec<u32>, ArchiveError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut versions: Vec<u32> = fs::read_dir(&self.root)
            .map_err(io_err(&self.root))?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_prefix('v'))
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn meta(&self, version: u32) -> Result<VersionMeta, ArchiveError> {
        let path = self.version_dir(version).join(META_FILE);
        let raw = fs::read_to_string(&path).map_err(io_err(&path))?;
        serde_json::from_str(&raw).map_err(|source| ArchiveError::Meta { path, source })
    }
}

impl DatasetArchive for LocalArchive {
    fn pull_latest(&self, dest_dir: &Path) -> Result<Option<Pulled>, ArchiveError> {
        let Some(&latest) = self.versions()?.last() else {
            info!("Archive {} is empty", self.root.display());
            return Ok(None);
        };
        let meta = self.meta(latest)?;
        let src = self.version_dir(latest).join(&meta.file);

        fs::create_dir_all(dest_dir).map_err(io_err(dest_dir))?;
        let dest = dest_dir.join(&meta.file);
        fs::copy(&src, &dest).map_err(io_err(&src))?;
        info!("Pulled archive version {} ({}) to {}", latest, meta.notes, dest.display());
        Ok(Some(Pulled {
            version: latest,
            path: dest,
        }))
    }

    fn push_version(&self, file: &Path, notes: &str) -> Result<u32, ArchiveError> {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::NoFileName(file.to_path_buf()))?
            .to_string();

        let version = self.versions()?.last().map_or(1, |v| v + 1);
        let dir = self.version_dir(version);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        fs::copy(file, dir.join(&name)).map_err(io_err(file))?;

        let meta = VersionMeta {
            version,
            file: name,
            created_at: Utc::now(),
            notes: notes.to_string(),
        };
        let meta_path = dir.join(META_FILE);
        let json = serde_json::to_string_pretty(&meta).map_err(|source| ArchiveError::Meta {
            path: meta_path.clone(),
            source,
        })?;
        if let Err(e) = fs::write(&meta_path, json) {
            warn!("Removing half-written archive version {}", version);
            let _ = fs::remove_dir_all(&dir);
            return Err(ArchiveError::Io {
                path: meta_path,
                source: e,
            });
        }
        info!("Pushed {} as archive version {}", file.display(), version);
        Ok(version)
    }
}
