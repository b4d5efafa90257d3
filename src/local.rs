//! Archives already on disk, classified through the same pipeline as
//! downloaded ones.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::SeriesId;
use crate::error::TciaError;
use crate::fs_util;
use crate::tcia::{ArchiveBlob, ArchiveClient};

/// Serves every `.zip` below a folder, keyed by file stem.
#[derive(Debug, Clone)]
pub struct LocalArchiveSource {
    archives: BTreeMap<SeriesId, PathBuf>,
    staging_dir: Option<PathBuf>,
}

impl LocalArchiveSource {
    pub fn discover(folder: &Path) -> Result<Self, TciaError> {
        if !folder.is_dir() {
            return Err(TciaError::NotFound(folder.to_path_buf()));
        }
        let mut archives = BTreeMap::new();
        for path in fs_util::walk_files(folder)? {
            let is_zip = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
            if !is_zip {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<SeriesId>().ok())
            else {
                debug!(path = %path.display(), "skipping archive with unusable name");
                continue;
            };
            archives.entry(id).or_insert(path);
        }
        Ok(Self {
            archives,
            staging_dir: None,
        })
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Identifiers in sorted order.
    pub fn ids(&self) -> Vec<SeriesId> {
        self.archives.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}

impl ArchiveClient for LocalArchiveSource {
    fn fetch(&self, series: &SeriesId) -> Result<ArchiveBlob, TciaError> {
        let path = self
            .archives
            .get(series)
            .ok_or_else(|| TciaError::NotFound(PathBuf::from(series.as_str())))?;
        let file = File::open(path).map_err(|_| TciaError::NotFound(path.clone()))?;
        // Copied so the original archive is never consumed or deleted.
        ArchiveBlob::from_reader(series, file, self.staging_dir.as_deref())
    }
}
