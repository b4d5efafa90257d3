use std::fs;
use std::path::Path;

use tracing::warn;

use crate::domain::SeriesId;
use crate::error::TciaError;

/// Marker line in a TCIA manifest; identifiers follow it.
pub const TAKE_AFTER: &str = "ListOfSeriesToDownload=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub series: Vec<SeriesId>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self, TciaError> {
        if !path.exists() {
            return Err(TciaError::MissingManifest(path.to_path_buf()));
        }
        let content =
            fs::read_to_string(path).map_err(|_| TciaError::ManifestRead(path.to_path_buf()))?;
        Ok(Self {
            series: parse_manifest(&content),
        })
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Lines up to and including the marker are ignored; every non-blank line
/// after it is one identifier. Without a marker the manifest is empty.
/// A line that cannot be an identifier is logged and skipped.
pub fn parse_manifest(content: &str) -> Vec<SeriesId> {
    content
        .lines()
        .skip_while(|line| line.trim() != TAKE_AFTER)
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<SeriesId>() {
            Ok(id) => Some(id),
            Err(err) => {
                warn!("skipping manifest line: {err}");
                None
            }
        })
        .collect()
}
