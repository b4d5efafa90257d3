use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TciaError;
use crate::fs_util;

/// Who placed (or tried to place) a file at a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claimant {
    pub series: String,
    pub source: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub destination: PathBuf,
    /// First writer, when the destination was claimed during this run.
    pub kept: Option<Claimant>,
    pub rejected: Claimant,
}

#[derive(Debug, Default)]
struct RegistryState {
    claims: HashMap<PathBuf, Claimant>,
    collisions: Vec<Collision>,
}

/// Destinations claimed during this run plus the collision report, behind
/// one lock.
#[derive(Debug, Default)]
pub struct PlacementRegistry {
    state: Mutex<RegistryState>,
}

impl PlacementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `source` to `destination` unless it is already claimed or
    /// present on disk, in which case the collision is recorded and
    /// `DestinationExists` returned with nothing moved.
    pub fn place(
        &self,
        source: &Path,
        destination: &Path,
        series: &str,
    ) -> Result<(), TciaError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TciaError::Filesystem("placement registry poisoned".to_string()))?;

        let rejected = Claimant {
            series: series.to_string(),
            source: source.to_path_buf(),
        };
        let kept = state.claims.get(destination).cloned();
        if kept.is_some() || destination.exists() {
            warn!(
                destination = %destination.display(),
                series,
                "destination already taken, keeping the first file"
            );
            state.collisions.push(Collision {
                destination: destination.to_path_buf(),
                kept,
                rejected,
            });
            return Err(TciaError::DestinationExists(destination.to_path_buf()));
        }

        fs_util::ensure_parent(destination)?;
        if let Err(err) = fs_util::move_no_clobber(source, destination) {
            if matches!(err, TciaError::DestinationExists(_)) {
                state.collisions.push(Collision {
                    destination: destination.to_path_buf(),
                    kept: None,
                    rejected,
                });
            }
            return Err(err);
        }
        debug!(from = %source.display(), to = %destination.display(), "placed");
        state.claims.insert(destination.to_path_buf(), rejected);
        Ok(())
    }

    pub fn is_claimed(&self, destination: &Path) -> bool {
        self.state
            .lock()
            .map(|state| state.claims.contains_key(destination))
            .unwrap_or(false)
    }

    /// Series UIDs that placed at least one file directly inside `folder`,
    /// sorted and deduplicated.
    pub fn series_in(&self, folder: &Path) -> Vec<String> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut series: Vec<String> = state
            .claims
            .iter()
            .filter(|(destination, _)| destination.parent() == Some(folder))
            .map(|(_, claimant)| claimant.series.clone())
            .collect();
        series.sort();
        series.dedup();
        series
    }

    pub fn claimed_count(&self) -> usize {
        self.state.lock().map(|state| state.claims.len()).unwrap_or(0)
    }

    pub fn collision_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.collisions.len())
            .unwrap_or(0)
    }

    pub fn collisions(&self) -> Vec<Collision> {
        self.state
            .lock()
            .map(|state| state.collisions.clone())
            .unwrap_or_default()
    }
}
