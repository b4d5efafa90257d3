use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::metadata::{Field, FileMetadata};

pub const DEFAULT_MIN_SERIES_LEN: usize = 25;

const ALLOWED_MODALITIES: &[&str] = &["CT", "MR", "PT", "RTSTRUCT", "SEG"];
const IMAGE_MODALITIES: &[&str] = &["CT", "MR", "PT"];
const NON_ATTENUATION_CORRECTED: &[&str] = &["noac", "nac", "noattn"];

/// Slices sharing one Series Instance UID, in order of first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesGroup {
    uid: String,
    members: Vec<FileMetadata>,
}

impl SeriesGroup {
    pub fn new(uid: impl Into<String>, members: Vec<FileMetadata>) -> Self {
        Self {
            uid: uid.into(),
            members,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn members(&self) -> &[FileMetadata] {
        &self.members
    }

    pub fn into_members(self) -> Vec<FileMetadata> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Group by series UID; groups keep first-appearance order, and so do the
/// members inside each group.
pub fn group(items: impl IntoIterator<Item = FileMetadata>) -> Vec<SeriesGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<SeriesGroup> = Vec::new();
    for item in items {
        let uid = item.series_uid().to_string();
        match index.get(&uid) {
            Some(&at) => groups[at].members.push(item),
            None => {
                index.insert(uid.clone(), groups.len());
                groups.push(SeriesGroup::new(uid, vec![item]));
            }
        }
    }
    groups
}

/// Original acquisition of an allowed modality; PET must be attenuation
/// corrected.
pub fn keep_slice(metadata: &FileMetadata) -> bool {
    is_allowed_modality(metadata) && is_original_image(metadata) && is_attenuation_corrected(metadata)
}

fn is_allowed_modality(metadata: &FileMetadata) -> bool {
    ALLOWED_MODALITIES.contains(&metadata.modality())
}

// RTSTRUCT and SEG objects carry no Image Type, only image modalities are checked.
fn is_original_image(metadata: &FileMetadata) -> bool {
    if !IMAGE_MODALITIES.contains(&metadata.modality()) {
        return true;
    }
    metadata
        .get(Field::ImageType)
        .split('\\')
        .any(|value| value.trim() == "ORIGINAL")
}

fn is_attenuation_corrected(metadata: &FileMetadata) -> bool {
    if metadata.modality() != "PT" {
        return true;
    }
    if metadata.is_known(Field::CorrectedImage)
        && !metadata.get(Field::CorrectedImage).contains("ATTN")
    {
        return false;
    }
    let description: String = metadata
        .get(Field::SeriesDescription)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_lowercase();
    !NON_ATTENUATION_CORRECTED
        .iter()
        .any(|pattern| description.contains(pattern))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub slice_type: bool,
    pub small_series: bool,
    pub min_series_len: usize,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            slice_type: false,
            small_series: false,
            min_series_len: DEFAULT_MIN_SERIES_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedSeries {
    pub uid: String,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub groups: Vec<SeriesGroup>,
    pub dropped_series: Vec<DroppedSeries>,
    pub dropped_slices: Vec<FileMetadata>,
}

impl FilterOptions {
    /// Slice filter, then grouping, then the small-series filter.
    pub fn admit(&self, items: Vec<FileMetadata>) -> Admission {
        let (kept, dropped_slices): (Vec<_>, Vec<_>) = if self.slice_type {
            items.into_iter().partition(keep_slice)
        } else {
            (items, Vec::new())
        };

        let (groups, dropped_series) = if self.small_series {
            let (groups, small): (Vec<_>, Vec<_>) = group(kept)
                .into_iter()
                .partition(|group| group.len() >= self.min_series_len);
            let dropped = small
                .into_iter()
                .map(|group| DroppedSeries {
                    uid: group.uid,
                    len: group.members.len(),
                })
                .collect();
            (groups, dropped)
        } else {
            (group(kept), Vec::new())
        };

        Admission {
            groups,
            dropped_series,
            dropped_slices,
        }
    }
}
