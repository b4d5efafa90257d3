//! Destination paths derived from slice metadata.
//!
//! Layout: `<patient>/<study>/<series>/<instance>.dcm`, where
//! `patient = name_id`, `study = date_description` and
//! `series = modality_description`. Volumes live next to their series folder
//! as `<series>.nii.gz`.

use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;

use crate::metadata::{Field, FileMetadata};

pub const SLICE_EXTENSION: &str = "dcm";
pub const VOLUME_EXTENSION: &str = "nii.gz";

/// Fields feeding the path, in order.
pub const PATH_FIELDS: [Field; 9] = [
    Field::PatientName,
    Field::PatientId,
    Field::StudyDate,
    Field::StudyDescription,
    Field::StudyInstanceUid,
    Field::Modality,
    Field::SeriesDescription,
    Field::SeriesInstanceUid,
    Field::InstanceNumber,
];

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^-\w]").unwrap());

/// Filesystem-safe token: trimmed, spaces and dots become `_`, anything
/// else outside `[-\w]` is dropped.
pub fn sanitize(value: &str) -> String {
    let replaced = value.trim().replace([' ', '.'], "_");
    let cleaned = UNSAFE_CHARS.replace_all(&replaced, "").into_owned();
    if cleaned.is_empty() {
        crate::metadata::UNKNOWN.to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segments {
    patient: String,
    study: String,
    series: String,
    instance: String,
}

fn segments(metadata: &FileMetadata) -> Segments {
    let pieces = PATH_FIELDS.map(|field| sanitize(metadata.get(field)));
    Segments {
        patient: format!("{}_{}", pieces[0], pieces[1]),
        study: format!("{}_{}", pieces[2], pieces[3]),
        series: format!("{}_{}", pieces[5], pieces[6]),
        instance: pieces[8].clone(),
    }
}

/// Relative destination of one slice.
pub fn build_path(metadata: &FileMetadata) -> Utf8PathBuf {
    let seg = segments(metadata);
    Utf8PathBuf::from(seg.patient)
        .join(seg.study)
        .join(seg.series)
        .join(format!("{}.{SLICE_EXTENSION}", seg.instance))
}

/// Relative destination of the volume assembled from a slice's series.
pub fn volume_path(metadata: &FileMetadata) -> Utf8PathBuf {
    let seg = segments(metadata);
    Utf8PathBuf::from(seg.patient)
        .join(seg.study)
        .join(format!("{}.{VOLUME_EXTENSION}", seg.series))
}
