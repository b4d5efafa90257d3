use std::collections::HashSet;

use tcia_downloader::layout::{build_path, sanitize, volume_path};
use tcia_downloader::metadata::{Field, FileMetadata};

fn slice(series_description: &str, instance: u32) -> FileMetadata {
    FileMetadata::unknown(format!("/staging/{instance}.dcm"))
        .with(Field::PatientName, "Anon")
        .with(Field::PatientId, "HN-CHUM-001")
        .with(Field::StudyDate, "20040101")
        .with(Field::StudyDescription, "PET CT")
        .with(Field::Modality, "PT")
        .with(Field::SeriesDescription, series_description)
        .with(Field::InstanceNumber, instance.to_string())
}

#[test]
fn path_depends_only_on_metadata() {
    let a = slice("WB AC", 3);
    let mut b = a.clone();
    b.set_source("/elsewhere/other-name.dcm");
    b.set(Field::SeriesTime, "101010");
    assert_eq!(build_path(&a), build_path(&b));
    assert_eq!(build_path(&a), build_path(&a));
}

#[test]
fn distinct_sanitized_inputs_give_distinct_paths() {
    let mut seen = HashSet::new();
    for description in ["WB AC", "WB NAC", "CT 3mm"] {
        for instance in 1..=20 {
            assert!(seen.insert(build_path(&slice(description, instance))));
        }
    }
    assert_eq!(seen.len(), 60);
}

#[test]
fn sanitization_can_merge_inputs() {
    assert_eq!(sanitize("AXIAL 1.0"), sanitize("AXIAL_1_0"));
    assert_eq!(
        build_path(&slice("AXIAL 1.0", 1)),
        build_path(&slice("AXIAL_1_0", 1))
    );
}

#[test]
fn volume_sits_next_to_series_folder() {
    let meta = slice("WB AC", 1);
    let slice_path = build_path(&meta);
    let volume = volume_path(&meta);
    let series_dir = slice_path.parent().unwrap();
    assert_eq!(volume.parent(), series_dir.parent());
    assert_eq!(volume.file_name(), Some("PT_WB_AC.nii.gz"));
    assert_eq!(series_dir.file_name(), Some("PT_WB_AC"));
}
