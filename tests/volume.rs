use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;

use tcia_downloader::error::TciaError;
use tcia_downloader::metadata::{Field, FileMetadata};
use tcia_downloader::series::SeriesGroup;
use tcia_downloader::volume::{OrderSource, VolumeWriter, assemble};

#[derive(Default)]
struct RecordingWriter {
    calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl VolumeWriter for RecordingWriter {
    fn write_volume(&self, slices: &[PathBuf], _destination: &Path) -> Result<(), TciaError> {
        self.calls.lock().unwrap().push(slices.to_vec());
        Ok(())
    }
}

fn slice(series: &str, instance: i64, z: f64) -> FileMetadata {
    FileMetadata::unknown(format!("{series}/{instance}.dcm"))
        .with(Field::SeriesInstanceUid, series)
        .with(Field::SopInstanceUid, format!("{series}.{instance}"))
        .with(Field::AcquisitionNumber, "1")
        .with(Field::InstanceNumber, instance.to_string())
        .with(Field::ImagePositionPatient, format!("0\\0\\{z}"))
}

#[test]
fn writer_receives_canonical_order() {
    let temp = tempfile::tempdir().unwrap();
    let group = SeriesGroup::new(
        "1.2",
        vec![slice("1.2", 2, 5.0), slice("1.2", 1, 0.0), slice("1.2", 3, 10.0)],
    );
    let writer = RecordingWriter::default();

    let artifact = assemble(&group, &temp.path().join("v.nii.gz"), &writer).unwrap();

    assert_eq!(artifact.order, OrderSource::InstanceNumber);
    assert_eq!(artifact.discrepancies, 0);
    assert_eq!(artifact.slices, 3);
    let calls = writer.calls.lock().unwrap();
    assert_eq!(
        calls[0],
        vec![
            PathBuf::from("1.2/1.dcm"),
            PathBuf::from("1.2/2.dcm"),
            PathBuf::from("1.2/3.dcm")
        ]
    );
}

#[test]
fn z_location_wins_on_disagreement() {
    let temp = tempfile::tempdir().unwrap();
    // instance numbers restart mid-series, z is monotonic
    let mut late = slice("1.2", 1, 4.0).with(Field::SopInstanceUid, "late");
    late.set_source("1.2/late.dcm");
    let group = SeriesGroup::new(
        "1.2",
        vec![slice("1.2", 1, 0.0), slice("1.2", 2, 2.0), late],
    );
    let writer = RecordingWriter::default();

    let artifact = assemble(&group, &temp.path().join("v.nii.gz"), &writer).unwrap();

    assert_eq!(artifact.order, OrderSource::ZLocation);
    assert_eq!(artifact.discrepancies, 1);
    let calls = writer.calls.lock().unwrap();
    assert_eq!(
        calls[0],
        vec![
            PathBuf::from("1.2/1.dcm"),
            PathBuf::from("1.2/2.dcm"),
            PathBuf::from("1.2/late.dcm")
        ]
    );
}

#[test]
fn mixed_series_is_ambiguous() {
    let temp = tempfile::tempdir().unwrap();
    let group = SeriesGroup::new("1.2", vec![slice("1.2", 1, 0.0), slice("3.4", 2, 1.0)]);
    let writer = RecordingWriter::default();
    let err = assemble(&group, &temp.path().join("v.nii.gz"), &writer).unwrap_err();
    assert_matches!(err, TciaError::AmbiguousSeries(ref uids) if uids.len() == 2);
    assert!(writer.calls.lock().unwrap().is_empty());
}

#[test]
fn empty_group_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let group = SeriesGroup::new("1.2", Vec::new());
    let err = assemble(&group, &temp.path().join("v.nii.gz"), &RecordingWriter::default())
        .unwrap_err();
    assert_matches!(err, TciaError::EmptySeries(_));
}

#[test]
fn existing_volume_is_never_overwritten() {
    let temp = tempfile::tempdir().unwrap();
    let destination = temp.path().join("v.nii.gz");
    fs::write(&destination, b"previous").unwrap();
    let group = SeriesGroup::new("1.2", vec![slice("1.2", 1, 0.0)]);

    let err = assemble(&group, &destination, &RecordingWriter::default()).unwrap_err();

    assert_matches!(err, TciaError::DestinationExists(_));
    assert_eq!(fs::read(&destination).unwrap(), b"previous");
}
