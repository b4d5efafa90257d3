mod common;

use std::fs;

use camino::Utf8PathBuf;

use tcia_downloader::app::{App, RunContext};
use tcia_downloader::config::ResolvedConfig;
use tcia_downloader::local::LocalArchiveSource;
use tcia_downloader::metadata::DicomMetadataReader;
use tcia_downloader::nifti::NiftiWriter;
use tcia_downloader::output::JsonOutput;

use common::{Slice, series_zip};

#[test]
fn classify_local_archives_leaves_inputs_untouched() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let slices: Vec<Slice> = (1..=3).map(|i| Slice::ct("7.7", i)).collect();
    fs::write(input.path().join("7.7.zip"), series_zip(&slices)).unwrap();

    let source = LocalArchiveSource::discover(input.path()).unwrap();
    let ids = source.ids();
    let root = Utf8PathBuf::from_path_buf(out.path().join("sorted")).unwrap();
    let ctx = RunContext::new(root.clone(), &ResolvedConfig::default());
    let app = App::new(source, DicomMetadataReader, NiftiWriter::default());

    let summary = app.run(ids, &ctx, &JsonOutput).unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.files_placed, 3);
    assert_eq!(summary.volumes_written, 0);
    assert!(input.path().join("7.7.zip").is_file());
    assert!(
        root.join("DOEJANE_LUNG-001/20200101_CHEST_CT/CT_AXIAL_7_7/2.dcm")
            .as_std_path()
            .is_file()
    );
}
