#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Mutex;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use tcia_downloader::domain::SeriesId;
use tcia_downloader::error::TciaError;
use tcia_downloader::tcia::{ArchiveBlob, ArchiveClient};

const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

/// Header values of one synthetic slice.
#[derive(Debug, Clone)]
pub struct Slice {
    pub patient_name: String,
    pub patient_id: String,
    pub study_date: String,
    pub study_description: String,
    pub study_uid: String,
    pub modality: String,
    pub series_description: String,
    pub series_uid: String,
    pub sop_uid: String,
    pub instance: i32,
    pub acquisition: i32,
    pub image_type: String,
    pub position: Option<[f64; 3]>,
    pub rows: u16,
    pub columns: u16,
    /// (slope, intercept); omitted from the file when `None`.
    pub rescale: Option<(f64, f64)>,
}

impl Slice {
    pub fn ct(series_uid: &str, instance: i32) -> Self {
        Self {
            patient_name: "DOE^JANE".to_string(),
            patient_id: "LUNG-001".to_string(),
            study_date: "20200101".to_string(),
            study_description: "CHEST CT".to_string(),
            study_uid: "1.2.840.1".to_string(),
            modality: "CT".to_string(),
            series_description: format!("AXIAL {series_uid}"),
            series_uid: series_uid.to_string(),
            sop_uid: format!("{series_uid}.{instance}"),
            instance,
            acquisition: 1,
            image_type: "ORIGINAL\\PRIMARY\\AXIAL".to_string(),
            position: Some([-100.0, -100.0, f64::from(instance) * 2.5]),
            rows: 2,
            columns: 3,
            rescale: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.series_description = description.to_string();
        self
    }

    pub fn with_position(mut self, position: Option<[f64; 3]>) -> Self {
        self.position = position;
        self
    }

    pub fn with_rescale(mut self, slope: f64, intercept: f64) -> Self {
        self.rescale = Some((slope, intercept));
        self
    }

    /// Part 10 bytes in explicit VR little endian with 16-bit signed pixels.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut dataset = Vec::new();
        element(&mut dataset, (0x0008, 0x0008), b"CS", self.image_type.as_bytes());
        element(&mut dataset, (0x0008, 0x0018), b"UI", self.sop_uid.as_bytes());
        element(&mut dataset, (0x0008, 0x0020), b"DA", self.study_date.as_bytes());
        element(&mut dataset, (0x0008, 0x0060), b"CS", self.modality.as_bytes());
        element(&mut dataset, (0x0008, 0x1030), b"LO", self.study_description.as_bytes());
        element(&mut dataset, (0x0008, 0x103e), b"LO", self.series_description.as_bytes());
        element(&mut dataset, (0x0010, 0x0010), b"PN", self.patient_name.as_bytes());
        element(&mut dataset, (0x0010, 0x0020), b"LO", self.patient_id.as_bytes());
        element(&mut dataset, (0x0020, 0x000d), b"UI", self.study_uid.as_bytes());
        element(&mut dataset, (0x0020, 0x000e), b"UI", self.series_uid.as_bytes());
        element(&mut dataset, (0x0020, 0x0012), b"IS", self.acquisition.to_string().as_bytes());
        element(&mut dataset, (0x0020, 0x0013), b"IS", self.instance.to_string().as_bytes());
        if let Some([x, y, z]) = self.position {
            element(&mut dataset, (0x0020, 0x0032), b"DS", format!("{x}\\{y}\\{z}").as_bytes());
        }
        element(&mut dataset, (0x0028, 0x0002), b"US", &1u16.to_le_bytes());
        element(&mut dataset, (0x0028, 0x0010), b"US", &self.rows.to_le_bytes());
        element(&mut dataset, (0x0028, 0x0011), b"US", &self.columns.to_le_bytes());
        element(&mut dataset, (0x0028, 0x0030), b"DS", b"0.5\\0.5");
        element(&mut dataset, (0x0028, 0x0100), b"US", &16u16.to_le_bytes());
        element(&mut dataset, (0x0028, 0x0103), b"US", &1u16.to_le_bytes());
        if let Some((slope, intercept)) = self.rescale {
            element(&mut dataset, (0x0028, 0x1052), b"DS", intercept.to_string().as_bytes());
            element(&mut dataset, (0x0028, 0x1053), b"DS", slope.to_string().as_bytes());
        }
        let pixels: Vec<u8> = (0..usize::from(self.rows) * usize::from(self.columns))
            .flat_map(|i| ((i as i16) + self.instance as i16).to_le_bytes())
            .collect();
        element(&mut dataset, (0x7fe0, 0x0010), b"OW", &pixels);
        part10(&dataset)
    }
}

fn element(out: &mut Vec<u8>, tag: (u16, u16), vr: &[u8; 2], value: &[u8]) {
    let mut value = value.to_vec();
    if value.len() % 2 == 1 {
        value.push(if vr == b"UI" { 0 } else { b' ' });
    }
    out.extend_from_slice(&tag.0.to_le_bytes());
    out.extend_from_slice(&tag.1.to_le_bytes());
    out.extend_from_slice(vr);
    if matches!(vr, b"OB" | b"OW" | b"SQ" | b"UN" | b"UT") {
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    }
    out.extend_from_slice(&value);
}

fn part10(dataset: &[u8]) -> Vec<u8> {
    let mut meta = Vec::new();
    element(&mut meta, (0x0002, 0x0010), b"UI", EXPLICIT_VR_LITTLE_ENDIAN.as_bytes());
    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");
    element(&mut out, (0x0002, 0x0000), b"UL", &(meta.len() as u32).to_le_bytes());
    out.extend(meta);
    out.extend_from_slice(dataset);
    out
}

/// Stored (uncompressed) zip with the given entries.
pub fn zip_bytes(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, bytes) in entries {
        writer.start_file(name.as_str(), options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Zip holding one file per slice, named like TCIA archives (`1-NN.dcm`).
pub fn series_zip(slices: &[Slice]) -> Vec<u8> {
    let entries: Vec<(String, Vec<u8>)> = slices
        .iter()
        .enumerate()
        .map(|(i, slice)| (format!("1-{:02}.dcm", i + 1), slice.to_bytes()))
        .collect();
    zip_bytes(&entries)
}

/// Serves canned archives; unknown identifiers fail with a transport error.
#[derive(Default)]
pub struct MockArchive {
    archives: Vec<(String, Vec<u8>)>,
    pub calls: Mutex<Vec<String>>,
}

impl MockArchive {
    pub fn with(mut self, id: &str, bytes: Vec<u8>) -> Self {
        self.archives.push((id.to_string(), bytes));
        self
    }
}

impl ArchiveClient for MockArchive {
    fn fetch(&self, series: &SeriesId) -> Result<ArchiveBlob, TciaError> {
        self.calls.lock().unwrap().push(series.to_string());
        let bytes = self
            .archives
            .iter()
            .find(|(id, _)| id == series.as_str())
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| TciaError::Transport(format!("no archive for {series}")))?;
        ArchiveBlob::from_reader(series, Cursor::new(bytes), None)
    }
}

pub fn ids(values: &[&str]) -> Vec<SeriesId> {
    values.iter().map(|value| value.parse().unwrap()).collect()
}
