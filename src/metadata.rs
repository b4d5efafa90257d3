use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::ser::SerializeMap;

use crate::dicom::{DicomFile, Tag, parse_decimals};
use crate::error::TciaError;

/// Value stored for any recognized field absent from a file header.
pub const UNKNOWN: &str = "Unknown";

macro_rules! fields {
    ($($variant:ident => ($group:literal, $element:literal, $name:literal),)+) => {
        /// Header fields extracted from every slice.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Field {
            $($variant,)+
        }

        impl Field {
            pub const ALL: &'static [Field] = &[$(Field::$variant,)+];

            pub fn tag(self) -> Tag {
                match self {
                    $(Field::$variant => Tag($group, $element),)+
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Field::$variant => $name,)+
                }
            }
        }
    };
}

fields! {
    StudyDate => (0x0008, 0x0020, "Study Date"),
    StudyTime => (0x0008, 0x0030, "Study Time"),
    StudyDescription => (0x0008, 0x1030, "Study Description"),
    StudyInstanceUid => (0x0020, 0x000d, "Study Instance UID"),
    SeriesDate => (0x0008, 0x0021, "Series Date"),
    SeriesTime => (0x0008, 0x0031, "Series Time"),
    SeriesDescription => (0x0008, 0x103e, "Series Description"),
    SeriesInstanceUid => (0x0020, 0x000e, "Series Instance UID"),
    InstanceNumber => (0x0020, 0x0013, "Instance Number"),
    SliceLocation => (0x0020, 0x1041, "Slice Location"),
    NumberOfSlices => (0x0054, 0x0081, "Number of Slices"),
    ContrastBolusAgent => (0x0018, 0x0010, "Contrast/Bolus Agent"),
    PatientName => (0x0010, 0x0010, "Patient's Name"),
    PatientId => (0x0010, 0x0020, "Patient ID"),
    PatientBirthDate => (0x0010, 0x0030, "Patient's Birth Date"),
    PatientSex => (0x0010, 0x0040, "Patient's Sex"),
    PatientAge => (0x0010, 0x1010, "Patient's Age"),
    PatientSize => (0x0010, 0x1020, "Patient's Size"),
    PatientWeight => (0x0010, 0x1030, "Patient's Weight"),
    InstitutionName => (0x0008, 0x0080, "Institution Name"),
    SopInstanceUid => (0x0008, 0x0018, "SOP Instance UID"),
    AcquisitionTime => (0x0008, 0x0032, "Acquisition Time"),
    Modality => (0x0008, 0x0060, "Modality"),
    ImageType => (0x0008, 0x0008, "Image Type"),
    Manufacturer => (0x0008, 0x0070, "Manufacturer"),
    ManufacturerModelName => (0x0008, 0x1090, "Manufacturer's Model Name"),
    AcquisitionNumber => (0x0020, 0x0012, "Acquisition Number"),
    ImagePositionPatient => (0x0020, 0x0032, "Image Position (Patient)"),
    CorrectedImage => (0x0028, 0x0051, "Corrected Image"),
}

impl Field {
    pub const COUNT: usize = Field::ALL.len();

    fn index(self) -> usize {
        self as usize
    }
}

/// Header metadata of one file. Every [`Field`] always has a value.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    values: Vec<String>,
    source: PathBuf,
    z_location: Option<f64>,
}

impl FileMetadata {
    /// Complete record with every field set to [`UNKNOWN`].
    pub fn unknown(source: impl Into<PathBuf>) -> Self {
        Self {
            values: vec![UNKNOWN.to_string(); Field::COUNT],
            source: source.into(),
            z_location: None,
        }
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.values[field.index()] = value.into();
        if field == Field::ImagePositionPatient {
            self.z_location = z_from_position(&self.values[field.index()]);
        }
    }

    pub fn get(&self, field: Field) -> &str {
        &self.values[field.index()]
    }

    pub fn is_known(&self, field: Field) -> bool {
        self.get(field) != UNKNOWN
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn set_source(&mut self, source: impl Into<PathBuf>) {
        self.source = source.into();
    }

    /// Last coordinate of Image Position (Patient), when present.
    pub fn z_location(&self) -> Option<f64> {
        self.z_location
    }

    pub fn series_uid(&self) -> &str {
        self.get(Field::SeriesInstanceUid)
    }

    pub fn modality(&self) -> &str {
        self.get(Field::Modality)
    }

    pub fn instance_number(&self) -> Option<i64> {
        parse_integer(self.get(Field::InstanceNumber))
    }

    pub fn acquisition_number(&self) -> Option<i64> {
        parse_integer(self.get(Field::AcquisitionNumber))
    }

    /// Name used when reporting on a single slice.
    pub fn slice_label(&self) -> String {
        if self.is_known(Field::SopInstanceUid) {
            return self.get(Field::SopInstanceUid).to_string();
        }
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

impl Serialize for FileMetadata {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Field::COUNT + 2))?;
        for field in Field::ALL {
            map.serialize_entry(field.name(), self.get(*field))?;
        }
        map.serialize_entry("file", &self.source.display().to_string())?;
        map.serialize_entry("z-location", &self.z_location)?;
        map.end()
    }
}

fn parse_integer(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|v| v as i64))
}

fn z_from_position(value: &str) -> Option<f64> {
    let coords = parse_decimals(value)?;
    if coords.len() != 3 {
        return None;
    }
    coords.last().copied()
}

pub trait MetadataReader: Send + Sync {
    fn read_metadata(&self, path: &Path) -> Result<FileMetadata, TciaError>;
}

/// Reads the fixed field set from DICOM headers, never touching pixel data.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomMetadataReader;

impl MetadataReader for DicomMetadataReader {
    fn read_metadata(&self, path: &Path) -> Result<FileMetadata, TciaError> {
        if !path.exists() {
            return Err(TciaError::NotFound(path.to_path_buf()));
        }
        let header = DicomFile::open_header(path)?;
        let mut metadata = FileMetadata::unknown(path);
        for field in Field::ALL {
            if let Some(value) = header.text(field.tag()) {
                metadata.set(*field, value);
            }
        }
        Ok(metadata)
    }
}
