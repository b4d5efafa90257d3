use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TciaError {
    #[error("invalid series identifier: {0:?}")]
    InvalidSeriesId(String),

    #[error("manifest not found: {0}")]
    MissingManifest(PathBuf),

    #[error("failed to read manifest at {0}")]
    ManifestRead(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("TCIA request failed: {0}")]
    Transport(String),

    #[error("TCIA returned status {status}: {message}")]
    TransportStatus { status: u16, message: String },

    #[error("series {series} is not a valid archive: {reason}")]
    InvalidSeries { series: String, reason: String },

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("not a readable DICOM file {path}: {reason}")]
    InvalidDicom { path: PathBuf, reason: String },

    #[error("unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("files from several series share one volume: {}", .0.join(", "))]
    AmbiguousSeries(Vec<String>),

    #[error("series {0} has no eligible slices")]
    EmptySeries(String),

    #[error("directory exists and is not empty: {0}")]
    #[diagnostic(help("pick a new destination or empty the existing one"))]
    DirectoryNotEmpty(PathBuf),

    #[error("volume write failed: {0}")]
    VolumeWrite(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl TciaError {
    /// Stable name of the error variant, used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            TciaError::InvalidSeriesId(_) => "invalid-series-id",
            TciaError::MissingManifest(_) => "missing-manifest",
            TciaError::ManifestRead(_) => "manifest-read",
            TciaError::ConfigRead(_) => "config-read",
            TciaError::ConfigParse(_) => "config-parse",
            TciaError::Transport(_) | TciaError::TransportStatus { .. } => "transport",
            TciaError::InvalidSeries { .. } => "invalid-series",
            TciaError::CorruptArchive(_) => "corrupt-archive",
            TciaError::NotFound(_) => "not-found",
            TciaError::InvalidDicom { .. } => "invalid-dicom",
            TciaError::UnsupportedTransferSyntax(_) => "unsupported-transfer-syntax",
            TciaError::DestinationExists(_) => "destination-exists",
            TciaError::AmbiguousSeries(_) => "ambiguous-series",
            TciaError::EmptySeries(_) => "empty-series",
            TciaError::DirectoryNotEmpty(_) => "directory-not-empty",
            TciaError::VolumeWrite(_) => "volume-write",
            TciaError::Filesystem(_) => "filesystem",
        }
    }
}
