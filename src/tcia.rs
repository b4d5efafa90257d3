use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::SeriesId;
use crate::error::TciaError;

pub const TCIA_ENDPOINT: &str =
    "https://services.cancerimagingarchive.net/services/v3/TCIA/query/getImage";
pub const QUERY_PARAM: &str = "SeriesInstanceUID";
pub const METADATA_HEADER: &str = "metadata";
pub const EXPECTED_PAYLOAD_TYPE: &str = "ZIP";
pub const CHUNK_SIZE: usize = 8192;

/// Downloaded archive held in a temp file; the file is deleted on drop.
#[derive(Debug)]
pub struct ArchiveBlob {
    series: SeriesId,
    file: NamedTempFile,
    len: u64,
}

impl ArchiveBlob {
    /// Stream `reader` into a new temp file under `dir` (or the system temp
    /// directory).
    pub fn from_reader<R: Read>(
        series: &SeriesId,
        mut reader: R,
        dir: Option<&Path>,
    ) -> Result<Self, TciaError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tcia-dl-").suffix(".zip");
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|err| TciaError::Filesystem(err.to_string()))?;

        let len = copy_chunks(&mut reader, file.as_file_mut())
            .map_err(|err| TciaError::Transport(format!("reading body of {series}: {err}")))?;
        file.as_file_mut()
            .flush()
            .and_then(|()| file.as_file_mut().seek(SeekFrom::Start(0)))
            .map_err(|err| TciaError::Filesystem(err.to_string()))?;

        Ok(Self {
            series: series.clone(),
            file,
            len,
        })
    }

    pub fn series(&self) -> &SeriesId {
        &self.series
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Consume the blob as a readable file positioned at its start.
    pub fn into_file(self) -> BlobFile {
        BlobFile { inner: self.file }
    }
}

/// Read handle over a consumed [`ArchiveBlob`]; releases the temp file on drop.
#[derive(Debug)]
pub struct BlobFile {
    inner: NamedTempFile,
}

impl Read for BlobFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.as_file_mut().read(buf)
    }
}

impl Seek for BlobFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.as_file_mut().seek(pos)
    }
}

/// Copy in fixed-size chunks, writing only non-empty reads.
pub fn copy_chunks<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<u64> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

pub trait ArchiveClient: Send + Sync {
    fn fetch(&self, series: &SeriesId) -> Result<ArchiveBlob, TciaError>;
}

#[derive(Debug, Deserialize)]
struct PayloadMetadata {
    #[serde(rename = "Result")]
    result: PayloadResult,
}

#[derive(Debug, Deserialize)]
struct PayloadResult {
    #[serde(rename = "Type", default)]
    kind: Vec<String>,
}

/// Check the JSON `metadata` header announces a zip payload.
pub fn check_payload_type(series: &SeriesId, header: Option<&str>) -> Result<(), TciaError> {
    let invalid = |reason: String| TciaError::InvalidSeries {
        series: series.to_string(),
        reason,
    };
    let header = header.ok_or_else(|| invalid("response has no metadata header".to_string()))?;
    let metadata: PayloadMetadata = serde_json::from_str(header)
        .map_err(|err| invalid(format!("unreadable metadata header: {err}")))?;
    match metadata.result.kind.first() {
        Some(kind) if kind == EXPECTED_PAYLOAD_TYPE => Ok(()),
        Some(kind) => Err(invalid(format!(
            "payload type is {kind}, expected {EXPECTED_PAYLOAD_TYPE}"
        ))),
        None => Err(invalid("payload type missing".to_string())),
    }
}

#[derive(Clone)]
pub struct TciaHttpClient {
    client: Client,
    endpoint: String,
    staging_dir: Option<PathBuf>,
}

impl TciaHttpClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TciaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("tcia-dl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TciaError::Transport(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| TciaError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            staging_dir: None,
        })
    }

    /// Directory receiving downloaded blobs instead of the system temp dir.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ArchiveClient for TciaHttpClient {
    fn fetch(&self, series: &SeriesId) -> Result<ArchiveBlob, TciaError> {
        debug!(series = %series, endpoint = %self.endpoint, "requesting archive");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[(QUERY_PARAM, series.as_str())])
            .send()
            .map_err(|err| TciaError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "TCIA request failed".to_string());
            return Err(TciaError::TransportStatus { status, message });
        }

        let header = response
            .headers()
            .get(METADATA_HEADER)
            .and_then(|value| value.to_str().ok());
        check_payload_type(series, header)?;

        ArchiveBlob::from_reader(series, response, self.staging_dir.as_deref())
    }
}
