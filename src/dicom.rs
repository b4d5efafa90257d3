//! Minimal DICOM Part 10 reader.
//!
//! Only what the classifier and the volume writer need: the file meta group,
//! top-level data elements of the data set (sequences are skipped), and native
//! pixel data. Supported encodings are implicit VR little endian, explicit VR
//! little endian and deflated explicit VR little endian. Compressed transfer
//! syntaxes are explicit VR little endian too, so their headers are readable;
//! their encapsulated pixel data is not.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use flate2::read::DeflateDecoder;
use thiserror::Error;

use crate::error::TciaError;

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const PREAMBLE_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub u16, pub u16);

impl Tag {
    pub const FILE_META_GROUP_LENGTH: Tag = Tag(0x0002, 0x0000);
    pub const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);
    pub const SAMPLES_PER_PIXEL: Tag = Tag(0x0028, 0x0002);
    pub const ROWS: Tag = Tag(0x0028, 0x0010);
    pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
    pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
    pub const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
    pub const PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
    pub const RESCALE_INTERCEPT: Tag = Tag(0x0028, 0x1052);
    pub const RESCALE_SLOPE: Tag = Tag(0x0028, 0x1053);
    pub const SLICE_THICKNESS: Tag = Tag(0x0018, 0x0050);
    pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

    const ITEM: Tag = Tag(0xFFFE, 0xE000);
    const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
    const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);

    fn is_delimiter_group(self) -> bool {
        self.0 == 0xFFFE
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}|{:04x}", self.0, self.1)
    }
}

/// Two-letter value representation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vr(pub [u8; 2]);

impl Vr {
    pub const FD: Vr = Vr(*b"FD");
    pub const FL: Vr = Vr(*b"FL");
    pub const OW: Vr = Vr(*b"OW");
    pub const SL: Vr = Vr(*b"SL");
    pub const SQ: Vr = Vr(*b"SQ");
    pub const SS: Vr = Vr(*b"SS");
    pub const UL: Vr = Vr(*b"UL");
    pub const UN: Vr = Vr(*b"UN");
    pub const US: Vr = Vr(*b"US");

    fn has_long_length(self) -> bool {
        matches!(
            &self.0,
            b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"UC" | b"UN" | b"UR" | b"UT"
                | b"SV" | b"UV"
        )
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub vr: Vr,
    pub value: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum DicomParseError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Stop before Pixel Data.
    HeaderOnly,
    /// Also load native (uncompressed) Pixel Data.
    WithPixelData,
}

#[derive(Debug, Clone)]
pub struct DicomFile {
    transfer_syntax: String,
    elements: BTreeMap<Tag, Element>,
    pixel_data: Option<Vec<u8>>,
}

impl DicomFile {
    pub fn open_header(path: &Path) -> Result<Self, TciaError> {
        Self::open_with(path, ReadMode::HeaderOnly)
    }

    pub fn open(path: &Path) -> Result<Self, TciaError> {
        Self::open_with(path, ReadMode::WithPixelData)
    }

    fn open_with(path: &Path, mode: ReadMode) -> Result<Self, TciaError> {
        if !path.exists() {
            return Err(TciaError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|err| TciaError::InvalidDicom {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Self::from_reader(BufReader::new(file), mode).map_err(|err| match err {
            DicomParseError::Unsupported(reason) => TciaError::UnsupportedTransferSyntax(reason),
            other => TciaError::InvalidDicom {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }

    pub fn from_reader<R: Read + 'static>(
        mut reader: R,
        mode: ReadMode,
    ) -> Result<Self, DicomParseError> {
        let mut preamble = [0u8; PREAMBLE_LEN + 4];
        reader.read_exact(&mut preamble).map_err(|_| {
            DicomParseError::Malformed("file too short for a DICOM preamble".to_string())
        })?;
        if &preamble[PREAMBLE_LEN..] != b"DICM" {
            return Err(DicomParseError::Malformed(
                "missing DICM prefix".to_string(),
            ));
        }

        let meta = read_file_meta(&mut reader)?;
        let transfer_syntax = meta
            .get(&Tag::TRANSFER_SYNTAX_UID)
            .map(|element| decode_text(&element.value))
            .ok_or_else(|| {
                DicomParseError::Malformed("file meta has no transfer syntax".to_string())
            })?;

        let mut dataset: ElementReader<Box<dyn Read>> = match transfer_syntax.as_str() {
            IMPLICIT_VR_LITTLE_ENDIAN => ElementReader::new(Box::new(reader), false),
            DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN => {
                ElementReader::new(Box::new(DeflateDecoder::new(reader)), true)
            }
            EXPLICIT_VR_BIG_ENDIAN => {
                return Err(DicomParseError::Unsupported(transfer_syntax));
            }
            _ => ElementReader::new(Box::new(reader), true),
        };

        let mut elements = meta;
        let mut pixel_data = None;
        while let Some((tag, vr, len)) = dataset.read_header()? {
            if tag == Tag::PIXEL_DATA {
                if mode == ReadMode::WithPixelData {
                    if len == UNDEFINED_LENGTH {
                        return Err(DicomParseError::Unsupported(format!(
                            "encapsulated pixel data ({transfer_syntax})"
                        )));
                    }
                    pixel_data = Some(dataset.read_value(len)?);
                }
                break;
            }
            if len == UNDEFINED_LENGTH {
                dataset.skip_sequence()?;
                continue;
            }
            if vr == Vr::SQ {
                dataset.skip(len)?;
                continue;
            }
            let value = dataset.read_value(len)?;
            elements.insert(tag, Element { vr, value });
        }

        Ok(Self {
            transfer_syntax,
            elements,
            pixel_data,
        })
    }

    pub fn transfer_syntax(&self) -> &str {
        &self.transfer_syntax
    }

    pub fn element(&self, tag: Tag) -> Option<&Element> {
        self.elements.get(&tag)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    /// Value rendered as text; binary numbers are formatted and multi-valued
    /// entries joined with `\`.
    pub fn text(&self, tag: Tag) -> Option<String> {
        let element = self.elements.get(&tag)?;
        let value = &element.value;
        let rendered = match element.vr {
            Vr::US => join_numbers(value.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]]))),
            Vr::SS => join_numbers(value.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]]))),
            Vr::UL => join_numbers(
                value
                    .chunks_exact(4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ),
            Vr::SL => join_numbers(
                value
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ),
            Vr::FL => join_numbers(
                value
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ),
            Vr::FD => join_numbers(value.chunks_exact(8).map(|b| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(b);
                f64::from_le_bytes(bytes)
            })),
            _ => decode_text(value),
        };
        Some(rendered)
    }

    pub fn u16_value(&self, tag: Tag) -> Option<u16> {
        let element = self.elements.get(&tag)?;
        if element.vr == Vr::US && element.value.len() >= 2 {
            return Some(u16::from_le_bytes([element.value[0], element.value[1]]));
        }
        self.text(tag)?.split('\\').next()?.trim().parse().ok()
    }

    /// Multi-valued decimal string, e.g. Pixel Spacing or Image Position.
    pub fn decimals(&self, tag: Tag) -> Option<Vec<f64>> {
        parse_decimals(&self.text(tag)?)
    }

    pub fn pixel_data(&self) -> Option<&[u8]> {
        self.pixel_data.as_deref()
    }
}

/// Parse a backslash-separated list of decimals; `None` if any part is not a
/// number.
pub fn parse_decimals(text: &str) -> Option<Vec<f64>> {
    text.split('\\')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect()
}

fn read_file_meta<R: Read>(reader: &mut R) -> Result<BTreeMap<Tag, Element>, DicomParseError> {
    let mut head = ElementReader::new(&mut *reader, true);
    let Some((tag, _, len)) = head.read_header()? else {
        return Err(DicomParseError::Malformed("empty file meta group".to_string()));
    };
    if tag != Tag::FILE_META_GROUP_LENGTH || len != 4 {
        return Err(DicomParseError::Malformed(
            "file meta group does not start with its group length".to_string(),
        ));
    }
    let group_len = head.read_u32()?;

    let mut bytes = Vec::new();
    reader
        .take(u64::from(group_len))
        .read_to_end(&mut bytes)?;
    if bytes.len() != group_len as usize {
        return Err(DicomParseError::Malformed("truncated file meta group".to_string()));
    }

    let mut meta = ElementReader::new(Cursor::new(bytes), true);
    let mut elements = BTreeMap::new();
    while let Some((tag, vr, len)) = meta.read_header()? {
        if len == UNDEFINED_LENGTH {
            return Err(DicomParseError::Malformed(
                "undefined length in file meta group".to_string(),
            ));
        }
        let value = meta.read_value(len)?;
        elements.insert(tag, Element { vr, value });
    }
    Ok(elements)
}

struct ElementReader<R> {
    inner: R,
    explicit: bool,
}

impl<R: Read> ElementReader<R> {
    fn new(inner: R, explicit: bool) -> Self {
        Self { inner, explicit }
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.inner.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// `None` on a clean end of stream between elements.
    fn read_header(&mut self) -> Result<Option<(Tag, Vr, u32)>, DicomParseError> {
        let mut buf = [0u8; 4];
        if !read_exact_or_eof(&mut self.inner, &mut buf)? {
            return Ok(None);
        }
        let tag = Tag(
            u16::from_le_bytes([buf[0], buf[1]]),
            u16::from_le_bytes([buf[2], buf[3]]),
        );
        if tag.is_delimiter_group() {
            let len = self.read_u32()?;
            return Ok(Some((tag, Vr::UN, len)));
        }
        if !self.explicit {
            let len = self.read_u32()?;
            return Ok(Some((tag, implicit_vr(tag), len)));
        }
        let mut vr = [0u8; 2];
        self.inner.read_exact(&mut vr)?;
        let vr = Vr(vr);
        let len = if vr.has_long_length() {
            self.read_u16()?;
            self.read_u32()?
        } else {
            u32::from(self.read_u16()?)
        };
        Ok(Some((tag, vr, len)))
    }

    fn read_value(&mut self, len: u32) -> Result<Vec<u8>, DicomParseError> {
        let mut value = Vec::new();
        (&mut self.inner)
            .take(u64::from(len))
            .read_to_end(&mut value)?;
        if value.len() != len as usize {
            return Err(DicomParseError::Malformed(
                "element value truncated".to_string(),
            ));
        }
        Ok(value)
    }

    fn skip(&mut self, len: u32) -> Result<(), DicomParseError> {
        let copied = io::copy(&mut (&mut self.inner).take(u64::from(len)), &mut io::sink())?;
        if copied != u64::from(len) {
            return Err(DicomParseError::Malformed(
                "element value truncated".to_string(),
            ));
        }
        Ok(())
    }

    fn skip_sequence(&mut self) -> Result<(), DicomParseError> {
        loop {
            let Some((tag, _, len)) = self.read_header()? else {
                return Err(DicomParseError::Malformed(
                    "unterminated sequence".to_string(),
                ));
            };
            match tag {
                Tag::SEQUENCE_DELIMITATION => return Ok(()),
                Tag::ITEM if len == UNDEFINED_LENGTH => self.skip_item()?,
                Tag::ITEM => self.skip(len)?,
                other => {
                    return Err(DicomParseError::Malformed(format!(
                        "unexpected element {other} inside sequence"
                    )));
                }
            }
        }
    }

    fn skip_item(&mut self) -> Result<(), DicomParseError> {
        loop {
            let Some((tag, _, len)) = self.read_header()? else {
                return Err(DicomParseError::Malformed("unterminated item".to_string()));
            };
            if tag == Tag::ITEM_DELIMITATION {
                return Ok(());
            }
            if len == UNDEFINED_LENGTH {
                self.skip_sequence()?;
            } else {
                self.skip(len)?;
            }
        }
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

// Implicit VR files carry no VR; only the binary elements read back as
// numbers need an entry here, everything else is decoded as text.
fn implicit_vr(tag: Tag) -> Vr {
    match (tag.0, tag.1) {
        (0x0028, 0x0002 | 0x0010 | 0x0011 | 0x0100 | 0x0101 | 0x0102 | 0x0103) => Vr::US,
        (0x0054, 0x0081) => Vr::US,
        (0x7FE0, 0x0010) => Vr::OW,
        _ => Vr::UN,
    }
}

fn decode_text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_matches(|ch: char| ch == '\0' || ch.is_whitespace())
        .to_string()
}

fn join_numbers<T: fmt::Display>(values: impl Iterator<Item = T>) -> String {
    values
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join("\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit(tag: Tag, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tag.0.to_le_bytes());
        out.extend_from_slice(&tag.1.to_le_bytes());
        out.extend_from_slice(vr);
        if Vr(*vr).has_long_length() {
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        } else {
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        }
        out.extend_from_slice(value);
        out
    }

    fn implicit(tag: Tag, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tag.0.to_le_bytes());
        out.extend_from_slice(&tag.1.to_le_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    fn part10(transfer_syntax: &str, dataset: &[u8]) -> Vec<u8> {
        let mut ts = transfer_syntax.as_bytes().to_vec();
        if ts.len() % 2 == 1 {
            ts.push(0);
        }
        let meta = explicit(Tag::TRANSFER_SYNTAX_UID, b"UI", &ts);
        let mut out = vec![0u8; PREAMBLE_LEN];
        out.extend_from_slice(b"DICM");
        out.extend(explicit(
            Tag::FILE_META_GROUP_LENGTH,
            b"UL",
            &(meta.len() as u32).to_le_bytes(),
        ));
        out.extend(meta);
        out.extend_from_slice(dataset);
        out
    }

    #[test]
    fn reads_explicit_header_and_stops_at_pixels() {
        let mut dataset = explicit(Tag(0x0008, 0x0060), b"CS", b"CT");
        dataset.extend(explicit(Tag::ROWS, b"US", &2u16.to_le_bytes()));
        dataset.extend(explicit(Tag::PIXEL_DATA, b"OW", &[1, 0, 2, 0, 3, 0, 4, 0]));
        let bytes = part10(EXPLICIT_VR_LITTLE_ENDIAN, &dataset);

        let header = DicomFile::from_reader(Cursor::new(bytes.clone()), ReadMode::HeaderOnly)
            .unwrap();
        assert_eq!(header.text(Tag(0x0008, 0x0060)).as_deref(), Some("CT"));
        assert_eq!(header.u16_value(Tag::ROWS), Some(2));
        assert!(header.pixel_data().is_none());

        let full = DicomFile::from_reader(Cursor::new(bytes), ReadMode::WithPixelData).unwrap();
        assert_eq!(full.pixel_data().map(<[u8]>::len), Some(8));
    }

    #[test]
    fn reads_implicit_dataset_and_skips_undefined_sequence() {
        let mut dataset = implicit(Tag(0x0010, 0x0010), b"DOE^JOHN");
        // (0008,1140) sequence with undefined length containing one undefined item
        dataset.extend_from_slice(&0x0008u16.to_le_bytes());
        dataset.extend_from_slice(&0x1140u16.to_le_bytes());
        dataset.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
        dataset.extend(implicit(Tag::ITEM, &[]).into_iter().take(4));
        dataset.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
        dataset.extend(implicit(Tag(0x0008, 0x1150), b"1.2.3\0"));
        dataset.extend(implicit(Tag::ITEM_DELIMITATION, &[]));
        dataset.extend(implicit(Tag::SEQUENCE_DELIMITATION, &[]));
        dataset.extend(implicit(Tag::COLUMNS, &512u16.to_le_bytes()));
        let bytes = part10(IMPLICIT_VR_LITTLE_ENDIAN, &dataset);

        let file = DicomFile::from_reader(Cursor::new(bytes), ReadMode::HeaderOnly).unwrap();
        assert_eq!(file.text(Tag(0x0010, 0x0010)).as_deref(), Some("DOE^JOHN"));
        assert!(!file.contains(Tag(0x0008, 0x1150)));
        assert_eq!(file.u16_value(Tag::COLUMNS), Some(512));
    }

    #[test]
    fn reads_deflated_dataset() {
        use std::io::Write;

        use flate2::Compression;
        use flate2::write::DeflateEncoder;

        let mut dataset = explicit(Tag(0x0008, 0x0060), b"CS", b"MR");
        dataset.extend(explicit(Tag::COLUMNS, b"US", &256u16.to_le_bytes()));
        dataset.extend(explicit(Tag::PIXEL_DATA, b"OW", &[9, 0, 8, 0]));
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&dataset).unwrap();
        let bytes = part10(DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN, &encoder.finish().unwrap());

        let file = DicomFile::from_reader(Cursor::new(bytes), ReadMode::WithPixelData).unwrap();
        assert_eq!(file.transfer_syntax(), DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(file.text(Tag(0x0008, 0x0060)).as_deref(), Some("MR"));
        assert_eq!(file.u16_value(Tag::COLUMNS), Some(256));
        assert_eq!(file.pixel_data(), Some(&[9u8, 0, 8, 0][..]));
    }

    #[test]
    fn skips_explicit_sequence_with_defined_length() {
        let inner = explicit(Tag(0x0008, 0x1155), b"UI", b"1.2.3\0");
        let mut item = Vec::new();
        item.extend_from_slice(&Tag::ITEM.0.to_le_bytes());
        item.extend_from_slice(&Tag::ITEM.1.to_le_bytes());
        item.extend_from_slice(&(inner.len() as u32).to_le_bytes());
        item.extend(inner);

        let mut dataset = explicit(Tag(0x0008, 0x0060), b"CS", b"CT");
        dataset.extend(explicit(Tag(0x0008, 0x1140), b"SQ", &item));
        dataset.extend(explicit(Tag::ROWS, b"US", &64u16.to_le_bytes()));
        let bytes = part10(EXPLICIT_VR_LITTLE_ENDIAN, &dataset);

        let file = DicomFile::from_reader(Cursor::new(bytes), ReadMode::HeaderOnly).unwrap();
        assert!(!file.contains(Tag(0x0008, 0x1140)));
        assert!(!file.contains(Tag(0x0008, 0x1155)));
        assert_eq!(file.text(Tag(0x0008, 0x0060)).as_deref(), Some("CT"));
        assert_eq!(file.u16_value(Tag::ROWS), Some(64));
    }

    #[test]
    fn rejects_missing_prefix() {
        let err = DicomFile::from_reader(Cursor::new(vec![0u8; 200]), ReadMode::HeaderOnly)
            .unwrap_err();
        assert!(matches!(err, DicomParseError::Malformed(_)));
    }

    #[test]
    fn big_endian_is_unsupported() {
        let bytes = part10(EXPLICIT_VR_BIG_ENDIAN, &[]);
        let err = DicomFile::from_reader(Cursor::new(bytes), ReadMode::HeaderOnly).unwrap_err();
        assert!(matches!(err, DicomParseError::Unsupported(_)));
    }

    #[test]
    fn parses_decimal_lists() {
        assert_eq!(parse_decimals("0.5\\0.5"), Some(vec![0.5, 0.5]));
        assert_eq!(parse_decimals("-10\\x\\3"), None);
    }
}
