//! Gzip-compressed single-file NIfTI-1 output.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use crate::dicom::{DicomFile, Tag};
use crate::error::TciaError;
use crate::fs_util;
use crate::volume::VolumeWriter;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_FLOAT32: i16 = 16;
const DT_INT8: i16 = 256;
const DT_UINT16: i16 = 512;
const NIFTI_UNITS_MM: u8 = 2;
const NIFTI_XFORM_SCANNER_ANAT: i16 = 1;
const IMAGE_POSITION: Tag = Tag(0x0020, 0x0032);

/// Stacks native monochrome slices into one `.nii.gz` volume.
#[derive(Debug, Clone, Copy)]
pub struct NiftiWriter {
    compression: Compression,
}

impl Default for NiftiWriter {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
        }
    }
}

impl NiftiWriter {
    pub fn new(level: u32) -> Self {
        Self {
            compression: Compression::new(level),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SliceGeometry {
    rows: u16,
    columns: u16,
    bits_allocated: u16,
    signed: bool,
}

/// Stored value to modality value: `stored * slope + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rescale {
    slope: f64,
    intercept: f64,
}

impl Rescale {
    fn of(file: &DicomFile) -> Self {
        let first = |tag| {
            file.decimals(tag)
                .and_then(|values| values.first().copied())
        };
        Self {
            slope: first(Tag::RESCALE_SLOPE).unwrap_or(1.0),
            intercept: first(Tag::RESCALE_INTERCEPT).unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub dims: [i16; 3],
    pub datatype: i16,
    pub bitpix: i16,
    pub spacing: [f32; 3],
    pub origin: [f32; 3],
    pub slope: f32,
    pub intercept: f32,
}

impl NiftiHeader {
    pub fn to_bytes(&self) -> [u8; VOX_OFFSET] {
        let mut buf = [0u8; VOX_OFFSET];
        put_i32(&mut buf, 0, HEADER_SIZE as i32);
        let dim = [3, self.dims[0], self.dims[1], self.dims[2], 1, 1, 1, 1];
        for (i, value) in dim.iter().enumerate() {
            put_i16(&mut buf, 40 + i * 2, *value);
        }
        put_i16(&mut buf, 70, self.datatype);
        put_i16(&mut buf, 72, self.bitpix);
        let pixdim = [
            1.0,
            self.spacing[0],
            self.spacing[1],
            self.spacing[2],
            0.0,
            0.0,
            0.0,
            0.0,
        ];
        for (i, value) in pixdim.iter().enumerate() {
            put_f32(&mut buf, 76 + i * 4, *value);
        }
        put_f32(&mut buf, 108, VOX_OFFSET as f32);
        put_f32(&mut buf, 112, self.slope);
        put_f32(&mut buf, 116, self.intercept);
        buf[123] = NIFTI_UNITS_MM;
        put_i16(&mut buf, 254, NIFTI_XFORM_SCANNER_ANAT);
        // DICOM positions are LPS, NIfTI world space is RAS.
        let srow = [
            [-self.spacing[0], 0.0, 0.0, -self.origin[0]],
            [0.0, -self.spacing[1], 0.0, -self.origin[1]],
            [0.0, 0.0, self.spacing[2], self.origin[2]],
        ];
        for (r, row) in srow.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                put_f32(&mut buf, 280 + r * 16 + c * 4, *value);
            }
        }
        buf[344..348].copy_from_slice(b"n+1\0");
        buf
    }
}

fn put_i16(buf: &mut [u8], at: usize, value: i16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_i32(buf: &mut [u8], at: usize, value: i32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(buf: &mut [u8], at: usize, value: f32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn geometry(file: &DicomFile, path: &Path) -> Result<SliceGeometry, TciaError> {
    let missing = |what: &str| {
        TciaError::VolumeWrite(format!("{}: missing {what}", path.display()))
    };
    if file.u16_value(Tag::SAMPLES_PER_PIXEL).unwrap_or(1) != 1 {
        return Err(TciaError::VolumeWrite(format!(
            "{}: only monochrome slices are supported",
            path.display()
        )));
    }
    Ok(SliceGeometry {
        rows: file.u16_value(Tag::ROWS).ok_or_else(|| missing("Rows"))?,
        columns: file.u16_value(Tag::COLUMNS).ok_or_else(|| missing("Columns"))?,
        bits_allocated: file
            .u16_value(Tag::BITS_ALLOCATED)
            .ok_or_else(|| missing("Bits Allocated"))?,
        signed: file.u16_value(Tag::PIXEL_REPRESENTATION).unwrap_or(0) == 1,
    })
}

fn datatype(geometry: SliceGeometry) -> Result<(i16, i16), TciaError> {
    match (geometry.bits_allocated, geometry.signed) {
        (8, false) => Ok((DT_UINT8, 8)),
        (8, true) => Ok((DT_INT8, 8)),
        (16, false) => Ok((DT_UINT16, 16)),
        (16, true) => Ok((DT_INT16, 16)),
        (bits, _) => Err(TciaError::VolumeWrite(format!(
            "unsupported bits allocated: {bits}"
        ))),
    }
}

fn dimension(extent: usize, axis: &str) -> Result<i16, TciaError> {
    i16::try_from(extent).map_err(|_| {
        TciaError::VolumeWrite(format!(
            "{axis} extent {extent} exceeds the NIfTI-1 limit of {}",
            i16::MAX
        ))
    })
}

/// One stored sample as a number, per the slice's pixel encoding.
fn sample(bytes: &[u8], shape: SliceGeometry) -> f64 {
    match (shape.bits_allocated, shape.signed) {
        (8, false) => f64::from(bytes[0]),
        (8, true) => f64::from(bytes[0] as i8),
        (16, false) => f64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
        _ => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
    }
}

/// Apply each slice's own rescale and re-encode as little-endian f32.
fn rescale_voxels(
    voxels: &[u8],
    slice_bytes: usize,
    rescales: &[Rescale],
    shape: SliceGeometry,
) -> Vec<u8> {
    let width = usize::from(shape.bits_allocated / 8);
    let mut out = Vec::with_capacity(voxels.len() / width * 4);
    for (slice, rescale) in voxels.chunks_exact(slice_bytes).zip(rescales) {
        for stored in slice.chunks_exact(width) {
            let value = sample(stored, shape) * rescale.slope + rescale.intercept;
            out.extend_from_slice(&(value as f32).to_le_bytes());
        }
    }
    out
}

fn z_of(file: &DicomFile) -> Option<f64> {
    file.decimals(IMAGE_POSITION)
        .filter(|coords| coords.len() == 3)
        .map(|coords| coords[2])
}

impl VolumeWriter for NiftiWriter {
    fn write_volume(&self, slices: &[PathBuf], destination: &Path) -> Result<(), TciaError> {
        let Some(first_path) = slices.first() else {
            return Err(TciaError::VolumeWrite("no slices to write".to_string()));
        };
        if destination.exists() {
            return Err(TciaError::DestinationExists(destination.to_path_buf()));
        }

        let first = DicomFile::open(first_path)?;
        let shape = geometry(&first, first_path)?;
        let (datatype, bitpix) = datatype(shape)?;
        let slice_bytes =
            usize::from(shape.rows) * usize::from(shape.columns) * usize::from(shape.bits_allocated / 8);

        let dims = [
            dimension(usize::from(shape.columns), "column")?,
            dimension(usize::from(shape.rows), "row")?,
            dimension(slices.len(), "slice")?,
        ];

        let mut voxels = Vec::with_capacity(slice_bytes * slices.len());
        let mut z_values = Vec::with_capacity(slices.len());
        let mut rescales = Vec::with_capacity(slices.len());
        for (index, path) in slices.iter().enumerate() {
            let file = if index == 0 {
                first.clone()
            } else {
                DicomFile::open(path)?
            };
            if geometry(&file, path)? != shape {
                return Err(TciaError::VolumeWrite(format!(
                    "{}: slice geometry differs from the first slice",
                    path.display()
                )));
            }
            let pixels = file.pixel_data().ok_or_else(|| {
                TciaError::VolumeWrite(format!("{}: no pixel data", path.display()))
            })?;
            if pixels.len() < slice_bytes {
                return Err(TciaError::VolumeWrite(format!(
                    "{}: pixel data shorter than {slice_bytes} bytes",
                    path.display()
                )));
            }
            voxels.extend_from_slice(&pixels[..slice_bytes]);
            z_values.push(z_of(&file));
            rescales.push(Rescale::of(&file));
        }

        let spacing = first.decimals(Tag::PIXEL_SPACING).unwrap_or_default();
        let (row_spacing, col_spacing) = match spacing.as_slice() {
            [row, col, ..] => (*row, *col),
            _ => (1.0, 1.0),
        };
        let z_spacing = match (z_values.first(), z_values.get(1)) {
            (Some(Some(a)), Some(Some(b))) if (b - a).abs() > f64::EPSILON => (b - a).abs(),
            _ => first
                .decimals(Tag::SLICE_THICKNESS)
                .and_then(|values| values.first().copied())
                .unwrap_or(1.0),
        };
        let origin = first
            .decimals(IMAGE_POSITION)
            .filter(|coords| coords.len() == 3)
            .unwrap_or_else(|| vec![0.0; 3]);
        // A single header slope only fits when every slice shares it.
        let shared = rescales[0];
        let (datatype, bitpix, rescale, voxels) =
            if rescales.iter().all(|rescale| *rescale == shared) {
                (datatype, bitpix, shared, voxels)
            } else {
                debug!(
                    path = %destination.display(),
                    "rescale differs between slices, writing float32 voxels"
                );
                let scaled = rescale_voxels(&voxels, slice_bytes, &rescales, shape);
                let identity = Rescale {
                    slope: 1.0,
                    intercept: 0.0,
                };
                (DT_FLOAT32, 32, identity, scaled)
            };

        let header = NiftiHeader {
            dims,
            datatype,
            bitpix,
            spacing: [col_spacing as f32, row_spacing as f32, z_spacing as f32],
            origin: [origin[0] as f32, origin[1] as f32, origin[2] as f32],
            slope: rescale.slope as f32,
            intercept: rescale.intercept as f32,
        };

        fs_util::ensure_parent(destination)?;
        let parent = destination
            .parent()
            .ok_or_else(|| TciaError::VolumeWrite("invalid destination path".to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".tcia-dl-volume")
            .tempfile_in(parent)
            .map_err(|err| TciaError::Filesystem(err.to_string()))?;
        write_gz(temp.as_file_mut(), &header, &voxels, self.compression)
            .map_err(|err| TciaError::VolumeWrite(err.to_string()))?;
        temp.persist_noclobber(destination).map_err(|err| {
            if err.error.kind() == io::ErrorKind::AlreadyExists {
                TciaError::DestinationExists(destination.to_path_buf())
            } else {
                TciaError::VolumeWrite(err.error.to_string())
            }
        })?;
        info!(
            path = %destination.display(),
            slices = slices.len(),
            "volume written"
        );
        Ok(())
    }
}

fn write_gz<W: Write>(
    writer: W,
    header: &NiftiHeader,
    voxels: &[u8],
    compression: Compression,
) -> io::Result<()> {
    let mut encoder = GzEncoder::new(writer, compression);
    encoder.write_all(&header.to_bytes())?;
    encoder.write_all(voxels)?;
    encoder.finish()?.flush()
}
