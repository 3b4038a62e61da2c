//! MRC2014 volume/stack codec.
//!
//! An MRC file is a 1024-byte header, an optional extended header of
//! `nsymbt` bytes, then `nz` sections of `nx * ny` samples stored row-major.
//! The same bytes can be a 3D volume or a stack of 2D images; the space
//! group field decides (`ispg == 0` is a stack) unless a `:mrc` or `:mrcs`
//! location hint overrides it.
//!
//! Decoding goes through memory maps cached per file. Whole-file writes go
//! through a temporary file renamed into place, so existing maps keep
//! seeing the old contents, and invalidate the cached map.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::{checked_index, FormatReader};
use crate::error::{ImageError, Result};
use crate::io::{put_f32_le, put_i32_le, write_atomically, ByteOrder, MapCache, MappedFile};
use crate::location::Location;
use crate::stack::{
    DataType, Dimensions, Frame, FrameData, ImageStack, StackLayout, SAMPLING_RATE_KEY,
};

pub const MRC_EXTENSIONS: &[&str] = &["mrc", "mrcs", "st", "rec", "ali", "map"];

/// Fixed header size in bytes
pub const MRC_HEADER_LEN: usize = 1024;

const NVERSION: i32 = 20140;
const LABEL: &str = "em-imageio";

// Header field offsets
const OFF_NX: usize = 0;
const OFF_NY: usize = 4;
const OFF_NZ: usize = 8;
const OFF_MODE: usize = 12;
const OFF_MX: usize = 28;
const OFF_MY: usize = 32;
const OFF_MZ: usize = 36;
const OFF_CELLA: usize = 40;
const OFF_CELLB: usize = 52;
const OFF_MAPC: usize = 64;
const OFF_DMIN: usize = 76;
const OFF_DMAX: usize = 80;
const OFF_DMEAN: usize = 84;
const OFF_ISPG: usize = 88;
const OFF_NSYMBT: usize = 92;
const OFF_EXTTYP: usize = 104;
const OFF_NVERSION: usize = 108;
const OFF_MAP: usize = 208;
const OFF_MACHST: usize = 212;
const OFF_RMS: usize = 216;
const OFF_NLABL: usize = 220;
const OFF_LABELS: usize = 224;

// =============================================================================
// Header
// =============================================================================

/// Parsed MRC header fields this codec uses.
#[derive(Debug, Clone, PartialEq)]
pub struct MrcHeader {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub data_type: DataType,
    pub mx: i32,
    pub my: i32,
    pub mz: i32,
    pub cella: [f32; 3],
    pub dmin: f32,
    pub dmax: f32,
    pub dmean: f32,
    pub rms: f32,
    pub ispg: i32,
    pub nsymbt: usize,
    pub byte_order: ByteOrder,
}

impl MrcHeader {
    /// Parse and sanity-check the first [`MRC_HEADER_LEN`] bytes of a file.
    pub fn parse(bytes: &[u8], path: &str) -> Result<Self> {
        if bytes.len() < MRC_HEADER_LEN {
            return Err(ImageError::malformed(
                path,
                format!("header needs {} bytes, file has {}", MRC_HEADER_LEN, bytes.len()),
            ));
        }

        // machst 0x11 marks big-endian writers; everything else is read as little-endian
        let order = if bytes[OFF_MACHST] == 0x11 {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        };

        let count = |offset: usize, field: &str, min: i32| -> Result<usize> {
            let value = order.read_i32(bytes, offset);
            if value < min {
                return Err(ImageError::malformed(
                    path,
                    format!("{} = {} is out of range", field, value),
                ));
            }
            Ok(value as usize)
        };

        let nx = count(OFF_NX, "nx", 1)?;
        let ny = count(OFF_NY, "ny", 1)?;
        let nz = count(OFF_NZ, "nz", 1)?;
        let nsymbt = count(OFF_NSYMBT, "nsymbt", 0)?;

        let mode = order.read_i32(bytes, OFF_MODE);
        let data_type = match mode {
            0 => DataType::Int8,
            1 => DataType::Int16,
            2 => DataType::Float32,
            6 => DataType::UInt16,
            other => {
                return Err(ImageError::malformed(
                    path,
                    format!("unsupported mode {}", other),
                ))
            }
        };

        // Every size derived later from nx/ny/nz/nsymbt must fit in usize
        let data_end = nx
            .checked_mul(ny)
            .and_then(|n| n.checked_mul(data_type.bytes_per_sample()))
            .and_then(|frame| frame.checked_mul(nz))
            .and_then(|data| data.checked_add(MRC_HEADER_LEN))
            .and_then(|end| end.checked_add(nsymbt));
        if data_end.is_none() {
            return Err(ImageError::malformed(
                path,
                format!("data size of {} sections of {}x{} overflows", nz, nx, ny),
            ));
        }

        Ok(Self {
            nx,
            ny,
            nz,
            data_type,
            mx: order.read_i32(bytes, OFF_MX),
            my: order.read_i32(bytes, OFF_MY),
            mz: order.read_i32(bytes, OFF_MZ),
            cella: [
                order.read_f32(bytes, OFF_CELLA),
                order.read_f32(bytes, OFF_CELLA + 4),
                order.read_f32(bytes, OFF_CELLA + 8),
            ],
            dmin: order.read_f32(bytes, OFF_DMIN),
            dmax: order.read_f32(bytes, OFF_DMAX),
            dmean: order.read_f32(bytes, OFF_DMEAN),
            rms: order.read_f32(bytes, OFF_RMS),
            ispg: order.read_i32(bytes, OFF_ISPG),
            nsymbt,
            byte_order: order,
        })
    }

    /// Header for new data of the given shape. Statistics start undetermined
    /// (`dmax < dmin`, `rms < 0`).
    pub fn for_shape(
        nx: usize,
        ny: usize,
        nz: usize,
        data_type: DataType,
        is_stack: bool,
        sampling_rate: f64,
    ) -> Self {
        let mz = if is_stack { 1 } else { nz as i32 };
        let sr = sampling_rate as f32;
        Self {
            nx,
            ny,
            nz,
            data_type: storage_type(data_type),
            mx: nx as i32,
            my: ny as i32,
            mz,
            cella: [nx as f32 * sr, ny as f32 * sr, mz as f32 * sr],
            dmin: 0.0,
            dmax: -1.0,
            dmean: -2.0,
            rms: -1.0,
            ispg: if is_stack { 0 } else { 1 },
            nsymbt: 0,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    /// Serialize as a little-endian MRC2014 header.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; MRC_HEADER_LEN];
        put_i32_le(&mut buf, OFF_NX, self.nx as i32);
        put_i32_le(&mut buf, OFF_NY, self.ny as i32);
        put_i32_le(&mut buf, OFF_NZ, self.nz as i32);
        put_i32_le(&mut buf, OFF_MODE, mode_of(self.data_type));
        put_i32_le(&mut buf, OFF_MX, self.mx);
        put_i32_le(&mut buf, OFF_MY, self.my);
        put_i32_le(&mut buf, OFF_MZ, self.mz);
        for (i, cell) in self.cella.iter().enumerate() {
            put_f32_le(&mut buf, OFF_CELLA + 4 * i, *cell);
            put_f32_le(&mut buf, OFF_CELLB + 4 * i, 90.0);
            put_i32_le(&mut buf, OFF_MAPC + 4 * i, i as i32 + 1);
        }
        put_f32_le(&mut buf, OFF_DMIN, self.dmin);
        put_f32_le(&mut buf, OFF_DMAX, self.dmax);
        put_f32_le(&mut buf, OFF_DMEAN, self.dmean);
        put_i32_le(&mut buf, OFF_ISPG, self.ispg);
        put_i32_le(&mut buf, OFF_NSYMBT, 0);
        buf[OFF_EXTTYP..OFF_EXTTYP + 4].fill(0);
        put_i32_le(&mut buf, OFF_NVERSION, NVERSION);
        buf[OFF_MAP..OFF_MAP + 4].copy_from_slice(b"MAP ");
        buf[OFF_MACHST..OFF_MACHST + 4].copy_from_slice(&[0x44, 0x44, 0x00, 0x00]);
        put_f32_le(&mut buf, OFF_RMS, self.rms);
        put_i32_le(&mut buf, OFF_NLABL, 1);

        let label = &mut buf[OFF_LABELS..OFF_LABELS + 80];
        label.fill(b' ');
        label[..LABEL.len()].copy_from_slice(LABEL.as_bytes());
        buf
    }

    pub fn is_stack(&self) -> bool {
        self.ispg == 0
    }

    /// Byte offset of the first sample.
    pub fn data_offset(&self) -> usize {
        MRC_HEADER_LEN + self.nsymbt
    }

    pub fn frame_bytes(&self) -> usize {
        self.nx * self.ny * self.data_type.bytes_per_sample()
    }

    /// File size the header implies.
    pub fn expected_len(&self) -> usize {
        self.data_offset() + self.nz * self.frame_bytes()
    }

    /// Pixel size along X, `cella.x / mx`.
    pub fn voxel_size(&self) -> f64 {
        if self.mx == 0 {
            1.0
        } else {
            self.cella[0] as f64 / self.mx as f64
        }
    }

    /// Whether `location` reads this file as one volume.
    pub fn reads_as_volume(&self, location: &Location) -> bool {
        if location.forces_volume() {
            true
        } else if location.forces_stack() {
            false
        } else {
            !self.is_stack()
        }
    }

    pub fn dimensions(&self, as_volume: bool) -> Dimensions {
        if as_volume {
            Dimensions::new(self.nx, self.ny, self.nz, 1)
        } else {
            Dimensions::new(self.nx, self.ny, 1, self.nz)
        }
    }

    fn check_len(&self, len: usize, path: &str) -> Result<()> {
        if len < self.expected_len() {
            return Err(ImageError::malformed(
                path,
                format!(
                    "truncated: {} sections of {}x{} need {} bytes, file has {}",
                    self.nz,
                    self.nx,
                    self.ny,
                    self.expected_len(),
                    len
                ),
            ));
        }
        Ok(())
    }

    fn decode_section(&self, bytes: &[u8], i: usize) -> Result<Frame> {
        let start = self.data_offset() + i * self.frame_bytes();
        let raw = &bytes[start..start + self.frame_bytes()];
        let data = match self.byte_order {
            ByteOrder::LittleEndian => FrameData::from_le_bytes(raw, self.data_type),
            ByteOrder::BigEndian => {
                let width = self.data_type.bytes_per_sample();
                let swapped: Vec<u8> = raw
                    .chunks_exact(width)
                    .flat_map(|c| c.iter().rev().copied())
                    .collect();
                FrameData::from_le_bytes(&swapped, self.data_type)
            }
        };
        Frame::new(self.nx, self.ny, data)
    }
}

/// Element type MRC stores `data_type` as.
fn storage_type(data_type: DataType) -> DataType {
    match data_type {
        DataType::UInt8 => DataType::UInt16,
        other => other,
    }
}

fn mode_of(data_type: DataType) -> i32 {
    match storage_type(data_type) {
        DataType::Int8 => 0,
        DataType::Int16 => 1,
        DataType::Float32 => 2,
        DataType::UInt16 | DataType::UInt8 => 6,
    }
}

fn read_header(path: &str) -> Result<(MrcHeader, u64)> {
    let mut file = File::open(path).map_err(|e| ImageError::io(path, e))?;
    let len = file.metadata().map_err(|e| ImageError::io(path, e))?.len();
    let mut bytes = vec![0u8; MRC_HEADER_LEN.min(len as usize)];
    file.read_exact(&mut bytes)
        .map_err(|e| ImageError::io(path, e))?;
    Ok((MrcHeader::parse(&bytes, path)?, len))
}

// =============================================================================
// MrcReader
// =============================================================================

/// Fixed-header volume/stack codec. Also the registry's fallback reader.
#[derive(Default)]
pub struct MrcReader {
    maps: MapCache,
}

impl MrcReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files currently mapped.
    pub fn mapped_count(&self) -> usize {
        self.maps.len()
    }

    fn mapped_header(&self, path: &str) -> Result<(MrcHeader, Arc<MappedFile>)> {
        let mapped = self.maps.get_or_map(Path::new(path))?;
        let header = MrcHeader::parse(mapped.bytes(), path)?;
        header.check_len(mapped.len(), path)?;
        Ok((header, mapped))
    }
}

impl FormatReader for MrcReader {
    fn name(&self) -> &'static str {
        "MRC"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        MRC_EXTENSIONS
    }

    fn probe_dimensions(&self, location: &Location) -> Result<Dimensions> {
        let (header, _) = read_header(location.path())?;
        Ok(header.dimensions(header.reads_as_volume(location)))
    }

    fn probe_data_type(&self, location: &Location) -> Result<DataType> {
        Ok(read_header(location.path())?.0.data_type)
    }

    fn probe_sampling_rate(&self, location: &Location) -> Result<f64> {
        Ok(read_header(location.path())?.0.voxel_size())
    }

    fn open(&self, location: &Location) -> Result<ImageStack> {
        let path = location.path();
        let (header, mapped) = self.mapped_header(path)?;
        let bytes = mapped.bytes();

        let stack = match checked_index(location, header.nz)? {
            Some(i) => ImageStack::from_frame(header.decode_section(bytes, i)?),
            None => {
                let frames = (0..header.nz)
                    .map(|i| header.decode_section(bytes, i))
                    .collect::<Result<Vec<_>>>()?;
                let layout = if header.reads_as_volume(location) {
                    StackLayout::Volume
                } else {
                    StackLayout::Stack
                };
                ImageStack::from_frames(frames).with_layout(layout)
            }
        };

        debug!("Decoded {} sections from {}", stack.len(), location);
        Ok(stack.with_property(SAMPLING_RATE_KEY, header.voxel_size()))
    }

    fn read_frame(&self, location: &Location) -> Result<Frame> {
        let path = location.path();
        let (header, mapped) = self.mapped_header(path)?;

        let i = match checked_index(location, header.nz)? {
            Some(i) => i,
            None if header.reads_as_volume(location) => header.nz / 2,
            None => 0,
        };
        header.decode_section(mapped.bytes(), i)
    }

    fn write(&self, stack: &ImageStack, path: &str, is_stack: bool) -> Result<()> {
        let first = stack.frame(0).ok_or_else(|| {
            ImageError::Validation(format!("cannot write an empty stack to {}", path))
        })?;
        let (nx, ny) = first.size();
        let mut header = MrcHeader::for_shape(
            nx,
            ny,
            stack.len(),
            first.data_type(),
            is_stack,
            stack.sampling_rate(),
        );

        let mut data = Vec::with_capacity(stack.len() * header.frame_bytes());
        let (mut min, mut max, mut sum, mut sum_sq) = (f32::INFINITY, f32::NEG_INFINITY, 0f64, 0f64);
        for frame in stack.frames() {
            first.ensure_same_size(frame)?;
            let frame = frame.convert(header.data_type);
            for s in frame.to_f32() {
                min = min.min(s);
                max = max.max(s);
                sum += s as f64;
                sum_sq += (s as f64) * (s as f64);
            }
            data.extend_from_slice(&frame.data().to_le_bytes());
        }

        let n = (nx * ny * stack.len()) as f64;
        let mean = sum / n;
        header.dmin = min;
        header.dmax = max;
        header.dmean = mean as f32;
        header.rms = (sum_sq / n - mean * mean).max(0.0).sqrt() as f32;

        write_atomically(Path::new(path), |w| {
            w.write_all(&header.encode())?;
            w.write_all(&data)
        })?;
        self.maps.invalidate(Path::new(path));

        info!(
            "Wrote {} {}x{} {} to {}",
            stack.len(),
            nx,
            ny,
            if is_stack { "images" } else { "slices" },
            path
        );
        Ok(())
    }

    fn can_allocate(&self) -> bool {
        true
    }

    fn allocate(
        &self,
        path: &str,
        dims: Dimensions,
        data_type: DataType,
        is_stack: bool,
        sampling_rate: f64,
    ) -> Result<()> {
        let nz = dims.frame_count().max(1);
        let header = MrcHeader::for_shape(dims.x, dims.y, nz, data_type, is_stack, sampling_rate);
        let data_len = (nz * header.frame_bytes()) as u64;

        write_atomically(Path::new(path), |w| {
            w.write_all(&header.encode())?;
            std::io::copy(&mut std::io::repeat(0).take(data_len), w)?;
            Ok(())
        })?;
        self.maps.invalidate(Path::new(path));

        debug!(
            "Allocated {} sections of {}x{} {} in {}",
            nz, dims.x, dims.y, header.data_type, path
        );
        Ok(())
    }

    fn write_frame(&self, frame: &Frame, location: &Location) -> Result<()> {
        let path = location.path();
        let index = location.index().ok_or_else(|| {
            ImageError::Validation(format!("writing one frame needs an indexed location, got {}", location))
        })?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ImageError::io(path, e))?;
        let mut bytes = vec![0u8; MRC_HEADER_LEN];
        file.read_exact(&mut bytes)
            .map_err(|e| ImageError::io(path, e))?;
        let header = MrcHeader::parse(&bytes, path)?;

        if header.byte_order == ByteOrder::BigEndian {
            return Err(ImageError::unsupported("write_frame", "big-endian MRC"));
        }
        if index as usize > header.nz {
            return Err(ImageError::IndexOutOfRange {
                path: path.to_string(),
                index,
                count: header.nz,
            });
        }
        if frame.size() != (header.nx, header.ny) {
            return Err(ImageError::ShapeMismatch {
                expected: (header.nx, header.ny),
                actual: frame.size(),
            });
        }

        let offset = header.data_offset() + (index as usize - 1) * header.frame_bytes();
        let encoded = frame.convert(header.data_type).data().to_le_bytes();
        file.seek(SeekFrom::Start(offset as u64))
            .and_then(|_| file.write_all(&encoded))
            .map_err(|e| ImageError::io(path, e))?;
        self.maps.invalidate(Path::new(path));
        Ok(())
    }

    fn close(&self) {
        self.maps.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
