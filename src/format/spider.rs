//! SPIDER stack/volume reader.
//!
//! SPIDER headers are 32-bit float words at fixed byte offsets. Images are
//! square `nsam x nsam` float32 grids. A file is a stack when its header
//! declares more than one image (`maxim > 1`):
//!
//! ```text
//! stack:  [header h][image header h][image 0][image header h][image 1]...
//! volume: [header h][slice 0][slice 1]...
//! ```
//!
//! so image `i` starts at `2h + i * (4 nsam² + h)` in a stack and slice `i`
//! at `h + i * 4 nsam²` in a volume, with `h = labbyt`.
//!
//! Each decode opens a [`SpiderSession`] holding the header and file handle;
//! nothing is shared between calls.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::codec::{checked_index, FormatReader};
use crate::error::{ImageError, Result};
use crate::io::ByteOrder;
use crate::location::Location;
use crate::stack::{DataType, Dimensions, Frame, ImageStack, StackLayout, SAMPLING_RATE_KEY};

pub const SPIDER_EXTENSIONS: &[&str] = &["stk", "spi", "vol"];

/// Bytes read when parsing a header
const HEADER_READ_LEN: usize = 1024;

// Header word offsets
const OFF_NSLICE: usize = 0;
const OFF_NROW: usize = 4;
const OFF_IFORM: usize = 16;
const OFF_NSAM: usize = 44;
const OFF_SCALE: usize = 80;
const OFF_LABBYT: usize = 84;
const OFF_ISTACK: usize = 92;
const OFF_MAXIM: usize = 100;

/// Smallest header holding every field above
const MIN_HEADER_LEN: usize = OFF_MAXIM + 4;

// =============================================================================
// Header
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SpiderHeader {
    /// Image edge length in samples
    pub nsam: usize,
    pub nslice: usize,
    /// Number of images; at least 1
    pub maxim: usize,
    /// Header length in bytes
    pub labbyt: usize,
    pub iform: i32,
    pub istack: i32,
    pub scale: f32,
    pub byte_order: ByteOrder,
}

impl SpiderHeader {
    /// Parse a header, detecting its byte order.
    pub fn parse(bytes: &[u8], path: &str) -> Result<Self> {
        if bytes.len() < MIN_HEADER_LEN {
            return Err(ImageError::malformed(
                path,
                format!("header needs {} bytes, file has {}", MIN_HEADER_LEN, bytes.len()),
            ));
        }

        let order = [ByteOrder::LittleEndian, ByteOrder::BigEndian]
            .into_iter()
            .find(|order| plausible(bytes, *order))
            .ok_or_else(|| ImageError::malformed(path, "no plausible nsam/labbyt in either byte order"))?;

        let word = |offset: usize| order.read_f32(bytes, offset);
        let count = |offset: usize, field: &str, min: f32| -> Result<usize> {
            let value = word(offset);
            if !value.is_finite() || value.fract() != 0.0 || value < min {
                return Err(ImageError::malformed(
                    path,
                    format!("{} = {} is not a valid count", field, value),
                ));
            }
            Ok(value as usize)
        };

        let nsam = count(OFF_NSAM, "nsam", 1.0)?;
        let nrow = count(OFF_NROW, "nrow", 1.0)?;
        if nrow != nsam {
            return Err(ImageError::malformed(
                path,
                format!("only square images are supported, got {}x{}", nsam, nrow),
            ));
        }

        let labbyt = count(OFF_LABBYT, "labbyt", 1.0)?;
        let nslice = word(OFF_NSLICE).abs();
        let nslice = if nslice.is_finite() && nslice >= 1.0 {
            nslice as usize
        } else {
            1
        };

        let header = Self {
            nsam,
            nslice,
            maxim: count(OFF_MAXIM, "maxim", 0.0)?.max(1),
            labbyt,
            iform: word(OFF_IFORM) as i32,
            istack: word(OFF_ISTACK) as i32,
            scale: word(OFF_SCALE),
            byte_order: order,
        };

        // The last frame's end offset must be representable
        let last = header.frame_count() - 1;
        let data_end = header
            .checked_image_bytes()
            .zip(header.offset_of(last))
            .and_then(|(size, start)| start.checked_add(size));
        if data_end.is_none() {
            return Err(ImageError::malformed(
                path,
                format!(
                    "{} images of {}x{} with {}-byte labels overflow the addressable size",
                    header.frame_count(),
                    nsam,
                    nsam,
                    labbyt
                ),
            ));
        }
        Ok(header)
    }

    pub fn is_stack(&self) -> bool {
        self.maxim > 1
    }

    /// Bytes of one image, `4 * nsam²`.
    pub fn image_bytes(&self) -> usize {
        4 * self.nsam * self.nsam
    }

    /// Number of addressable frames: images of a stack, slices of a volume.
    pub fn frame_count(&self) -> usize {
        if self.is_stack() {
            self.maxim
        } else {
            self.nslice
        }
    }

    /// Byte offset of frame `i` (0-based), `None` if it overflows.
    pub fn offset_of(&self, i: usize) -> Option<usize> {
        let h = self.labbyt;
        let image_bytes = self.checked_image_bytes()?;
        if self.is_stack() {
            image_bytes
                .checked_add(h)?
                .checked_mul(i)?
                .checked_add(2 * h)
        } else {
            image_bytes.checked_mul(i)?.checked_add(h)
        }
    }

    fn checked_image_bytes(&self) -> Option<usize> {
        self.nsam.checked_mul(self.nsam)?.checked_mul(4)
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.nsam, self.nsam, self.nslice, self.maxim)
    }

    pub fn sampling_rate(&self) -> f64 {
        if self.scale.is_finite() && self.scale > 0.0 {
            self.scale as f64
        } else {
            1.0
        }
    }
}

fn plausible(bytes: &[u8], order: ByteOrder) -> bool {
    let sane = |v: f32| v.is_finite() && v >= 1.0 && v < 1.0e8 && v.fract() == 0.0;
    sane(order.read_f32(bytes, OFF_NSAM)) && sane(order.read_f32(bytes, OFF_LABBYT))
}

// =============================================================================
// Session
// =============================================================================

/// One open SPIDER file: its header plus a file handle.
pub struct SpiderSession {
    path: String,
    header: SpiderHeader,
    file: File,
    len: u64,
}

impl SpiderSession {
    pub fn open(path: &str) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| ImageError::io(path, e))?;
        let len = file.metadata().map_err(|e| ImageError::io(path, e))?.len();

        let mut bytes = vec![0u8; HEADER_READ_LEN.min(len as usize)];
        file.read_exact(&mut bytes)
            .map_err(|e| ImageError::io(path, e))?;
        let header = SpiderHeader::parse(&bytes, path)?;

        Ok(Self {
            path: path.to_string(),
            header,
            file,
            len,
        })
    }

    pub fn header(&self) -> &SpiderHeader {
        &self.header
    }

    /// Decode frame `i` (0-based) into an `nsam x nsam` float32 frame.
    pub fn read_image(&mut self, i: usize) -> Result<Frame> {
        let size = self.header.image_bytes();
        let offset = self.header.offset_of(i).ok_or_else(|| {
            ImageError::malformed(&self.path, format!("offset of image {} overflows", i + 1))
        })?;
        if offset as u64 + size as u64 > self.len {
            return Err(ImageError::malformed(
                &self.path,
                format!(
                    "image {} at byte {} runs past end of file ({} bytes)",
                    i + 1,
                    offset,
                    self.len
                ),
            ));
        }

        let mut raw = vec![0u8; size];
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .and_then(|_| self.file.read_exact(&mut raw))
            .map_err(|e| ImageError::io(&self.path, e))?;

        let samples = self.header.byte_order.read_f32_slice(&raw);
        Frame::new(self.header.nsam, self.header.nsam, samples)
    }
}

// =============================================================================
// SpiderReader
// =============================================================================

/// Read-only SPIDER codec.
#[derive(Debug, Default)]
pub struct SpiderReader;

impl SpiderReader {
    pub fn new() -> Self {
        Self
    }
}

impl FormatReader for SpiderReader {
    fn name(&self) -> &'static str {
        "SPIDER"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        SPIDER_EXTENSIONS
    }

    fn probe_dimensions(&self, location: &Location) -> Result<Dimensions> {
        Ok(SpiderSession::open(location.path())?.header().dimensions())
    }

    fn probe_data_type(&self, location: &Location) -> Result<DataType> {
        SpiderSession::open(location.path())?;
        Ok(DataType::Float32)
    }

    fn probe_sampling_rate(&self, location: &Location) -> Result<f64> {
        Ok(SpiderSession::open(location.path())?.header().sampling_rate())
    }

    fn open(&self, location: &Location) -> Result<ImageStack> {
        let mut session = SpiderSession::open(location.path())?;
        let count = session.header().frame_count();
        let sr = session.header().sampling_rate();

        let stack = match checked_index(location, count)? {
            Some(i) => ImageStack::from_frame(session.read_image(i)?),
            None => {
                let frames = (0..count)
                    .map(|i| session.read_image(i))
                    .collect::<Result<Vec<_>>>()?;
                let layout = if session.header().is_stack() {
                    StackLayout::Stack
                } else {
                    StackLayout::Volume
                };
                ImageStack::from_frames(frames).with_layout(layout)
            }
        };

        debug!("Decoded {} SPIDER images from {}", stack.len(), location);
        Ok(stack.with_property(SAMPLING_RATE_KEY, sr))
    }

    fn read_frame(&self, location: &Location) -> Result<Frame> {
        let mut session = SpiderSession::open(location.path())?;
        let count = session.header().frame_count();
        let i = match checked_index(location, count)? {
            Some(i) => i,
            None if !session.header().is_stack() => count / 2,
            None => 0,
        };
        session.read_image(i)
    }
}

// =============================================================================
// Tests
// =============================================================================
