//! FormatReader trait for format-agnostic image access.
//!
//! Every container codec implements [`FormatReader`]. The registry dispatches
//! on file extension and the handler works only through this trait, so no
//! caller needs format-specific logic.

use crate::error::{ImageError, Result};
use crate::location::Location;
use crate::stack::{DataType, Dimensions, Frame, ImageStack};

// =============================================================================
// FormatReader Trait
// =============================================================================

/// Decode, encode and probe capability of one container format.
///
/// Only [`name`](FormatReader::name), the extension list, probing and `open`
/// are mandatory. Everything else defaults to
/// [`ImageError::UnsupportedOperation`] or to a generic implementation on top
/// of `open`.
pub trait FormatReader: Send + Sync {
    /// Short human-readable format name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Lower-case extensions without the leading dot.
    fn supported_extensions(&self) -> &'static [&'static str];

    /// `(X, Y, Z, N)` read from header or metadata only.
    fn probe_dimensions(&self, location: &Location) -> Result<Dimensions>;

    /// Sample type read from header or metadata only.
    fn probe_data_type(&self, location: &Location) -> Result<DataType> {
        let _ = location;
        Err(ImageError::unsupported("probe_data_type", self.name()))
    }

    /// Sampling size (Å per pixel) of the first frame, 1.0 where the format
    /// stores none. Formats with a header override this to skip decoding.
    fn probe_sampling_rate(&self, location: &Location) -> Result<f64> {
        Ok(self.open(&location.clone().with_index(1))?.sampling_rate())
    }

    /// Full decode.
    ///
    /// An indexed location decodes that single frame. A whole-file location
    /// decodes every frame; volumes come back with
    /// [`StackLayout::Volume`](crate::stack::StackLayout::Volume).
    fn open(&self, location: &Location) -> Result<ImageStack>;

    /// Decode one frame.
    ///
    /// Without an index a volume yields its middle slice and anything else
    /// its first frame.
    fn read_frame(&self, location: &Location) -> Result<Frame> {
        let stack = self.open(location)?;
        let count = stack.len();
        let i = default_frame_index(location, count, stack.is_volume());
        stack
            .into_frames()
            .into_iter()
            .nth(i)
            .ok_or_else(|| ImageError::IndexOutOfRange {
                path: location.path().to_string(),
                index: location.raw_index(),
                count,
            })
    }

    /// Full encode of `stack` to `path`. `is_stack` selects stack over volume
    /// output where the format cannot tell from the data alone.
    fn write(&self, stack: &ImageStack, path: &str, is_stack: bool) -> Result<()> {
        let _ = (stack, path, is_stack);
        Err(ImageError::unsupported("write", self.name()))
    }

    /// Whether [`allocate`](FormatReader::allocate) and
    /// [`write_frame`](FormatReader::write_frame) are available.
    fn can_allocate(&self) -> bool {
        false
    }

    /// Create `path` at its final shape, zero-filled, recording
    /// `sampling_rate` where the format has room for it.
    fn allocate(
        &self,
        path: &str,
        dims: Dimensions,
        data_type: DataType,
        is_stack: bool,
        sampling_rate: f64,
    ) -> Result<()> {
        let _ = (path, dims, data_type, is_stack, sampling_rate);
        Err(ImageError::unsupported("allocate", self.name()))
    }

    /// Overwrite the frame addressed by `location` in an existing file.
    fn write_frame(&self, frame: &Frame, location: &Location) -> Result<()> {
        let _ = (frame, location);
        Err(ImageError::unsupported("write_frame", self.name()))
    }

    /// Release long-lived resources such as cached file mappings.
    fn close(&self) {}
}

/// 0-based position of the frame a single-frame read returns from a decoded
/// stack of `count` frames.
///
/// An indexed location has already been narrowed to one frame by `open`.
pub fn default_frame_index(location: &Location, count: usize, is_volume: bool) -> usize {
    if location.index().is_some() || !is_volume {
        0
    } else {
        count / 2
    }
}

/// Check a 1-based index against a frame count, returning it 0-based.
pub fn checked_index(location: &Location, count: usize) -> Result<Option<usize>> {
    match location.index() {
        None => Ok(None),
        Some(index) if (index as usize) <= count => Ok(Some(index as usize - 1)),
        Some(index) => Err(ImageError::IndexOutOfRange {
            path: location.path().to_string(),
            index,
            count,
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
