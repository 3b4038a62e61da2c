//! Single-image formats decoded through the `image` crate.
//!
//! Pixels are read as grayscale: 16-bit sources keep 16 bits, float
//! sources stay float, everything else becomes 8-bit. Writing stretches
//! the first frame to 0..=255.

use std::io::{Cursor, Write};
use std::path::Path;

use image::{ColorType, DynamicImage, ImageDecoder, ImageFormat, ImageReader};

use crate::codec::{checked_index, FormatReader};
use crate::error::{ImageError, Result};
use crate::io::write_atomically;
use crate::location::Location;
use crate::stack::{DataType, Dimensions, Frame, FrameData, ImageStack};

pub const SIMPLE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif"];

const FORMAT: &str = "Image";

fn decode_err(path: &str, err: image::ImageError) -> ImageError {
    match err {
        image::ImageError::IoError(e) => ImageError::io(path, e),
        other => ImageError::Decode {
            path: path.to_string(),
            format: FORMAT,
            message: other.to_string(),
        },
    }
}

fn reader(path: &str) -> Result<ImageReader<std::io::BufReader<std::fs::File>>> {
    ImageReader::open(path)
        .map_err(|e| ImageError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| ImageError::io(path, e))
}

/// Width and height from the image header.
pub fn image_size(path: &str) -> Result<(usize, usize)> {
    let (width, height) = reader(path)?
        .into_dimensions()
        .map_err(|e| decode_err(path, e))?;
    Ok((width as usize, height as usize))
}

fn data_type_of(color: ColorType) -> DataType {
    match color {
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => DataType::UInt16,
        ColorType::Rgb32F | ColorType::Rgba32F => DataType::Float32,
        _ => DataType::UInt8,
    }
}

fn to_frame(image: DynamicImage) -> Result<Frame> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let data: FrameData = match data_type_of(image.color()) {
        DataType::UInt16 => image.to_luma16().into_raw().into(),
        DataType::Float32 => image.to_luma32f().into_raw().into(),
        _ => image.to_luma8().into_raw().into(),
    };
    Frame::new(width, height, data)
}

// =============================================================================
// SimpleImageReader
// =============================================================================

/// Codec for PNG, JPEG, BMP and GIF images.
#[derive(Debug, Default)]
pub struct SimpleImageReader;

impl SimpleImageReader {
    pub fn new() -> Self {
        Self
    }
}

impl FormatReader for SimpleImageReader {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        SIMPLE_EXTENSIONS
    }

    fn probe_dimensions(&self, location: &Location) -> Result<Dimensions> {
        let (width, height) = image_size(location.path())?;
        Ok(Dimensions::new(width, height, 1, 1))
    }

    fn probe_data_type(&self, location: &Location) -> Result<DataType> {
        let path = location.path();
        let decoder = reader(path)?
            .into_decoder()
            .map_err(|e| decode_err(path, e))?;
        Ok(data_type_of(decoder.color_type()))
    }

    fn open(&self, location: &Location) -> Result<ImageStack> {
        let path = location.path();
        checked_index(location, 1)?;
        let image = reader(path)?.decode().map_err(|e| decode_err(path, e))?;
        Ok(ImageStack::from_frame(to_frame(image)?))
    }

    fn write(&self, stack: &ImageStack, path: &str, _is_stack: bool) -> Result<()> {
        let preview = stack.preview_frame(0).ok_or_else(|| {
            ImageError::Validation(format!("cannot write an empty stack to {}", path))
        })?;
        let encode_err = |message: String| ImageError::Encode {
            path: path.to_string(),
            format: FORMAT,
            message,
        };

        let format = ImageFormat::from_path(path).map_err(|e| encode_err(e.to_string()))?;
        let image = match format {
            // The GIF encoder only takes RGBA
            ImageFormat::Gif => DynamicImage::ImageRgba8(DynamicImage::ImageLuma8(preview).to_rgba8()),
            _ => DynamicImage::ImageLuma8(preview),
        };

        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, format)
            .map_err(|e| encode_err(e.to_string()))?;
        let bytes = buf.into_inner();
        write_atomically(Path::new(path), |w| w.write_all(&bytes))
    }
}

// =============================================================================
// Tests
// =============================================================================
