//! Multi-page TIFF codec for movies, gain references and EER files.
//!
//! Each page is one frame. Pages are counted by walking the IFD chain,
//! which reads no strip or tile data. Only the first frame is written.

use std::fs::File;
use std::io::{BufReader, Cursor, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::debug;

use crate::codec::FormatReader;
use crate::error::{ImageError, Result};
use crate::io::write_atomically;
use crate::location::Location;
use crate::stack::{DataType, Dimensions, Frame, FrameData, ImageStack};

pub const TIFF_EXTENSIONS: &[&str] = &["tif", "tiff", "gain", "eer"];

const FORMAT: &str = "TIFF";

type TiffDecoder = Decoder<BufReader<File>>;

fn decode_err(path: &str, err: tiff::TiffError) -> ImageError {
    match err {
        tiff::TiffError::IoError(e) => ImageError::io(path, e),
        other => ImageError::Decode {
            path: path.to_string(),
            format: FORMAT,
            message: other.to_string(),
        },
    }
}

fn encode_err(path: &str, err: tiff::TiffError) -> ImageError {
    ImageError::Encode {
        path: path.to_string(),
        format: FORMAT,
        message: err.to_string(),
    }
}

fn open_decoder(path: &str) -> Result<TiffDecoder> {
    let file = File::open(path).map_err(|e| ImageError::io(path, e))?;
    Decoder::new(BufReader::new(file)).map_err(|e| decode_err(path, e))
}

/// Position the decoder on page `page` (0-based).
fn seek_page(decoder: &mut TiffDecoder, page: usize, location: &Location) -> Result<()> {
    let path = location.path();
    for seen in 0..page {
        if !decoder.more_images() {
            return Err(ImageError::IndexOutOfRange {
                path: path.to_string(),
                index: location.raw_index(),
                count: seen + 1,
            });
        }
        decoder.next_image().map_err(|e| decode_err(path, e))?;
    }
    Ok(())
}

/// Count pages from the current position to the end of the IFD chain.
fn count_pages(decoder: &mut TiffDecoder, path: &str) -> Result<usize> {
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(|e| decode_err(path, e))?;
        pages += 1;
    }
    Ok(pages)
}

/// Decode the page the decoder is positioned on into a grayscale frame.
fn decode_page(decoder: &mut TiffDecoder, path: &str) -> Result<Frame> {
    let (width, height) = decoder.dimensions().map_err(|e| decode_err(path, e))?;
    match decoder.colortype().map_err(|e| decode_err(path, e))? {
        ColorType::Gray(_) => {}
        other => {
            return Err(ImageError::Decode {
                path: path.to_string(),
                format: FORMAT,
                message: format!("only grayscale pages are supported, got {:?}", other),
            })
        }
    }

    let data: FrameData = match decoder.read_image().map_err(|e| decode_err(path, e))? {
        DecodingResult::U8(v) => v.into(),
        DecodingResult::I8(v) => v.into(),
        DecodingResult::U16(v) => v.into(),
        DecodingResult::I16(v) => v.into(),
        DecodingResult::F32(v) => v.into(),
        DecodingResult::U32(v) => v.into_iter().map(|s| s as f32).collect::<Vec<_>>().into(),
        DecodingResult::I32(v) => v.into_iter().map(|s| s as f32).collect::<Vec<_>>().into(),
        DecodingResult::F64(v) => v.into_iter().map(|s| s as f32).collect::<Vec<_>>().into(),
        DecodingResult::U64(v) => v.into_iter().map(|s| s as f32).collect::<Vec<_>>().into(),
        DecodingResult::I64(v) => v.into_iter().map(|s| s as f32).collect::<Vec<_>>().into(),
    };
    Frame::new(width as usize, height as usize, data)
}

/// Sample type declared by the current page's tags.
fn page_data_type(decoder: &mut TiffDecoder, path: &str) -> Result<DataType> {
    let bits = match decoder.colortype().map_err(|e| decode_err(path, e))? {
        ColorType::Gray(bits) => bits,
        other => {
            return Err(ImageError::Decode {
                path: path.to_string(),
                format: FORMAT,
                message: format!("only grayscale pages are supported, got {:?}", other),
            })
        }
    };
    // SampleFormat: 1 = unsigned, 2 = signed, 3 = float
    let sample_format = decoder
        .find_tag_unsigned::<u16>(Tag::SampleFormat)
        .map_err(|e| decode_err(path, e))?
        .unwrap_or(1);

    match (bits, sample_format) {
        (8, 2) => Ok(DataType::Int8),
        (8, _) => Ok(DataType::UInt8),
        (16, 2) => Ok(DataType::Int16),
        (16, _) => Ok(DataType::UInt16),
        _ => Ok(DataType::Float32),
    }
}

// =============================================================================
// MultiPageReader
// =============================================================================

/// Paged TIFF codec.
#[derive(Debug, Default)]
pub struct MultiPageReader;

impl MultiPageReader {
    pub fn new() -> Self {
        Self
    }
}

impl FormatReader for MultiPageReader {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        TIFF_EXTENSIONS
    }

    fn probe_dimensions(&self, location: &Location) -> Result<Dimensions> {
        let path = location.path();
        let mut decoder = open_decoder(path)?;
        let (width, height) = decoder.dimensions().map_err(|e| decode_err(path, e))?;
        let pages = count_pages(&mut decoder, path)?;
        Ok(Dimensions::new(width as usize, height as usize, 1, pages))
    }

    fn probe_data_type(&self, location: &Location) -> Result<DataType> {
        let path = location.path();
        page_data_type(&mut open_decoder(path)?, path)
    }

    fn open(&self, location: &Location) -> Result<ImageStack> {
        let path = location.path();
        let mut decoder = open_decoder(path)?;

        if let Some(index) = location.index() {
            seek_page(&mut decoder, index as usize - 1, location)?;
            return Ok(ImageStack::from_frame(decode_page(&mut decoder, path)?));
        }

        let mut frames = vec![decode_page(&mut decoder, path)?];
        while decoder.more_images() {
            decoder.next_image().map_err(|e| decode_err(path, e))?;
            frames.push(decode_page(&mut decoder, path)?);
        }
        debug!("Decoded {} pages from {}", frames.len(), path);
        Ok(ImageStack::from_frames(frames))
    }

    fn read_frame(&self, location: &Location) -> Result<Frame> {
        let path = location.path();
        let mut decoder = open_decoder(path)?;
        let page = location.index().map(|i| i as usize - 1).unwrap_or(0);
        seek_page(&mut decoder, page, location)?;
        decode_page(&mut decoder, path)
    }

    fn write(&self, stack: &ImageStack, path: &str, _is_stack: bool) -> Result<()> {
        let frame = stack.frame(0).ok_or_else(|| {
            ImageError::Validation(format!("cannot write an empty stack to {}", path))
        })?;
        if stack.len() > 1 {
            debug!("Writing only the first of {} frames to {}", stack.len(), path);
        }

        let (width, height) = (frame.width() as u32, frame.height() as u32);
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).map_err(|e| encode_err(path, e))?;
            let written = match frame.data() {
                FrameData::Int8(v) => encoder.write_image::<colortype::GrayI8>(width, height, v),
                FrameData::UInt8(v) => encoder.write_image::<colortype::Gray8>(width, height, v),
                FrameData::Int16(v) => encoder.write_image::<colortype::GrayI16>(width, height, v),
                FrameData::UInt16(v) => encoder.write_image::<colortype::Gray16>(width, height, v),
                FrameData::Float32(v) => {
                    encoder.write_image::<colortype::Gray32Float>(width, height, v)
                }
            };
            written.map_err(|e| encode_err(path, e))?;
        }

        let bytes = buf.into_inner();
        write_atomically(Path::new(path), |w| w.write_all(&bytes))
    }
}

// =============================================================================
// Tests
// =============================================================================
