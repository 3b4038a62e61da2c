//! In-memory container for decoded frames.

use std::collections::BTreeMap;

use image::GrayImage;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

use super::frame::{Frame, FrameData};

/// Property key holding the sampling (voxel) size in Angstrom per pixel.
pub const SAMPLING_RATE_KEY: &str = "sr";

// =============================================================================
// Dimensions
// =============================================================================

/// `(X, Y, Z, N)`: in-plane size, slice count of a volume, frame count of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Dimensions {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub n: usize,
}

impl Dimensions {
    pub const fn new(x: usize, y: usize, z: usize, n: usize) -> Self {
        Self { x, y, z, n }
    }

    /// Number of addressable 2D frames, `max(Z, N)`.
    pub fn frame_count(&self) -> usize {
        self.z.max(self.n)
    }

    pub fn is_volume(&self) -> bool {
        self.z > 1
    }

    pub fn as_tuple(&self) -> (usize, usize, usize, usize) {
        (self.x, self.y, self.z, self.n)
    }
}

// =============================================================================
// ImageStack
// =============================================================================

/// How the frames of a stack relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackLayout {
    /// Independent 2D images
    #[default]
    Stack,
    /// Contiguous slices of one 3D volume
    Volume,
}

/// Arguments accepted when assembling a stack.
#[derive(Debug, Clone)]
pub enum StackSource {
    Empty,
    Frame(Frame),
    Frames(Vec<Frame>),
    /// Raw samples to be shaped into one frame
    Raw {
        width: usize,
        height: usize,
        data: FrameData,
    },
}

/// Ordered frames plus a property bag. A single image is a stack of one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageStack {
    frames: Vec<Frame>,
    properties: BTreeMap<String, f64>,
    layout: StackLayout,
}

impl ImageStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self::from_source(StackSource::Frame(frame))
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self::from_source(StackSource::Frames(frames))
    }

    /// Assemble a stack. Malformed arguments log a warning and yield an empty
    /// stack; assembly itself never fails.
    pub fn from_source(source: StackSource) -> Self {
        let frames = match source {
            StackSource::Empty => Vec::new(),
            StackSource::Frame(frame) => vec![frame],
            StackSource::Frames(frames) => {
                let mismatched = frames
                    .first()
                    .map(|first| frames.iter().any(|f| f.size() != first.size()))
                    .unwrap_or(false);
                if mismatched {
                    warn!(
                        "Cannot assemble stack from {} frames of different sizes",
                        frames.len()
                    );
                    Vec::new()
                } else {
                    frames
                }
            }
            StackSource::Raw {
                width,
                height,
                data,
            } => match Frame::new(width, height, data) {
                Ok(frame) => vec![frame],
                Err(e) => {
                    warn!("Cannot assemble stack from raw samples: {}", e);
                    Vec::new()
                }
            },
        };

        Self {
            frames,
            ..Self::default()
        }
    }

    pub fn with_layout(mut self, layout: StackLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: f64) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn layout(&self) -> StackLayout {
        self.layout
    }

    pub fn is_volume(&self) -> bool {
        self.layout == StackLayout::Volume
    }

    /// Frame `i`, 0-based.
    pub fn frame(&self, i: usize) -> Option<&Frame> {
        self.frames.get(i)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn property(&self, key: &str) -> Option<f64> {
        self.properties.get(key).copied()
    }

    pub fn properties(&self) -> &BTreeMap<String, f64> {
        &self.properties
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: f64) {
        self.properties.insert(key.into(), value);
    }

    /// Sampling size from the `sr` property, 1.0 when absent.
    pub fn sampling_rate(&self) -> f64 {
        self.property(SAMPLING_RATE_KEY).unwrap_or(1.0)
    }

    /// Extend with the frames of `other`; its properties are ignored.
    ///
    /// Every appended frame must match this stack's frame size. On a
    /// mismatch nothing is appended and
    /// [`ImageError::ShapeMismatch`](crate::error::ImageError::ShapeMismatch)
    /// is returned.
    pub fn append(&mut self, other: &ImageStack) -> Result<()> {
        if let Some(first) = self.frames.first().or(other.frames.first()) {
            for frame in &other.frames {
                first.ensure_same_size(frame)?;
            }
        }
        self.frames.extend(other.frames.iter().cloned());
        Ok(())
    }

    /// Shape of the stack under its layout.
    pub fn dimensions(&self) -> Dimensions {
        let (x, y) = self.frames.first().map(Frame::size).unwrap_or((0, 0));
        match self.layout {
            StackLayout::Volume => Dimensions::new(x, y, self.len(), 1),
            StackLayout::Stack => Dimensions::new(x, y, 1, self.len()),
        }
    }

    /// 8-bit min/max-stretched rendering of frame `i` for display.
    pub fn preview_frame(&self, i: usize) -> Option<GrayImage> {
        let frame = self.frames.get(i)?;
        GrayImage::from_raw(
            frame.width() as u32,
            frame.height() as u32,
            frame.to_u8_stretched(),
        )
    }
}

impl From<Frame> for ImageStack {
    fn from(frame: Frame) -> Self {
        Self::from_frame(frame)
    }
}

impl From<Vec<Frame>> for ImageStack {
    fn from(frames: Vec<Frame>) -> Self {
        Self::from_frames(frames)
    }
}

// =============================================================================
// Tests
// =============================================================================
