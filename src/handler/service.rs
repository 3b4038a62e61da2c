//! ImageHandler: conversion, stack extraction and file queries.
//!
//! Query operations (`get_dimensions`, `get_data_type`, `exists_location`)
//! answer `None`/`false` for a missing file. Mutating operations (`convert`,
//! `convert_stack`) fail with [`ImageError::MissingFile`] instead.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ImageHandler                         │
//! │   convert()        convert_stack()       get_dimensions()   │
//! │       │                  │                      │           │
//! │       ▼                  ▼                      ▼           │
//! │  read_frame ──► [warp] ──► [coerce type] ──► write_output   │
//! └───────┬─────────────────────────────────────────┬───────────┘
//!         ▼                                         ▼
//!  ┌──────────────┐                        ┌────────────────┐
//!  │   Registry   │                        │  ExternalTool  │
//!  │ (FormatReader│                        │  (IMAGIC only) │
//!  │   dispatch)  │                        └────────────────┘
//!  └──────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::{FormatReader, Registry};
use crate::error::{ImageError, Result};
use crate::format::{image_size, is_imagic, ExternalTool, MRC_EXTENSIONS, SIMPLE_EXTENSIONS};
use crate::location::{extension_of, IntoLocation, Location};
use crate::stack::{DataType, Dimensions, Frame, ImageStack, SAMPLING_RATE_KEY};

use super::helpers::HelperPrograms;

/// Whether `path` (hint allowed) has one of `extensions`.
pub(crate) fn has_extension(path: &str, extensions: &[&str]) -> bool {
    extension_of(path).is_some_and(|ext| extensions.contains(&ext.as_str()))
}

// =============================================================================
// ImageHandler
// =============================================================================

/// Format-independent front end over a [`Registry`].
///
/// # Example
///
/// ```ignore
/// use em_imageio::ImageHandler;
///
/// let handler = ImageHandler::new();
/// handler.convert("000003@particles.mrcs", "particle3.png", None, None)?;
///
/// // 10-frame movie, frames 3..=7 into a preallocated 5-frame stack
/// handler.convert_stack("movie.tif", "subset.mrcs", Some(3), Some(7))?;
/// ```
pub struct ImageHandler {
    registry: Arc<Registry>,
    tool: Option<Arc<dyn ExternalTool>>,
    pub(super) programs: HelperPrograms,
}

impl ImageHandler {
    /// Handler over the default codecs without an external converter.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(Registry::with_defaults()))
    }

    /// Handler over an existing registry.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self::with_parts(registry, None)
    }

    /// Handler whose registry and IMAGIC conversions use `tool`.
    pub fn with_external_tool(tool: Arc<dyn ExternalTool>) -> Self {
        let registry = Arc::new(Registry::with_external_tool(Some(tool.clone())));
        Self::with_parts(registry, Some(tool))
    }

    /// Handler over `registry`, converting whole IMAGIC files with `tool`.
    pub fn with_parts(registry: Arc<Registry>, tool: Option<Arc<dyn ExternalTool>>) -> Self {
        Self {
            registry,
            tool,
            programs: HelperPrograms::default(),
        }
    }

    /// Replace the programs run by the thumbnail, mask, noise and resize helpers.
    pub fn with_helper_programs(mut self, programs: HelperPrograms) -> Self {
        self.programs = programs;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Output sample type used when writing `data_type` to `output`.
    ///
    /// Signed 8-bit data going to an MRC-family file becomes unsigned 16-bit;
    /// every other pair passes through.
    pub fn get_supported_data_type(data_type: DataType, output: &str) -> DataType {
        if data_type == DataType::Int8 && has_extension(output, MRC_EXTENSIONS) {
            DataType::UInt16
        } else {
            data_type
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Whether the file behind `location` exists (hint stripped).
    pub fn exists_location<L: IntoLocation>(&self, location: L) -> Result<bool> {
        let location = location.into_location()?;
        Ok(Path::new(location.path()).exists())
    }

    /// `(X, Y, Z, N)` of `location`, or `None` if the file does not exist.
    pub fn get_dimensions<L: IntoLocation>(&self, location: L) -> Result<Option<Dimensions>> {
        let location = location.into_location()?;
        if !Path::new(location.path()).exists() {
            debug!("{} does not exist, no dimensions", location.path());
            return Ok(None);
        }
        self.probe(&location).map(Some)
    }

    /// Header-level sample type of `location`, or `None` if the file does not exist.
    pub fn get_data_type<L: IntoLocation>(&self, location: L) -> Result<Option<DataType>> {
        let location = location.into_location()?;
        if !Path::new(location.path()).exists() {
            return Ok(None);
        }
        self.registry
            .resolve_location(&location)
            .probe_data_type(&location)
            .map(Some)
    }

    /// Whether `location` reads as a 3D volume. `false` for a missing file.
    pub fn is_volume_file<L: IntoLocation>(&self, location: L) -> Result<bool> {
        Ok(self
            .get_dimensions(location)?
            .is_some_and(|dims| dims.is_volume()))
    }

    /// Sampling size stored with the first frame of `location`.
    pub fn get_voxel_size<L: IntoLocation>(&self, location: L) -> Result<f64> {
        let location = location.into_location()?;
        self.registry
            .resolve_location(&location)
            .probe_sampling_rate(&location)
    }

    /// Sampling size to carry from `input` into an output file.
    ///
    /// Falls back to 1.0 when the input's format cannot report one.
    pub(super) fn carried_sampling_rate(&self, input: &Location) -> f64 {
        self.registry
            .resolve_location(input)
            .probe_sampling_rate(input)
            .unwrap_or_else(|e| {
                debug!("No sampling size for {}: {}", input, e);
                1.0
            })
    }

    /// Decode the frame addressed by `location`.
    ///
    /// Without an index, volumes yield their middle slice.
    pub fn read_frame<L: IntoLocation>(&self, location: L) -> Result<Frame> {
        let location = location.into_location()?;
        self.registry.resolve_location(&location).read_frame(&location)
    }

    /// Decode the whole of `location` through the registry's decode cache.
    pub fn read<L: IntoLocation>(&self, location: L) -> Result<Arc<ImageStack>> {
        self.registry.open(location)
    }

    /// Strict dimension probe: a missing file is an error.
    pub(super) fn probe(&self, location: &Location) -> Result<Dimensions> {
        let path = location.path();
        if !Path::new(path).exists() {
            return Err(ImageError::MissingFile(path.to_string()));
        }
        if has_extension(path, SIMPLE_EXTENSIONS) {
            let (x, y) = image_size(path)?;
            return Ok(Dimensions::new(x, y, 1, 1));
        }
        self.registry.resolve_location(location).probe_dimensions(location)
    }

    // -------------------------------------------------------------------------
    // Conversion
    // -------------------------------------------------------------------------

    /// Convert one frame (or a whole IMAGIC file) from `input` to `output`.
    ///
    /// `data_type` converts samples, coerced by
    /// [`get_supported_data_type`](Self::get_supported_data_type). `transform`
    /// resamples through a 2x3 affine matrix before writing. An indexed output
    /// overwrites that frame of an existing file.
    pub fn convert<I, O>(
        &self,
        input: I,
        output: O,
        data_type: Option<DataType>,
        transform: Option<&[f32; 6]>,
    ) -> Result<()>
    where
        I: IntoLocation,
        O: IntoLocation,
    {
        let input = input.into_location()?;
        let output = output.into_location()?;
        self.convert_location(&input, &output, data_type, transform)
            .map_err(|e| self.conversion_error(&input, &output, e))
    }

    fn convert_location(
        &self,
        input: &Location,
        output: &Location,
        data_type: Option<DataType>,
        transform: Option<&[f32; 6]>,
    ) -> Result<()> {
        if !Path::new(input.path()).exists() {
            return Err(ImageError::MissingFile(input.path().to_string()));
        }

        if is_imagic(input.path()) || is_imagic(output.path()) {
            let tool = self
                .tool
                .as_ref()
                .ok_or_else(|| ImageError::unsupported("convert", "IMAGIC (no converter configured)"))?;
            let whole_file = input.index().is_none() && output.index().is_none();
            if whole_file && data_type.is_none() && transform.is_none() {
                info!("Converting {} to {} with {}", input, output, tool.name());
                return tool.convert(input.path(), output.path());
            }
        }

        let mut frame = self.read_frame(input)?;
        if let Some(m) = transform {
            frame = frame.warp_affine(m)?;
        }
        if let Some(data_type) = data_type {
            frame = frame.convert(Self::get_supported_data_type(data_type, output.path()));
        }

        debug!("Converting {} to {}", input, output);
        self.write_output(frame, input, output)
    }

    /// Write `frame`, read from `input`, into an indexed slot of an existing
    /// file or as a whole file sampled like `input`.
    ///
    /// An indexed slot keeps the sampling size its file was created with.
    pub(super) fn write_output(&self, frame: Frame, input: &Location, output: &Location) -> Result<()> {
        let writer = self.registry.resolve_location(output);
        if output.index().is_some() {
            writer.write_frame(&frame, output)
        } else {
            let sampling_rate = self.carried_sampling_rate(input);
            let stack = ImageStack::from_frame(frame).with_property(SAMPLING_RATE_KEY, sampling_rate);
            writer.write(&stack, output.path(), output.writes_stack())
        }
    }

    fn conversion_error(&self, input: &Location, output: &Location, source: ImageError) -> ImageError {
        if matches!(source, ImageError::Conversion { .. }) {
            return source;
        }
        ImageError::Conversion {
            input: input.to_string(),
            output: output.to_string(),
            format: self.registry.resolve_location(output).name().to_string(),
            source: Box::new(source),
        }
    }

    /// Copy frames `first..=last` (1-based, default the whole file) of
    /// `input` into a new stack at `output`.
    pub fn convert_stack(
        &self,
        input: &str,
        output: &str,
        first: Option<u32>,
        last: Option<u32>,
    ) -> Result<()> {
        self.convert_stack_with_progress(input, output, first, last, |_, _| {})
    }

    /// [`convert_stack`](Self::convert_stack) calling `progress(j, n)` before
    /// output frame `j` of `n` is produced.
    ///
    /// For codecs with random-access writes the output is allocated at its
    /// final shape before the first call.
    pub fn convert_stack_with_progress<F>(
        &self,
        input: &str,
        output: &str,
        first: Option<u32>,
        last: Option<u32>,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let input = Location::parse(input)?;
        let output = Location::parse(output)?;
        let dims = self.probe(&input)?;
        let count = dims.frame_count() as u32;

        let first = first.unwrap_or(1);
        let last = last.unwrap_or(count);
        if first == 0 || first > last || last > count {
            return Err(ImageError::Validation(format!(
                "frame range {}..={} is outside 1..={} of {}",
                first, last, count, input
            )));
        }

        if is_imagic(output.path()) {
            if first != 1 || last != count {
                return Err(ImageError::Validation(format!(
                    "IMAGIC output {} only supports whole-stack conversion, got {}..={} of {}",
                    output, first, last, count
                )));
            }
            progress(1, 1);
            return self.convert(&input, &output, None, None);
        }

        let n = (last - first + 1) as usize;
        let writer = self.registry.resolve_location(&output);
        info!(
            "Copying frames {}..={} of {} into {} ({})",
            first,
            last,
            input,
            output,
            writer.name()
        );

        let sampling_rate = self.carried_sampling_rate(&input);
        if writer.can_allocate() {
            let data_type = self.stack_data_type(&input, output.path());
            writer
                .allocate(
                    output.path(),
                    Dimensions::new(dims.x, dims.y, 1, n),
                    data_type,
                    true,
                    sampling_rate,
                )
                .map_err(|e| self.conversion_error(&input, &output, e))?;

            for (j, i) in (first..=last).enumerate() {
                progress(j + 1, n);
                let source = input.clone().with_index(i);
                let target = output.clone().with_index(j as u32 + 1);
                self.convert(&source, &target, None, None)?;
            }
            return Ok(());
        }

        // Writers without random access get the whole range at once
        let reader = self.registry.resolve_location(&input);
        let mut frames = Vec::with_capacity(n);
        for (j, i) in (first..=last).enumerate() {
            progress(j + 1, n);
            frames.push(reader.read_frame(&input.clone().with_index(i))?);
        }
        let stack = ImageStack::from_frames(frames).with_property(SAMPLING_RATE_KEY, sampling_rate);
        writer
            .write(&stack, output.path(), true)
            .map_err(|e| self.conversion_error(&input, &output, e))
    }

    /// Output sample type for a preallocated copy of `input`.
    fn stack_data_type(&self, input: &Location, output: &str) -> DataType {
        let data_type = self
            .registry
            .resolve_location(input)
            .probe_data_type(input)
            .unwrap_or(DataType::Float32);
        Self::get_supported_data_type(data_type, output)
    }
}

impl Default for ImageHandler {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
