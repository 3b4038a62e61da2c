//! Operations carried out by external EM programs.
//!
//! Thumbnails, masks, noise and spline rescaling are not computed in-process.
//! Each helper builds an argument list, runs the configured program and
//! returns its standard output.

use std::collections::HashMap;

use tracing::info;

use crate::error::{ImageError, Result};
use crate::io::run_program;
use crate::location::{IntoLocation, Location};

use super::service::ImageHandler;

pub const DEFAULT_RESIZE_PROGRAM: &str = "xmipp_image_resize";
pub const DEFAULT_MASK_PROGRAM: &str = "xmipp_transform_mask";
pub const DEFAULT_NOISE_PROGRAM: &str = "xmipp_transform_add_noise";

/// Programs and environment used by the helper operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperPrograms {
    pub resize: String,
    pub mask: String,
    pub noise: String,
    /// Extra environment passed to every program
    pub env: HashMap<String, String>,
}

impl Default for HelperPrograms {
    fn default() -> Self {
        Self {
            resize: DEFAULT_RESIZE_PROGRAM.to_string(),
            mask: DEFAULT_MASK_PROGRAM.to_string(),
            noise: DEFAULT_NOISE_PROGRAM.to_string(),
            env: HashMap::new(),
        }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl ImageHandler {
    fn run_helper(&self, program: &str, args: Vec<String>) -> Result<String> {
        info!("Running {} {}", program, args.join(" "));
        run_program(program, &args, &self.programs.env)
    }

    fn existing(&self, location: impl IntoLocation) -> Result<Location> {
        let location = location.into_location()?;
        if !self.exists_location(&location)? {
            return Err(ImageError::MissingFile(location.path().to_string()));
        }
        Ok(location)
    }

    /// Downscale `input` to a `width` x `height` thumbnail at `output`.
    pub fn compute_thumbnail<I, O>(&self, input: I, output: O, width: usize, height: usize) -> Result<String>
    where
        I: IntoLocation,
        O: IntoLocation,
    {
        let input = self.existing(input)?;
        let output = output.into_location()?;
        if width == 0 || height == 0 {
            return Err(ImageError::Validation(format!(
                "thumbnail size {}x{} must be positive",
                width, height
            )));
        }

        let (w, h) = (width.to_string(), height.to_string());
        let args = args(&[
            "-i",
            &input.to_string(),
            "-o",
            &output.to_string(),
            "--dim",
            &w,
            &h,
        ]);
        self.run_helper(&self.programs.resize, args)
    }

    /// Write a circular mask of `radius` pixels shaped like `reference`.
    pub fn create_circular_mask<I, O>(&self, reference: I, output: O, radius: f32) -> Result<String>
    where
        I: IntoLocation,
        O: IntoLocation,
    {
        let reference = self.existing(reference)?;
        let output = output.into_location()?;
        if radius.is_nan() || radius <= 0.0 {
            return Err(ImageError::Validation(format!(
                "mask radius {} must be positive",
                radius
            )));
        }

        // Negative radius selects an inside-circle mask in the mask program
        let radius = format!("-{}", radius);
        let args = args(&[
            "-i",
            &reference.to_string(),
            "--create_mask",
            &output.to_string(),
            "--mask",
            "circular",
            &radius,
        ]);
        self.run_helper(&self.programs.mask, args)
    }

    /// Add zero-mean gaussian noise of standard deviation `std_dev`.
    pub fn add_noise<I, O>(&self, input: I, output: O, std_dev: f32) -> Result<String>
    where
        I: IntoLocation,
        O: IntoLocation,
    {
        let input = self.existing(input)?;
        let output = output.into_location()?;
        if std_dev.is_nan() || std_dev < 0.0 {
            return Err(ImageError::Validation(format!(
                "noise deviation {} must not be negative",
                std_dev
            )));
        }

        let std_dev = std_dev.to_string();
        let args = args(&[
            "-i",
            &input.to_string(),
            "-o",
            &output.to_string(),
            "--type",
            "gaussian",
            &std_dev,
            "0",
        ]);
        self.run_helper(&self.programs.noise, args)
    }

    /// Rescale `input` by `factor` using spline interpolation.
    pub fn scale_splines<I, O>(&self, input: I, output: O, factor: f32) -> Result<String>
    where
        I: IntoLocation,
        O: IntoLocation,
    {
        let input = self.existing(input)?;
        let output = output.into_location()?;
        if factor.is_nan() || factor <= 0.0 {
            return Err(ImageError::Validation(format!(
                "scale factor {} must be positive",
                factor
            )));
        }

        let factor = factor.to_string();
        let args = args(&[
            "-i",
            &input.to_string(),
            "-o",
            &output.to_string(),
            "--factor",
            &factor,
            "--interp",
            "spline",
        ]);
        self.run_helper(&self.programs.resize, args)
    }
}

// =============================================================================
// Tests
// =============================================================================
