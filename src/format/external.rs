//! Formats handled by an external converter program.
//!
//! EMAN2 HDF, IMAGIC and DigitalMicrograph files are not decoded here. With an
//! [`ExternalTool`] configured, they are converted to a temporary MRC stack
//! that the MRC codec reads (or written from one); without it every
//! operation fails with [`ImageError::UnsupportedOperation`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::codec::FormatReader;
use crate::error::{ImageError, Result};
use crate::io::run_program;
use crate::location::{extension_of, Location};
use crate::stack::{DataType, Dimensions, ImageStack};

use super::mrc::MrcReader;

pub const EXTERNAL_EXTENSIONS: &[&str] = &["hdf", "img", "hed", "dm3", "dm4"];

/// IMAGIC header/image pair extensions. IMAGIC cannot be written by byte range.
pub const IMAGIC_EXTENSIONS: &[&str] = &["img", "hed"];

const FORMAT: &str = "External";

/// Whether `path` names an IMAGIC file.
pub fn is_imagic(path: &str) -> bool {
    extension_of(path).is_some_and(|ext| IMAGIC_EXTENSIONS.contains(&ext.as_str()))
}

// =============================================================================
// ExternalTool
// =============================================================================

/// A converter able to translate between a foreign format and MRC.
pub trait ExternalTool: Send + Sync {
    fn name(&self) -> &str;

    /// Convert `input` into `output`; formats follow the file extensions.
    fn convert(&self, input: &str, output: &str) -> Result<()>;

    /// Dimensions of `path`, by default read from a temporary MRC conversion.
    fn probe_dimensions(&self, path: &str) -> Result<Dimensions> {
        with_mrc_copy(self, path, |mrc, location| mrc.probe_dimensions(location))
    }
}

/// Runs `<program> <input> <output>` with extra environment variables.
#[derive(Debug, Clone)]
pub struct CommandTool {
    program: String,
    env: HashMap<String, String>,
}

impl CommandTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ExternalTool for CommandTool {
    fn name(&self) -> &str {
        &self.program
    }

    fn convert(&self, input: &str, output: &str) -> Result<()> {
        run_program(
            &self.program,
            &[input.to_string(), output.to_string()],
            &self.env,
        )?;
        Ok(())
    }
}

/// Convert `path` to a temporary MRC stack and run `f` on it.
fn with_mrc_copy<T, F>(tool: &(impl ExternalTool + ?Sized), path: &str, f: F) -> Result<T>
where
    F: FnOnce(&MrcReader, &Location) -> Result<T>,
{
    if !std::path::Path::new(path).exists() {
        return Err(ImageError::MissingFile(path.to_string()));
    }
    let dir = tempfile::tempdir().map_err(|e| ImageError::io(path, e))?;
    let converted = dir.path().join("converted.mrcs").to_string_lossy().into_owned();

    debug!("Converting {} with {}", path, tool.name());
    tool.convert(path, &converted)?;

    let mrc = MrcReader::new();
    let result = f(&mrc, &Location::new(&converted));
    mrc.close();
    result
}

// =============================================================================
// ExternalReader
// =============================================================================

/// Codec delegating to an optional [`ExternalTool`].
#[derive(Default)]
pub struct ExternalReader {
    tool: Option<Arc<dyn ExternalTool>>,
}

impl ExternalReader {
    pub fn new(tool: Option<Arc<dyn ExternalTool>>) -> Self {
        Self { tool }
    }

    pub fn is_available(&self) -> bool {
        self.tool.is_some()
    }

    fn tool(&self, operation: &'static str) -> Result<&Arc<dyn ExternalTool>> {
        self.tool
            .as_ref()
            .ok_or_else(|| ImageError::unsupported(operation, "External (no converter configured)"))
    }
}

impl FormatReader for ExternalReader {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        EXTERNAL_EXTENSIONS
    }

    fn probe_dimensions(&self, location: &Location) -> Result<Dimensions> {
        self.tool("probe_dimensions")?
            .probe_dimensions(location.path())
    }

    fn probe_data_type(&self, location: &Location) -> Result<DataType> {
        let tool = self.tool("probe_data_type")?;
        with_mrc_copy(tool.as_ref(), location.path(), |mrc, converted| {
            mrc.probe_data_type(converted)
        })
    }

    fn open(&self, location: &Location) -> Result<ImageStack> {
        let tool = self.tool("open")?;
        with_mrc_copy(tool.as_ref(), location.path(), |mrc, converted| {
            mrc.open(&converted.clone().with_index(location.raw_index()))
        })
    }

    fn write(&self, stack: &ImageStack, path: &str, is_stack: bool) -> Result<()> {
        let tool = self.tool("write")?;
        let dir = tempfile::tempdir().map_err(|e| ImageError::io(path, e))?;
        let staged = dir.path().join("staged.mrcs").to_string_lossy().into_owned();

        MrcReader::new().write(stack, &staged, is_stack)?;
        debug!("Converting staged {} to {} with {}", staged, path, tool.name());
        tool.convert(&staged, path)
    }
}

// =============================================================================
// Tests
// =============================================================================
