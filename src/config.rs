//! Configuration for the `emio` command-line tool.
//!
//! The library itself needs no configuration. The binary reads command-line
//! arguments via clap, with environment variable fallbacks using the `EMIO_`
//! prefix for everything concerning external programs.
//!
//! # Environment Variables
//!
//! - `EMIO_CONVERTER` - Converter for HDF/IMAGIC/DM files (default: e2proc2d.py)
//! - `EMIO_EXTERNAL_ENABLED` - Use the converter at all (default: false)
//! - `EMIO_RESIZE_PROGRAM` - Thumbnail and rescale program (default: xmipp_image_resize)
//! - `EMIO_MASK_PROGRAM` - Mask program (default: xmipp_transform_mask)
//! - `EMIO_NOISE_PROGRAM` - Noise program (default: xmipp_transform_add_noise)
//! - `EMIO_DECODE_CACHE` - Decoded stacks kept in memory, 0 = unbounded (default: 0)

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::codec::Registry;
use crate::format::{CommandTool, ExternalTool};
use crate::handler::{
    HelperPrograms, ImageHandler, DEFAULT_MASK_PROGRAM, DEFAULT_NOISE_PROGRAM,
    DEFAULT_RESIZE_PROGRAM,
};
use crate::stack::DataType;

// =============================================================================
// Default Values
// =============================================================================

/// Default converter for formats decoded outside this crate.
pub const DEFAULT_CONVERTER: &str = "e2proc2d.py";

/// Default decode cache capacity (unbounded).
pub const DEFAULT_DECODE_CACHE: usize = 0;

// =============================================================================
// CLI Arguments
// =============================================================================

/// emio - inspect and convert electron-microscopy image files.
///
/// Files are addressed as `path`, `NNNNNN@path` (one frame, 1-based) or
/// `path:hint` (`:mrc` reads an MRC file as a volume, `:mrcs` as a stack).
#[derive(Parser, Debug, Clone)]
#[command(name = "emio")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub external: ExternalConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print dimensions and sample type.
    Info(InfoArgs),

    /// Convert one frame (or a whole single-image file) to another format.
    Convert(ConvertArgs),

    /// Copy a range of frames into a new stack.
    ConvertStack(ConvertStackArgs),

    /// Average frames into one image.
    Average(AverageArgs),

    /// Negate sample values.
    Invert(InvertArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Locations to describe.
    #[arg(required = true)]
    pub locations: Vec<String>,

    /// Print one JSON object per location.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    pub input: String,

    pub output: String,

    /// Output sample type.
    #[arg(short, long, value_enum)]
    pub data_type: Option<DataTypeArg>,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertStackArgs {
    pub input: String,

    pub output: String,

    /// First frame to copy (1-based, default 1).
    #[arg(long)]
    pub first: Option<u32>,

    /// Last frame to copy (inclusive, default the last frame).
    #[arg(long)]
    pub last: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct AverageArgs {
    /// One stack file, or several individually addressed frames.
    #[arg(required = true)]
    pub locations: Vec<String>,

    /// Where to write the average.
    #[arg(short, long)]
    pub output: String,
}

#[derive(Args, Debug, Clone)]
pub struct InvertArgs {
    pub input: String,

    pub output: String,

    /// Invert every frame of a stack instead of a single frame.
    #[arg(long, default_value_t = false)]
    pub stack: bool,
}

/// Sample type names accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTypeArg {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Float32,
}

impl From<DataTypeArg> for DataType {
    fn from(arg: DataTypeArg) -> Self {
        match arg {
            DataTypeArg::Int8 => DataType::Int8,
            DataTypeArg::Uint8 => DataType::UInt8,
            DataTypeArg::Int16 => DataType::Int16,
            DataTypeArg::Uint16 => DataType::UInt16,
            DataTypeArg::Float32 => DataType::Float32,
        }
    }
}

// =============================================================================
// External Programs
// =============================================================================

/// Programs used for the formats and operations not handled in-process.
#[derive(Args, Debug, Clone)]
pub struct ExternalConfig {
    /// Converter run as `<converter> <input> <output>` for HDF, IMAGIC and DM files.
    #[arg(long, global = true, default_value = DEFAULT_CONVERTER, env = "EMIO_CONVERTER")]
    pub converter: String,

    /// Allow running the converter.
    ///
    /// When disabled, HDF, IMAGIC and DM files report an unsupported operation.
    #[arg(long, global = true, default_value_t = false, env = "EMIO_EXTERNAL_ENABLED")]
    pub external_enabled: bool,

    /// Program used for thumbnails and spline rescaling.
    #[arg(long, global = true, default_value = DEFAULT_RESIZE_PROGRAM, env = "EMIO_RESIZE_PROGRAM")]
    pub resize_program: String,

    /// Program used to create masks.
    #[arg(long, global = true, default_value = DEFAULT_MASK_PROGRAM, env = "EMIO_MASK_PROGRAM")]
    pub mask_program: String,

    /// Program used to add noise.
    #[arg(long, global = true, default_value = DEFAULT_NOISE_PROGRAM, env = "EMIO_NOISE_PROGRAM")]
    pub noise_program: String,

    /// Maximum number of decoded stacks to keep in memory (0 = unbounded).
    #[arg(long, global = true, default_value_t = DEFAULT_DECODE_CACHE, env = "EMIO_DECODE_CACHE")]
    pub decode_cache: usize,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            converter: DEFAULT_CONVERTER.to_string(),
            external_enabled: false,
            resize_program: DEFAULT_RESIZE_PROGRAM.to_string(),
            mask_program: DEFAULT_MASK_PROGRAM.to_string(),
            noise_program: DEFAULT_NOISE_PROGRAM.to_string(),
            decode_cache: DEFAULT_DECODE_CACHE,
        }
    }
}

impl ExternalConfig {
    /// The configured converter, if enabled.
    pub fn tool(&self) -> Option<Arc<dyn ExternalTool>> {
        self.external_enabled
            .then(|| Arc::new(CommandTool::new(&self.converter)) as Arc<dyn ExternalTool>)
    }

    pub fn helper_programs(&self) -> HelperPrograms {
        HelperPrograms {
            resize: self.resize_program.clone(),
            mask: self.mask_program.clone(),
            noise: self.noise_program.clone(),
            env: HashMap::new(),
        }
    }

    /// Build an [`ImageHandler`] wired to these programs.
    pub fn build_handler(&self) -> ImageHandler {
        let tool = self.tool();
        let registry =
            Registry::with_external_tool(tool.clone()).with_cache_capacity(self.decode_cache);
        ImageHandler::with_parts(Arc::new(registry), tool)
            .with_helper_programs(self.helper_programs())
    }
}

impl Cli {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let external = &self.external;
        if external.external_enabled && external.converter.trim().is_empty() {
            return Err(
                "External conversion is enabled but no converter is set. \
                 Set --converter or EMIO_CONVERTER, or unset EMIO_EXTERNAL_ENABLED"
                    .to_string(),
            );
        }
        for (name, program) in [
            ("resize_program", &external.resize_program),
            ("mask_program", &external.mask_program),
            ("noise_program", &external.noise_program),
        ] {
            if program.trim().is_empty() {
                return Err(format!("{} must not be empty", name));
            }
        }

        if let Command::ConvertStack(args) = &self.command {
            if args.first == Some(0) {
                return Err("--first is 1-based and must be at least 1".to_string());
            }
            if let (Some(first), Some(last)) = (args.first, args.last) {
                if first > last {
                    return Err(format!("--first {} is after --last {}", first, last));
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
