//! # em-imageio
//!
//! Uniform access to electron-microscopy image containers.
//!
//! Every file is addressed through one location grammar (`path`,
//! `NNNNNN@path` for a single 1-based frame, `path:hint` to force a volume or
//! stack reading) and decodes into one in-memory type, the [`ImageStack`].
//!
//! ## Features
//!
//! - **Native codecs**: MRC (memory-mapped, random-access writes), SPIDER,
//!   multi-page TIFF, PNG/JPEG/BMP/GIF
//! - **Pluggable dispatch**: extension-keyed [`Registry`] with last-wins
//!   override, a guaranteed fallback reader and a singleflight decode cache
//! - **Orchestration**: cross-format conversion, frame-range extraction into
//!   preallocated stacks, streaming averages, tolerant file queries
//! - **External formats**: HDF, IMAGIC and DigitalMicrograph through a
//!   configurable converter program
//!
//! ## Architecture
//!
//! - [`location`] - the `index@path:hint` addressing grammar
//! - [`stack`] - frames, stacks and dimensions
//! - [`codec`] - the [`FormatReader`] trait, decode cache and registry
//! - [`mod@format`] - the container codecs
//! - [`handler`] - conversion and query operations
//! - [`io`] - memory maps, atomic writes, byte order, child processes
//! - [`config`] - CLI and configuration types for the `emio` binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use em_imageio::{ImageHandler, Location};
//!
//! # fn main() -> em_imageio::Result<()> {
//! let handler = ImageHandler::new();
//!
//! // Dimensions of a missing file are None, not an error
//! if let Some(dims) = handler.get_dimensions("particles.mrcs")? {
//!     println!("{} particles of {}x{}", dims.n, dims.x, dims.y);
//! }
//!
//! // Third particle to PNG
//! handler.convert(Location::indexed(3, "particles.mrcs"), "particle.png", None, None)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod handler;
pub mod io;
pub mod location;
pub mod stack;

// Re-export commonly used types
pub use codec::{DecodeCache, FormatReader, Registry};
pub use config::{Cli, Command, ExternalConfig};
pub use error::{ImageError, Result};
pub use format::{
    CommandTool, ExternalReader, ExternalTool, MrcReader, MultiPageReader, SimpleImageReader,
    SpiderReader,
};
pub use handler::{HelperPrograms, ImageHandler};
pub use location::{
    parse_location, strip_format_hint, FormatHint, HasLocation, IntoLocation, Location, NO_INDEX,
};
pub use stack::{DataType, Dimensions, Frame, FrameData, ImageStack, StackLayout};
