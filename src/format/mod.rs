//! Codecs for the supported image formats.
//!
//! Each codec implements [`FormatReader`](crate::codec::FormatReader) and is
//! registered by extension in the [`Registry`](crate::codec::Registry):
//!
//! - **MRC** (`mrc`, `mrcs`, `st`, `rec`, `ali`, `map`): memory-mapped, writable in place
//! - **SPIDER** (`stk`, `spi`, `vol`): read-only, byte order detected from the header
//! - **TIFF** (`tif`, `tiff`, `gain`, `eer`): one frame per page
//! - **Image** (`png`, `jpg`, `jpeg`, `bmp`, `gif`): single frame
//! - **External** (`hdf`, `img`, `hed`, `dm3`, `dm4`): delegated to a converter program

pub mod external;
pub mod mrc;
pub mod multipage;
pub mod simple;
pub mod spider;

pub use external::{
    is_imagic, CommandTool, ExternalReader, ExternalTool, EXTERNAL_EXTENSIONS, IMAGIC_EXTENSIONS,
};
pub use mrc::{MrcHeader, MrcReader, MRC_EXTENSIONS, MRC_HEADER_LEN};
pub use multipage::{MultiPageReader, TIFF_EXTENSIONS};
pub use simple::{image_size, SimpleImageReader, SIMPLE_EXTENSIONS};
pub use spider::{SpiderHeader, SpiderReader, SpiderSession, SPIDER_EXTENSIONS};
