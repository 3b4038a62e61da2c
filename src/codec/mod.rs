//! Reader capability and the registry that dispatches to it.
//!
//! - [`FormatReader`]: what every container codec implements
//! - [`Registry`]: extension dispatch with fallback and a decode cache
//! - [`DecodeCache`]: the LRU behind [`Registry::open`]

mod cache;
mod reader;
mod registry;

pub use cache::DecodeCache;
pub use reader::{checked_index, default_frame_index, FormatReader};
pub use registry::Registry;
