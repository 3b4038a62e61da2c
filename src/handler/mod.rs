//! Orchestration over the codecs.
//!
//! [`ImageHandler`] converts between formats, extracts frame ranges into new
//! stacks, answers dimension and type queries, averages and inverts frames
//! in a streaming fashion, and drives external programs for the few
//! operations that are not computed in-process.

mod frames;
mod helpers;
mod service;

pub use helpers::{
    HelperPrograms, DEFAULT_MASK_PROGRAM, DEFAULT_NOISE_PROGRAM, DEFAULT_RESIZE_PROGRAM,
};
pub use service::ImageHandler;
