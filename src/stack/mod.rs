//! Uniform in-memory representation of decoded image data.
//!
//! Every codec decodes into an [`ImageStack`]: an ordered list of [`Frame`]s
//! (dense 2D grids with one scalar [`DataType`]) and a small property bag.
//! There is no separate single-image type; one image is a stack of one frame.

mod frame;
mod image_stack;

pub use frame::{DataType, Frame, FrameData, FrameStats};
pub use image_stack::{Dimensions, ImageStack, StackLayout, StackSource, SAMPLING_RATE_KEY};
