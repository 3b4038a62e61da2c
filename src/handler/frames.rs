//! Streaming frame arithmetic: averaging and inversion.
//!
//! Frames are read one at a time, so memory use stays at one accumulator
//! plus the frame being read.

use tracing::{debug, info};

use crate::error::{ImageError, Result};
use crate::location::{IntoLocation, Location};
use crate::stack::{DataType, Dimensions, Frame, ImageStack, SAMPLING_RATE_KEY};

use super::service::ImageHandler;

impl ImageHandler {
    /// Mean of every frame of a single stack file.
    pub fn compute_average<L: IntoLocation>(&self, location: L) -> Result<Frame> {
        let location = location.into_location()?;
        let count = self.probe(&location)?.frame_count();
        let reader = self.registry().resolve_location(&location);

        let mut sum = reader.read_frame(&location.clone().with_index(1))?;
        for i in 2..=count {
            let frame = reader.read_frame(&location.clone().with_index(i as u32))?;
            sum.add_assign(&frame)?;
        }

        debug!("Averaged {} frames of {}", count, location);
        Ok(sum.scale(1.0 / count as f32))
    }

    /// Mean of a sequence of individually addressed frames.
    pub fn compute_average_of<I, L>(&self, locations: I) -> Result<Frame>
    where
        I: IntoIterator<Item = L>,
        L: IntoLocation,
    {
        let mut locations = locations.into_iter();
        let first = locations
            .next()
            .ok_or_else(|| ImageError::Validation("nothing to average".to_string()))?;

        let mut sum = self.read_frame(first)?;
        let mut count = 1usize;
        for location in locations {
            sum.add_assign(&self.read_frame(location)?)?;
            count += 1;
        }

        debug!("Averaged {} frames", count);
        Ok(sum.scale(1.0 / count as f32))
    }

    /// Negate the samples of one frame and write the float32 result.
    pub fn invert<I, O>(&self, input: I, output: O) -> Result<()>
    where
        I: IntoLocation,
        O: IntoLocation,
    {
        let input = input.into_location()?;
        let output = output.into_location()?;
        let frame = self.read_frame(&input)?;
        self.write_output(frame.scale(-1.0), &input, &output)
    }

    /// Negate every frame of `input` into a float32 stack at `output`.
    ///
    /// The output is allocated at its final shape first when its codec
    /// supports random-access writes.
    pub fn invert_stack(&self, input: &str, output: &str) -> Result<()> {
        let input = Location::parse(input)?;
        let output = Location::parse(output)?;
        let dims = self.probe(&input)?;
        let count = dims.frame_count();
        let reader = self.registry().resolve_location(&input);
        let writer = self.registry().resolve_location(&output);

        let sampling_rate = self.carried_sampling_rate(&input);

        info!("Inverting {} frames of {} into {}", count, input, output);

        if writer.can_allocate() {
            writer.allocate(
                output.path(),
                Dimensions::new(dims.x, dims.y, 1, count),
                DataType::Float32,
                true,
                sampling_rate,
            )?;
            for i in 1..=count as u32 {
                let frame = reader.read_frame(&input.clone().with_index(i))?;
                writer.write_frame(&frame.scale(-1.0), &output.clone().with_index(i))?;
            }
            return Ok(());
        }

        let frames = (1..=count as u32)
            .map(|i| {
                reader
                    .read_frame(&input.clone().with_index(i))
                    .map(|frame| frame.scale(-1.0))
            })
            .collect::<Result<Vec<_>>>()?;
        let stack = ImageStack::from_frames(frames).with_property(SAMPLING_RATE_KEY, sampling_rate);
        writer.write(&stack, output.path(), true)
    }
}

// =============================================================================
// Tests
// =============================================================================
