//! ImageHandler behavior against real files on disk.

use std::sync::Arc;

use em_imageio::format::{
    MrcHeader, EXTERNAL_EXTENSIONS, MRC_EXTENSIONS, MRC_HEADER_LEN, SIMPLE_EXTENSIONS,
    SPIDER_EXTENSIONS, TIFF_EXTENSIONS,
};
use em_imageio::{
    DataType, Dimensions, ExternalTool, FormatReader, Frame, FrameData, HasLocation, ImageError,
    ImageHandler, ImageStack, Location, MrcReader, Result,
};

use super::test_utils::{temp_path, write_mrc, write_png, write_tiff_pages, SpiderFixture};

/// Converter that copies bytes, so foreign-extension fixtures hold MRC data.
struct CopyTool;

impl ExternalTool for CopyTool {
    fn name(&self) -> &str {
        "copy"
    }

    fn convert(&self, input: &str, output: &str) -> Result<()> {
        std::fs::copy(input, output).map_err(|e| ImageError::io(input, e))?;
        Ok(())
    }
}

/// A particle-like domain object that knows where its pixels live.
struct Particle {
    index: u32,
    file: String,
    volume: bool,
}

impl HasLocation for Particle {
    fn location_index(&self) -> u32 {
        self.index
    }

    fn file_name(&self) -> String {
        self.file.clone()
    }

    fn is_volume(&self) -> bool {
        self.volume
    }
}

fn all_extensions() -> impl Iterator<Item = &'static str> {
    [
        MRC_EXTENSIONS,
        SPIDER_EXTENSIONS,
        TIFF_EXTENSIONS,
        SIMPLE_EXTENSIONS,
        EXTERNAL_EXTENSIONS,
    ]
    .into_iter()
    .flatten()
    .copied()
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn test_missing_file_queries_return_sentinels() {
    let dir = tempfile::tempdir().unwrap();
    let handler = ImageHandler::with_external_tool(Arc::new(CopyTool));

    for ext in all_extensions() {
        let path = temp_path(&dir, &format!("missing.{}", ext));
        assert_eq!(handler.get_dimensions(path.as_str()).unwrap(), None, "{}", ext);
        assert_eq!(handler.get_data_type(path.as_str()).unwrap(), None, "{}", ext);
        assert!(!handler.exists_location(path.as_str()).unwrap());
        assert!(!handler.is_volume_file(path.as_str()).unwrap());
    }
}

#[test]
fn test_missing_file_actions_fail() {
    let dir = tempfile::tempdir().unwrap();
    let missing = temp_path(&dir, "missing.mrcs");
    let output = temp_path(&dir, "out.mrcs");
    let handler = ImageHandler::new();

    let err = handler
        .convert(missing.as_str(), output.as_str(), None, None)
        .unwrap_err();
    match err {
        ImageError::Conversion { source, .. } => {
            assert!(matches!(*source, ImageError::MissingFile(_)))
        }
        other => panic!("unexpected error: {}", other),
    }

    let err = handler
        .convert_stack(&missing, &output, None, None)
        .unwrap_err();
    assert!(matches!(err, ImageError::MissingFile(_)));
    assert!(handler.compute_average(missing.as_str()).is_err());
}

#[test]
fn test_queries_on_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    let mrcs = temp_path(&dir, "particles.mrcs");
    let png = temp_path(&dir, "micrograph.png");
    write_mrc(&mrcs, 6, 5, &[1.0, 2.0, 3.0], true);
    write_png(&png, 7, 2);

    let handler = ImageHandler::new();
    assert_eq!(
        handler.get_dimensions(mrcs.as_str()).unwrap(),
        Some(Dimensions::new(6, 5, 1, 3))
    );
    assert_eq!(
        handler.get_data_type(mrcs.as_str()).unwrap(),
        Some(DataType::Float32)
    );
    assert!(!handler.is_volume_file(mrcs.as_str()).unwrap());
    assert!(handler
        .is_volume_file(format!("{}:mrc", mrcs).as_str())
        .unwrap());
    assert!(handler.exists_location((2, mrcs.as_str())).unwrap());

    assert_eq!(
        handler.get_dimensions(png.as_str()).unwrap(),
        Some(Dimensions::new(7, 2, 1, 1))
    );
    assert_eq!(
        handler.get_data_type(png.as_str()).unwrap(),
        Some(DataType::UInt8)
    );
}

#[test]
fn test_voxel_size_from_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "particles.stk");
    SpiderFixture {
        edge: 4,
        images: 3,
        labbyt: 256,
        stack: true,
        scale: 2.5,
    }
    .write(&path);

    let handler = ImageHandler::new();
    assert!((handler.get_voxel_size(path.as_str()).unwrap() - 2.5).abs() < 1e-9);
}

#[test]
fn test_domain_object_location() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "map.mrc");
    write_mrc(&path, 4, 4, &[1.0, 2.0, 3.0, 4.0], true);
    let handler = ImageHandler::new();

    // A volume object on an ambiguous extension reads the file as a volume
    let volume = Particle {
        index: 0,
        file: path.clone(),
        volume: true,
    };
    assert_eq!(
        handler.get_dimensions(&volume).unwrap(),
        Some(Dimensions::new(4, 4, 4, 1))
    );

    let particle = Particle {
        index: 3,
        file: path,
        volume: false,
    };
    assert_eq!(handler.read_frame(&particle).unwrap().get(0, 0), Some(3.0));
}

#[test]
fn test_supported_data_type_is_idempotent() {
    let types = [
        DataType::Int8,
        DataType::UInt8,
        DataType::Int16,
        DataType::UInt16,
        DataType::Float32,
    ];
    for ext in all_extensions() {
        let path = format!("out.{}", ext);
        for t in types {
            let once = ImageHandler::get_supported_data_type(t, &path);
            assert_eq!(ImageHandler::get_supported_data_type(once, &path), once);
        }
    }
}

// =============================================================================
// Conversion
// =============================================================================

#[test]
fn test_convert_spider_image_to_mrc() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "particles.stk");
    let output = temp_path(&dir, "second.mrc");
    SpiderFixture {
        edge: 4,
        images: 3,
        labbyt: 256,
        stack: true,
        scale: 1.0,
    }
    .write(&input);

    let handler = ImageHandler::new();
    handler
        .convert(Location::indexed(2, &input), output.as_str(), None, None)
        .unwrap();

    let frame = handler.read_frame(output.as_str()).unwrap();
    assert_eq!(frame.size(), (4, 4));
    assert_eq!(frame.get(0, 0), Some(SpiderFixture::marker(1)));
    assert_eq!(frame.get(2, 2), Some(1.0));
}

/// MRC stack of 4x4 frames filled with 1..=n, sampled at `sr` Å per pixel.
fn write_sampled_mrc(path: &str, n: usize, sr: f64) {
    let frames = (1..=n).map(|i| Frame::filled(4, 4, i as f32)).collect();
    let stack = ImageStack::from_frames(frames).with_property("sr", sr);
    MrcReader::new().write(&stack, path, true).unwrap();
}

fn mrc_header(path: &str) -> MrcHeader {
    let bytes = std::fs::read(path).unwrap();
    MrcHeader::parse(&bytes[..MRC_HEADER_LEN], path).unwrap()
}

#[test]
fn test_convert_keeps_sampling_size() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "out.mrc");
    write_sampled_mrc(&input, 3, 1.5);

    let handler = ImageHandler::new();
    handler
        .convert((2, input.as_str()), output.as_str(), None, None)
        .unwrap();
    assert!((handler.get_voxel_size(output.as_str()).unwrap() - 1.5).abs() < 1e-6);
    assert_eq!(handler.read_frame(output.as_str()).unwrap().get(0, 0), Some(2.0));

    // SPIDER keeps its scale in the header too
    let spider = temp_path(&dir, "particles.stk");
    let from_spider = temp_path(&dir, "from_spider.mrc");
    SpiderFixture {
        edge: 4,
        images: 2,
        labbyt: 256,
        stack: true,
        scale: 2.5,
    }
    .write(&spider);
    handler
        .convert((1, spider.as_str()), from_spider.as_str(), None, None)
        .unwrap();
    assert!((handler.get_voxel_size(from_spider.as_str()).unwrap() - 2.5).abs() < 1e-6);
}

#[test]
fn test_convert_without_sampling_size_defaults_to_one() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "micrograph.png");
    let output = temp_path(&dir, "micrograph.mrc");
    write_png(&input, 4, 3);

    let handler = ImageHandler::new();
    handler
        .convert(input.as_str(), output.as_str(), None, None)
        .unwrap();
    assert!((handler.get_voxel_size(output.as_str()).unwrap() - 1.0).abs() < 1e-6);
}

#[test]
fn test_convert_output_layout_follows_extension() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    write_sampled_mrc(&input, 3, 1.0);
    let handler = ImageHandler::new();

    let stack = temp_path(&dir, "one.mrcs");
    handler
        .convert((3, input.as_str()), stack.as_str(), None, None)
        .unwrap();
    assert!(mrc_header(&stack).is_stack());
    assert!(!handler.is_volume_file(stack.as_str()).unwrap());

    let volume = temp_path(&dir, "one.mrc");
    handler
        .convert((3, input.as_str()), volume.as_str(), None, None)
        .unwrap();
    assert!(!mrc_header(&volume).is_stack());

    // A hint wins over the extension
    let hinted = temp_path(&dir, "hinted.mrcs");
    handler
        .convert((3, input.as_str()), format!("{}:mrc", hinted), None, None)
        .unwrap();
    assert!(!mrc_header(&hinted).is_stack());
}

#[test]
fn test_convert_mrc_frame_to_png() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "ramp.mrc");
    let output = temp_path(&dir, "ramp.png");
    let frame = Frame::new(3, 1, vec![0.0f32, 5.0, 10.0]).unwrap();
    MrcReader::new()
        .write(&frame.into(), &input, false)
        .unwrap();

    let handler = ImageHandler::new();
    handler
        .convert(input.as_str(), output.as_str(), None, None)
        .unwrap();

    let png = handler.read_frame(output.as_str()).unwrap();
    assert_eq!(png.data(), &FrameData::UInt8(vec![0, 128, 255]));
}

#[test]
fn test_convert_coerces_int8_for_mrc() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "out.mrc");
    write_mrc(&input, 2, 2, &[7.0], true);

    let handler = ImageHandler::new();
    handler
        .convert(input.as_str(), output.as_str(), Some(DataType::Int8), None)
        .unwrap();

    assert_eq!(
        handler.get_data_type(output.as_str()).unwrap(),
        Some(DataType::UInt16)
    );
    assert_eq!(handler.read_frame(output.as_str()).unwrap().get(1, 1), Some(7.0));
}

#[test]
fn test_convert_with_transform() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrc");
    let output = temp_path(&dir, "out.mrc");
    let data: Vec<f32> = (0..9).map(|i| i as f32).collect();
    MrcReader::new()
        .write(&Frame::new(3, 3, data).unwrap().into(), &input, false)
        .unwrap();

    let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let handler = ImageHandler::new();
    handler
        .convert(input.as_str(), output.as_str(), None, Some(&identity))
        .unwrap();

    let frame = handler.read_frame(output.as_str()).unwrap();
    assert_eq!(frame.get(1, 1), Some(4.0));
    assert_eq!(frame.get(2, 0), Some(2.0));
}

#[test]
fn test_convert_into_indexed_slot() {
    let dir = tempfile::tempdir().unwrap();
    let single = temp_path(&dir, "single.mrc");
    let stack = temp_path(&dir, "stack.mrcs");
    write_mrc(&single, 3, 3, &[42.0], false);
    write_mrc(&stack, 3, 3, &[1.0, 2.0, 3.0], true);

    let handler = ImageHandler::new();
    handler
        .convert(single.as_str(), (2, stack.as_str()), None, None)
        .unwrap();

    assert_eq!(handler.read_frame((1, stack.as_str())).unwrap().get(0, 0), Some(1.0));
    assert_eq!(handler.read_frame((2, stack.as_str())).unwrap().get(0, 0), Some(42.0));
    assert_eq!(handler.read_frame((3, stack.as_str())).unwrap().get(0, 0), Some(3.0));
}

#[test]
fn test_imagic_without_converter_names_paths() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "out.hed");
    write_mrc(&input, 2, 2, &[1.0], true);

    let err = ImageHandler::new()
        .convert(input.as_str(), output.as_str(), None, None)
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains(&input));
    assert!(text.contains(&output));
    assert!(text.contains("External"));
}

#[test]
fn test_external_formats_through_converter() {
    let dir = tempfile::tempdir().unwrap();
    let hdf = temp_path(&dir, "movie.hdf");
    let output = temp_path(&dir, "frame.mrc");
    write_mrc(&hdf, 3, 2, &[5.0, 6.0], true);

    let handler = ImageHandler::with_external_tool(Arc::new(CopyTool));
    assert_eq!(
        handler.get_dimensions(hdf.as_str()).unwrap(),
        Some(Dimensions::new(3, 2, 1, 2))
    );
    handler
        .convert((2, hdf.as_str()), output.as_str(), None, None)
        .unwrap();
    assert_eq!(handler.read_frame(output.as_str()).unwrap().get(0, 0), Some(6.0));
}

// =============================================================================
// Stack Conversion
// =============================================================================

#[test]
fn test_convert_stack_preallocates_range() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "out.mrcs");
    let values: Vec<f32> = (1..=10).map(|i| i as f32).collect();
    write_mrc(&input, 4, 3, &values, true);

    let handler = ImageHandler::new();
    let probe = MrcReader::new();
    let mut seen = Vec::new();
    handler
        .convert_stack_with_progress(&input, &output, Some(3), Some(7), |j, n| {
            if j == 1 {
                assert_eq!(
                    probe.probe_dimensions(&Location::new(&output)).unwrap(),
                    Dimensions::new(4, 3, 1, 5)
                );
            }
            seen.push((j, n));
        })
        .unwrap();

    assert_eq!(seen, (1..=5).map(|j| (j, 5)).collect::<Vec<_>>());
    assert_eq!(
        handler.get_dimensions(output.as_str()).unwrap(),
        Some(Dimensions::new(4, 3, 1, 5))
    );
    for j in 1..=5u32 {
        let copied = handler.read_frame((j, output.as_str())).unwrap();
        let source = handler.read_frame((j + 2, input.as_str())).unwrap();
        assert_eq!(copied, source);
    }
}

#[test]
fn test_convert_stack_keeps_sampling_size() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "subset.mrcs");
    write_sampled_mrc(&input, 4, 1.5);

    let handler = ImageHandler::new();
    handler
        .convert_stack(&input, &output, Some(2), Some(3))
        .unwrap();
    assert!((handler.get_voxel_size(output.as_str()).unwrap() - 1.5).abs() < 1e-6);
    assert_eq!(handler.read_frame((2, output.as_str())).unwrap().get(0, 0), Some(3.0));
}

#[test]
fn test_convert_stack_to_tiff_without_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "out.tif");
    write_mrc(&input, 2, 2, &[1.0, 2.0, 3.0, 4.0], true);

    let handler = ImageHandler::new();
    let mut calls = 0;
    handler
        .convert_stack_with_progress(&input, &output, Some(2), Some(3), |_, n| {
            assert_eq!(n, 2);
            calls += 1;
        })
        .unwrap();
    assert_eq!(calls, 2);

    // TIFF output keeps the first frame of the range
    assert_eq!(
        handler.get_dimensions(output.as_str()).unwrap(),
        Some(Dimensions::new(2, 2, 1, 1))
    );
    assert_eq!(handler.read_frame(output.as_str()).unwrap().get(0, 0), Some(2.0));
}

#[test]
fn test_convert_stack_whole_tiff_to_mrc() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "movie.tif");
    let output = temp_path(&dir, "movie.mrcs");
    write_tiff_pages(&input, 3, 3, &[0.25, 0.5, 0.75]);

    let handler = ImageHandler::new();
    handler.convert_stack(&input, &output, None, None).unwrap();

    let stack = handler.read(output.as_str()).unwrap();
    assert_eq!(stack.len(), 3);
    assert_eq!(stack.frame(2).unwrap().get(1, 1), Some(0.75));
}

#[test]
fn test_convert_stack_rejects_bad_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "out.mrcs");
    write_mrc(&input, 2, 2, &[1.0, 2.0, 3.0], true);

    let handler = ImageHandler::new();
    for (first, last) in [(Some(0), None), (Some(3), Some(2)), (None, Some(4))] {
        let err = handler
            .convert_stack(&input, &output, first, last)
            .unwrap_err();
        assert!(matches!(err, ImageError::Validation(_)), "{:?}..{:?}", first, last);
    }
    assert!(!std::path::Path::new(&output).exists());
}

#[test]
fn test_convert_stack_imagic_needs_whole_range() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "out.img");
    write_mrc(&input, 2, 2, &[1.0, 2.0], true);

    let handler = ImageHandler::with_external_tool(Arc::new(CopyTool));
    let err = handler
        .convert_stack(&input, &output, Some(2), None)
        .unwrap_err();
    assert!(matches!(err, ImageError::Validation(_)));

    handler.convert_stack(&input, &output, None, None).unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
}

// =============================================================================
// Frame Arithmetic
// =============================================================================

#[test]
fn test_average_of_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "frames.mrcs");
    write_mrc(&path, 5, 4, &[1.0, 2.0, 3.0, 6.0], true);

    let average = ImageHandler::new().compute_average(path.as_str()).unwrap();
    assert_eq!(average.size(), (5, 4));
    assert!(average.to_f32().iter().all(|&s| (s - 3.0).abs() < 1e-6));
}

#[test]
fn test_average_of_addressed_items() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "frames.mrcs");
    write_mrc(&path, 5, 4, &[1.0, 2.0, 3.0, 6.0], true);

    let items: Vec<Particle> = (1..=4)
        .map(|index| Particle {
            index,
            file: path.clone(),
            volume: false,
        })
        .collect();

    let handler = ImageHandler::new();
    let average = handler.compute_average_of(&items).unwrap();
    assert!(average.to_f32().iter().all(|&s| (s - 3.0).abs() < 1e-6));

    let partial = handler
        .compute_average_of([(1, path.as_str()), (2, path.as_str())])
        .unwrap();
    assert!(partial.to_f32().iter().all(|&s| (s - 1.5).abs() < 1e-6));

    let err = handler.compute_average_of(Vec::<&str>::new()).unwrap_err();
    assert!(matches!(err, ImageError::Validation(_)));
}

#[test]
fn test_average_rejects_mixed_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let small = temp_path(&dir, "small.mrc");
    let large = temp_path(&dir, "large.mrc");
    write_mrc(&small, 2, 2, &[1.0], false);
    write_mrc(&large, 3, 3, &[1.0], false);

    let err = ImageHandler::new()
        .compute_average_of([small.as_str(), large.as_str()])
        .unwrap_err();
    assert!(matches!(err, ImageError::ShapeMismatch { .. }));
}

#[test]
fn test_invert_stack_negates_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "inverted.mrcs");
    write_mrc(&input, 3, 2, &[1.0, -2.0, 0.5], true);

    let handler = ImageHandler::new();
    handler.invert_stack(&input, &output).unwrap();

    let inverted = handler.read(output.as_str()).unwrap();
    let firsts: Vec<_> = inverted
        .frames()
        .iter()
        .map(|f| f.get(0, 0).unwrap())
        .collect();
    assert_eq!(firsts, vec![-1.0, 2.0, -0.5]);
    assert_eq!(
        handler.get_data_type(output.as_str()).unwrap(),
        Some(DataType::Float32)
    );
}

#[test]
fn test_invert_stack_keeps_sampling_size() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "inverted.mrcs");
    write_sampled_mrc(&input, 2, 0.8);

    let handler = ImageHandler::new();
    handler.invert_stack(&input, &output).unwrap();
    assert!((handler.get_voxel_size(output.as_str()).unwrap() - 0.8).abs() < 1e-6);
}

#[test]
fn test_invert_single_frame() {
    let dir = tempfile::tempdir().unwrap();
    let input = temp_path(&dir, "in.mrcs");
    let output = temp_path(&dir, "out.mrc");
    write_mrc(&input, 2, 2, &[4.0, 8.0], true);

    let handler = ImageHandler::new();
    handler.invert((2, input.as_str()), output.as_str()).unwrap();
    assert_eq!(handler.read_frame(output.as_str()).unwrap().get(1, 0), Some(-8.0));
}
