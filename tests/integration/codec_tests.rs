//! Codec behavior through the registry: round trips, hints and offsets.

use em_imageio::format::{MrcHeader, SpiderHeader, MRC_HEADER_LEN};
use em_imageio::{
    DataType, Dimensions, FormatReader, Frame, FrameData, ImageError, ImageStack, Location,
    Registry, SpiderReader, StackLayout,
};

use super::test_utils::{temp_path, write_mrc, write_png, write_tiff_pages, SpiderFixture};

// =============================================================================
// MRC
// =============================================================================

#[test]
fn test_mrc_stack_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "particles.mrcs");
    let registry = Registry::with_defaults();

    let frames: Vec<Frame> = (0..4)
        .map(|i| {
            let data: Vec<f32> = (0..15).map(|s| (i * 100 + s) as f32).collect();
            Frame::new(5, 3, data).unwrap()
        })
        .collect();
    registry
        .write(&ImageStack::from_frames(frames.clone()), &path, true)
        .unwrap();

    let stack = registry.open(path.as_str()).unwrap();
    assert_eq!(stack.len(), 4);
    assert_eq!(stack.layout(), StackLayout::Stack);
    assert_eq!(stack.frames(), frames.as_slice());
}

#[test]
fn test_mrc_volume_round_trip_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "map.mrc");
    let registry = Registry::with_defaults();
    write_mrc(&path, 6, 4, &[1.0, 2.0, 3.0], false);

    let hinted = format!("{}:mrc", path);
    let location = Location::parse(&hinted).unwrap();
    let reader = registry.resolve_location(&location);
    assert_eq!(
        reader.probe_dimensions(&location).unwrap(),
        Dimensions::new(6, 4, 3, 1)
    );

    let volume = registry.open(hinted.as_str()).unwrap();
    assert!(volume.is_volume());
    assert_eq!(volume.len(), 3);
    assert_eq!(volume.dimensions(), Dimensions::new(6, 4, 3, 1));
}

#[test]
fn test_same_bytes_read_as_stack_or_volume() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "movie.mrc");
    write_mrc(&path, 2, 2, &[1.0, 2.0, 3.0, 4.0, 5.0], true);

    let registry = Registry::with_defaults();
    let reader = registry.resolve(&path);

    // Header says stack; the hint forces a volume reading
    assert_eq!(
        reader.probe_dimensions(&Location::new(&path)).unwrap(),
        Dimensions::new(2, 2, 1, 5)
    );
    assert_eq!(
        reader
            .probe_dimensions(&Location::new(format!("{}:mrc", path)))
            .unwrap(),
        Dimensions::new(2, 2, 5, 1)
    );
}

#[test]
fn test_volume_without_index_reads_middle_slice() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "tomo.rec");
    write_mrc(&path, 3, 3, &[10.0, 11.0, 12.0, 13.0, 14.0], false);

    let registry = Registry::with_defaults();
    let reader = registry.resolve(&path);

    let middle = reader.read_frame(&Location::new(&path)).unwrap();
    assert_eq!(middle.get(0, 0), Some(12.0));

    let first = reader.read_frame(&Location::indexed(1, &path)).unwrap();
    assert_eq!(first.get(0, 0), Some(10.0));
}

#[test]
fn test_mrc_header_reports_stack_flag_and_sampling() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "particles.mrcs");
    let stack = ImageStack::from_frames(vec![Frame::filled(4, 4, 1.0), Frame::filled(4, 4, 3.0)])
        .with_property("sr", 1.25);
    Registry::with_defaults().write(&stack, &path, true).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let header = MrcHeader::parse(&bytes[..MRC_HEADER_LEN], &path).unwrap();
    assert!(header.is_stack());
    assert_eq!(header.dmin, 1.0);
    assert_eq!(header.dmax, 3.0);
    assert_eq!(header.dmean, 2.0);
    assert!((header.voxel_size() - 1.25).abs() < 1e-6);

    let reread = Registry::with_defaults().open(path.as_str()).unwrap();
    assert!((reread.sampling_rate() - 1.25).abs() < 1e-6);
}

#[test]
fn test_mrc_truncated_file_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "short.mrc");
    write_mrc(&path, 8, 8, &[1.0, 2.0], true);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

    let err = Registry::with_defaults().open(path.as_str()).unwrap_err();
    assert!(matches!(err, ImageError::MalformedContainer { .. }));
}

// =============================================================================
// SPIDER
// =============================================================================

#[test]
fn test_spider_stack_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "particles.stk");
    let fixture = SpiderFixture {
        edge: 4,
        images: 5,
        labbyt: 256,
        stack: true,
        scale: 2.5,
    };
    fixture.write(&path);

    let bytes = fixture.build();
    let header = SpiderHeader::parse(&bytes, &path).unwrap();
    for i in 0..5 {
        let expected = 2 * 256 + i * (4 * 4 * 4 + 256);
        assert_eq!(header.offset_of(i), Some(expected));
        assert_eq!(fixture.offset_of(i), expected);
    }

    let reader = SpiderReader::new();
    assert_eq!(
        reader.probe_dimensions(&Location::new(&path)).unwrap(),
        Dimensions::new(4, 4, 1, 5)
    );
    for i in 0..5u32 {
        let frame = reader.read_frame(&Location::indexed(i + 1, &path)).unwrap();
        assert_eq!(frame.get(0, 0), Some(SpiderFixture::marker(i as usize)));
        assert_eq!(frame.get(3, 3), Some(i as f32));
    }
}

#[test]
fn test_spider_volume_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "volume.vol");
    let fixture = SpiderFixture {
        edge: 3,
        images: 4,
        labbyt: 144,
        stack: false,
        scale: 1.0,
    };
    fixture.write(&path);

    let registry = Registry::with_defaults();
    let reader = registry.resolve(&path);
    assert_eq!(reader.name(), "SPIDER");
    assert_eq!(
        reader.probe_dimensions(&Location::new(&path)).unwrap(),
        Dimensions::new(3, 3, 4, 1)
    );

    let volume = registry.open(path.as_str()).unwrap();
    assert!(volume.is_volume());
    for (i, frame) in volume.frames().iter().enumerate() {
        assert_eq!(frame.get(0, 0), Some(SpiderFixture::marker(i)));
        assert_eq!(fixture.offset_of(i), 144 + i * 36);
    }
}

#[test]
fn test_spider_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "out.spi");
    let err = Registry::with_defaults()
        .write(&ImageStack::from_frame(Frame::filled(2, 2, 0.0)), &path, true)
        .unwrap_err();
    assert!(matches!(err, ImageError::UnsupportedOperation { .. }));
}

#[test]
fn test_spider_non_square_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "bad.spi");
    let fixture = SpiderFixture {
        edge: 4,
        images: 1,
        labbyt: 128,
        stack: false,
        scale: 1.0,
    };
    let mut bytes = fixture.build();
    bytes[4..8].copy_from_slice(&5.0f32.to_le_bytes());
    std::fs::write(&path, bytes).unwrap();

    let err = SpiderReader::new()
        .probe_dimensions(&Location::new(&path))
        .unwrap_err();
    assert!(matches!(err, ImageError::MalformedContainer { .. }));
}

// =============================================================================
// TIFF and simple images
// =============================================================================

#[test]
fn test_tiff_pages_as_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "movie.eer");
    write_tiff_pages(&path, 5, 2, &[0.5, 1.5, 2.5]);

    let registry = Registry::with_defaults();
    let reader = registry.resolve(&path);
    assert_eq!(reader.name(), "TIFF");
    assert_eq!(
        reader.probe_dimensions(&Location::new(&path)).unwrap(),
        Dimensions::new(5, 2, 1, 3)
    );

    let page = registry.open((2, path.as_str())).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.frame(0).unwrap().get(4, 1), Some(1.5));
}

#[test]
fn test_png_decodes_one_gray_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "micrograph.png");
    write_png(&path, 4, 3);

    let registry = Registry::with_defaults();
    let stack = registry.open(path.as_str()).unwrap();
    assert_eq!(stack.len(), 1);

    let frame = stack.frame(0).unwrap();
    assert_eq!(frame.data_type(), DataType::UInt8);
    assert_eq!(frame.get(3, 2), Some(5.0));
    assert_eq!(
        registry
            .resolve(&path)
            .probe_data_type(&Location::new(&path))
            .unwrap(),
        DataType::UInt8
    );
}

#[test]
fn test_preview_frame_stretches_to_bytes() {
    let frame = Frame::new(4, 1, vec![-2.0f32, 0.0, 2.0, 6.0]).unwrap();
    let stack = ImageStack::from_frame(frame);

    let preview = stack.preview_frame(0).unwrap();
    assert_eq!(preview.into_raw(), vec![0, 64, 128, 255]);
    assert!(stack.preview_frame(1).is_none());
}

#[test]
fn test_int16_survives_mrc() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "counts.mrc");
    let frame = Frame::new(2, 2, vec![-300i16, 0, 12, 32000]).unwrap();

    let registry = Registry::with_defaults();
    registry
        .write(&ImageStack::from_frame(frame), &path, false)
        .unwrap();

    let back = registry.open(path.as_str()).unwrap();
    assert_eq!(
        back.frame(0).unwrap().data(),
        &FrameData::Int16(vec![-300, 0, 12, 32000])
    );
}
