//! End-to-end behaviour of the readback pipeline on the CPU device.

mod common;

use common::paint_sequence;
use pixeltap::gpu::TransferRing;
use pixeltap::{
    ColorBufferReader, PixelFormat, ReadRect, ReadRequest, ReadbackError, SoftDevice, SoftSurface,
    SourceDescriptor,
};

fn rgba(w: u32, h: u32) -> SourceDescriptor {
    SourceDescriptor::new(w, h, PixelFormat::Rgba8)
}

/// Read one full frame and return (mapped slot, content sequence, packed bytes).
fn read_frame(
    reader: &mut ColorBufferReader<SoftDevice>,
    surface: &SoftSurface,
    sync: bool,
) -> (usize, Option<u64>, Vec<u8>) {
    let request = ReadRequest::full(&surface.descriptor(), sync);
    let frame = reader.read_pixels(surface, request).unwrap();
    let mut packed = Vec::new();
    frame.copy_packed(&mut packed).unwrap();
    let slot = frame.info().slot;
    let content = frame.content().map(|c| c.sequence);
    frame.release().unwrap();
    (slot, content, packed)
}

#[test]
fn depth_is_clamped_to_the_supported_range() {
    for (configured, expected) in [(0, 1), (1, 1), (2, 2), (3, 3), (4, 3), (100, 3)] {
        let reader = ColorBufferReader::new(SoftDevice::new(), rgba(4, 4), configured).unwrap();
        assert_eq!(reader.ring().len(), expected, "configured {}", configured);
        assert_eq!(reader.device().stats().buffers_alive, expected);
    }
}

#[test]
fn async_slots_rotate_with_period_n() {
    for depth in 1..=3u32 {
        let n = depth as usize;
        let src = rgba(2, 2);
        let mut reader = ColorBufferReader::new(SoftDevice::new(), src, depth).unwrap();
        let surface = SoftSurface::new(src);

        let mut written = Vec::new();
        let mut mapped = Vec::new();
        for _ in 0..3 * n {
            let capture = reader.capture(&surface, ReadRequest::full(&src, false)).unwrap();
            let info = reader.map().unwrap();
            written.push(capture.written);
            mapped.push(info.slot);
            reader.cleanup().unwrap();
        }

        for i in 0..written.len() - n {
            assert_eq!(written[i], written[i + n], "depth {}", depth);
            assert_eq!(mapped[i], mapped[i + n], "depth {}", depth);
        }
        // Every buffer is written once per period.
        let mut first: Vec<usize> = written[..n].to_vec();
        first.sort_unstable();
        assert_eq!(first, (0..n).collect::<Vec<_>>());
    }
}

#[test]
fn long_runs_do_not_grow_resources() {
    let src = rgba(8, 4);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 3).unwrap();
    let mut surface = SoftSurface::new(src);

    for i in 1..=300u64 {
        paint_sequence(&mut surface, i);
        read_frame(&mut reader, &surface, i % 3 == 0);
        assert_eq!(reader.scheduler().binding().bound(), None);
        assert!(reader.device().pending_copies() <= 1);
    }

    let stats = reader.device().stats();
    assert_eq!(stats.buffers_alive, 3);
    assert_eq!(stats.buffers_created, 3);
    assert_eq!(stats.maps, 300);
    assert_eq!(stats.unmaps, 300);
    assert_eq!(reader.stats().captures, 300);
    assert_eq!(reader.stats().sync_reads, 100);
    assert_eq!(reader.stats().async_reads, 200);
}

#[test]
fn sync_reads_always_return_the_latest_frame() {
    let src = rgba(3, 3);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 3).unwrap();
    let mut surface = SoftSurface::new(src);

    for seq in 1..=10u64 {
        paint_sequence(&mut surface, seq);
        let (_, content, bytes) = read_frame(&mut reader, &surface, true);
        assert_eq!(content, Some(seq));
        assert!(bytes.iter().all(|&b| b == seq as u8));
    }
    assert_eq!(reader.stats().cold_reads, 0);
}

#[test]
fn async_reads_at_depth_three_lag_two_frames() {
    let src = rgba(3, 3);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 3).unwrap();
    let mut surface = SoftSurface::new(src);

    for seq in 1..=12u64 {
        paint_sequence(&mut surface, seq);
        let request = ReadRequest::full(&src, false);
        let frame = reader.read_pixels(&surface, request).unwrap();
        let info = *frame.info();
        let bytes = frame.bytes().unwrap().to_vec();
        frame.release().unwrap();

        if seq <= 2 {
            assert!(info.is_cold(), "frame {}", seq);
            assert!(bytes.iter().all(|&b| b == 0));
        } else {
            assert_eq!(info.latency(), Some(2), "frame {}", seq);
            assert!(bytes.iter().all(|&b| b == (seq - 2) as u8));
        }
    }
    assert_eq!(reader.stats().cold_reads, 2);
}

#[test]
fn two_buffer_ring_returns_the_previous_frame() {
    let src = SourceDescriptor::new(4, 4, PixelFormat::R8);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 2).unwrap();
    let mut surface = SoftSurface::new(src);

    let frame_one: Vec<u8> = (0..16).map(|i| i as u8).collect();
    surface.pixels_mut().copy_from_slice(&frame_one);
    let (slot, content, bytes) = read_frame(&mut reader, &surface, false);
    assert_eq!(slot, 1);
    assert_eq!(content, None);
    assert_eq!(bytes, vec![0; 16]);

    let frame_two: Vec<u8> = (0..16).map(|i| 200 - i as u8).collect();
    surface.pixels_mut().copy_from_slice(&frame_two);
    let (slot, content, bytes) = read_frame(&mut reader, &surface, false);
    assert_eq!(slot, 0);
    assert_eq!(content, Some(1));
    assert_eq!(bytes, frame_one);

    let (slot, content, bytes) = read_frame(&mut reader, &surface, false);
    assert_eq!(slot, 1);
    assert_eq!(content, Some(2));
    assert_eq!(bytes, frame_two);
}

#[test]
fn single_buffer_sync_and_async_agree() {
    let src = rgba(5, 2);
    let mut sync_reader = ColorBufferReader::new(SoftDevice::new(), src, 1).unwrap();
    let mut async_reader = ColorBufferReader::new(SoftDevice::new(), src, 1).unwrap();
    let mut surface = SoftSurface::new(src);

    for seq in 1..=6u64 {
        for (i, b) in surface.pixels_mut().iter_mut().enumerate() {
            *b = (i as u64 * 7 + seq) as u8;
        }
        let (_, sync_content, sync_bytes) = read_frame(&mut sync_reader, &surface, true);
        let (_, async_content, async_bytes) = read_frame(&mut async_reader, &surface, false);
        assert_eq!(sync_bytes, async_bytes, "frame {}", seq);
        assert_eq!(sync_content, Some(seq));
        assert_eq!(async_content, Some(seq));
    }
}

#[test]
fn async_reads_avoid_stalls_that_sync_reads_take() {
    let src = rgba(4, 4);
    let mut surface = SoftSurface::new(src);

    let mut async_reader = ColorBufferReader::new(SoftDevice::new(), src, 3).unwrap();
    let mut sync_reader = ColorBufferReader::new(SoftDevice::new(), src, 3).unwrap();
    for seq in 1..=20u64 {
        paint_sequence(&mut surface, seq);
        read_frame(&mut async_reader, &surface, false);
        read_frame(&mut sync_reader, &surface, true);
    }

    assert_eq!(async_reader.device().stats().stalls, 0);
    assert_eq!(sync_reader.device().stats().stalls, 20);
}

#[test]
fn sub_rectangles_respect_padded_rows() {
    let src = rgba(4, 4);
    let device = SoftDevice::new().with_row_alignment(256);
    let mut reader = ColorBufferReader::new(device, src, 2).unwrap();
    let mut surface = SoftSurface::new(src);
    for y in 0..4 {
        for x in 0..4 {
            surface.set_pixel(x, y, &[x as u8, y as u8, 0, 255]);
        }
    }

    let request = ReadRequest::new(ReadRect::new(1, 1, 2, 2), PixelFormat::Rgba8, true);
    let frame = reader.read_pixels(&surface, request).unwrap();
    assert_eq!(frame.row_offset(), 0);
    assert_eq!(frame.row_stride(), 64);
    assert_eq!(frame.info().byte_len, 512);

    let mut packed = Vec::new();
    frame.copy_packed(&mut packed).unwrap();
    assert_eq!(
        packed,
        vec![1, 1, 0, 255, 2, 1, 0, 255, 1, 2, 0, 255, 2, 2, 0, 255]
    );
    frame.release().unwrap();
}

#[test]
fn malformed_requests_are_rejected_not_clamped() {
    let src = rgba(4, 4);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 2).unwrap();
    let surface = SoftSurface::new(src);

    let empty = ReadRequest::new(ReadRect::new(0, 0, 0, 4), PixelFormat::Rgba8, false);
    let outside = ReadRequest::new(ReadRect::new(2, 2, 4, 4), PixelFormat::Rgba8, false);
    let wrong_format = ReadRequest::new(src.full_rect(), PixelFormat::Bgra8, false);
    for request in [empty, outside, wrong_format] {
        assert!(matches!(
            reader.capture(&surface, request),
            Err(ReadbackError::ContractViolation(_))
        ));
    }

    let other = SoftSurface::new(rgba(8, 8));
    assert!(reader.capture(&other, ReadRequest::full(&src, false)).is_err());

    assert_eq!(reader.stats().captures, 0);
    assert_eq!(reader.device().stats().copies_issued, 0);
    assert!(reader.read_pixels(&surface, ReadRequest::full(&src, false)).is_ok());
}

#[test]
fn failed_allocation_releases_partial_ring() {
    let device = SoftDevice::new();
    device.fail_allocations_after(2);
    let result = TransferRing::initialize(&device, 3, &rgba(16, 16));
    assert!(matches!(result, Err(ReadbackError::AllocationFailure(_))));
    assert_eq!(device.stats().buffers_alive, 0);
    assert_eq!(device.stats().buffers_created, 2);
}

#[test]
fn sources_too_wide_to_address_are_an_allocation_failure() {
    let wide = SourceDescriptor::new(1 << 30, 1, PixelFormat::Rgba8);
    let result = ColorBufferReader::new(SoftDevice::new(), wide, 2);
    assert!(matches!(result, Err(ReadbackError::AllocationFailure(_))));

    // Fits unpadded, overflows once rows are padded to 256 bytes.
    let device = SoftDevice::new().with_row_alignment(256);
    let padded = SourceDescriptor::new(u32::MAX, 1, PixelFormat::R8);
    let result = TransferRing::initialize(&device, 3, &padded);
    assert!(matches!(result, Err(ReadbackError::AllocationFailure(_))));
    assert_eq!(device.stats().buffers_created, 0);
}

#[test]
fn resize_starts_a_fresh_cold_ring() {
    let src = rgba(4, 4);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 2).unwrap();
    let mut surface = SoftSurface::new(src);
    for seq in 1..=5 {
        paint_sequence(&mut surface, seq);
        read_frame(&mut reader, &surface, false);
    }

    let bigger = rgba(8, 8);
    reader.resize(bigger).unwrap();
    let mut surface = SoftSurface::new(bigger);
    paint_sequence(&mut surface, 9);
    let (_, content, bytes) = read_frame(&mut reader, &surface, false);
    assert_eq!(content, None);
    assert_eq!(bytes.len(), 8 * 8 * 4);
    assert_eq!(reader.device().stats().buffers_alive, 2);
    assert_eq!(reader.device().stats().buffers_created, 4);
}

#[test]
fn destroy_then_resize_rebuilds() {
    let src = rgba(4, 4);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 3).unwrap();
    reader.destroy().unwrap();
    assert_eq!(reader.device().stats().buffers_alive, 0);
    assert_eq!(reader.ring().len(), 0);

    reader.resize(src).unwrap();
    assert_eq!(reader.ring().len(), 3);
    let surface = SoftSurface::new(src);
    assert!(reader.read_pixels(&surface, ReadRequest::full(&src, true)).is_ok());
}

#[test]
fn bgra_frames_save_as_rgba_images() {
    let src = SourceDescriptor::new(2, 1, PixelFormat::Bgra8);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 2).unwrap();
    let mut surface = SoftSurface::new(src);
    surface.fill(&[10, 20, 30, 255]);

    let frame = reader.read_pixels(&surface, ReadRequest::full(&src, true)).unwrap();
    let image = frame.to_image().unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (2, 1));
    assert_eq!(image.into_raw(), vec![30, 20, 10, 255, 30, 20, 10, 255]);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "destroy while transfer buffer")]
fn destroy_while_mapped_is_flagged() {
    let src = rgba(4, 4);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 2).unwrap();
    let surface = SoftSurface::new(src);
    reader.capture(&surface, ReadRequest::full(&src, false)).unwrap();
    reader.map().unwrap();
    let _ = reader.destroy();
}

#[test]
#[cfg(not(debug_assertions))]
fn destroy_while_mapped_is_refused() {
    let src = rgba(4, 4);
    let mut reader = ColorBufferReader::new(SoftDevice::new(), src, 2).unwrap();
    let surface = SoftSurface::new(src);
    reader.capture(&surface, ReadRequest::full(&src, false)).unwrap();
    reader.map().unwrap();

    assert!(matches!(reader.destroy(), Err(ReadbackError::ContractViolation(_))));
    assert!(reader.is_mapped());
    assert_eq!(reader.device().stats().buffers_alive, 2);

    reader.cleanup().unwrap();
    reader.destroy().unwrap();
    assert_eq!(reader.device().stats().buffers_alive, 0);
}
