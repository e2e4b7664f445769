// ============================================================================
// COLOR BUFFER READER — one readback pipeline per render target
// ============================================================================
//
// Owns the transfer ring, the scheduler (and with it the pack binding) and
// the host mapper for a single render target.  Per frame:
//
//   let frame = reader.read_pixels(&target, request)?;   // capture + map
//   consume(&frame.bytes()?, frame.row_stride());
//   frame.release()?;                                     // unmap (or drop)
//
// The staged form `capture` → `map` → `mapped_bytes` → `cleanup` is there
// for consumers that keep the mapping across their own control flow.

use super::device::TransferDevice;
use super::error::{contract_violation, ReadbackError};
use super::format::{PixelFormat, ReadRect, ReadRequest, SourceDescriptor};
use super::mapper::HostMapper;
use super::ring::{SlotContent, TransferRing};
use super::scheduler::{CaptureInfo, ReadbackScheduler};
use crate::settings::ReadbackSettings;

/// Everything a consumer needs to interpret a mapped buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    /// Sequence number of the capture that produced this mapping.
    pub sequence: u64,
    /// Ring slot that is mapped.
    pub slot: usize,
    pub row_offset: u32,
    /// Distance between rows, in pixels.
    pub row_stride: u32,
    /// Mapped length in bytes.
    pub byte_len: u64,
    /// Rectangle of the request that produced this mapping.
    pub rect: ReadRect,
    pub format: PixelFormat,
    /// Capture whose copy filled the mapped buffer.  `None` means the buffer
    /// has never been written (cold start) and holds zeros.
    pub content: Option<SlotContent>,
}

impl FrameInfo {
    /// How many captures old the mapped data is (0 = this capture's data).
    pub fn latency(&self) -> Option<u64> {
        self.content.map(|c| self.sequence - c.sequence)
    }

    pub fn is_cold(&self) -> bool {
        self.content.is_none()
    }
}

/// Running totals for one reader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadbackStats {
    pub captures: u64,
    pub sync_reads: u64,
    pub async_reads: u64,
    /// Maps of a buffer no copy had reached yet.
    pub cold_reads: u64,
    pub invalid_mappings: u64,
}

pub struct ColorBufferReader<D: TransferDevice> {
    device: D,
    ring: TransferRing<D>,
    scheduler: ReadbackScheduler,
    mapper: HostMapper,
    depth: u32,
    /// Captured, not yet mapped.
    pending: Option<(CaptureInfo, ReadRequest)>,
    /// Currently mapped.
    current: Option<FrameInfo>,
    stats: ReadbackStats,
}

impl<D: TransferDevice> ColorBufferReader<D> {
    /// Build a reader with `depth` transfer buffers (clamped) for `source`.
    pub fn new(device: D, source: SourceDescriptor, depth: u32) -> Result<Self, ReadbackError> {
        let ring = TransferRing::initialize(&device, depth, &source)?;
        Ok(Self {
            device,
            ring,
            scheduler: ReadbackScheduler::new(),
            mapper: HostMapper::new(),
            depth,
            pending: None,
            current: None,
            stats: ReadbackStats::default(),
        })
    }

    pub fn with_settings(device: D, source: SourceDescriptor, settings: &ReadbackSettings) -> Result<Self, ReadbackError> {
        Self::new(device, source, settings.transfer_depth)
    }

    /// Build a reader sized for `target`.
    pub fn for_target(device: D, target: &D::Target, depth: u32) -> Result<Self, ReadbackError> {
        let Some(source) = device.describe(target) else {
            return Err(ReadbackError::ContractViolation(
                "render target cannot be read back (format or usage)".to_string(),
            ));
        };
        Self::new(device, source, depth)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn ring(&self) -> &TransferRing<D> {
        &self.ring
    }

    pub fn source(&self) -> &SourceDescriptor {
        self.ring.source()
    }

    pub fn scheduler(&self) -> &ReadbackScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> ReadbackStats {
        self.stats
    }

    pub fn is_mapped(&self) -> bool {
        self.mapper.is_mapped()
    }

    /// Info of the current mapping, if any.
    pub fn current(&self) -> Option<&FrameInfo> {
        self.current.as_ref()
    }

    /// Issue the device copy for `request` and pick the buffer to map.
    pub fn capture(&mut self, target: &D::Target, request: ReadRequest) -> Result<CaptureInfo, ReadbackError> {
        if self.mapper.is_mapped() {
            return Err(contract_violation(
                "capture while the previous frame is still mapped".to_string(),
            ));
        }
        let info = self
            .scheduler
            .capture(&self.device, &mut self.ring, target, &request)?;
        self.pending = Some((info, request));
        self.stats.captures += 1;
        if request.sync {
            self.stats.sync_reads += 1;
        } else {
            self.stats.async_reads += 1;
        }
        Ok(info)
    }

    /// Map the buffer chosen by the last `capture`.
    pub fn map(&mut self) -> Result<FrameInfo, ReadbackError> {
        let Some((info, request)) = self.pending.take() else {
            return Err(contract_violation("map without a preceding capture".to_string()));
        };

        let slot = match self
            .mapper
            .map(&self.device, &self.ring, self.scheduler.binding(), info.map_len)
        {
            Ok(slot) => slot,
            Err(e) => {
                if matches!(e, ReadbackError::InvalidMapping(_)) {
                    self.stats.invalid_mappings += 1;
                    crate::log_frame!(ERROR, info.sequence, info.slot, "[Readback] {}", e);
                }
                return Err(e);
            }
        };

        let content = self.ring.slot(slot).and_then(|s| s.content);
        match content {
            None => {
                self.stats.cold_reads += 1;
                crate::log_frame!(INFO, info.sequence, slot, "[Readback] cold buffer, no copy has landed yet");
            }
            Some(c) if c.rect != request.rect => {
                crate::log_frame!(
                    WARN,
                    info.sequence,
                    slot,
                    "[Readback] buffer holds {:?} from capture {}, request was {:?}",
                    c.rect,
                    c.sequence,
                    request.rect
                );
            }
            Some(_) => {}
        }

        let frame = FrameInfo {
            sequence: info.sequence,
            slot,
            row_offset: info.row_offset,
            row_stride: info.row_stride,
            byte_len: info.map_len,
            rect: request.rect,
            format: request.format,
            content,
        };
        self.current = Some(frame);
        Ok(frame)
    }

    /// View of the mapped bytes.
    pub fn mapped_bytes(&self) -> Result<D::View<'_>, ReadbackError> {
        self.mapper.view(&self.device, &self.ring)
    }

    /// Unmap and reset the pack binding.  Exactly once per successful `map`.
    pub fn cleanup(&mut self) -> Result<(), ReadbackError> {
        self.mapper
            .unmap(&self.device, &self.ring, self.scheduler.binding_mut())?;
        self.current = None;
        Ok(())
    }

    /// Capture and map in one call.  The returned frame unmaps when released
    /// or dropped.
    pub fn read_pixels(&mut self, target: &D::Target, request: ReadRequest) -> Result<MappedFrame<'_, D>, ReadbackError> {
        self.capture(target, request)?;
        let info = self.map()?;
        Ok(MappedFrame {
            reader: self,
            info,
            released: false,
        })
    }

    /// Rebuild the ring for a new source.  In-flight copies are abandoned.
    pub fn resize(&mut self, source: SourceDescriptor) -> Result<(), ReadbackError> {
        if self.mapper.is_mapped() {
            return Err(contract_violation("resize while a frame is mapped".to_string()));
        }
        if !self.ring.is_destroyed() && *self.ring.source() == source {
            return Ok(());
        }
        if !self.ring.is_destroyed() {
            self.ring.destroy(&self.device)?;
        }
        self.ring = TransferRing::initialize(&self.device, self.depth, &source)?;
        self.scheduler = ReadbackScheduler::new();
        self.pending = None;
        Ok(())
    }

    /// Release the transfer buffers.  Refused while a frame is mapped.
    pub fn destroy(&mut self) -> Result<(), ReadbackError> {
        if let Some(slot) = self.mapper.mapped_slot() {
            return Err(contract_violation(format!(
                "destroy while transfer buffer {} is mapped",
                slot
            )));
        }
        self.pending = None;
        self.ring.destroy(&self.device)
    }
}

/// A mapped frame.  Unmaps on [`MappedFrame::release`] or drop.
pub struct MappedFrame<'a, D: TransferDevice> {
    reader: &'a mut ColorBufferReader<D>,
    info: FrameInfo,
    released: bool,
}

impl<'a, D: TransferDevice> MappedFrame<'a, D> {
    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn row_offset(&self) -> u32 {
        self.info.row_offset
    }

    pub fn row_stride(&self) -> u32 {
        self.info.row_stride
    }

    pub fn content(&self) -> Option<SlotContent> {
        self.info.content
    }

    pub fn is_cold(&self) -> bool {
        self.info.is_cold()
    }

    /// Raw mapped bytes, rows `row_stride` pixels apart.
    pub fn bytes(&self) -> Result<D::View<'_>, ReadbackError> {
        self.reader.mapped_bytes()
    }

    /// Copy the rectangle out row by row, dropping the row padding, into
    /// `dst` (cleared first).  Rows are `rect.width` pixels wide.
    pub fn copy_packed(&self, dst: &mut Vec<u8>) -> Result<(), ReadbackError> {
        let bpp = self.info.format.bytes_per_pixel() as usize;
        let pitch = self.info.row_stride as usize * bpp;
        let tight = self.info.rect.width as usize * bpp;
        let offset = self.info.row_offset as usize * pitch;
        let rows = self.info.rect.height as usize;

        let mapped = self.bytes()?;
        dst.clear();
        dst.reserve(tight * rows);
        for row in 0..rows {
            let start = offset + row * pitch;
            let Some(src) = mapped.get(start..start + tight) else {
                return Err(ReadbackError::ContractViolation(format!(
                    "row {} lies outside the {} mapped bytes",
                    row,
                    mapped.len()
                )));
            };
            dst.extend_from_slice(src);
        }
        Ok(())
    }

    /// Packed copy as an image, for screenshots and capture dumps.
    pub fn to_image(&self) -> Result<image::DynamicImage, ReadbackError> {
        let mut packed = Vec::new();
        self.copy_packed(&mut packed)?;
        packed_to_image(self.info.format, self.info.rect.width, self.info.rect.height, packed)
    }

    /// Unmap now and report any contract failure.
    pub fn release(mut self) -> Result<(), ReadbackError> {
        self.released = true;
        self.reader.cleanup()
    }
}

impl<D: TransferDevice> Drop for MappedFrame<'_, D> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.reader.cleanup();
        }
    }
}

/// Wrap tightly packed pixels of `format` in a `DynamicImage`.
pub fn packed_to_image(
    format: PixelFormat,
    width: u32,
    height: u32,
    mut packed: Vec<u8>,
) -> Result<image::DynamicImage, ReadbackError> {
    let len = packed.len();
    let size_err = || ReadbackError::Image(format!("{} bytes do not make a {}x{} {:?} image", len, width, height, format));
    let image = match format {
        PixelFormat::Rgba8 => image::DynamicImage::ImageRgba8(
            image::RgbaImage::from_raw(width, height, packed).ok_or_else(size_err)?,
        ),
        PixelFormat::Bgra8 => {
            for px in packed.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            image::DynamicImage::ImageRgba8(image::RgbaImage::from_raw(width, height, packed).ok_or_else(size_err)?)
        }
        PixelFormat::R8 => image::DynamicImage::ImageLuma8(
            image::GrayImage::from_raw(width, height, packed).ok_or_else(size_err)?,
        ),
        PixelFormat::Rg8 => image::DynamicImage::ImageLumaA8(
            image::GrayAlphaImage::from_raw(width, height, packed).ok_or_else(size_err)?,
        ),
        PixelFormat::Rgba16Float => {
            let floats: Vec<f32> = packed
                .chunks_exact(2)
                .map(|h| half::f16::from_bits(u16::from_le_bytes([h[0], h[1]])).to_f32())
                .collect();
            image::DynamicImage::ImageRgba32F(
                image::Rgba32FImage::from_raw(width, height, floats).ok_or_else(size_err)?,
            )
        }
    };
    Ok(image)
}
