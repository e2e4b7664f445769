// ============================================================================
// TRANSFER BUFFER RING — fixed pool of device-side pack buffers
// ============================================================================

use super::device::TransferDevice;
use super::error::{contract_violation, ReadbackError};
use super::format::{ReadRect, SourceDescriptor};
use super::scheduler::PackBinding;
use super::MAX_TRANSFER_BUFFERS;

/// Which capture filled a buffer, and with what rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotContent {
    /// Sequence number of the capture that issued the copy (1-based).
    pub sequence: u64,
    pub rect: ReadRect,
}

/// One transfer buffer plus what was last copied into it.
pub struct TransferSlot<D: TransferDevice> {
    pub buffer: D::Buffer,
    /// `None` until the first copy into this buffer has been issued.
    pub content: Option<SlotContent>,
    /// Fence of that copy.
    pub fence: Option<D::Fence>,
}

/// Clamp a configured buffer depth to `[1, MAX_TRANSFER_BUFFERS]`.
pub fn clamp_depth(configured: u32) -> usize {
    (configured as usize).clamp(1, MAX_TRANSFER_BUFFERS)
}

/// Exactly `len()` live buffers, each large enough for one full frame of the
/// source, and a cursor that always indexes one of them.  Slots past `len()`
/// are always empty.
///
/// Buffers are released by [`TransferRing::destroy`], or when the ring is
/// dropped (the buffer handles free themselves).
pub struct TransferRing<D: TransferDevice> {
    slots: [Option<TransferSlot<D>>; MAX_TRANSFER_BUFFERS],
    count: usize,
    cur: usize,
    buffer_size: u64,
    row_pitch: u32,
    source: SourceDescriptor,
    destroyed: bool,
}

impl<D: TransferDevice> TransferRing<D> {
    /// Allocate `clamp_depth(configured)` buffers sized for `source`.
    /// A failed allocation releases the buffers created so far and is
    /// returned as-is; nothing is retried.
    pub fn initialize(device: &D, configured: u32, source: &SourceDescriptor) -> Result<Self, ReadbackError> {
        let count = clamp_depth(configured);
        if count as u32 != configured {
            crate::log_warn!(
                "[Readback] transfer depth {} clamped to {}",
                configured,
                count
            );
        }

        let (Some(row_pitch), Some(buffer_size)) = (device.row_pitch(source), device.buffer_size(source)) else {
            let e = ReadbackError::AllocationFailure(format!(
                "a {}x{} {:?} frame does not fit a transfer buffer",
                source.width, source.height, source.format
            ));
            crate::log_err!("[Readback] {}", e);
            return Err(e);
        };
        if buffer_size < source.byte_size() {
            return Err(ReadbackError::AllocationFailure(format!(
                "device pads a {}x{} frame into {} bytes, {} needed",
                source.width,
                source.height,
                buffer_size,
                source.byte_size()
            )));
        }

        let mut slots: [Option<TransferSlot<D>>; MAX_TRANSFER_BUFFERS] = std::array::from_fn(|_| None);
        let mut failure = None;
        for (i, slot) in slots.iter_mut().take(count).enumerate() {
            let label = format!("readback_pack_{}", i);
            match device.create_buffer(&label, buffer_size) {
                Ok(buffer) => {
                    *slot = Some(TransferSlot {
                        buffer,
                        content: None,
                        fence: None,
                    });
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            crate::log_err!("[Readback] {}", e);
            for created in slots.iter_mut() {
                if let Some(s) = created.take() {
                    device.destroy_buffer(s.buffer);
                }
            }
            return Err(e);
        }

        crate::log_info!(
            "[Readback] ring of {} x {} byte buffers for {}x{} {:?}",
            count,
            buffer_size,
            source.width,
            source.height,
            source.format
        );

        Ok(Self {
            slots,
            count,
            cur: 0,
            buffer_size,
            row_pitch,
            source: *source,
            destroyed: false,
        })
    }

    /// Release every buffer now.  A second call is a contract violation.
    pub fn destroy(&mut self, device: &D) -> Result<(), ReadbackError> {
        if self.destroyed {
            return Err(contract_violation("transfer ring destroyed twice".to_string()));
        }
        for slot in self.slots.iter_mut() {
            if let Some(s) = slot.take() {
                device.destroy_buffer(s.buffer);
            }
        }
        self.destroyed = true;
        self.cur = 0;
        crate::log_info!("[Readback] ring destroyed");
        Ok(())
    }

    /// Make buffer `index` the active pack target.  Re-selecting the bound
    /// buffer changes nothing.
    pub fn select(&self, binding: &mut PackBinding, index: usize) -> Result<(), ReadbackError> {
        if self.destroyed {
            return Err(contract_violation("select on a destroyed transfer ring".to_string()));
        }
        if index >= self.count {
            return Err(contract_violation(format!(
                "select of buffer {} in a ring of {}",
                index, self.count
            )));
        }
        binding.bind(index);
        Ok(())
    }

    /// Number of live buffers, `N`.
    pub fn len(&self) -> usize {
        if self.destroyed { 0 } else { self.count }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn cursor(&self) -> usize {
        self.cur
    }

    /// Step the cursor to the next buffer, wrapping after `N`.
    pub(crate) fn advance(&mut self) -> usize {
        self.cur = (self.cur + 1) % self.count;
        self.cur
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    pub fn row_pitch(&self) -> u32 {
        self.row_pitch
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub fn slot(&self, index: usize) -> Option<&TransferSlot<D>> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut TransferSlot<D>> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    /// Device memory held by the ring, in bytes.
    pub fn memory_bytes(&self) -> u64 {
        self.len() as u64 * self.buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::format::PixelFormat;
    use crate::gpu::soft::SoftDevice;

    fn source() -> SourceDescriptor {
        SourceDescriptor::new(4, 4, PixelFormat::R8)
    }

    #[test]
    fn depth_is_clamped() {
        assert_eq!(clamp_depth(0), 1);
        assert_eq!(clamp_depth(1), 1);
        assert_eq!(clamp_depth(MAX_TRANSFER_BUFFERS as u32), MAX_TRANSFER_BUFFERS);
        assert_eq!(clamp_depth(u32::MAX), MAX_TRANSFER_BUFFERS);
    }

    #[test]
    fn initialize_allocates_exactly_n_buffers() {
        for depth in 0..=(MAX_TRANSFER_BUFFERS as u32 + 2) {
            let dev = SoftDevice::new();
            let ring = TransferRing::initialize(&dev, depth, &source()).unwrap();
            let n = clamp_depth(depth);
            assert_eq!(ring.len(), n);
            assert_eq!(ring.cursor(), 0);
            assert_eq!(dev.stats().buffers_alive, n);
            for i in 0..MAX_TRANSFER_BUFFERS {
                match ring.slot(i) {
                    Some(slot) => {
                        assert!(i < n);
                        assert!(slot.buffer.size() >= source().byte_size());
                        assert!(slot.content.is_none());
                    }
                    None => assert!(i >= n),
                }
            }
        }
    }

    #[test]
    fn padded_rows_grow_the_buffers() {
        let dev = SoftDevice::new().with_row_alignment(256);
        let ring = TransferRing::initialize(&dev, 2, &source()).unwrap();
        assert_eq!(ring.row_pitch(), 256);
        assert_eq!(ring.buffer_size(), 256 * 4);
        assert_eq!(ring.memory_bytes(), 2 * 256 * 4);
    }

    #[test]
    fn failed_allocation_releases_partial_ring() {
        let dev = SoftDevice::new();
        dev.fail_allocations_after(1);
        let result = TransferRing::initialize(&dev, 3, &source());
        assert!(matches!(result, Err(ReadbackError::AllocationFailure(_))));
        assert_eq!(dev.stats().buffers_created, 1);
        assert_eq!(dev.stats().buffers_alive, 0);
    }

    #[test]
    fn unrepresentable_row_pitch_fails_before_allocating() {
        let dev = SoftDevice::new();
        let wide = SourceDescriptor::new(1 << 30, 1, PixelFormat::Rgba8);
        let result = TransferRing::initialize(&dev, 2, &wide);
        assert!(matches!(result, Err(ReadbackError::AllocationFailure(_))));
        assert_eq!(dev.stats().buffers_created, 0);
    }

    #[test]
    fn destroy_releases_everything() {
        let dev = SoftDevice::new();
        let mut ring = TransferRing::initialize(&dev, 3, &source()).unwrap();
        ring.destroy(&dev).unwrap();
        assert!(ring.is_destroyed());
        assert_eq!(ring.len(), 0);
        assert!((0..MAX_TRANSFER_BUFFERS).all(|i| ring.slot(i).is_none()));
        assert_eq!(dev.stats().buffers_alive, 0);
    }

    #[test]
    fn dropping_the_ring_releases_buffers() {
        let dev = SoftDevice::new();
        let ring = TransferRing::initialize(&dev, 2, &source()).unwrap();
        assert_eq!(dev.stats().buffers_alive, 2);
        drop(ring);
        assert_eq!(dev.stats().buffers_alive, 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "destroyed twice")]
    fn double_destroy_is_flagged() {
        let dev = SoftDevice::new();
        let mut ring = TransferRing::initialize(&dev, 2, &source()).unwrap();
        ring.destroy(&dev).unwrap();
        let _ = ring.destroy(&dev);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn double_destroy_is_rejected() {
        let dev = SoftDevice::new();
        let mut ring = TransferRing::initialize(&dev, 2, &source()).unwrap();
        ring.destroy(&dev).unwrap();
        assert!(matches!(ring.destroy(&dev), Err(ReadbackError::ContractViolation(_))));
    }

    #[test]
    fn select_is_idempotent() {
        let dev = SoftDevice::new();
        let ring = TransferRing::initialize(&dev, 2, &source()).unwrap();
        let mut binding = PackBinding::default();
        ring.select(&mut binding, 1).unwrap();
        let changes = binding.rebinds();
        ring.select(&mut binding, 1).unwrap();
        assert_eq!(binding.bound(), Some(1));
        assert_eq!(binding.rebinds(), changes);
    }

    #[test]
    fn cursor_wraps() {
        let dev = SoftDevice::new();
        let mut ring = TransferRing::initialize(&dev, 3, &source()).unwrap();
        assert_eq!(ring.advance(), 1);
        assert_eq!(ring.advance(), 2);
        assert_eq!(ring.advance(), 0);
    }
}
