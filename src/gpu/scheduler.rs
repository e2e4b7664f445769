// ============================================================================
// READBACK SCHEDULER — issue copies and rotate through the ring
// ============================================================================
//
// Sync read:   copy into buffer[cur], map buffer[cur].  Always the newest
//              frame, but the map waits for that copy.
// Async read:  copy into buffer[cur], cur = (cur + 1) % N, map buffer[cur].
//              That buffer was written N-1 captures ago, so its copy has
//              almost certainly finished; the data is N-1 frames old.
// With N == 1 both modes map the buffer that was just written.

use super::device::TransferDevice;
use super::error::ReadbackError;
use super::format::ReadRequest;
use super::ring::{SlotContent, TransferRing};

/// The active pack target.  Lives here rather than as hidden device state so
/// unrelated rendering code can never pick up a stale binding.
#[derive(Debug, Default)]
pub struct PackBinding {
    bound: Option<usize>,
    rebinds: u64,
}

impl PackBinding {
    /// Bind buffer `index`.  Returns `false` if it was already bound.
    pub fn bind(&mut self, index: usize) -> bool {
        if self.bound == Some(index) {
            return false;
        }
        self.bound = Some(index);
        self.rebinds += 1;
        true
    }

    /// Back to "no active buffer".
    pub fn unbind(&mut self) {
        self.bound = None;
    }

    pub fn bound(&self) -> Option<usize> {
        self.bound
    }

    /// How many times the binding actually changed.
    pub fn rebinds(&self) -> u64 {
        self.rebinds
    }
}

/// Result of issuing one capture: where the consumer's bytes will be and how
/// they are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureInfo {
    /// Sequence number of this capture (1-based).
    pub sequence: u64,
    /// Buffer the copy was issued into.
    pub written: usize,
    /// Buffer the following map will read.
    pub slot: usize,
    /// Always 0: row 0 of the rectangle starts at byte 0.
    pub row_offset: u32,
    /// Distance between rows, in pixels.
    pub row_stride: u32,
    /// Bytes to map: `row_pitch * rect.height`.
    pub map_len: u64,
}

#[derive(Debug, Default)]
pub struct ReadbackScheduler {
    binding: PackBinding,
    captures: u64,
}

impl ReadbackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binding(&self) -> &PackBinding {
        &self.binding
    }

    pub fn binding_mut(&mut self) -> &mut PackBinding {
        &mut self.binding
    }

    /// Captures issued so far.
    pub fn captures(&self) -> u64 {
        self.captures
    }

    /// Issue the device copy for `request` and leave the binding on the
    /// buffer the consumer should map next.
    pub fn capture<D: TransferDevice>(
        &mut self,
        device: &D,
        ring: &mut TransferRing<D>,
        target: &D::Target,
        request: &ReadRequest,
    ) -> Result<CaptureInfo, ReadbackError> {
        let source = *ring.source();
        request.validate(&source)?;
        match device.describe(target) {
            Some(desc) if desc == source => {}
            other => {
                return Err(ReadbackError::ContractViolation(format!(
                    "render target is {:?}, ring was built for {:?}",
                    other, source
                )));
            }
        }

        // 1. Bind the current buffer.
        let written = ring.cursor();
        ring.select(&mut self.binding, written)?;

        // 2. Queue the copy.
        let row_pitch = ring.row_pitch();
        let sequence = self.captures + 1;
        let slot = ring.slot_mut(written).ok_or_else(|| {
            ReadbackError::ContractViolation(format!("transfer buffer {} missing", written))
        })?;
        let fence = device.copy_rect(target, &request.rect, row_pitch, &slot.buffer)?;
        slot.fence = Some(fence);
        slot.content = Some(SlotContent {
            sequence,
            rect: request.rect,
        });
        self.captures = sequence;

        // 3./4. Sync keeps the buffer just written; async moves on to the
        // oldest one.
        let slot = if request.sync {
            written
        } else {
            let next = ring.advance();
            ring.select(&mut self.binding, next)?;
            next
        };

        // 5. Layout of the mapped bytes.
        Ok(CaptureInfo {
            sequence,
            written,
            slot,
            row_offset: 0,
            row_stride: row_pitch / source.format.bytes_per_pixel(),
            map_len: row_pitch as u64 * request.rect.height as u64,
        })
    }
}
