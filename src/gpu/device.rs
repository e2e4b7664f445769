// ============================================================================
// TRANSFER DEVICE — the upstream seam the readback pipeline drives
// ============================================================================
//
// The pipeline never talks to a graphics API directly.  Everything it needs
// from the device (buffer lifetime, rectangle copy, map/unmap) goes through
// this trait, implemented by:
//   context.rs — GpuContext, a real wgpu device
//   soft.rs    — SoftDevice, a CPU model of a device with deferred copies
//
// There is no ambient "bound buffer" on the device side: every call names the
// buffer it acts on.  Which buffer is the active pack target is tracked by the
// scheduler (`PackBinding`).

use std::ops::Deref;

use super::error::ReadbackError;
use super::format::{ReadRect, SourceDescriptor};

pub trait TransferDevice {
    /// Owned device-side transfer buffer.  Dropping it releases the memory.
    type Buffer;
    /// Render target that copies read from.
    type Target;
    /// Marker for one issued copy; mapping waits on it.
    type Fence: Clone;
    /// Host view over a mapped buffer.
    type View<'a>: Deref<Target = [u8]>
    where
        Self: 'a;

    /// Dimensions and format of a render target, or `None` when its format
    /// cannot be read back.
    fn describe(&self, target: &Self::Target) -> Option<SourceDescriptor>;

    /// Bytes between the starts of consecutive rows in a transfer buffer.
    /// `None` when the padded row does not fit in a `u32`.
    fn row_pitch(&self, source: &SourceDescriptor) -> Option<u32>;

    /// Capacity a transfer buffer needs to hold one full frame of `source`.
    fn buffer_size(&self, source: &SourceDescriptor) -> Option<u64> {
        (self.row_pitch(source)? as u64).checked_mul(source.height as u64)
    }

    fn create_buffer(&self, label: &str, size: u64) -> Result<Self::Buffer, ReadbackError>;

    /// Release a buffer now rather than whenever its handle is dropped.
    fn destroy_buffer(&self, buffer: Self::Buffer);

    /// Queue a copy of `rect` from `target` into `buffer`, row `r` of the
    /// rectangle landing at byte `r * row_pitch`.  Returns immediately; the
    /// bytes are only guaranteed once the returned fence has completed.
    fn copy_rect(
        &self,
        target: &Self::Target,
        rect: &ReadRect,
        row_pitch: u32,
        buffer: &Self::Buffer,
    ) -> Result<Self::Fence, ReadbackError>;

    /// Map `[0, len)` of `buffer` for reading.  Blocks until `fence` (the last
    /// copy into this buffer, if any) has completed.
    fn map_read(&self, buffer: &Self::Buffer, len: u64, fence: Option<&Self::Fence>) -> Result<(), ReadbackError>;

    /// View of `[0, len)` of a buffer previously mapped with `map_read`.
    fn mapped_range<'a>(&'a self, buffer: &'a Self::Buffer, len: u64) -> Self::View<'a>;

    fn unmap(&self, buffer: &Self::Buffer);
}
