// ============================================================================
// GPU MODULE — asynchronous frame-buffer readback
// ============================================================================
//
// Architecture:
//   format.rs    — pixel formats, source descriptors, read requests
//   error.rs     — ReadbackError
//   device.rs    — TransferDevice trait (the device seam)
//   context.rs   — wgpu Device, Queue, adapter init; wgpu TransferDevice
//   soft.rs      — CPU TransferDevice with deferred copy completion
//   ring.rs      — fixed pool of transfer buffers
//   scheduler.rs — copy issue + sync/async rotation, pack binding
//   mapper.rs    — host mapping of the chosen buffer
//   reader.rs    — ColorBufferReader, the per-render-target coordinator
// ============================================================================

pub mod context;
pub mod device;
pub mod error;
pub mod format;
pub mod mapper;
pub mod reader;
pub mod ring;
pub mod scheduler;
pub mod soft;

pub use context::GpuContext;
pub use device::TransferDevice;
pub use error::ReadbackError;
pub use format::{PixelFormat, ReadRect, ReadRequest, SourceDescriptor};
pub use reader::{ColorBufferReader, FrameInfo, MappedFrame, ReadbackStats};
pub use ring::{SlotContent, TransferRing};
pub use soft::{SoftDevice, SoftSurface};

/// Hard upper bound on the number of transfer buffers in a ring.
pub const MAX_TRANSFER_BUFFERS: usize = 3;
