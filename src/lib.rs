//! PixelTap: asynchronous frame-buffer readback.
//!
//! Copies rendered frames from device memory into host memory through a
//! small ring of transfer buffers.  Synchronous reads return the newest
//! frame and may stall; asynchronous reads rotate through the ring and return
//! a frame that is `N-1` captures old without waiting on the device.

pub mod logger;
pub mod gpu;
pub mod settings;
pub mod cli;

pub use gpu::{
    ColorBufferReader, FrameInfo, GpuContext, MappedFrame, PixelFormat, ReadRect, ReadRequest,
    ReadbackError, SoftDevice, SoftSurface, SourceDescriptor, TransferDevice,
};
pub use settings::ReadbackSettings;
