// ============================================================================
// GPU CONTEXT — wgpu Device, Queue, adapter init, and the wgpu transfer device
// ============================================================================

use std::sync::Arc;
use std::sync::mpsc;

use super::device::TransferDevice;
use super::error::ReadbackError;
use super::format::{PixelFormat, ReadRect, SourceDescriptor};

/// Holds the wgpu resources the readback pipeline runs on.
/// Cheap to clone; clones share the same device and queue.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    /// Largest buffer the device will allocate.
    pub max_buffer_size: u64,
    /// Largest width or height of a 2D texture.
    pub max_texture_dimension: u32,
}

impl GpuContext {
    /// Attempt to create a headless GPU context.  Tries hardware first, then
    /// falls back to a software rasterizer (`force_fallback_adapter`).
    /// `force_software` skips the hardware attempt.
    pub fn new(preferred_gpu: &str, force_software: bool) -> Result<Self, ReadbackError> {
        if !force_software {
            if let Some(ctx) = pollster::block_on(Self::new_async(preferred_gpu, false)) {
                crate::log_info!("[GPU] Using adapter '{}'", ctx.adapter_name);
                return Ok(ctx);
            }
            crate::log_warn!("[GPU] Hardware adapter unavailable, trying software fallback");
        }
        match pollster::block_on(Self::new_async(preferred_gpu, true)) {
            Some(ctx) => {
                crate::log_info!("[GPU] Using fallback adapter '{}'", ctx.adapter_name);
                Ok(ctx)
            }
            None => {
                crate::log_err!("[GPU] No adapter available");
                Err(ReadbackError::NoAdapter)
            }
        }
    }

    async fn new_async(preferred_gpu: &str, force_fallback: bool) -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power = match preferred_gpu.to_lowercase().as_str() {
            "low power" | "integrated" => wgpu::PowerPreference::LowPower,
            _ => wgpu::PowerPreference::HighPerformance,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("PixelTap GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        max_buffer_size: limits.max_buffer_size,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .ok()?;

        Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_buffer_size: limits.max_buffer_size,
            max_texture_dimension: limits.max_texture_dimension_2d,
        })
    }

    /// Create a texture that can be rendered into and read back from.
    pub fn create_render_target(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<wgpu::Texture, ReadbackError> {
        let max = self.max_texture_dimension;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(ReadbackError::AllocationFailure(format!(
                "render target {}x{} outside the device's 1..={} range",
                width, height, max
            )));
        }
        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("readback_render_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.to_wgpu(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        }))
    }

    /// Render a frame: clear the whole target to `color`.
    pub fn clear_target(&self, texture: &wgpu::Texture, color: wgpu::Color) {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_clear"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("readback_clear_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.submit_one(encoder);
    }

    /// Submit a single encoder's commands.
    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) -> wgpu::SubmissionIndex {
        self.queue.submit(std::iter::once(encoder.finish()))
    }
}

/// WGPU requires `bytes_per_row` of a texture→buffer copy to be a multiple of 256.
pub(crate) fn aligned_bytes_per_row(row_bytes: u32) -> Option<u32> {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    row_bytes.div_ceil(align).checked_mul(align)
}

impl TransferDevice for GpuContext {
    type Buffer = wgpu::Buffer;
    type Target = wgpu::Texture;
    type Fence = wgpu::SubmissionIndex;
    type View<'a> = wgpu::BufferView<'a>;

    fn describe(&self, target: &wgpu::Texture) -> Option<SourceDescriptor> {
        if !target.usage().contains(wgpu::TextureUsages::COPY_SRC) {
            return None;
        }
        let format = PixelFormat::from_wgpu(target.format())?;
        Some(SourceDescriptor::new(target.width(), target.height(), format))
    }

    fn row_pitch(&self, source: &SourceDescriptor) -> Option<u32> {
        source.row_bytes().and_then(aligned_bytes_per_row)
    }

    fn create_buffer(&self, label: &str, size: u64) -> Result<wgpu::Buffer, ReadbackError> {
        if size > self.max_buffer_size {
            return Err(ReadbackError::AllocationFailure(format!(
                "{}: {} bytes exceeds device limit of {}",
                label, size, self.max_buffer_size
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());

        match validation.or(oom) {
            Some(e) => {
                buffer.destroy();
                Err(ReadbackError::AllocationFailure(format!("{}: {}", label, e)))
            }
            None => Ok(buffer),
        }
    }

    fn destroy_buffer(&self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn copy_rect(
        &self,
        target: &wgpu::Texture,
        rect: &ReadRect,
        row_pitch: u32,
        buffer: &wgpu::Buffer,
    ) -> Result<wgpu::SubmissionIndex, ReadbackError> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_copy"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d { x: rect.x, y: rect.y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row_pitch),
                    rows_per_image: Some(rect.height),
                },
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(self.submit_one(encoder))
    }

    fn map_read(
        &self,
        buffer: &wgpu::Buffer,
        len: u64,
        fence: Option<&wgpu::SubmissionIndex>,
    ) -> Result<(), ReadbackError> {
        let slice = buffer.slice(..len);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        // Only wait for the copy that filled this buffer, not for work queued
        // into the other buffers of the ring since.
        match fence {
            Some(index) => {
                self.device
                    .poll(wgpu::Maintain::WaitForSubmissionIndex(index.clone()));
            }
            None => {
                self.device.poll(wgpu::Maintain::Poll);
            }
        }

        let result = match rx.try_recv() {
            Ok(r) => Ok(r),
            Err(mpsc::TryRecvError::Empty) => {
                self.device.poll(wgpu::Maintain::Wait);
                rx.recv().map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                crate::log_err!("[GPU] map_async failed: {:?}", e);
                Err(ReadbackError::InvalidMapping(format!("{:?}", e)))
            }
            Err(e) => {
                crate::log_err!("[GPU] map_async callback lost: {}", e);
                Err(ReadbackError::InvalidMapping(e))
            }
        }
    }

    fn mapped_range<'a>(&'a self, buffer: &'a wgpu::Buffer, len: u64) -> wgpu::BufferView<'a> {
        buffer.slice(..len).get_mapped_range()
    }

    fn unmap(&self, buffer: &wgpu::Buffer) {
        buffer.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::aligned_bytes_per_row;

    #[test]
    fn rows_align_to_256_bytes() {
        assert_eq!(aligned_bytes_per_row(1), Some(256));
        assert_eq!(aligned_bytes_per_row(256), Some(256));
        assert_eq!(aligned_bytes_per_row(257), Some(512));
        assert_eq!(aligned_bytes_per_row(1920 * 4), Some(7680));
        assert_eq!(aligned_bytes_per_row(u32::MAX - 10), None);
    }
}
