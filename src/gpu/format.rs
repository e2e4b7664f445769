// ============================================================================
// PIXEL FORMATS & READ REQUESTS — what is being read and from where
// ============================================================================

use super::error::ReadbackError;

/// Pixel layout of a render target and of the bytes handed to the consumer.
///
/// The copy into a transfer buffer never converts, so a request must ask for
/// the same format the source was rendered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    R8,
    Rg8,
    Rgba16Float,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::Rg8 => 2,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Rgba16Float => 8,
        }
    }

    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
            PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
            PixelFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
            PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }

    /// Inverse of [`PixelFormat::to_wgpu`].  sRGB variants read back as their
    /// linear counterparts since the copy moves raw bytes.
    pub fn from_wgpu(format: wgpu::TextureFormat) -> Option<Self> {
        match format {
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => Some(PixelFormat::Rgba8),
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => Some(PixelFormat::Bgra8),
            wgpu::TextureFormat::R8Unorm => Some(PixelFormat::R8),
            wgpu::TextureFormat::Rg8Unorm => Some(PixelFormat::Rg8),
            wgpu::TextureFormat::Rgba16Float => Some(PixelFormat::Rgba16Float),
            _ => None,
        }
    }

    /// Parse a format name as written in settings files and on the command line.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "rgba8" | "rgba" => Some(PixelFormat::Rgba8),
            "bgra8" | "bgra" => Some(PixelFormat::Bgra8),
            "r8" => Some(PixelFormat::R8),
            "rg8" => Some(PixelFormat::Rg8),
            "rgba16f" | "rgba16float" => Some(PixelFormat::Rgba16Float),
            _ => None,
        }
    }
}

/// Dimensions and format of the render target being read back.
/// Fixed for the lifetime of a transfer ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl SourceDescriptor {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self { width, height, format }
    }

    /// Tightly packed size of one frame in bytes.
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }

    /// Tightly packed size of one row in bytes, or `None` when it does not
    /// fit in a `u32`.
    pub fn row_bytes(&self) -> Option<u32> {
        self.width.checked_mul(self.format.bytes_per_pixel())
    }

    pub fn full_rect(&self) -> ReadRect {
        ReadRect::new(0, 0, self.width, self.height)
    }
}

/// Source rectangle of a read, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ReadRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the rectangle lies entirely inside the source.
    pub fn fits(&self, source: &SourceDescriptor) -> bool {
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= source.width as u64 && bottom <= source.height as u64
    }
}

/// One capture call: which rectangle, in which format, and in which mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub rect: ReadRect,
    pub format: PixelFormat,
    /// `true` = map the copy just issued (may stall).
    /// `false` = rotate and map an older, already finished copy.
    pub sync: bool,
}

impl ReadRequest {
    pub fn new(rect: ReadRect, format: PixelFormat, sync: bool) -> Self {
        Self { rect, format, sync }
    }

    /// Whole-surface read in the source's own format.
    pub fn full(source: &SourceDescriptor, sync: bool) -> Self {
        Self::new(source.full_rect(), source.format, sync)
    }

    /// Reject requests the transfer buffers cannot hold.  Rejection is the
    /// same in debug and release builds; nothing is clamped.
    pub fn validate(&self, source: &SourceDescriptor) -> Result<(), ReadbackError> {
        if self.rect.is_empty() {
            return Err(ReadbackError::ContractViolation(format!(
                "empty read rectangle {:?}",
                self.rect
            )));
        }
        if !self.rect.fits(source) {
            return Err(ReadbackError::ContractViolation(format!(
                "read rectangle {:?} exceeds source {}x{}",
                self.rect, source.width, source.height
            )));
        }
        if self.format != source.format {
            return Err(ReadbackError::ContractViolation(format!(
                "requested {:?} from a {:?} source",
                self.format, source.format
            )));
        }
        Ok(())
    }
}
