// ============================================================================
// READBACK ERRORS
// ============================================================================

/// Errors surfaced by the readback pipeline.  Nothing here is retried
/// internally; the owner decides whether to drop the frame or rebuild.
#[derive(Debug)]
pub enum ReadbackError {
    /// A transfer buffer could not be created.  Fatal for the ring.
    AllocationFailure(String),
    /// The device refused to map a buffer (lost context, failed map callback).
    /// Recover by recreating the reader.
    InvalidMapping(String),
    /// The caller broke the capture → map → unmap protocol or asked for a
    /// rectangle the buffers cannot hold.
    ContractViolation(String),
    /// No wgpu adapter, hardware or software, could be opened.
    NoAdapter,
    Io(std::io::Error),
    Image(String),
}

impl std::fmt::Display for ReadbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadbackError::AllocationFailure(e) => write!(f, "Transfer buffer allocation failed: {}", e),
            ReadbackError::InvalidMapping(e) => write!(f, "Transfer buffer mapping invalid: {}", e),
            ReadbackError::ContractViolation(e) => write!(f, "Readback contract violation: {}", e),
            ReadbackError::NoAdapter => write!(f, "No GPU adapter available"),
            ReadbackError::Io(e) => write!(f, "I/O error: {}", e),
            ReadbackError::Image(e) => write!(f, "Image error: {}", e),
        }
    }
}

impl std::error::Error for ReadbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadbackError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReadbackError {
    fn from(e: std::io::Error) -> Self {
        ReadbackError::Io(e)
    }
}

impl From<image::ImageError> for ReadbackError {
    fn from(e: image::ImageError) -> Self {
        ReadbackError::Image(e.to_string())
    }
}

/// Lifecycle misuse (double destroy, unmap without map, destroy while mapped).
/// Trips an assertion in debug builds and is rejected in release builds.
pub(crate) fn contract_violation(msg: String) -> ReadbackError {
    crate::log_err!("[Readback] contract violation: {}", msg);
    debug_assert!(false, "readback contract violation: {}", msg);
    ReadbackError::ContractViolation(msg)
}
