//! Error types shared across the beamfft workspace.

use thiserror::Error;

/// Result type for beamfft operations.
pub type Result<T> = std::result::Result<T, BeamFftError>;

/// Errors raised by the processor and device backends.
///
/// The variants fall into three propagation classes:
///
/// - **Configuration** — invalid shape or input; raised synchronously before
///   any device work is issued and never retried.
/// - **Resource** ([`Compilation`](Self::Compilation),
///   [`Allocation`](Self::Allocation), [`Device`](Self::Device)) — fatal for
///   the construction or call that hit them; retrying with the same inputs
///   would fail identically.
/// - **Execution** — a kernel-launch or argument-binding failure inside one
///   batch; captured per beam in the result while the call as a whole still
///   returns a full-length aggregate.
#[derive(Error, Debug, Clone)]
pub enum BeamFftError {
    /// Invalid parameters or input shape.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Device program compilation or kernel lookup failed.
    #[error("program compilation failed: {0}")]
    Compilation(String),

    /// Device memory allocation failed.
    #[error("allocation of {requested} bytes failed ({available} bytes available)")]
    Allocation {
        /// Bytes requested from the device.
        requested: usize,
        /// Bytes the device reported as available.
        available: usize,
    },

    /// Kernel launch or argument binding failed during a batch.
    #[error("kernel execution failed: {0}")]
    Execution(String),

    /// Backend fault outside the categories above.
    #[error("device error: {0}")]
    Device(String),
}

impl BeamFftError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a compilation error.
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compilation(msg.into())
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a device error.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Whether this error aborts the whole call.
    ///
    /// Execution errors are isolated to the beams of the batch that raised
    /// them; everything else propagates to the caller.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Execution(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BeamFftError::config("bad").is_fatal());
        assert!(BeamFftError::compile("bad").is_fatal());
        assert!(BeamFftError::Allocation {
            requested: 1024,
            available: 0
        }
        .is_fatal());
        assert!(BeamFftError::device("bad").is_fatal());
        assert!(!BeamFftError::execution("bad").is_fatal());
    }

    #[test]
    fn test_display_carries_detail() {
        let err = BeamFftError::Allocation {
            requested: 4096,
            available: 128,
        };
        let text = err.to_string();
        assert!(text.contains("4096"));
        assert!(text.contains("128"));
    }
}
