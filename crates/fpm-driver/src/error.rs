//! Error types for FPM driver operations

use fpm_chip::ChannelRole;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for FPM operations
pub type Result<T> = std::result::Result<T, FpmError>;

/// Errors that can occur during FPM operations
#[derive(Debug, Error)]
pub enum FpmError {
    /// Register range or interrupt line already claimed, or not present
    #[error("Resource unavailable: {resource}: {reason}")]
    ResourceUnavailable {
        /// Resource that could not be acquired
        resource: String,
        /// Reason for failure
        reason: String,
    },

    /// Operand text could not be parsed
    #[error("Malformed request: {reason}")]
    MalformedRequest {
        /// What was wrong with the request
        reason: String,
    },

    /// Pending queue cannot take the request
    #[error("Driver full: {queued} of {capacity} operand words queued")]
    QueueFull {
        /// Words already queued in the current batch
        queued: usize,
        /// Queue capacity in words
        capacity: usize,
    },

    /// Coherent transfer buffer could not be obtained
    #[error("Buffer fault: {reason}")]
    BufferFault {
        /// Reason for failure
        reason: String,
    },

    /// A channel did not signal completion in time
    #[error("Channel {channel} timed out after {duration_ms}ms")]
    HardwareTimeout {
        /// Channel that stalled
        channel: ChannelRole,
        /// Time waited in milliseconds
        duration_ms: u64,
    },

    /// A channel reported an error in its status register
    #[error("Channel {channel} reported DMA error (DMASR {status:#010x})")]
    HardwareFault {
        /// Channel that faulted
        channel: ChannelRole,
        /// Latched status register value
        status: u32,
    },

    /// Operation not allowed in the current controller state
    #[error("Device in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Caller mapping of the transfer buffer has the wrong size
    #[error("Cannot map {requested} bytes of the transfer buffer (limit {limit})")]
    InvalidMapping {
        /// Requested mapping length
        requested: usize,
        /// Largest allowed mapping length
        limit: usize,
    },

    /// Device node not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl FpmError {
    /// Create a resource unavailable error
    pub fn resource_unavailable(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed request error
    pub fn malformed_request(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// Create a buffer fault error
    pub fn buffer_fault(reason: impl Into<String>) -> Self {
        Self::BufferFault {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Whether the error leaves the controller unusable until re-attach.
    pub const fn is_hardware(&self) -> bool {
        matches!(self, Self::HardwareTimeout { .. } | Self::HardwareFault { .. })
    }
}
