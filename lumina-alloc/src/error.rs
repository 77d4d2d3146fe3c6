//! # Allocator Error Handling
//!
//! Error types shared by every allocator component.
//!
//! Device failures are reported by the [`MemoryDevice`](crate::MemoryDevice)
//! collaborator as [`DeviceError`] and folded into [`Error`] at the boundary.
//! Programmer mistakes (mismatched frees, over-unmapping, tearing down an
//! owner that still has live allocations) surface as [`Error::InvalidUsage`]
//! with a short message instead of aborting.

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Allocator result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Allocator error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The device could not provide memory, or a heap limit or budget refused it
    OutOfDeviceMemory,
    /// No memory type satisfies the type bits and required property flags
    NoSuitableMemoryType,
    /// Every eviction attempt lost its race against concurrent use
    TooManyEvictionAttempts,
    /// The caller broke an API contract
    InvalidUsage(&'static str),
    /// Any other device failure (mapping, binding, flushing)
    Device(DeviceError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::NoSuitableMemoryType => write!(f, "no suitable memory type"),
            Self::TooManyEvictionAttempts => write!(f, "too many eviction attempts"),
            Self::InvalidUsage(msg) => write!(f, "invalid usage: {}", msg),
            Self::Device(e) => write!(f, "device error: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

// =============================================================================
// DEVICE ERRORS
// =============================================================================

/// Errors reported by the device collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// Device memory exhausted
    OutOfDeviceMemory,
    /// Host memory exhausted
    OutOfHostMemory,
    /// Mapping the memory into the host address space failed
    MemoryMapFailed,
    /// The device was lost
    DeviceLost,
    /// Driver specific failure code
    Unknown(i32),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::OutOfHostMemory => write!(f, "out of host memory"),
            Self::MemoryMapFailed => write!(f, "memory map failed"),
            Self::DeviceLost => write!(f, "device lost"),
            Self::Unknown(code) => write!(f, "unknown device error {}", code),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DeviceError {}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::OutOfDeviceMemory => Error::OutOfDeviceMemory,
            other => Error::Device(other),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
