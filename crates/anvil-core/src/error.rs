//! # ANVIL Error Handling
//!
//! Error types for the batch engine and its collaborators.
//!
//! Error handling in ANVIL follows these principles:
//! - Errors are typed and categorized
//! - Recoverable paths return `Result`, never panic
//! - Kernel failures carry the errno the kernel reported
//! - Errors are `no_std` compatible

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// ANVIL Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// ANVIL unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Resource not found
    NotFound,
    /// Operation not valid in the current state
    InvalidState,
    /// Operation timed out
    Timeout,

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Out of system memory
    OutOfMemory,
    /// Buffer object allocation failed
    AllocationFailed,
    /// GPU virtual address space exhausted
    OutOfAddressSpace,
    /// Memory mapping failed
    MappingFailed,
    /// Access beyond the end of a buffer
    BufferOverflow,

    // =========================================================================
    // Batch Errors
    // =========================================================================
    /// A stream would exceed its hard size limit
    BatchTooLarge,
    /// Pinned buffers cannot be grown in place
    GrowPinned,
    /// Batch submission failed
    Kernel(KernelError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::NotFound => write!(f, "resource not found"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::Timeout => write!(f, "operation timed out"),

            // Memory
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::AllocationFailed => write!(f, "buffer object allocation failed"),
            Self::OutOfAddressSpace => write!(f, "GPU address space exhausted"),
            Self::MappingFailed => write!(f, "memory mapping failed"),
            Self::BufferOverflow => write!(f, "buffer overflow"),

            // Batch
            Self::BatchTooLarge => write!(f, "batch exceeds maximum size"),
            Self::GrowPinned => write!(f, "cannot grow a pinned buffer"),
            Self::Kernel(e) => write!(f, "kernel error: {}", e),
        }
    }
}

// =============================================================================
// SUB-ERROR TYPES
// =============================================================================

/// Error returned by the kernel execution interface, as a positive errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelError(pub i32);

impl KernelError {
    /// No such object
    pub const ENOENT: Self = Self(2);
    /// I/O error (GPU hang / wedged)
    pub const EIO: Self = Self(5);
    /// Out of memory
    pub const ENOMEM: Self = Self(12);
    /// Device busy
    pub const EBUSY: Self = Self(16);
    /// Invalid argument
    pub const EINVAL: Self = Self(22);
    /// Aperture space exhausted
    pub const ENOSPC: Self = Self(28);

    /// Symbolic name, when known
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            2 => Some("ENOENT"),
            5 => Some("EIO"),
            12 => Some("ENOMEM"),
            16 => Some("EBUSY"),
            22 => Some("EINVAL"),
            28 => Some("ENOSPC"),
            _ => None,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "errno {}", self.0),
        }
    }
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<KernelError> for Error {
    fn from(e: KernelError) -> Self {
        Error::Kernel(e)
    }
}
