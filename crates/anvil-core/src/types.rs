//! # ANVIL Core Types
//!
//! Fundamental type definitions used across the batch engine.
//!
//! These types provide:
//! - Strong typing for GPU addresses and kernel handles
//! - Canonical-form address helpers for 48-bit virtual addressing
//! - Size helpers for buffer and aperture accounting

use core::fmt;
use core::ops::{Add, Sub};

// =============================================================================
// GPU ADDRESS
// =============================================================================

/// GPU Virtual Address
///
/// This is an address in the GPU's per-context virtual address space
/// (the "GTT offset" of a buffer object). It is NOT a CPU pointer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct GpuAddr(pub u64);

impl GpuAddr {
    /// Width of the GPU virtual address space in bits
    pub const VA_BITS: u32 = 48;

    /// First address outside the low 4 GiB window
    pub const LOW_4G_END: u64 = 1 << 32;

    /// Create a new GPU address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Create a null GPU address
    #[inline]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check alignment
    #[inline]
    pub const fn is_aligned(self, alignment: u64) -> bool {
        self.0 & (alignment - 1) == 0
    }

    /// Align up to boundary
    #[inline]
    pub const fn align_up(self, alignment: u64) -> Self {
        let mask = alignment - 1;
        Self((self.0 + mask) & !mask)
    }

    /// Offset by a signed delta
    #[inline]
    pub const fn offset(self, delta: i64) -> Self {
        Self(self.0.wrapping_add(delta as u64))
    }

    /// Sign-extend bit 47 into the upper bits.
    ///
    /// Instruction fields holding 64-bit addresses must carry the canonical
    /// form or the command streamer faults.
    #[inline]
    pub const fn canonical(self) -> u64 {
        let shift = 64 - Self::VA_BITS;
        (((self.0 << shift) as i64) >> shift) as u64
    }

    /// Strip the sign extension of a canonical address
    #[inline]
    pub const fn decanonical(addr: u64) -> Self {
        Self(addr & ((1u64 << Self::VA_BITS) - 1))
    }

    /// Whether the address range `[self, self + size)` lies in the low 4 GiB
    #[inline]
    pub const fn fits_low_4g(self, size: u64) -> bool {
        self.0 + size <= Self::LOW_4G_END
    }
}

impl Add<u64> for GpuAddr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl Sub<GpuAddr> for GpuAddr {
    type Output = u64;

    fn sub(self, rhs: GpuAddr) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl fmt::Debug for GpuAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuAddr(0x{:012x})", self.0)
    }
}

impl fmt::Display for GpuAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x}", self.0)
    }
}

// =============================================================================
// KERNEL HANDLE
// =============================================================================

/// Kernel-side name of a buffer object's backing storage (a GEM handle).
///
/// Handle 0 is never valid.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct KernelHandle(pub u32);

impl KernelHandle {
    /// The invalid handle
    pub const NONE: Self = Self(0);

    /// Get the raw value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check validity
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelHandle({})", self.0)
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// SYNC FILE
// =============================================================================

/// A sync-file descriptor carrying a GPU fence across submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SyncFd(pub i32);

impl SyncFd {
    /// Get the raw descriptor
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

// =============================================================================
// SIZE TYPES
// =============================================================================

/// Size in bytes
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Zero size
    pub const ZERO: Self = Self(0);
    /// 4 KiB page
    pub const PAGE: Self = Self(4 * 1024);

    /// Create from bytes
    #[inline]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from KiB
    #[inline]
    pub const fn from_kib(kib: u64) -> Self {
        Self(kib * 1024)
    }

    /// Create from MiB
    #[inline]
    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    /// Get as bytes
    #[inline]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Get as a host size
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Get as fractional MiB, for reports
    #[inline]
    pub fn as_mib_f32(self) -> f32 {
        self.0 as f32 / (1024.0 * 1024.0)
    }

    /// Align up
    #[inline]
    pub const fn align_up(self, alignment: u64) -> Self {
        let mask = alignment - 1;
        Self((self.0 + mask) & !mask)
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 * 1024 {
            write!(f, "{} MiB", self.0 / (1024 * 1024))
        } else if self.0 >= 1024 {
            write!(f, "{} KiB", self.0 / 1024)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Round `value` up to a power-of-two `alignment`
#[inline]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
