//! # ANVIL Core Traits
//!
//! The two collaborators the batch engine drives.
//!
//! ```text
//!          Batch
//!            │
//!            ├── BufferManager  (allocate, map, busy/wait, placement mode)
//!            │
//!            └── Kernel         (execbuffer, throttle)
//! ```
//!
//! Both are used through generics on the batch, so hot paths never go
//! through a vtable.

use alloc::sync::Arc;

use crate::bo::{BufferObject, Mapping, MemoryZone};
use crate::error::{KernelError, Result};
use crate::exec::ExecBuffer;
use crate::flags::BoFlags;
use crate::types::*;

// =============================================================================
// ALLOCATION
// =============================================================================

/// Buffer allocation descriptor
#[derive(Debug, Clone)]
pub struct AllocDesc {
    /// Debug name (for tools)
    pub name: &'static str,
    /// Size in bytes
    pub size: ByteSize,
    /// Address-space zone
    pub zone: MemoryZone,
    /// Initial capability flags.
    ///
    /// [`BoFlags::PINNED`] can only be requested here; a live buffer never
    /// changes pinned-ness.
    pub flags: BoFlags,
}

impl AllocDesc {
    /// Create a descriptor for a buffer in `zone`
    pub const fn new(name: &'static str, size: ByteSize, zone: MemoryZone) -> Self {
        Self {
            name,
            size,
            zone,
            flags: BoFlags::empty(),
        }
    }

    /// Add initial flags
    pub const fn with_flags(mut self, flags: BoFlags) -> Self {
        self.flags = self.flags.union(flags);
        self
    }
}

impl Default for AllocDesc {
    fn default() -> Self {
        Self::new("anonymous", ByteSize::PAGE, MemoryZone::Other)
    }
}

// =============================================================================
// BUFFER MANAGER TRAIT
// =============================================================================

/// Buffer-object manager
///
/// Owns buffer placement and backing storage. Buffers are shared as
/// `Arc<BufferObject>`; dropping the last `Arc` releases the buffer.
pub trait BufferManager: Send + Sync {
    /// Allocate a buffer.
    ///
    /// In soft-pin mode the buffer receives its final GPU address here.
    fn alloc(&self, desc: &AllocDesc) -> Result<Arc<BufferObject>>;

    /// Map a buffer's current backing for CPU access
    fn map(&self, bo: &BufferObject) -> Result<Mapping>;

    /// Release a mapping
    fn unmap(&self, mapping: Mapping) {
        drop(mapping);
    }

    /// Whether the GPU still uses the buffer
    fn is_busy(&self, bo: &BufferObject) -> bool;

    /// Block until the GPU is done with the buffer
    fn wait_rendering(&self, bo: &BufferObject);

    /// Whether buffer addresses are assigned by userspace
    fn uses_softpin(&self) -> bool;

    /// Whether the CPU shares a coherent last-level cache with the GPU
    fn has_llc(&self) -> bool;
}

// =============================================================================
// KERNEL TRAIT
// =============================================================================

/// Kernel execution interface
pub trait Kernel: Send + Sync {
    /// Submit a batch.
    ///
    /// On success every object's `offset` holds its final address, and an
    /// out fence is returned when [`crate::ExecFlags::FENCE_OUT`] was set.
    fn execbuffer(
        &self,
        exec: &mut ExecBuffer<'_>,
    ) -> core::result::Result<Option<SyncFd>, KernelError>;

    /// Best-effort throttle against the GPU falling too far behind
    fn throttle(&self) {}
}

// Shared handles forward to the inner implementation.

impl<T: BufferManager + ?Sized> BufferManager for Arc<T> {
    fn alloc(&self, desc: &AllocDesc) -> Result<Arc<BufferObject>> {
        (**self).alloc(desc)
    }

    fn map(&self, bo: &BufferObject) -> Result<Mapping> {
        (**self).map(bo)
    }

    fn unmap(&self, mapping: Mapping) {
        (**self).unmap(mapping)
    }

    fn is_busy(&self, bo: &BufferObject) -> bool {
        (**self).is_busy(bo)
    }

    fn wait_rendering(&self, bo: &BufferObject) {
        (**self).wait_rendering(bo)
    }

    fn uses_softpin(&self) -> bool {
        (**self).uses_softpin()
    }

    fn has_llc(&self) -> bool {
        (**self).has_llc()
    }
}

impl<T: Kernel + ?Sized> Kernel for Arc<T> {
    fn execbuffer(
        &self,
        exec: &mut ExecBuffer<'_>,
    ) -> core::result::Result<Option<SyncFd>, KernelError> {
        (**self).execbuffer(exec)
    }

    fn throttle(&self) {
        (**self).throttle()
    }
}
