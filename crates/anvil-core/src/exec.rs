//! # Kernel Execution ABI
//!
//! Records exchanged with the kernel execution interface.
//!
//! ```text
//!   ExecBuffer
//!     ├── objects:      [ExecObject; n]        one per validated buffer
//!     ├── relocations:  [RelocAttachment]      per-object patch lists
//!     │                    └── [RelocationEntry]
//!     ├── batch_len, context_id
//!     └── flags, in_fence
//! ```
//!
//! `ExecObject` and `RelocationEntry` are plain `#[repr(C)]` records so the
//! lists can be handed to the kernel as raw bytes.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::flags::{BoFlags, ExecFlags};
use crate::types::{GpuAddr, KernelHandle, SyncFd};

// =============================================================================
// VALIDATION LIST ENTRY
// =============================================================================

/// One validation-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ExecObject {
    /// Kernel handle of the buffer's backing
    pub handle: u32,
    /// Number of relocations attached to this object
    pub relocation_count: u32,
    /// Required placement alignment (0 = page)
    pub alignment: u64,
    /// Presumed GPU address on input, actual address on output
    pub offset: u64,
    /// Capability flags (`BoFlags` bits)
    pub flags: u64,
}

const_assert_eq!(core::mem::size_of::<ExecObject>(), 32);

impl ExecObject {
    /// Create an entry for a buffer at its presumed address
    pub const fn new(handle: KernelHandle, offset: GpuAddr, flags: BoFlags) -> Self {
        Self {
            handle: handle.0,
            relocation_count: 0,
            alignment: 0,
            offset: offset.0,
            flags: flags.bits(),
        }
    }

    /// Kernel handle
    pub const fn handle(&self) -> KernelHandle {
        KernelHandle(self.handle)
    }

    /// Address
    pub const fn offset(&self) -> GpuAddr {
        GpuAddr(self.offset)
    }

    /// Flags
    pub const fn flags(&self) -> BoFlags {
        BoFlags::from_bits_retain(self.flags)
    }

    /// Merge flags into the entry
    pub fn insert_flags(&mut self, flags: BoFlags) {
        self.flags |= flags.bits();
    }

    /// Clear flags from the entry
    pub fn remove_flags(&mut self, flags: BoFlags) {
        self.flags &= !flags.bits();
    }
}

// =============================================================================
// RELOCATION ENTRY
// =============================================================================

/// A deferred address patch.
///
/// `target` is a validation-list index when the request carries
/// [`ExecFlags::HANDLE_LUT`], otherwise a kernel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RelocationEntry {
    /// Target index or handle
    pub target: u32,
    /// Added to the target's address
    pub delta: u32,
    /// Byte offset of the patched field in the owning stream
    pub offset: u64,
    /// Target address the stream was written with
    pub presumed_offset: u64,
    /// Read domains (unused, kept for ABI layout)
    pub read_domains: u32,
    /// Write domain (unused, kept for ABI layout)
    pub write_domain: u32,
}

const_assert_eq!(core::mem::size_of::<RelocationEntry>(), 32);

impl RelocationEntry {
    /// Create a relocation entry
    pub const fn new(offset: u64, target: u32, delta: u32, presumed: GpuAddr) -> Self {
        Self {
            target,
            delta,
            offset,
            presumed_offset: presumed.0,
            read_domains: 0,
            write_domain: 0,
        }
    }

    /// Value the kernel writes at `offset` once the target is placed
    pub const fn patched_value(&self, target_addr: GpuAddr) -> u64 {
        target_addr.0.wrapping_add(self.delta as u64)
    }
}

// =============================================================================
// EXECBUFFER REQUEST
// =============================================================================

/// Relocations attached to one validation-list object.
#[derive(Debug, Clone, Copy)]
pub struct RelocAttachment<'a> {
    /// Index of the owning object in `ExecBuffer::objects`
    pub object: usize,
    /// Patches applied inside that object
    pub entries: &'a [RelocationEntry],
}

/// A complete execution request.
///
/// The kernel writes each object's final address back into `objects`.
#[derive(Debug)]
pub struct ExecBuffer<'a> {
    /// Validation list
    pub objects: &'a mut [ExecObject],
    /// Relocation sub-lists
    pub relocations: &'a [RelocAttachment<'a>],
    /// Bytes of the batch to execute
    pub batch_len: u32,
    /// Hardware context
    pub context_id: u32,
    /// Request flags
    pub flags: ExecFlags,
    /// Wait on this fence before executing
    pub in_fence: Option<SyncFd>,
}

impl ExecBuffer<'_> {
    /// Index of the batch object
    pub fn batch_index(&self) -> usize {
        if self.flags.contains(ExecFlags::BATCH_FIRST) {
            0
        } else {
            self.objects.len().saturating_sub(1)
        }
    }

    /// Relocations attached to `object`
    pub fn relocations_for(&self, object: usize) -> &[RelocationEntry] {
        self.relocations
            .iter()
            .find(|r| r.object == object)
            .map(|r| r.entries)
            .unwrap_or(&[])
    }
}
