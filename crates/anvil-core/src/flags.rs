//! # Capability and Execution Flags
//!
//! Bit values follow the kernel execbuffer ABI so they can be copied into
//! the validation list without translation.

bitflags::bitflags! {
    /// Per-object capability flags ("kflags").
    ///
    /// These live on the buffer object and persist across batches. A
    /// relocation requesting a 32-bit address clears
    /// [`BoFlags::SUPPORTS_48B_ADDRESS`] for the lifetime of the buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BoFlags: u64 {
        /// Needs a fence register (tiled scanout)
        const NEEDS_FENCE = 1 << 0;
        /// Must be bound in the global GTT
        const NEEDS_GTT = 1 << 1;
        /// Written by the GPU in this batch
        const WRITE = 1 << 2;
        /// May be placed above 4 GiB
        const SUPPORTS_48B_ADDRESS = 1 << 3;
        /// Address chosen by userspace, the kernel must not move it
        const PINNED = 1 << 4;
        /// Reserve VA up to the object's padded size
        const PAD_TO_SIZE = 1 << 5;
        /// Skip implicit synchronisation
        const ASYNC = 1 << 6;
        /// Include in GPU error-state captures
        const CAPTURE = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Flags accepted by relocation emission.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RelocFlags: u32 {
        /// Target is written through this reference
        const WRITE = 1 << 2;
        /// Target must be bound in the global GTT
        const NEEDS_GGTT = 1 << 1;
        /// Target must live in the low 4 GiB (sticky on the buffer)
        const ADDR_32BIT = 1 << 31;
    }
}

impl RelocFlags {
    /// The validation-list flags this relocation contributes.
    ///
    /// `ADDR_32BIT` is not an object flag and is handled separately.
    pub const fn object_flags(self) -> BoFlags {
        let mut bits = 0;
        if self.contains(Self::WRITE) {
            bits |= BoFlags::WRITE.bits();
        }
        if self.contains(Self::NEEDS_GGTT) {
            bits |= BoFlags::NEEDS_GTT.bits();
        }
        BoFlags::from_bits_truncate(bits)
    }
}

bitflags::bitflags! {
    /// Flags for a whole execbuffer request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExecFlags: u64 {
        /// Render ring
        const RENDER = 1 << 0;
        /// Reset stream-output write offsets (gen7 workaround)
        const GEN7_SOL_RESET = 1 << 8;
        /// Presumed offsets are trustworthy, skip relocation if unchanged
        const NO_RELOC = 1 << 11;
        /// Relocation targets are validation-list indices, not handles
        const HANDLE_LUT = 1 << 12;
        /// Wait on the input sync file before executing
        const FENCE_IN = 1 << 16;
        /// Return a sync file signalled on completion
        const FENCE_OUT = 1 << 17;
        /// The batch is the first object, not the last
        const BATCH_FIRST = 1 << 18;
    }
}
