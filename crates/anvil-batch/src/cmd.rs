//! # MI Commands
//!
//! Memory-interface command encodings used by the batch engine itself.
//!
//! MI commands have client 0 in bits 31:29 and the opcode in bits 28:23.
//! Multi-dword commands carry `total dwords - 2` in their low bits.

/// Command client field
pub const CLIENT_MI: u32 = 0;

/// Encode an MI header
pub const fn mi(opcode: u32, flags: u32) -> u32 {
    CLIENT_MI | (opcode << 23) | flags
}

/// No operation
pub const MI_NOOP: u32 = mi(0x00, 0);

/// End of the batch
pub const MI_BATCH_BUFFER_END: u32 = mi(0x0A, 0);

/// Store an immediate qword to a 64-bit address
pub const MI_STORE_DATA_IMM: u32 = mi(0x20, 3) | (1 << 21);

/// Command bytes kept free for the end of the batch
pub const END_RESERVE: usize = 8;

/// Dwords that close a batch whose cursor is at `used` bytes.
///
/// The end marker is padded with a no-op to keep the batch length a
/// multiple of 8.
pub fn end_of_batch(used: usize) -> &'static [u32] {
    if (used + 4) % 8 == 0 {
        &[MI_BATCH_BUFFER_END]
    } else {
        &[MI_BATCH_BUFFER_END, MI_NOOP]
    }
}
