//! # Batch Configuration
//!
//! Sizes, addressing mode and debug switches for a [`crate::Batch`].

use anvil_core::{BoFlags, BufferManager, ByteSize};

// =============================================================================
// SIZE CONSTANTS
// =============================================================================

/// Command stream size at which a wrapping batch is flushed
pub const BATCH_SZ: usize = 20 * 1024;

/// State stream size at which a wrapping batch is flushed
pub const STATE_SZ: usize = 16 * 1024;

/// Hard limit on the command stream
pub const MAX_BATCH_SIZE: usize = 256 * 1024;

/// Hard limit on the state stream
pub const MAX_STATE_SIZE: usize = 64 * 1024;

/// Initial validation-list capacity
pub const INITIAL_EXEC_CAPACITY: usize = 100;

/// Initial capacity of each relocation list
pub const INITIAL_RELOC_CAPACITY: usize = 250;

// =============================================================================
// DEBUG FLAGS
// =============================================================================

bitflags::bitflags! {
    /// Driver debug switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u32 {
        /// Record state allocation sizes and log every flush
        const BATCH = 1 << 0;
        /// Log every submission
        const SUBMIT = 1 << 1;
        /// Wait for each batch to complete after submitting it
        const SYNC = 1 << 2;
        /// Log performance warnings (growth, aperture retries)
        const PERF = 1 << 3;
    }
}

impl DebugFlags {
    /// Parse a comma-separated list such as `"batch,sync"`.
    ///
    /// Unknown names are logged and ignored.
    pub fn parse(list: &str) -> Self {
        let mut flags = Self::empty();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let flag = match name.to_ascii_lowercase().as_str() {
                "batch" | "bat" => Self::BATCH,
                "submit" => Self::SUBMIT,
                "sync" => Self::SYNC,
                "perf" => Self::PERF,
                "all" => Self::all(),
                _ => {
                    log::warn!("anvil: unknown debug flag '{}'", name);
                    continue;
                }
            };
            flags |= flag;
        }
        flags
    }
}

// =============================================================================
// ADDRESSING MODE
// =============================================================================

/// How relocation targets are named in a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// Batch is object 0, relocation targets are list indices
    HandleLut,
    /// Batch is the last object, relocation targets are kernel handles
    Legacy,
}

// =============================================================================
// DEVICE CAPABILITIES
// =============================================================================

/// What the device and kernel support
#[derive(Debug, Clone, Copy)]
pub struct DeviceCaps {
    /// Hardware generation
    pub generation: u8,
    /// CPU shares a coherent LLC with the GPU
    pub llc: bool,
    /// Mappable aperture size
    pub aperture_size: ByteSize,
    /// Kernel accepts `BATCH_FIRST | HANDLE_LUT`
    pub batch_first: bool,
    /// Kernel honours `CAPTURE` on objects
    pub exec_capture: bool,
}

impl DeviceCaps {
    /// Query the buffer manager; the remaining fields assume a gen8+ kernel
    pub fn detect<M: BufferManager>(bufmgr: &M, aperture_size: ByteSize) -> Self {
        Self {
            generation: 8,
            llc: bufmgr.has_llc(),
            aperture_size,
            batch_first: true,
            exec_capture: true,
        }
    }
}

// =============================================================================
// BATCH CONFIGURATION
// =============================================================================

/// Batch configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Command stream flush threshold
    pub batch_size: usize,
    /// State stream flush threshold
    pub state_size: usize,
    /// Command stream hard limit
    pub max_batch_size: usize,
    /// State stream hard limit
    pub max_state_size: usize,
    /// Initial validation-list capacity
    pub exec_capacity: usize,
    /// Initial relocation-list capacity
    pub reloc_capacity: usize,
    /// Relocation target naming
    pub addressing: AddressingMode,
    /// Write into CPU shadow memory and upload at flush
    pub shadow_copy: bool,
    /// Aperture footprint a batch may reach before a retry
    pub aperture_threshold: u64,
    /// Hardware context id
    pub context_id: u32,
    /// Mark batch and state buffers for error-state capture
    pub capture: bool,
    /// Object flags a relocation is allowed to set
    pub valid_reloc_flags: BoFlags,
    /// Block on the previous frame's first batch when a frame throttle is requested
    pub throttling: bool,
    /// Debug switches
    pub debug: DebugFlags,
}

impl BatchConfig {
    /// Standard configuration
    pub const DEFAULT: Self = Self {
        batch_size: BATCH_SZ,
        state_size: STATE_SZ,
        max_batch_size: MAX_BATCH_SIZE,
        max_state_size: MAX_STATE_SIZE,
        exec_capacity: INITIAL_EXEC_CAPACITY,
        reloc_capacity: INITIAL_RELOC_CAPACITY,
        addressing: AddressingMode::HandleLut,
        shadow_copy: false,
        aperture_threshold: 192 * 1024 * 1024,
        context_id: 0,
        capture: false,
        valid_reloc_flags: BoFlags::WRITE,
        throttling: true,
        debug: DebugFlags::empty(),
    };

    /// Configuration for a device
    pub fn for_device(caps: &DeviceCaps) -> Self {
        let mut valid_reloc_flags = BoFlags::WRITE;
        if caps.generation == 6 {
            // Gen6 PIPE_CONTROL writes need a global GTT binding.
            valid_reloc_flags |= BoFlags::NEEDS_GTT;
        }

        Self {
            addressing: if caps.batch_first {
                AddressingMode::HandleLut
            } else {
                AddressingMode::Legacy
            },
            shadow_copy: !caps.llc,
            aperture_threshold: caps.aperture_size.as_bytes() * 3 / 4,
            capture: caps.exec_capture,
            valid_reloc_flags,
            ..Self::DEFAULT
        }
    }

    /// Set the addressing mode
    pub fn with_addressing(mut self, addressing: AddressingMode) -> Self {
        self.addressing = addressing;
        self
    }

    /// Set debug switches
    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    /// Set the aperture threshold
    pub fn with_aperture_threshold(mut self, bytes: u64) -> Self {
        self.aperture_threshold = bytes;
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
