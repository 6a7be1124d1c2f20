//! # ANVIL Batch
//!
//! Command batch construction, growth and submission.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                           Batch                                   │
//! │                                                                   │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐   │
//! │  │   Command    │   │    State     │   │   Validation List    │   │
//! │  │   Stream     │   │   Stream     │   │  (ExecObject + BO)   │   │
//! │  │ (Growable)   │   │ (Growable)   │   └──────────┬───────────┘   │
//! │  └──────┬───────┘   └──────┬───────┘              │               │
//! │         │ relocs           │ relocs               │               │
//! │         ▼                  ▼                      ▼               │
//! │  ┌───────────────────────────────────────────────────────────┐    │
//! │  │              submit::execute ──▶ Kernel::execbuffer       │    │
//! │  └───────────────────────────────────────────────────────────┘    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flow
//!
//! 1. Commands and state are written through the batch, which reserves
//!    space first and flushes or grows as needed
//! 2. Every buffer reference lands in the validation list, plus a
//!    relocation entry unless the buffer is soft-pinned
//! 3. `flush` closes the command stream, submits, adopts any addresses the
//!    kernel chose, and starts a fresh batch

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

/// Log target for performance warnings
pub const PERF_TARGET: &str = "anvil::perf";

/// Log a performance warning when `DebugFlags::PERF` is set
macro_rules! perf_debug {
    ($debug:expr, $($arg:tt)+) => {
        if $debug.contains($crate::config::DebugFlags::PERF) {
            log::warn!(target: $crate::PERF_TARGET, $($arg)+);
        }
    };
}
pub(crate) use perf_debug;

pub mod batch;
pub mod cmd;
pub mod config;
pub mod growable;
pub mod reloc;
pub mod submit;
pub mod validation;

// Re-exports
pub use batch::{Batch, BatchSnapshot, BatchStats};
pub use config::{AddressingMode, BatchConfig, DebugFlags, DeviceCaps};
pub use growable::{GrowableBuffer, HandleSwap};
pub use reloc::RelocationList;
pub use submit::BatchPhase;
pub use validation::ValidationList;
