//! # ANVIL Core
//!
//! Foundational types shared by the batch engine and its collaborators.
//!
//! This crate defines the boundary between the command-batch engine and
//! the two external systems it drives: the buffer-object manager and the
//! kernel execution interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        anvil-core                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Traits    │  │   Buffer    │  │    Kernel ABI       │  │
//! │  │ (BufferMgr, │  │  Objects    │  │ (ExecObject, Reloc, │  │
//! │  │   Kernel)   │  │ (BO, Pages) │  │    ExecBuffer)      │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod bo;
pub mod error;
pub mod exec;
pub mod flags;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use bo::{Backing, BufferObject, HostPages, Mapping, MemoryZone};
pub use error::{Error, KernelError, Result};
pub use exec::{ExecBuffer, ExecObject, RelocAttachment, RelocationEntry};
pub use flags::{BoFlags, ExecFlags, RelocFlags};
pub use traits::*;
pub use types::*;
