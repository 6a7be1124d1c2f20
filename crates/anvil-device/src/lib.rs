//! # ANVIL Software Device
//!
//! An in-process implementation of the buffer manager and kernel
//! execution interface the batch engine drives.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SoftDevice                             │
//! │                                                                 │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                 Handle Registry (hashbrown)               │  │
//! │  │        handle → weak pages, size, placement, pinned       │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │  ┌─────────────────┐  ┌─────┴─────┐  ┌────────────────────┐     │
//! │  │    Device VM    │  │ execbuffer│  │ Submission Tracker │     │
//! │  │ (zones, low/hi) │  │ + patching│  │   (busy seqnos)    │     │
//! │  └─────────────────┘  └───────────┘  └────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Placement
//!
//! In soft-pin mode every buffer gets its final address at allocation, in
//! the window of its memory zone, and is pinned. Otherwise buffers are
//! bound by the kernel on first submission: 32-bit restricted buffers
//! below 4 GiB, the rest above. A presumed address supplied in the request
//! is honoured when that range is free.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod address_space;
pub mod device;
pub mod kernel;
pub mod tracker;

// Re-exports
pub use address_space::{AddressSpace, DeviceVm, VaRange, Window};
pub use device::{DeviceStats, SoftDevice, SoftDeviceConfig, Submission};
pub use tracker::{SubmissionTracker, TrackerStats};
