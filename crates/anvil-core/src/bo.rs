//! # Buffer Objects
//!
//! Reference-counted GPU buffer records.
//!
//! A [`BufferObject`] is the stable, externally visible handle to a GPU
//! buffer. Its physical storage (kernel handle, size and CPU-visible pages)
//! lives behind one level of indirection in a [`Backing`] slot. Growing a
//! buffer exchanges backing slots between two records, so every holder of
//! the `Arc<BufferObject>` keeps observing the same logical buffer while the
//! storage underneath it changes.
//!
//! ```text
//!   Arc<BufferObject> ──▶ ┌────────────────────────┐
//!   (held by producers,   │ gpu_addr  flags  hint  │  logical, stable
//!    fences, the batch)   ├────────────────────────┤
//!                         │ backing: Mutex<Backing>│──▶ handle, size, pages
//!                         └────────────────────────┘    (swappable)
//! ```

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::flags::BoFlags;
use crate::types::{GpuAddr, KernelHandle};

// =============================================================================
// MEMORY ZONE
// =============================================================================

/// Region of the GPU address space a buffer is placed in.
///
/// Base-address registers cover one zone each, so buffers referenced
/// through a base (shaders, surface state, dynamic state) must stay inside
/// their zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryZone {
    /// Shader kernels (instruction base)
    Shader,
    /// Binding tables and surface state (surface state base)
    Surface,
    /// Indirect/dynamic state (dynamic state base)
    Dynamic,
    /// Everything else, including command buffers
    Other,
}

impl MemoryZone {
    /// All zones, in address order
    pub const ALL: [MemoryZone; 4] = [Self::Shader, Self::Surface, Self::Dynamic, Self::Other];

    /// Zone index for per-zone tables
    pub const fn index(self) -> usize {
        match self {
            Self::Shader => 0,
            Self::Surface => 1,
            Self::Dynamic => 2,
            Self::Other => 3,
        }
    }
}

// =============================================================================
// HOST PAGES
// =============================================================================

/// CPU-visible storage behind a buffer object.
///
/// The bytes sit behind a lock; every access is a copy or a closure scoped
/// to the lock, so two mappings of the same pages never alias.
pub struct HostPages {
    len: usize,
    bytes: Mutex<Box<[u8]>>,
}

impl HostPages {
    /// Allocate zeroed pages
    pub fn zeroed(len: usize) -> Self {
        Self {
            len,
            bytes: Mutex::new(vec![0u8; len].into_boxed_slice()),
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the storage is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy bytes out of the pages
    pub fn read(&self, offset: usize, out: &mut [u8]) {
        let bytes = self.bytes.lock();
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
    }

    /// Copy bytes into the pages
    pub fn write(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Run `f` over the whole storage.
    ///
    /// The pages stay locked for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.bytes.lock()[..])
    }

    /// Run `f` over the whole storage, mutably.
    ///
    /// The pages stay locked for the duration of `f`.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.bytes.lock()[..])
    }
}

impl fmt::Debug for HostPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPages").field("len", &self.len).finish()
    }
}

// =============================================================================
// MAPPING
// =============================================================================

/// A CPU mapping of a buffer's pages.
///
/// The mapping keeps the pages alive, so it stays valid even after the
/// buffer object it came from has exchanged its backing.
#[derive(Debug)]
pub struct Mapping {
    pages: Arc<HostPages>,
}

impl Mapping {
    /// Map the given pages
    pub fn new(pages: Arc<HostPages>) -> Self {
        Self { pages }
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Copy mapped bytes out
    pub fn read(&self, offset: usize, out: &mut [u8]) {
        self.pages.read(offset, out);
    }

    /// Copy bytes into the mapping
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        self.pages.write(offset, data);
    }

    /// Run `f` over the mapped bytes
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.pages.with(f)
    }

    /// Run `f` over the mapped bytes, mutably
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.pages.with_mut(f)
    }
}

// =============================================================================
// BACKING
// =============================================================================

/// Physical storage of a buffer object: the swappable slot.
#[derive(Debug)]
pub struct Backing {
    handle: KernelHandle,
    size: u64,
    pages: Arc<HostPages>,
}

impl Backing {
    /// Create a backing with freshly allocated pages
    pub fn new(handle: KernelHandle, size: u64) -> Self {
        Self::with_pages(handle, size, Arc::new(HostPages::zeroed(size as usize)))
    }

    /// Create a backing over existing pages
    pub fn with_pages(handle: KernelHandle, size: u64, pages: Arc<HostPages>) -> Self {
        debug_assert!(pages.len() as u64 >= size);
        Self {
            handle,
            size,
            pages,
        }
    }

    /// Kernel handle
    pub fn handle(&self) -> KernelHandle {
        self.handle
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

// =============================================================================
// BUFFER OBJECT
// =============================================================================

const NO_INDEX: u32 = u32::MAX;

/// A GPU buffer object.
///
/// Shared as `Arc<BufferObject>`: the strong count is the reference count.
/// Address, flags, hint index and idle bit are atomics so that producers
/// holding the `Arc` can query them without borrowing the batch.
pub struct BufferObject {
    name: &'static str,
    zone: MemoryZone,
    backing: Mutex<Backing>,
    gpu_addr: AtomicU64,
    flags: AtomicU64,
    index: AtomicU32,
    idle: AtomicBool,
}

impl BufferObject {
    /// Create a buffer object record
    pub fn new(
        name: &'static str,
        zone: MemoryZone,
        backing: Backing,
        gpu_addr: GpuAddr,
        flags: BoFlags,
    ) -> Self {
        Self {
            name,
            zone,
            backing: Mutex::new(backing),
            gpu_addr: AtomicU64::new(gpu_addr.raw()),
            flags: AtomicU64::new(flags.bits()),
            index: AtomicU32::new(NO_INDEX),
            idle: AtomicBool::new(true),
        }
    }

    /// Debug name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Memory zone the buffer was allocated in
    pub fn zone(&self) -> MemoryZone {
        self.zone
    }

    /// Kernel handle of the current backing
    pub fn handle(&self) -> KernelHandle {
        self.backing.lock().handle()
    }

    /// Size of the current backing
    pub fn size(&self) -> u64 {
        self.backing.lock().size()
    }

    /// Map the current backing
    pub fn map(&self) -> Mapping {
        Mapping::new(self.backing.lock().pages.clone())
    }

    /// Presumed GPU address
    pub fn gpu_addr(&self) -> GpuAddr {
        GpuAddr(self.gpu_addr.load(Ordering::Relaxed))
    }

    /// Record the GPU address reported by the kernel
    pub fn set_gpu_addr(&self, addr: GpuAddr) {
        self.gpu_addr.store(addr.raw(), Ordering::Relaxed);
    }

    /// Capability flags
    pub fn flags(&self) -> BoFlags {
        BoFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    /// Set capability flags. Persists across batches.
    pub fn insert_flags(&self, flags: BoFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    /// Clear capability flags. Persists across batches.
    pub fn remove_flags(&self, flags: BoFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
    }

    /// Whether the address is fixed by the driver
    pub fn is_pinned(&self) -> bool {
        self.flags().contains(BoFlags::PINNED)
    }

    /// Cached position in the current validation list. Must be confirmed
    /// against the list before use.
    pub fn index_hint(&self) -> Option<u32> {
        match self.index.load(Ordering::Relaxed) {
            NO_INDEX => None,
            index => Some(index),
        }
    }

    /// Update the cached validation-list position
    pub fn set_index_hint(&self, index: Option<u32>) {
        self.index.store(index.unwrap_or(NO_INDEX), Ordering::Relaxed);
    }

    /// Whether the buffer is known idle (never submitted since last wait)
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Relaxed)
    }

    /// Update the idle bit
    pub fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Relaxed);
    }

    /// Exchange backing slots with `other`.
    ///
    /// Everything logical (address, flags, hint, identity) stays put on
    /// both records; only the storage moves.
    pub fn exchange_backing(&self, other: &BufferObject) {
        debug_assert!(!core::ptr::eq(self, other));
        let mut mine = self.backing.lock();
        let mut theirs = other.backing.lock();
        core::mem::swap(&mut *mine, &mut *theirs);
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("name", &self.name)
            .field("handle", &self.handle())
            .field("size", &self.size())
            .field("gpu_addr", &self.gpu_addr())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bo(name: &'static str, handle: u32, size: u64) -> BufferObject {
        BufferObject::new(
            name,
            MemoryZone::Other,
            Backing::new(KernelHandle(handle), size),
            GpuAddr::new(0x10000),
            BoFlags::SUPPORTS_48B_ADDRESS,
        )
    }

    #[test]
    fn test_exchange_keeps_logical_state() {
        let a = bo("batch", 1, 4096);
        let b = bo("batch", 2, 8192);
        a.set_index_hint(Some(0));
        b.set_gpu_addr(GpuAddr::new(0x90000));

        a.exchange_backing(&b);

        assert_eq!(a.handle(), KernelHandle(2));
        assert_eq!(a.size(), 8192);
        assert_eq!(a.gpu_addr(), GpuAddr::new(0x10000));
        assert_eq!(a.index_hint(), Some(0));
        assert_eq!(b.handle(), KernelHandle(1));
        assert_eq!(b.size(), 4096);
        assert_eq!(a.zone(), MemoryZone::Other);
    }

    #[test]
    fn test_mapping_outlives_exchange() {
        let a = bo("state", 1, 64);
        let b = bo("state", 2, 128);
        let mut old = a.map();
        old.write(0, &[0xAA]);

        a.exchange_backing(&b);
        drop(b);

        assert_eq!(old.with(|bytes| bytes[0]), 0xAA);
        assert_eq!(a.map().with(|bytes| bytes[0]), 0);
    }

    #[test]
    fn test_two_mappings_share_pages() {
        let a = bo("shared", 4, 64);
        let mut first = a.map();
        let second = a.map();

        first.with_mut(|bytes| bytes[..4].copy_from_slice(&[1, 2, 3, 4]));
        let mut out = [0u8; 4];
        second.read(0, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);

        first.write(2, &[9]);
        assert_eq!(second.with(|bytes| bytes[2]), 9);
        assert_eq!(second.len(), 64);
    }

    #[test]
    fn test_sticky_flags() {
        let a = bo("vbo", 3, 64);
        a.remove_flags(BoFlags::SUPPORTS_48B_ADDRESS);
        a.insert_flags(BoFlags::CAPTURE);
        assert!(!a.flags().contains(BoFlags::SUPPORTS_48B_ADDRESS));
        assert!(a.flags().contains(BoFlags::CAPTURE));
        assert!(!a.is_pinned());
    }
}
