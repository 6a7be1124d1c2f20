//! # Software Device
//!
//! An in-process buffer manager and kernel.
//!
//! `SoftDevice` owns a handle registry, the per-context VM and a
//! submission tracker. Buffer objects are handed out as
//! `Arc<BufferObject>`; the registry only keeps a weak reference to each
//! backing's pages, so a backing dropped by its last holder is reaped
//! lazily on the next allocation or submission.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use hashbrown::HashMap;
use spin::Mutex;

use anvil_core::{
    AllocDesc, Backing, BoFlags, BufferManager, BufferObject, ByteSize, Error, ExecFlags,
    ExecObject, GpuAddr, HostPages, KernelError, KernelHandle, Mapping, Result, SyncFd,
};

use crate::address_space::{DeviceVm, VaRange, Window};
use crate::tracker::SubmissionTracker;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Software device configuration
#[derive(Debug, Clone)]
pub struct SoftDeviceConfig {
    /// Buffer addresses are assigned at allocation time and pinned
    pub softpin: bool,
    /// CPU and GPU share a coherent last-level cache
    pub llc: bool,
    /// Largest working set a single submission may reference
    pub aperture_size: ByteSize,
    /// Device name for logs
    pub name: &'static str,
}

impl SoftDeviceConfig {
    /// Soft-pin device with LLC (gen8+ class)
    pub const SOFTPIN: Self = Self {
        softpin: true,
        llc: true,
        aperture_size: ByteSize::from_mib(256),
        name: "soft-gen8",
    };

    /// Kernel-placement device with LLC (gen7 class)
    pub const RELOCATION: Self = Self {
        softpin: false,
        llc: true,
        aperture_size: ByteSize::from_mib(256),
        name: "soft-gen7",
    };

    /// Kernel-placement device without LLC (atom class)
    pub const NO_LLC: Self = Self {
        softpin: false,
        llc: false,
        aperture_size: ByteSize::from_mib(128),
        name: "soft-vlv",
    };

    /// Override the aperture size
    pub const fn with_aperture(mut self, size: ByteSize) -> Self {
        self.aperture_size = size;
        self
    }
}

impl Default for SoftDeviceConfig {
    fn default() -> Self {
        Self::SOFTPIN
    }
}

// =============================================================================
// SUBMISSION LOG
// =============================================================================

/// A recorded execbuffer call
#[derive(Debug, Clone)]
pub struct Submission {
    /// Seqno assigned to the submission
    pub seqno: u64,
    /// Validation list as placed by the kernel
    pub objects: Vec<ExecObject>,
    /// Index of the batch object in `objects`
    pub batch_index: usize,
    /// Executed batch bytes, after relocation patching
    pub batch: Vec<u8>,
    /// Hardware context
    pub context_id: u32,
    /// Request flags
    pub flags: ExecFlags,
    /// Input fence
    pub in_fence: Option<SyncFd>,
    /// Output fence
    pub out_fence: Option<SyncFd>,
    /// Relocation entries received
    pub relocations: usize,
    /// Relocation entries the kernel had to patch
    pub patched: usize,
}

impl Submission {
    /// Read a dword of the executed batch
    pub fn batch_dword(&self, index: usize) -> u32 {
        let at = index * 4;
        u32::from_le_bytes([
            self.batch[at],
            self.batch[at + 1],
            self.batch[at + 2],
            self.batch[at + 3],
        ])
    }

    /// Number of dwords executed
    pub fn batch_dwords(&self) -> usize {
        self.batch.len() / 4
    }

    /// Handles of the validation list, in order
    pub fn handles(&self) -> Vec<KernelHandle> {
        self.objects.iter().map(ExecObject::handle).collect()
    }
}

/// Device statistics
#[derive(Debug, Clone, Default)]
pub struct DeviceStats {
    /// Buffers allocated
    pub allocs: u64,
    /// Backings reaped after their last holder dropped them
    pub reaped: u64,
    /// Mappings handed out
    pub maps: u64,
    /// Successful submissions
    pub execs: u64,
    /// Rejected submissions
    pub exec_failures: u64,
    /// Objects the kernel moved
    pub migrations: u64,
    /// Throttle calls
    pub throttles: u64,
}

// =============================================================================
// DEVICE STATE
// =============================================================================

#[derive(Debug)]
pub(crate) struct ObjectInfo {
    pub(crate) pages: Weak<HostPages>,
    pub(crate) size: u64,
    pub(crate) placement: Option<(Window, VaRange)>,
    pub(crate) pinned: bool,
}

#[derive(Debug)]
pub(crate) struct DeviceState {
    pub(crate) next_handle: u32,
    pub(crate) objects: HashMap<u32, ObjectInfo>,
    pub(crate) vm: DeviceVm,
    pub(crate) tracker: SubmissionTracker,
    pub(crate) submissions: Vec<Submission>,
    pub(crate) fail_next_exec: Option<KernelError>,
    pub(crate) fail_next_alloc: bool,
    pub(crate) stats: DeviceStats,
}

impl DeviceState {
    /// Drop registry entries whose pages are gone
    pub(crate) fn reap(&mut self) {
        let dead: Vec<u32> = self
            .objects
            .iter()
            .filter(|(_, info)| info.pages.strong_count() == 0)
            .map(|(&handle, _)| handle)
            .collect();

        for handle in dead {
            if let Some(info) = self.objects.remove(&handle) {
                if let Some((window, range)) = info.placement {
                    // Registry and VM are updated together; a missing range is a bug.
                    let freed = self.vm.free(window, range);
                    debug_assert!(freed.is_ok());
                }
                self.tracker.forget(handle);
                self.stats.reaped += 1;
            }
        }
    }
}

// =============================================================================
// SOFT DEVICE
// =============================================================================

/// Software buffer manager and kernel
#[derive(Debug)]
pub struct SoftDevice {
    config: SoftDeviceConfig,
    pub(crate) state: Mutex<DeviceState>,
}

impl SoftDevice {
    /// Create a device
    pub fn new(config: SoftDeviceConfig) -> Self {
        log::info!(
            "anvil-device: {} (softpin: {}, llc: {}, aperture: {})",
            config.name,
            config.softpin,
            config.llc,
            config.aperture_size
        );
        Self {
            config,
            state: Mutex::new(DeviceState {
                next_handle: 1,
                objects: HashMap::new(),
                vm: DeviceVm::new(),
                tracker: SubmissionTracker::new(),
                submissions: Vec::new(),
                fail_next_exec: None,
                fail_next_alloc: false,
                stats: DeviceStats::default(),
            }),
        }
    }

    /// Create a shared device
    pub fn shared(config: SoftDeviceConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Get the configuration
    pub fn config(&self) -> &SoftDeviceConfig {
        &self.config
    }

    /// Fail the next execbuffer with `err`
    pub fn fail_next_exec(&self, err: KernelError) {
        self.state.lock().fail_next_exec = Some(err);
    }

    /// Fail the next allocation
    pub fn fail_next_alloc(&self) {
        self.state.lock().fail_next_alloc = true;
    }

    /// All submissions so far
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    /// Most recent submission
    pub fn last_submission(&self) -> Option<Submission> {
        self.state.lock().submissions.last().cloned()
    }

    /// Number of submissions so far
    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    /// Complete all outstanding GPU work
    pub fn retire_all(&self) {
        self.state.lock().tracker.retire_all();
    }

    /// Whether an out fence has signalled
    pub fn is_fence_signalled(&self, fence: SyncFd) -> bool {
        self.state.lock().tracker.is_complete(fence.raw() as u64)
    }

    /// Address the kernel currently has the object bound at
    pub fn placement(&self, handle: KernelHandle) -> Option<GpuAddr> {
        self.state
            .lock()
            .objects
            .get(&handle.raw())
            .and_then(|info| info.placement)
            .map(|(_, range)| range.start)
    }

    /// Move a bound, unpinned object elsewhere, as the kernel does under
    /// memory pressure. The buffer learns its new address at its next
    /// submission.
    pub fn evict(&self, bo: &BufferObject) -> Result<GpuAddr> {
        let mut state = self.state.lock();
        let handle = bo.handle().raw();
        let info = state.objects.get(&handle).ok_or(Error::NotFound)?;
        if info.pinned {
            return Err(Error::InvalidState);
        }
        let (window, old) = info.placement.ok_or(Error::InvalidState)?;
        let size = info.size;

        let new = state.vm.allocate(window, ByteSize::from_bytes(size))?;
        state.vm.free(window, old)?;
        if let Some(info) = state.objects.get_mut(&handle) {
            info.placement = Some((window, new));
        }
        state.stats.migrations += 1;
        Ok(new.start)
    }

    /// Number of live registered backings
    pub fn live_objects(&self) -> usize {
        let mut state = self.state.lock();
        state.reap();
        state.objects.len()
    }

    /// Get statistics
    pub fn stats(&self) -> DeviceStats {
        self.state.lock().stats.clone()
    }

    /// Explicit waits that had to retire work
    pub fn blocking_waits(&self) -> u64 {
        self.state.lock().tracker.stats().blocking_waits
    }
}

// =============================================================================
// BUFFER MANAGER
// =============================================================================

impl BufferManager for SoftDevice {
    fn alloc(&self, desc: &AllocDesc) -> Result<Arc<BufferObject>> {
        if desc.size.as_bytes() == 0 {
            return Err(Error::InvalidParameter);
        }

        let mut state = self.state.lock();
        if core::mem::take(&mut state.fail_next_alloc) {
            log::warn!("anvil-device: injected allocation failure for {}", desc.name);
            return Err(Error::AllocationFailed);
        }
        state.reap();

        let size = desc.size.align_up(4096);
        let mut flags = desc.flags | BoFlags::SUPPORTS_48B_ADDRESS;
        if self.config.softpin {
            flags |= BoFlags::PINNED;
        }

        let pinned = flags.contains(BoFlags::PINNED);
        let placement = if !pinned {
            None
        } else if self.config.softpin {
            let window = Window::Zone(desc.zone);
            Some((window, state.vm.allocate(window, size)?))
        } else {
            Some((Window::High, state.vm.allocate(Window::High, size)?))
        };

        let handle = state.next_handle;
        state.next_handle += 1;

        let pages = Arc::new(HostPages::zeroed(size.as_usize()));
        state.objects.insert(handle, ObjectInfo {
            pages: Arc::downgrade(&pages),
            size: size.as_bytes(),
            placement,
            pinned,
        });
        state.stats.allocs += 1;

        let addr = placement.map_or(GpuAddr::null(), |(_, range)| range.start);
        log::trace!(
            "anvil-device: alloc {} handle {} size {} at {}",
            desc.name,
            handle,
            size,
            addr
        );

        Ok(Arc::new(BufferObject::new(
            desc.name,
            desc.zone,
            Backing::with_pages(KernelHandle(handle), size.as_bytes(), pages),
            addr,
            flags,
        )))
    }

    fn map(&self, bo: &BufferObject) -> Result<Mapping> {
        let mut state = self.state.lock();
        if !state.objects.contains_key(&bo.handle().raw()) {
            return Err(Error::MappingFailed);
        }
        state.stats.maps += 1;
        Ok(bo.map())
    }

    fn is_busy(&self, bo: &BufferObject) -> bool {
        self.state.lock().tracker.is_busy(bo.handle().raw())
    }

    fn wait_rendering(&self, bo: &BufferObject) {
        self.state.lock().tracker.wait(bo.handle().raw());
    }

    fn uses_softpin(&self) -> bool {
        self.config.softpin
    }

    fn has_llc(&self) -> bool {
        self.config.llc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::MemoryZone;

    #[test]
    fn test_softpin_alloc_is_pinned_in_zone() {
        let dev = SoftDevice::new(SoftDeviceConfig::SOFTPIN);
        let bo = dev
            .alloc(&AllocDesc::new("state", ByteSize::from_kib(16), MemoryZone::Dynamic))
            .unwrap();
        assert!(bo.is_pinned());
        assert_eq!(bo.gpu_addr(), crate::address_space::regions::DYNAMIC.start);
        assert_eq!(dev.placement(bo.handle()), Some(bo.gpu_addr()));
    }

    #[test]
    fn test_relocation_alloc_is_unplaced() {
        let dev = SoftDevice::new(SoftDeviceConfig::RELOCATION);
        let bo = dev
            .alloc(&AllocDesc::new("vbo", ByteSize::from_bytes(100), MemoryZone::Other))
            .unwrap();
        assert!(!bo.is_pinned());
        assert!(bo.gpu_addr().is_null());
        assert_eq!(bo.size(), 4096);
        assert!(bo.flags().contains(BoFlags::SUPPORTS_48B_ADDRESS));
    }

    #[test]
    fn test_reap_after_last_drop() {
        let dev = SoftDevice::new(SoftDeviceConfig::SOFTPIN);
        let a = dev.alloc(&AllocDesc::default()).unwrap();
        let b = dev.alloc(&AllocDesc::default()).unwrap();
        assert_eq!(dev.live_objects(), 2);

        let map = dev.map(&a).unwrap();
        drop(a);
        assert_eq!(dev.live_objects(), 2);
        drop(map);
        assert_eq!(dev.live_objects(), 1);
        drop(b);
        assert_eq!(dev.live_objects(), 0);
        assert_eq!(dev.stats().reaped, 2);
    }

    #[test]
    fn test_injected_alloc_failure() {
        let dev = SoftDevice::new(SoftDeviceConfig::SOFTPIN);
        dev.fail_next_alloc();
        assert_eq!(dev.alloc(&AllocDesc::default()).unwrap_err(), Error::AllocationFailed);
        assert!(dev.alloc(&AllocDesc::default()).is_ok());
    }
}
