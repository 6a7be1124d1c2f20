//! # Growable Buffer
//!
//! A CPU-writable stream backed by a GPU buffer object that can be
//! enlarged while other code still holds the buffer's handle.
//!
//! ```text
//!   grow(existing = 20K, new = 30K)
//!
//!   bo (stable Arc) ───── backing ──▶ [ new 30K pages                ]
//!                                       ▲ writes at offset >= 20K
//!   pending.old (temp) ── backing ──▶ [ old 20K pages ]
//!                                       ▲ reads/writes below 20K
//!
//!   finish_growth(): copy old[..20K] → new[..20K], drop pending
//! ```
//!
//! The GPU address and flags live on the stable object and never move;
//! only the kernel handle and pages change.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use anvil_core::{
    AllocDesc, BoFlags, BufferManager, BufferObject, ByteSize, Error, KernelHandle, Mapping,
    MemoryZone, Result,
};

// =============================================================================
// CPU MAPPING
// =============================================================================

/// Where CPU writes land
#[derive(Debug)]
enum CpuMap {
    /// Directly into the buffer's pages
    Direct(Mapping),
    /// Into host memory, uploaded at flush
    Shadow(Vec<u8>),
}

impl CpuMap {
    fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match self {
            Self::Direct(map) => map.with(f),
            Self::Shadow(shadow) => f(&shadow[..]),
        }
    }

    fn with_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        match self {
            Self::Direct(map) => map.with_mut(f),
            Self::Shadow(shadow) => f(&mut shadow[..]),
        }
    }
}

/// A grow that has not been finalised yet
#[derive(Debug)]
struct PendingGrowth {
    /// Temporary record now holding the old backing
    old: Arc<BufferObject>,
    /// Mapping of the old backing
    old_map: CpuMap,
    /// Bytes that existed before the grow
    bytes: usize,
}

/// Kernel handles before and after a grow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleSwap {
    /// Handle of the old backing
    pub old: KernelHandle,
    /// Handle of the new backing
    pub new: KernelHandle,
}

// =============================================================================
// GROWABLE BUFFER
// =============================================================================

/// A growable, CPU-mapped GPU buffer
#[derive(Debug)]
pub struct GrowableBuffer {
    name: &'static str,
    bo: Arc<BufferObject>,
    map: CpuMap,
    pending: Option<PendingGrowth>,
}

impl GrowableBuffer {
    /// Allocate and map a buffer of `size` bytes.
    ///
    /// Soft-pinned buffers cannot grow, so they are allocated at twice the
    /// size.
    pub fn create<M: BufferManager>(
        bufmgr: &M,
        name: &'static str,
        size: usize,
        zone: MemoryZone,
        shadow: bool,
        flags: BoFlags,
    ) -> Result<Self> {
        let size = if bufmgr.uses_softpin() { size * 2 } else { size };
        let desc = AllocDesc::new(name, ByteSize::from_bytes(size as u64), zone).with_flags(flags);
        let bo = bufmgr.alloc(&desc)?;

        let map = if shadow {
            CpuMap::Shadow(vec![0u8; bo.size() as usize])
        } else {
            CpuMap::Direct(bufmgr.map(&bo)?)
        };

        Ok(Self {
            name,
            bo,
            map,
            pending: None,
        })
    }

    /// Buffer name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The stable buffer handle
    pub fn bo(&self) -> &Arc<BufferObject> {
        &self.bo
    }

    /// Current capacity in bytes
    pub fn capacity(&self) -> usize {
        self.bo.size() as usize
    }

    /// Whether a grow is waiting for `finish_growth`
    pub fn is_growing(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether writes go to a host shadow
    pub fn is_shadowed(&self) -> bool {
        matches!(self.map, CpuMap::Shadow(_))
    }

    /// Move to a bigger backing of `new_size` bytes, keeping the handle.
    ///
    /// `existing_bytes` is how much of the buffer is in use; those bytes are
    /// carried over by `finish_growth`.
    pub fn grow<M: BufferManager>(
        &mut self,
        bufmgr: &M,
        existing_bytes: usize,
        new_size: usize,
    ) -> Result<HandleSwap> {
        if self.bo.is_pinned() {
            return Err(Error::GrowPinned);
        }

        // One pending grow per buffer.
        if self.pending.is_some() {
            self.finish_growth();
        }

        let size = ByteSize::from_bytes(new_size as u64);
        let desc = AllocDesc::new(self.name, size, self.bo.zone());
        let new_bo = bufmgr.alloc(&desc)?;
        let new_map = match self.map {
            CpuMap::Shadow(_) => CpuMap::Shadow(vec![0u8; new_bo.size() as usize]),
            CpuMap::Direct(_) => CpuMap::Direct(bufmgr.map(&new_bo)?),
        };

        let old = self.bo.handle();
        self.bo.exchange_backing(&new_bo);
        let new = self.bo.handle();

        self.pending = Some(PendingGrowth {
            old: new_bo,
            old_map: core::mem::replace(&mut self.map, new_map),
            bytes: existing_bytes,
        });

        Ok(HandleSwap { old, new })
    }

    /// Carry the pre-grow contents into the new backing and release the
    /// old one
    pub fn finish_growth(&mut self) {
        if let Some(pending) = self.pending.take() {
            let bytes = pending.bytes;
            pending.old_map.with(|old| {
                self.map
                    .with_mut(|new| new[..bytes].copy_from_slice(&old[..bytes]))
            });
            log::trace!(
                "anvil: {} finished growing, copied {} bytes from handle {}",
                self.name,
                bytes,
                pending.old.handle()
            );
        }
    }

    /// Run `f` over `[offset, offset + len)`.
    ///
    /// While a grow is pending, ranges below the pre-grow size resolve to
    /// the old mapping and the rest to the new one. A range straddling the
    /// boundary finishes the grow first.
    pub fn with_range_mut<R>(
        &mut self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let end = self.check_range(offset, len)?;

        let straddles = self
            .pending
            .as_ref()
            .is_some_and(|p| offset < p.bytes && end > p.bytes);
        if straddles {
            self.finish_growth();
        }

        let map = match &mut self.pending {
            Some(pending) if end <= pending.bytes => &mut pending.old_map,
            _ => &mut self.map,
        };
        Ok(map.with_mut(|bytes| f(&mut bytes[offset..end])))
    }

    /// Copy `data` in at `offset`
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.with_range_mut(offset, data.len(), |range| range.copy_from_slice(data))
    }

    /// Copy bytes out, honouring a pending grow
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let end = self.check_range(offset, out.len())?;

        // Bytes below the pre-grow size still live in the old backing.
        let split = match &self.pending {
            Some(pending) => pending.bytes.clamp(offset, end),
            None => offset,
        };
        let (low, high) = out.split_at_mut(split - offset);
        if let Some(pending) = &self.pending {
            pending.old_map.with(|old| low.copy_from_slice(&old[offset..split]));
        }
        self.map.with(|bytes| high.copy_from_slice(&bytes[split..end]));
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<usize> {
        let end = offset.checked_add(len).ok_or(Error::BufferOverflow)?;
        if end > self.capacity() {
            return Err(Error::BufferOverflow);
        }
        Ok(end)
    }

    /// Copy the first `len` shadow bytes into the buffer
    pub fn upload<M: BufferManager>(&self, bufmgr: &M, len: usize) -> Result<()> {
        debug_assert!(self.pending.is_none());
        if let CpuMap::Shadow(shadow) = &self.map {
            let mut map = bufmgr.map(&self.bo)?;
            map.write(0, &shadow[..len]);
            bufmgr.unmap(map);
        }
        Ok(())
    }
}
