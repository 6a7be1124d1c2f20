//! # Validation List
//!
//! The deduplicated set of buffers a batch references.
//!
//! Each entry pairs the kernel-facing [`ExecObject`] with the
//! `Arc<BufferObject>` the batch holds for it. The buffer's hint index
//! makes the common lookup O(1); a miss falls back to a linear scan.

use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashSet;

use anvil_core::{BufferObject, ExecObject, KernelHandle};

/// Buffers referenced by the current batch
#[derive(Debug)]
pub struct ValidationList {
    objects: Vec<ExecObject>,
    bos: Vec<Arc<BufferObject>>,
    aperture: u64,
}

impl ValidationList {
    /// Create an empty list
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            objects: Vec::with_capacity(capacity),
            bos: Vec::with_capacity(capacity),
            aperture: 0,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sum of the sizes of all entries at the time they were added
    pub fn aperture_space(&self) -> u64 {
        self.aperture
    }

    /// Find a buffer's index
    pub fn find(&self, bo: &BufferObject) -> Option<usize> {
        if let Some(hint) = bo.index_hint() {
            let hint = hint as usize;
            if self.bos.get(hint).is_some_and(|b| core::ptr::eq(Arc::as_ptr(b), bo)) {
                return Some(hint);
            }
        }

        self.bos
            .iter()
            .position(|b| core::ptr::eq(Arc::as_ptr(b), bo))
    }

    /// Add a buffer, returning its index.
    ///
    /// Adding a buffer that is already present returns the existing index
    /// and takes no further reference.
    pub fn add(&mut self, bo: &Arc<BufferObject>) -> usize {
        if let Some(index) = self.find(bo) {
            bo.set_index_hint(Some(index as u32));
            return index;
        }

        if self.objects.len() == self.objects.capacity() {
            let grow = self.objects.capacity().max(1);
            self.objects.reserve_exact(grow);
            self.bos.reserve_exact(grow);
            log::trace!("anvil: validation list grown to {}", self.objects.capacity());
        }

        let index = self.objects.len();
        self.objects
            .push(ExecObject::new(bo.handle(), bo.gpu_addr(), bo.flags()));
        self.bos.push(bo.clone());
        bo.set_index_hint(Some(index as u32));
        self.aperture += bo.size();
        index
    }

    /// Kernel entry at `index`
    pub fn object(&self, index: usize) -> &ExecObject {
        &self.objects[index]
    }

    /// Mutable kernel entry at `index`
    pub fn object_mut(&mut self, index: usize) -> &mut ExecObject {
        &mut self.objects[index]
    }

    /// Buffer at `index`
    pub fn bo(&self, index: usize) -> &Arc<BufferObject> {
        &self.bos[index]
    }

    /// All kernel entries
    pub fn objects(&self) -> &[ExecObject] {
        &self.objects
    }

    /// All kernel entries, for the kernel to write back addresses
    pub fn objects_mut(&mut self) -> &mut [ExecObject] {
        &mut self.objects
    }

    /// Iterate over (entry, buffer) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&ExecObject, &Arc<BufferObject>)> {
        self.objects.iter().zip(self.bos.iter())
    }

    /// Point an entry at a new backing after its buffer grew
    pub fn set_handle(&mut self, index: usize, handle: KernelHandle) {
        self.objects[index].handle = handle.raw();
    }

    /// Exchange two entries
    pub fn swap(&mut self, a: usize, b: usize) {
        self.objects.swap(a, b);
        self.bos.swap(a, b);
    }

    /// Drop every entry from `len` on, restoring the aperture footprint
    /// recorded alongside that length
    pub fn truncate(&mut self, len: usize, aperture: u64) {
        for bo in self.bos.drain(len.min(self.bos.len())..) {
            bo.set_index_hint(None);
        }
        self.objects.truncate(len);
        self.aperture = aperture;
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.truncate(0, 0);
    }

    /// Whether every buffer and kernel handle appears once
    pub fn is_consistent(&self) -> bool {
        let mut handles = HashSet::with_capacity(self.objects.len());
        let mut bos = HashSet::with_capacity(self.bos.len());
        self.iter().all(|(obj, bo)| {
            obj.handle == bo.handle().raw()
                && handles.insert(obj.handle)
                && bos.insert(Arc::as_ptr(bo))
        })
    }
}
