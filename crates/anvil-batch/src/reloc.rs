//! # Relocation Lists
//!
//! Ordered patch lists for one stream.

use alloc::vec::Vec;

use anvil_core::{KernelHandle, RelocationEntry};

/// Relocations recorded against one stream
#[derive(Debug)]
pub struct RelocationList {
    entries: Vec<RelocationEntry>,
}

impl RelocationList {
    /// Create an empty list
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append an entry, doubling the capacity when full
    pub fn push(&mut self, entry: RelocationEntry) {
        if self.entries.len() == self.entries.capacity() {
            self.entries.reserve_exact(self.entries.capacity().max(1));
        }
        self.entries.push(entry);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in emission order
    pub fn entries(&self) -> &[RelocationEntry] {
        &self.entries
    }

    /// Drop entries from `len` on
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Retarget entries naming `old` by kernel handle. Returns how many
    /// changed.
    pub fn replace_handle(&mut self, old: KernelHandle, new: KernelHandle) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| e.target == old.raw()) {
            entry.target = new.raw();
            changed += 1;
        }
        changed
    }
}
