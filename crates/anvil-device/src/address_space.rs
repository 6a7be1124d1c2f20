//! # GPU Address Space Management
//!
//! First-fit virtual address allocation for the software device.
//!
//! ```text
//!  0          4 GiB        8 GiB        12 GiB                  128 TiB
//!  ├──────────┼────────────┼────────────┼───────────────────────────┤
//!  │  Shader  │  Surface   │  Dynamic   │           Other           │  soft-pin
//!  ├──────────┴────────────┴────────────┴───────────────────────────┤
//!  │   Low    │                        High                         │  kernel placement
//!  └──────────┴─────────────────────────────────────────────────────┘
//! ```
//!
//! Page 0 is never handed out, so a zero address always means "unplaced".

use alloc::vec::Vec;

use anvil_core::{ByteSize, Error, GpuAddr, MemoryZone, Result};

// =============================================================================
// VIRTUAL ADDRESS RANGE
// =============================================================================

/// A range in GPU virtual address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaRange {
    /// Start address
    pub start: GpuAddr,
    /// End address (exclusive)
    pub end: GpuAddr,
}

impl VaRange {
    /// Create a new VA range
    pub const fn new(start: GpuAddr, size: ByteSize) -> Self {
        Self {
            start,
            end: GpuAddr(start.0 + size.as_bytes()),
        }
    }

    /// Get range size
    pub fn size(&self) -> ByteSize {
        ByteSize::from_bytes(self.end.0 - self.start.0)
    }

    /// Check if address is in range
    pub fn contains(&self, addr: GpuAddr) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Check if `other` lies entirely inside this range
    pub fn covers(&self, other: &VaRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Check if ranges overlap
    pub fn overlaps(&self, other: &VaRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// =============================================================================
// ADDRESS SPACE REGIONS
// =============================================================================

/// Fixed address space regions
pub mod regions {
    //! Standard GPU virtual address regions

    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    /// Shader zone (first page reserved)
    pub const SHADER: VaRange = VaRange {
        start: GpuAddr(4096),
        end: GpuAddr(4 * GIB),
    };

    /// Binding table and surface state zone
    pub const SURFACE: VaRange = VaRange {
        start: GpuAddr(4 * GIB),
        end: GpuAddr(8 * GIB),
    };

    /// Dynamic state zone
    pub const DYNAMIC: VaRange = VaRange {
        start: GpuAddr(8 * GIB),
        end: GpuAddr(12 * GIB),
    };

    /// Everything else
    pub const OTHER: VaRange = VaRange {
        start: GpuAddr(12 * GIB),
        end: GpuAddr(1 << 47),
    };

    /// Kernel placement window for 32-bit-restricted buffers
    pub const LOW: VaRange = VaRange {
        start: GpuAddr(4096),
        end: GpuAddr(4 * GIB),
    };

    /// Kernel placement window for 48-bit-capable buffers
    pub const HIGH: VaRange = VaRange {
        start: GpuAddr(4 * GIB),
        end: GpuAddr(1 << 47),
    };

    /// Soft-pin range of a zone
    pub const fn zone(zone: MemoryZone) -> VaRange {
        match zone {
            MemoryZone::Shader => SHADER,
            MemoryZone::Surface => SURFACE,
            MemoryZone::Dynamic => DYNAMIC,
            MemoryZone::Other => OTHER,
        }
    }
}

// =============================================================================
// VA BLOCK
// =============================================================================

/// A virtual address block
#[derive(Debug, Clone)]
struct VaBlock {
    range: VaRange,
    free: bool,
}

// =============================================================================
// ADDRESS SPACE
// =============================================================================

/// A contiguous GPU virtual address window
#[derive(Debug)]
pub struct AddressSpace {
    /// Managed range
    range: VaRange,
    /// VA blocks, sorted by address
    blocks: Vec<VaBlock>,
    /// Statistics
    stats: AddressSpaceStats,
}

/// Address space statistics
#[derive(Debug, Clone, Default)]
pub struct AddressSpaceStats {
    /// Number of allocations
    pub allocs: u64,
    /// Number of frees
    pub frees: u64,
    /// Current allocated bytes
    pub allocated: u64,
}

impl AddressSpace {
    /// Minimum placement alignment
    pub const PAGE: u64 = 4096;

    /// Create a new address space
    pub fn new(range: VaRange) -> Self {
        Self {
            range,
            blocks: alloc::vec![VaBlock { range, free: true }],
            stats: AddressSpaceStats::default(),
        }
    }

    /// Get managed range
    pub fn range(&self) -> VaRange {
        self.range
    }

    /// Allocate a virtual address range, first fit
    pub fn allocate(&mut self, size: ByteSize, alignment: u64) -> Result<VaRange> {
        let size = size.align_up(Self::PAGE).as_bytes();
        let alignment = alignment.max(Self::PAGE);

        for i in 0..self.blocks.len() {
            if !self.blocks[i].free {
                continue;
            }

            let block = self.blocks[i].range;
            let aligned_start = block.start.align_up(alignment);
            let alloc_range = VaRange {
                start: aligned_start,
                end: aligned_start + size,
            };

            if alloc_range.end <= block.end {
                self.split_block(i, alloc_range);
                self.stats.allocs += 1;
                self.stats.allocated += size;
                return Ok(alloc_range);
            }
        }

        Err(Error::OutOfAddressSpace)
    }

    /// Claim a specific range, which must currently be free
    pub fn allocate_at(&mut self, start: GpuAddr, size: ByteSize) -> Result<VaRange> {
        let size = size.align_up(Self::PAGE).as_bytes();
        let want = VaRange {
            start,
            end: start + size,
        };
        if !start.is_aligned(Self::PAGE) || !self.range.covers(&want) {
            return Err(Error::InvalidParameter);
        }

        let index = self
            .blocks
            .iter()
            .position(|b| b.free && b.range.covers(&want))
            .ok_or(Error::OutOfAddressSpace)?;

        self.split_block(index, want);
        self.stats.allocs += 1;
        self.stats.allocated += size;
        Ok(want)
    }

    /// Split a free block around an allocation
    fn split_block(&mut self, index: usize, alloc: VaRange) {
        let block = self.blocks.remove(index);

        let mut at = index;
        if alloc.start > block.range.start {
            self.blocks.insert(at, VaBlock {
                range: VaRange {
                    start: block.range.start,
                    end: alloc.start,
                },
                free: true,
            });
            at += 1;
        }

        self.blocks.insert(at, VaBlock {
            range: alloc,
            free: false,
        });

        if alloc.end < block.range.end {
            self.blocks.insert(at + 1, VaBlock {
                range: VaRange {
                    start: alloc.end,
                    end: block.range.end,
                },
                free: true,
            });
        }
    }

    /// Free a virtual address range
    pub fn free(&mut self, range: VaRange) -> Result<()> {
        let index = self
            .blocks
            .iter()
            .position(|b| b.range == range && !b.free)
            .ok_or(Error::NotFound)?;

        self.blocks[index].free = true;
        self.stats.frees += 1;
        self.stats.allocated -= range.size().as_bytes();

        self.merge_free_blocks();
        Ok(())
    }

    /// Merge adjacent free blocks
    fn merge_free_blocks(&mut self) {
        let mut i = 0;
        while i + 1 < self.blocks.len() {
            if self.blocks[i].free && self.blocks[i + 1].free {
                self.blocks[i].range.end = self.blocks[i + 1].range.end;
                self.blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }

    /// Get statistics
    pub fn stats(&self) -> &AddressSpaceStats {
        &self.stats
    }

    /// Get free space
    pub fn free_space(&self) -> ByteSize {
        ByteSize::from_bytes(
            self.blocks
                .iter()
                .filter(|b| b.free)
                .map(|b| b.range.size().as_bytes())
                .sum(),
        )
    }
}

// =============================================================================
// DEVICE VM
// =============================================================================

/// Which window a placement came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Soft-pin zone
    Zone(MemoryZone),
    /// Kernel placement below 4 GiB
    Low,
    /// Kernel placement above 4 GiB
    High,
}

/// The device's per-context virtual memory: one allocator per window.
#[derive(Debug)]
pub struct DeviceVm {
    zones: [AddressSpace; 4],
    low: AddressSpace,
    high: AddressSpace,
}

impl DeviceVm {
    /// Create the standard layout
    pub fn new() -> Self {
        Self {
            zones: MemoryZone::ALL.map(|z| AddressSpace::new(regions::zone(z))),
            low: AddressSpace::new(regions::LOW),
            high: AddressSpace::new(regions::HIGH),
        }
    }

    /// Allocator backing a window
    pub fn space(&mut self, window: Window) -> &mut AddressSpace {
        match window {
            Window::Zone(zone) => &mut self.zones[zone.index()],
            Window::Low => &mut self.low,
            Window::High => &mut self.high,
        }
    }

    /// Allocate in a window
    pub fn allocate(&mut self, window: Window, size: ByteSize) -> Result<VaRange> {
        self.space(window).allocate(size, AddressSpace::PAGE)
    }

    /// Release a placement
    pub fn free(&mut self, window: Window, range: VaRange) -> Result<()> {
        self.space(window).free(range)
    }
}

impl Default for DeviceVm {
    fn default() -> Self {
        Self::new()
    }
}
