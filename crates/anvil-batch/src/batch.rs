//! # Batch
//!
//! The command-batch context: one command stream, one state stream, the
//! validation list and both relocation lists.
//!
//! ```text
//!   require_space / write ──▶ command stream ──┐
//!   state_alloc / state_mut ─▶ state stream ───┤
//!   batch_reloc / state_reloc ─▶ reloc lists ──┼──▶ flush ──▶ Kernel::execbuffer
//!                        └──▶ validation list ─┘              │
//!                                                             ▼
//!                                                      new batch (reset)
//! ```
//!
//! A batch serves one producer. Nothing here locks; the buffer objects it
//! shares with the producer are only touched through their atomics.

use alloc::sync::Arc;
use core::fmt;

use hashbrown::HashMap;

use anvil_core::{
    BoFlags, BufferManager, BufferObject, Error, ExecFlags, Kernel, MemoryZone, RelocFlags,
    RelocationEntry, Result, SyncFd, align_up,
};

use crate::cmd;
use crate::config::{AddressingMode, BatchConfig, DebugFlags};
use crate::growable::GrowableBuffer;
use crate::reloc::RelocationList;
use crate::submit::{self, BatchPhase, SubmitRequest};
use crate::validation::ValidationList;

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A rollback point within one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSnapshot {
    /// Command stream cursor
    pub used: usize,
    /// State stream cursor
    pub state_used: usize,
    /// Command relocation count
    pub batch_relocs: usize,
    /// State relocation count
    pub state_relocs: usize,
    /// Validation list length
    pub exec_count: usize,
    /// Aperture footprint
    pub aperture: u64,
    /// Batch the snapshot belongs to
    pub generation: u64,
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Batch statistics
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Batches submitted
    pub flushes: u64,
    /// Command stream grows
    pub batch_grows: u64,
    /// State stream grows
    pub state_grows: u64,
    /// Relocation entries recorded
    pub relocations: u64,
    /// Pinned references resolved without a relocation
    pub pinned_references: u64,
    /// Operations replayed in a fresh batch after aperture exhaustion
    pub aperture_retries: u64,
    /// Buffers the kernel moved
    pub migrations: u64,
    /// Command bytes submitted
    pub bytes_submitted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Command,
    State,
}

// =============================================================================
// BATCH
// =============================================================================

/// A command batch
pub struct Batch<M: BufferManager, K: Kernel> {
    bufmgr: M,
    kernel: K,
    config: BatchConfig,

    batch: GrowableBuffer,
    state: GrowableBuffer,
    used: usize,
    state_used: usize,

    validation: ValidationList,
    batch_relocs: RelocationList,
    state_relocs: RelocationList,

    no_wrap: bool,
    needs_sol_reset: bool,
    contains_fence_signal: bool,
    phase: BatchPhase,
    generation: u64,

    /// Always registered, so error states can identify the driver
    identifier: Option<Arc<BufferObject>>,
    last_bo: Option<Arc<BufferObject>>,
    /// First batch of the current frame, first batch of the previous frame
    throttle_batch: [Option<Arc<BufferObject>>; 2],
    need_swap_throttle: bool,
    need_flush_throttle: bool,

    /// State allocation sizes by offset, for decoders
    state_sizes: Option<HashMap<u32, u32>>,
    aperture_warned: bool,
    stats: BatchStats,
}

impl<M: BufferManager, K: Kernel> Batch<M, K> {
    /// Create a batch and start its first buffer
    pub fn new(bufmgr: M, kernel: K, config: BatchConfig) -> Result<Self> {
        let (batch, state) = Self::create_streams(&bufmgr, &config)?;
        let state_sizes = config
            .debug
            .contains(DebugFlags::BATCH)
            .then(HashMap::new);

        let mut this = Self {
            validation: ValidationList::with_capacity(config.exec_capacity),
            batch_relocs: RelocationList::with_capacity(config.reloc_capacity),
            state_relocs: RelocationList::with_capacity(config.reloc_capacity),
            bufmgr,
            kernel,
            config,
            batch,
            state,
            used: 0,
            state_used: 1,
            no_wrap: false,
            needs_sol_reset: false,
            contains_fence_signal: false,
            phase: BatchPhase::Accumulating,
            generation: 0,
            identifier: None,
            last_bo: None,
            throttle_batch: [None, None],
            need_swap_throttle: false,
            need_flush_throttle: false,
            state_sizes,
            aperture_warned: false,
            stats: BatchStats::default(),
        };
        this.begin();
        Ok(this)
    }

    fn create_streams(bufmgr: &M, config: &BatchConfig) -> Result<(GrowableBuffer, GrowableBuffer)> {
        let flags = if config.capture {
            BoFlags::CAPTURE
        } else {
            BoFlags::empty()
        };
        let batch = GrowableBuffer::create(
            bufmgr,
            "batchbuffer",
            config.batch_size,
            MemoryZone::Other,
            config.shadow_copy,
            flags,
        )?;
        let state = GrowableBuffer::create(
            bufmgr,
            "statebuffer",
            config.state_size,
            MemoryZone::Dynamic,
            config.shadow_copy,
            flags,
        )?;
        Ok((batch, state))
    }

    /// Reset counters and register the always-present buffers
    fn begin(&mut self) {
        self.used = 0;
        self.state_used = 1;
        self.no_wrap = false;
        self.needs_sol_reset = false;
        self.contains_fence_signal = false;
        self.generation += 1;
        if let Some(sizes) = &mut self.state_sizes {
            sizes.clear();
        }

        let index = self.validation.add(self.batch.bo());
        debug_assert_eq!(index, 0);
        if let Some(identifier) = &self.identifier {
            self.validation.add(identifier);
        }
    }

    /// Drop every reference and start over with fresh buffers.
    ///
    /// If the new buffers cannot be allocated the old ones are reused, so
    /// the batch is empty and usable either way.
    fn new_batch(&mut self) -> Result<()> {
        self.validation.clear();
        self.batch_relocs.clear();
        self.state_relocs.clear();

        let result = match Self::create_streams(&self.bufmgr, &self.config) {
            Ok((batch, state)) => {
                self.batch = batch;
                self.state = state;
                Ok(())
            }
            Err(err) => {
                log::warn!("anvil: reusing batch buffers: {}", err);
                Err(err)
            }
        };
        self.begin();
        result
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Buffer manager
    pub fn bufmgr(&self) -> &M {
        &self.bufmgr
    }

    /// Kernel interface
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Command stream cursor in bytes
    pub fn used(&self) -> usize {
        self.used
    }

    /// State stream cursor in bytes
    pub fn state_used(&self) -> usize {
        self.state_used
    }

    /// Command buffer
    pub fn batch_bo(&self) -> &Arc<BufferObject> {
        self.batch.bo()
    }

    /// State buffer
    pub fn state_bo(&self) -> &Arc<BufferObject> {
        self.state.bo()
    }

    /// Command buffer capacity
    pub fn batch_capacity(&self) -> usize {
        self.batch.capacity()
    }

    /// State buffer capacity
    pub fn state_capacity(&self) -> usize {
        self.state.capacity()
    }

    /// Validation list
    pub fn validation(&self) -> &ValidationList {
        &self.validation
    }

    /// Command stream relocations
    pub fn batch_relocations(&self) -> &[RelocationEntry] {
        self.batch_relocs.entries()
    }

    /// State stream relocations
    pub fn state_relocations(&self) -> &[RelocationEntry] {
        self.state_relocs.entries()
    }

    /// Lifecycle phase
    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    /// Number of batches started, including the current one
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Aperture footprint of the current batch
    pub fn aperture_space(&self) -> u64 {
        self.validation.aperture_space()
    }

    /// Get statistics
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Size recorded for a state allocation, with `DebugFlags::BATCH`
    pub fn state_size_at(&self, offset: u32) -> Option<u32> {
        self.state_sizes.as_ref()?.get(&offset).copied()
    }

    /// Whether wrapping (automatic flush) is suppressed
    pub fn no_wrap(&self) -> bool {
        self.no_wrap
    }

    /// Suppress or allow automatic flushes while emitting an atomic unit
    pub fn set_no_wrap(&mut self, no_wrap: bool) {
        self.no_wrap = no_wrap;
    }

    /// Reset stream-output offsets when this batch executes
    pub fn mark_needs_sol_reset(&mut self) {
        self.needs_sol_reset = true;
    }

    /// Record that the batch signals a fence, so an empty batch still
    /// gets submitted
    pub fn mark_contains_fence_signal(&mut self) {
        self.contains_fence_signal = true;
    }

    /// Register a buffer in every batch from now on
    pub fn set_identifier_bo(&mut self, bo: Arc<BufferObject>) {
        self.validation.add(&bo);
        self.identifier = Some(bo);
    }

    // =========================================================================
    // Command stream
    // =========================================================================

    /// Make room for `size` more command bytes.
    ///
    /// Flushes when the batch would reach its target size and wrapping is
    /// allowed; otherwise grows the buffer until the bytes fit. Room for
    /// the end of the batch is always kept on top of `size`.
    pub fn require_space(&mut self, size: usize) -> Result<()> {
        let required = self.used + size + cmd::END_RESERVE;
        if required >= self.config.batch_size && !self.no_wrap {
            self.flush()?;
        }
        self.ensure_capacity(Stream::Command, required)
    }

    /// Append raw command bytes
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.require_space(bytes.len())?;
        self.batch.write_at(self.used, bytes)?;
        self.used += bytes.len();
        Ok(())
    }

    /// Append command dwords
    pub fn write_dwords(&mut self, dwords: &[u32]) -> Result<()> {
        self.write(bytemuck::cast_slice(dwords))
    }

    /// Read back command bytes
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.batch.read_at(offset, out)
    }

    /// Emit a relocation at the cursor and write the presumed address
    pub fn write_reloc64(
        &mut self,
        target: &Arc<BufferObject>,
        delta: u32,
        flags: RelocFlags,
    ) -> Result<u64> {
        self.require_space(8)?;
        let addr = self.batch_reloc(self.used as u32, target, delta, flags)?;
        self.write(&addr.to_le_bytes())?;
        Ok(addr)
    }

    // =========================================================================
    // State stream
    // =========================================================================

    /// Allocate `size` bytes of state at `alignment`, returning the offset.
    ///
    /// Offset 0 is never returned.
    pub fn state_alloc(&mut self, size: usize, alignment: usize) -> Result<u32> {
        if !alignment.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }

        let mut offset = align_up(self.state_used, alignment);
        if offset + size >= self.config.state_size && !self.no_wrap {
            self.flush()?;
            offset = align_up(self.state_used, alignment);
        }
        self.ensure_capacity(Stream::State, offset + size)?;

        if let Some(sizes) = &mut self.state_sizes {
            sizes.insert(offset as u32, size as u32);
        }
        self.state_used = offset + size;
        Ok(offset as u32)
    }

    /// Run `f` over `len` bytes of allocated state at `offset`
    pub fn state_mut<R>(
        &mut self,
        offset: u32,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let offset = offset as usize;
        if offset + len > self.state_used {
            return Err(Error::BufferOverflow);
        }
        self.state.with_range_mut(offset, len, f)
    }

    /// Copy `data` into allocated state at `offset`
    pub fn write_state(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.state_mut(offset, data.len(), |range| range.copy_from_slice(data))
    }

    /// Read back state bytes
    pub fn read_state(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.state.read_at(offset, out)
    }

    // =========================================================================
    // Growth
    // =========================================================================

    fn ensure_capacity(&mut self, stream: Stream, required: usize) -> Result<()> {
        loop {
            let (capacity, max) = match stream {
                Stream::Command => (self.batch.capacity(), self.config.max_batch_size),
                Stream::State => (self.state.capacity(), self.config.max_state_size),
            };
            if required < capacity {
                return Ok(());
            }
            if capacity >= max {
                return Err(Error::BatchTooLarge);
            }
            self.grow(stream, (capacity + capacity / 2).min(max))?;
        }
    }

    fn grow(&mut self, stream: Stream, new_size: usize) -> Result<()> {
        let (buffer, existing) = match stream {
            Stream::Command => (&mut self.batch, self.used),
            Stream::State => (&mut self.state, self.state_used),
        };

        crate::perf_debug!(
            self.config.debug,
            "Growing {} - ran out of space ({} -> {} bytes)",
            buffer.name(),
            buffer.capacity(),
            new_size
        );

        let swap = buffer.grow(&self.bufmgr, existing, new_size)?;
        let bo = Arc::clone(buffer.bo());

        if let Some(index) = self.validation.find(&bo) {
            self.validation.set_handle(index, swap.new);
        }
        if self.config.addressing == AddressingMode::Legacy {
            self.batch_relocs.replace_handle(swap.old, swap.new);
            self.state_relocs.replace_handle(swap.old, swap.new);
        }

        match stream {
            Stream::Command => self.stats.batch_grows += 1,
            Stream::State => self.stats.state_grows += 1,
        }
        Ok(())
    }

    // =========================================================================
    // Relocations
    // =========================================================================

    /// Reference `target` from the command stream at `offset`.
    ///
    /// Returns the address to write now.
    pub fn batch_reloc(
        &mut self,
        offset: u32,
        target: &Arc<BufferObject>,
        delta: u32,
        flags: RelocFlags,
    ) -> Result<u64> {
        self.emit_reloc(Stream::Command, offset, target, delta, flags)
    }

    /// Reference `target` from the state stream at `offset`.
    ///
    /// Returns the address to write now.
    pub fn state_reloc(
        &mut self,
        offset: u32,
        target: &Arc<BufferObject>,
        delta: u32,
        flags: RelocFlags,
    ) -> Result<u64> {
        self.emit_reloc(Stream::State, offset, target, delta, flags)
    }

    fn emit_reloc(
        &mut self,
        stream: Stream,
        offset: u32,
        target: &Arc<BufferObject>,
        delta: u32,
        flags: RelocFlags,
    ) -> Result<u64> {
        let capacity = match stream {
            Stream::Command => self.batch.capacity(),
            Stream::State => self.state.capacity(),
        };
        if offset as usize + 8 > capacity {
            return Err(Error::BufferOverflow);
        }

        let index = self.validation.add(target);

        if target.is_pinned() {
            if flags.contains(RelocFlags::WRITE) {
                self.validation.object_mut(index).insert_flags(BoFlags::WRITE);
            }
            self.stats.pinned_references += 1;
            return Ok((target.gpu_addr() + delta as u64).canonical());
        }

        if flags.contains(RelocFlags::ADDR_32BIT) {
            // Sticky: the buffer stays below 4 GiB in every later batch.
            target.remove_flags(BoFlags::SUPPORTS_48B_ADDRESS);
            self.validation
                .object_mut(index)
                .remove_flags(BoFlags::SUPPORTS_48B_ADDRESS);
        }

        let entry = self.validation.object_mut(index);
        entry.insert_flags(flags.object_flags() & self.config.valid_reloc_flags);
        let presumed = entry.offset();

        let target_id = match self.config.addressing {
            AddressingMode::HandleLut => index as u32,
            AddressingMode::Legacy => target.handle().raw(),
        };
        let reloc = RelocationEntry::new(offset as u64, target_id, delta, presumed);
        match stream {
            Stream::Command => self.batch_relocs.push(reloc),
            Stream::State => self.state_relocs.push(reloc),
        }
        self.stats.relocations += 1;

        Ok(presumed.raw() + delta as u64)
    }

    /// Whether the current batch references `bo`
    pub fn references(&self, bo: &BufferObject) -> bool {
        self.validation.find(bo).is_some()
    }

    /// Whether `extra` more bytes fit in the aperture budget
    pub fn has_aperture_space(&self, extra: u64) -> bool {
        self.validation.aperture_space() + extra <= self.config.aperture_threshold
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Record a rollback point
    pub fn save(&self) -> BatchSnapshot {
        BatchSnapshot {
            used: self.used,
            state_used: self.state_used,
            batch_relocs: self.batch_relocs.len(),
            state_relocs: self.state_relocs.len(),
            exec_count: self.validation.len(),
            aperture: self.validation.aperture_space(),
            generation: self.generation,
        }
    }

    /// Roll back to `snapshot`, releasing buffers added since.
    ///
    /// A snapshot from an earlier batch is rejected.
    pub fn restore(&mut self, snapshot: &BatchSnapshot) -> Result<()> {
        if snapshot.generation != self.generation {
            return Err(Error::InvalidState);
        }

        self.validation
            .truncate(snapshot.exec_count, snapshot.aperture);
        self.batch_relocs.truncate(snapshot.batch_relocs);
        self.state_relocs.truncate(snapshot.state_relocs);
        self.used = snapshot.used;
        self.state_used = snapshot.state_used;

        if let Some(sizes) = &mut self.state_sizes {
            sizes.retain(|&offset, _| (offset as usize) < snapshot.state_used);
        }
        Ok(())
    }

    /// Emit an atomic unit, replaying it once in a fresh batch if it
    /// overflows the aperture budget.
    ///
    /// `estimate` is reserved up front and the unit is emitted with
    /// wrapping suppressed. A unit that still does not fit on its own is
    /// flushed anyway with a one-time warning.
    pub fn emit_with_aperture_retry<F>(&mut self, estimate: usize, mut emit: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        self.require_space(estimate)?;

        for attempt in 0..=1 {
            let snapshot = self.save();

            self.no_wrap = true;
            let result = emit(self);
            self.no_wrap = false;
            if let Err(err) = result {
                self.restore(&snapshot)?;
                return Err(err);
            }

            if self.has_aperture_space(0) {
                return Ok(());
            }

            // Replaying a unit that started an empty batch cannot help.
            if attempt == 0 && snapshot.used > 0 {
                crate::perf_debug!(
                    self.config.debug,
                    "Aperture footprint {} exceeds {}, replaying in a new batch",
                    self.validation.aperture_space(),
                    self.config.aperture_threshold
                );
                self.restore(&snapshot)?;
                self.flush()?;
                self.stats.aperture_retries += 1;
            } else {
                if !self.aperture_warned {
                    log::warn!(
                        target: crate::PERF_TARGET,
                        "anvil: single unit exceeded available aperture space"
                    );
                    self.aperture_warned = true;
                }
                return self.flush();
            }
        }
        Ok(())
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Submit the batch and start a new one
    pub fn flush(&mut self) -> Result<()> {
        self.flush_fence(None, false).map(|_| ())
    }

    /// Submit the batch, optionally waiting on `in_fence` and returning an
    /// out fence, then start a new one.
    ///
    /// An empty batch is not submitted unless it signals a fence. A kernel
    /// rejection is fatal.
    pub fn flush_fence(&mut self, in_fence: Option<SyncFd>, want_out: bool) -> Result<Option<SyncFd>> {
        if self.used == 0 && !self.contains_fence_signal {
            return Ok(None);
        }
        debug_assert_eq!(self.phase, BatchPhase::Accumulating);

        let used = self.used;
        let no_wrap = self.no_wrap;
        self.phase = BatchPhase::Finishing;
        self.no_wrap = true;

        let out_fence = match self.finish_and_submit(in_fence, want_out) {
            Ok(out_fence) => out_fence,
            Err(err) => {
                log::warn!("anvil: batch flush aborted: {}", err);
                self.used = used;
                self.no_wrap = no_wrap;
                self.phase = BatchPhase::Accumulating;
                return Err(err);
            }
        };
        self.last_bo = Some(Arc::clone(self.batch.bo()));

        if self.config.debug.contains(DebugFlags::SYNC) {
            log::info!("anvil: waiting for idle");
            self.bufmgr.wait_rendering(self.batch.bo());
        }

        self.stats.flushes += 1;
        self.stats.bytes_submitted += self.used as u64;

        self.phase = BatchPhase::Accumulating;
        self.new_batch()?;
        Ok(out_fence)
    }

    /// Close the batch and hand it to the kernel
    fn finish_and_submit(
        &mut self,
        in_fence: Option<SyncFd>,
        want_out: bool,
    ) -> Result<Option<SyncFd>> {
        // require_space keeps END_RESERVE bytes free, so this never grows.
        let end = cmd::end_of_batch(self.used);
        self.batch.write_at(self.used, bytemuck::cast_slice(end))?;
        self.used += end.len() * 4;
        self.batch.finish_growth();
        self.state.finish_growth();

        if self.throttle_batch[0].is_none() {
            self.throttle_batch[0] = Some(Arc::clone(self.batch.bo()));
        }

        if self
            .config
            .debug
            .intersects(DebugFlags::BATCH | DebugFlags::SUBMIT)
        {
            log::info!(
                "anvil: batch flush with {}b ({:.1}%) (pkt), {} BOs ({:.1}Mb aperture), {} batch relocs, {} state relocs",
                self.used,
                100.0 * self.used as f32 / self.config.batch_size as f32,
                self.validation.len(),
                self.validation.aperture_space() as f32 / (1024.0 * 1024.0),
                self.batch_relocs.len(),
                self.state_relocs.len()
            );
        }

        self.phase = BatchPhase::Submitting;
        self.submit(in_fence, want_out)
    }

    fn submit(&mut self, in_fence: Option<SyncFd>, want_out: bool) -> Result<Option<SyncFd>> {
        self.batch.upload(&self.bufmgr, self.used)?;
        self.state.upload(&self.bufmgr, self.state_used)?;

        // State relocations travel on the state buffer's entry.
        if !self.state_relocs.is_empty() {
            self.validation.add(self.state.bo());
        }

        #[cfg(feature = "validation")]
        if !self.validation.is_consistent() {
            log::error!("anvil: validation list out of sync with buffer handles");
            return Err(Error::InvalidState);
        }

        debug_assert_eq!(self.validation.object(0).handle(), self.batch.bo().handle());
        debug_assert!(
            self.validation
                .find(self.state.bo())
                .is_none_or(|i| self.validation.object(i).handle() == self.state.bo().handle())
        );

        let flags = if self.needs_sol_reset {
            ExecFlags::GEN7_SOL_RESET
        } else {
            ExecFlags::empty()
        };

        let request = SubmitRequest {
            validation: &mut self.validation,
            batch_relocs: &self.batch_relocs,
            state_relocs: &self.state_relocs,
            state_bo: self.state.bo(),
            batch_len: self.used as u32,
            addressing: self.config.addressing,
            context_id: self.config.context_id,
            flags,
            in_fence,
            want_out_fence: want_out,
        };

        let outcome = match submit::execute(&self.kernel, request) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("anvil: failed to submit batchbuffer: {}", err);
                panic!("anvil: failed to submit batchbuffer: {}", err);
            }
        };
        self.stats.migrations += outcome.migrations as u64;

        self.throttle();
        Ok(outcome.out_fence)
    }

    /// Flush and block until the GPU has finished the last batch
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(bo) = &self.last_bo {
            self.bufmgr.wait_rendering(bo);
        }
        Ok(())
    }

    /// Last submitted command buffer
    pub fn last_bo(&self) -> Option<&Arc<BufferObject>> {
        self.last_bo.as_ref()
    }

    // =========================================================================
    // Throttling
    // =========================================================================

    /// Throttle against the previous frame at the next submission
    pub fn request_frame_throttle(&mut self) {
        self.need_swap_throttle = true;
    }

    /// Ask the kernel to throttle at the next submission
    pub fn request_flush_throttle(&mut self) {
        self.need_flush_throttle = true;
    }

    fn throttle(&mut self) {
        if self.need_swap_throttle && self.throttle_batch[0].is_some() {
            if let Some(previous) = self.throttle_batch[1].take() {
                if self.config.throttling {
                    if self.bufmgr.is_busy(&previous) {
                        crate::perf_debug!(self.config.debug, "Stalling on the previous frame");
                    }
                    self.bufmgr.wait_rendering(&previous);
                }
            }
            self.throttle_batch[1] = self.throttle_batch[0].take();
            self.need_swap_throttle = false;
            // Waiting on the previous frame is tighter than the kernel throttle.
            self.need_flush_throttle = false;
        }

        if self.need_flush_throttle {
            self.kernel.throttle();
            self.need_flush_throttle = false;
        }
    }
}

impl<M: BufferManager, K: Kernel> fmt::Debug for Batch<M, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("generation", &self.generation)
            .field("phase", &self.phase)
            .field("used", &self.used)
            .field("state_used", &self.state_used)
            .field("objects", &self.validation.len())
            .field("batch_relocs", &self.batch_relocs.len())
            .field("state_relocs", &self.state_relocs.len())
            .field("no_wrap", &self.no_wrap)
            .finish()
    }
}
