//! # Submission
//!
//! Turn a finished batch into a kernel execution request, then fold the
//! kernel's answer back into the buffers.
//!
//! ```text
//!   ACCUMULATING ──flush──▶ FINISHING ──▶ SUBMITTING ──new batch──▶ ACCUMULATING
//!                           end marker     execbuffer
//!                           finish grows   address updates
//! ```

use alloc::vec::Vec;

use anvil_core::{
    BufferObject, ExecBuffer, ExecFlags, Kernel, KernelError, RelocAttachment, SyncFd,
};

use crate::config::AddressingMode;
use crate::reloc::RelocationList;
use crate::validation::ValidationList;

// =============================================================================
// PHASE
// =============================================================================

/// Where a batch is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// Accepting commands, state and relocations
    Accumulating,
    /// Closing the command stream and finalising grows
    Finishing,
    /// Inside the kernel call
    Submitting,
}

// =============================================================================
// REQUEST
// =============================================================================

/// Everything needed to build one execbuffer call
#[derive(Debug)]
pub(crate) struct SubmitRequest<'a> {
    pub validation: &'a mut ValidationList,
    pub batch_relocs: &'a RelocationList,
    pub state_relocs: &'a RelocationList,
    pub state_bo: &'a BufferObject,
    pub batch_len: u32,
    pub addressing: AddressingMode,
    pub context_id: u32,
    pub flags: ExecFlags,
    pub in_fence: Option<SyncFd>,
    pub want_out_fence: bool,
}

/// What came back from a successful submission
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubmitOutcome {
    pub out_fence: Option<SyncFd>,
    pub migrations: usize,
}

/// Submit a finished batch.
///
/// The command buffer must be entry 0 of the validation list. In legacy
/// addressing it is moved to the end first.
pub(crate) fn execute<K: Kernel>(
    kernel: &K,
    req: SubmitRequest<'_>,
) -> core::result::Result<SubmitOutcome, KernelError> {
    let SubmitRequest {
        validation,
        batch_relocs,
        state_relocs,
        state_bo,
        batch_len,
        addressing,
        context_id,
        mut flags,
        in_fence,
        want_out_fence,
    } = req;

    let mut state_index = validation.find(state_bo);
    let batch_index = match addressing {
        AddressingMode::HandleLut => {
            flags |= ExecFlags::BATCH_FIRST | ExecFlags::HANDLE_LUT;
            0
        }
        AddressingMode::Legacy => {
            let last = validation.len() - 1;
            validation.swap(0, last);
            state_index = state_index.map(|i| match i {
                0 => last,
                i if i == last => 0,
                i => i,
            });
            last
        }
    };

    flags |= ExecFlags::RENDER | ExecFlags::NO_RELOC;
    if in_fence.is_some() {
        flags |= ExecFlags::FENCE_IN;
    }
    if want_out_fence {
        flags |= ExecFlags::FENCE_OUT;
    }

    for obj in validation.objects_mut() {
        obj.relocation_count = 0;
    }

    let mut attachments = Vec::with_capacity(2);
    validation.object_mut(batch_index).relocation_count = batch_relocs.len() as u32;
    attachments.push(RelocAttachment {
        object: batch_index,
        entries: batch_relocs.entries(),
    });
    if let Some(index) = state_index {
        validation.object_mut(index).relocation_count = state_relocs.len() as u32;
        attachments.push(RelocAttachment {
            object: index,
            entries: state_relocs.entries(),
        });
    }

    let mut exec = ExecBuffer {
        objects: validation.objects_mut(),
        relocations: &attachments,
        batch_len,
        context_id,
        flags,
        in_fence,
    };
    let out_fence = kernel.execbuffer(&mut exec)?;

    let mut migrations = 0;
    for (obj, bo) in validation.iter() {
        bo.set_idle(false);
        bo.set_index_hint(None);

        if obj.offset() != bo.gpu_addr() {
            debug_assert!(!bo.is_pinned(), "kernel moved pinned buffer {}", bo.name());
            log::debug!(
                "anvil: BO {} (handle {}) migrated: {} -> {}",
                bo.name(),
                bo.handle(),
                bo.gpu_addr(),
                obj.offset()
            );
            bo.set_gpu_addr(obj.offset());
            migrations += 1;
        }
    }

    Ok(SubmitOutcome {
        out_fence,
        migrations,
    })
}
