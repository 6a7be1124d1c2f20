//! # Software Kernel
//!
//! The execbuffer path of [`SoftDevice`].
//!
//! ```text
//!   execbuffer
//!     1. validate   handles, duplicates, batch length, fences, aperture
//!     2. place      pinned objects stay put, others keep or get a binding
//!     3. patch      relocations whose presumed address is stale
//!     4. retire-on  mark every object busy until the new seqno
//! ```

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashSet;

use anvil_core::{
    BoFlags, ByteSize, ExecBuffer, ExecFlags, GpuAddr, HostPages, Kernel, KernelError, SyncFd,
};

use crate::address_space::{Window, regions};
use crate::device::{DeviceState, SoftDevice, Submission};

type KResult<T> = core::result::Result<T, KernelError>;

impl Kernel for SoftDevice {
    fn execbuffer(&self, exec: &mut ExecBuffer<'_>) -> KResult<Option<SyncFd>> {
        let mut state = self.state.lock();

        let result = match state.fail_next_exec.take() {
            Some(err) => Err(err),
            None => {
                state.reap();
                submit(&mut state, self.config().aperture_size, exec)
            }
        };

        match result {
            Ok(out) => {
                state.stats.execs += 1;
                Ok(out)
            }
            Err(err) => {
                state.stats.exec_failures += 1;
                log::warn!("anvil-device: execbuffer rejected: {}", err);
                Err(err)
            }
        }
    }

    fn throttle(&self) {
        self.state.lock().stats.throttles += 1;
    }
}

fn submit(
    state: &mut DeviceState,
    aperture: ByteSize,
    exec: &mut ExecBuffer<'_>,
) -> KResult<Option<SyncFd>> {
    let pages = validate(state, aperture, exec)?;

    for index in 0..exec.objects.len() {
        place(state, exec, index)?;
    }

    let (relocations, patched) = patch(exec, &pages)?;

    let seqno = state.tracker.begin();
    for obj in exec.objects.iter() {
        state.tracker.mark_used(obj.handle, seqno);
    }

    let out_fence = exec
        .flags
        .contains(ExecFlags::FENCE_OUT)
        .then_some(SyncFd(seqno as i32));

    let batch_index = exec.batch_index();
    let mut batch = vec![0u8; exec.batch_len as usize];
    pages[batch_index].read(0, &mut batch);

    state.submissions.push(Submission {
        seqno,
        objects: exec.objects.to_vec(),
        batch_index,
        batch,
        context_id: exec.context_id,
        flags: exec.flags,
        in_fence: exec.in_fence,
        out_fence,
        relocations,
        patched,
    });

    Ok(out_fence)
}

/// Check the request and resolve every object's pages
fn validate(
    state: &DeviceState,
    aperture: ByteSize,
    exec: &ExecBuffer<'_>,
) -> KResult<Vec<Arc<HostPages>>> {
    if exec.objects.is_empty() {
        return Err(KernelError::EINVAL);
    }

    let mut seen = HashSet::with_capacity(exec.objects.len());
    let mut pages = Vec::with_capacity(exec.objects.len());
    let mut total = 0u64;

    for obj in exec.objects.iter() {
        if !seen.insert(obj.handle) {
            return Err(KernelError::EINVAL);
        }
        let info = state.objects.get(&obj.handle).ok_or(KernelError::ENOENT)?;
        pages.push(info.pages.upgrade().ok_or(KernelError::ENOENT)?);
        total += info.size;
    }

    let batch = &pages[exec.batch_index()];
    let len = exec.batch_len as usize;
    if len == 0 || len % 8 != 0 || len > batch.len() {
        return Err(KernelError::EINVAL);
    }

    if exec.flags.contains(ExecFlags::FENCE_IN) != exec.in_fence.is_some() {
        return Err(KernelError::EINVAL);
    }
    if let Some(fence) = exec.in_fence {
        if fence.raw() <= 0 || fence.raw() as u64 > state.tracker.submitted() {
            return Err(KernelError::EINVAL);
        }
    }

    if total > aperture.as_bytes() {
        return Err(KernelError::ENOSPC);
    }

    Ok(pages)
}

/// Bind one object and write its final address back into the request
fn place(state: &mut DeviceState, exec: &mut ExecBuffer<'_>, index: usize) -> KResult<()> {
    let obj = exec.objects[index];
    let flags = obj.flags();
    let (size, current, pinned) = {
        let info = state.objects.get(&obj.handle).ok_or(KernelError::ENOENT)?;
        (info.size, info.placement, info.pinned)
    };

    if flags.contains(BoFlags::PINNED) || pinned {
        // Pinned objects are placed at allocation; the request must agree.
        return match current {
            Some((_, range)) if range.start == obj.offset() => Ok(()),
            _ => Err(KernelError::EINVAL),
        };
    }

    let low_only = !flags.contains(BoFlags::SUPPORTS_48B_ADDRESS);
    if let Some((_, range)) = current {
        if !low_only || range.start.fits_low_4g(size) {
            exec.objects[index].offset = range.start.raw();
            return Ok(());
        }
    }

    let window = if low_only { Window::Low } else { Window::High };
    let size = ByteSize::from_bytes(size);
    let hint = obj.offset();
    let fresh = if !hint.is_null() && window_covers(window, hint) {
        state.vm.space(window).allocate_at(hint, size).ok()
    } else {
        None
    };
    let range = match fresh {
        Some(range) => range,
        None => state
            .vm
            .allocate(window, size)
            .map_err(|_| KernelError::ENOSPC)?,
    };

    if let Some((old_window, old)) = current {
        // Moving out of the high window to satisfy a 32-bit restriction.
        state
            .vm
            .free(old_window, old)
            .map_err(|_| KernelError::EINVAL)?;
        state.stats.migrations += 1;
    }
    if let Some(info) = state.objects.get_mut(&obj.handle) {
        info.placement = Some((window, range));
    }

    exec.objects[index].offset = range.start.raw();
    Ok(())
}

fn window_covers(window: Window, addr: GpuAddr) -> bool {
    match window {
        Window::Low => regions::LOW.contains(addr),
        Window::High => regions::HIGH.contains(addr),
        Window::Zone(zone) => regions::zone(zone).contains(addr),
    }
}

/// Apply relocations whose presumed address no longer holds.
///
/// Returns (relocations received, relocations patched).
fn patch(exec: &ExecBuffer<'_>, pages: &[Arc<HostPages>]) -> KResult<(usize, usize)> {
    let lut = exec.flags.contains(ExecFlags::HANDLE_LUT);
    let trust_presumed = exec.flags.contains(ExecFlags::NO_RELOC);
    let mut received = 0;
    let mut patched = 0;

    for attachment in exec.relocations {
        let owner = pages.get(attachment.object).ok_or(KernelError::EINVAL)?;

        for reloc in attachment.entries {
            received += 1;

            let target = if lut {
                exec.objects
                    .get(reloc.target as usize)
                    .ok_or(KernelError::ENOENT)?
            } else {
                exec.objects
                    .iter()
                    .find(|o| o.handle == reloc.target)
                    .ok_or(KernelError::ENOENT)?
            };

            let at = reloc.offset as usize;
            if at + 8 > owner.len() {
                return Err(KernelError::EINVAL);
            }

            if trust_presumed && reloc.presumed_offset == target.offset {
                continue;
            }

            let value = reloc.patched_value(target.offset());
            owner.write(at, &value.to_le_bytes());
            patched += 1;
        }
    }

    Ok((received, patched))
}
