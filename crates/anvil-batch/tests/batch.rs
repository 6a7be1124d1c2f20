//! End-to-end batch behaviour against the software device.

use std::sync::Arc;

use anvil_batch::cmd::{MI_BATCH_BUFFER_END, MI_NOOP, MI_STORE_DATA_IMM};
use anvil_batch::config::{BATCH_SZ, STATE_SZ};
use anvil_batch::{AddressingMode, Batch, BatchConfig, BatchPhase, DebugFlags, DeviceCaps};
use anvil_core::{
    AllocDesc, BoFlags, BufferManager, BufferObject, ByteSize, Error, ExecFlags, KernelError,
    MemoryZone, RelocFlags,
};
use anvil_device::{SoftDevice, SoftDeviceConfig};

type TestBatch = Batch<Arc<SoftDevice>, Arc<SoftDevice>>;

fn setup(device: SoftDeviceConfig, config: BatchConfig) -> (Arc<SoftDevice>, TestBatch) {
    let dev = SoftDevice::shared(device);
    let batch = Batch::new(dev.clone(), dev.clone(), config).unwrap();
    (dev, batch)
}

fn target(dev: &SoftDevice, name: &'static str) -> Arc<BufferObject> {
    dev.alloc(&AllocDesc::new(name, ByteSize::from_kib(4), MemoryZone::Surface))
        .unwrap()
}

fn noops(count: usize) -> Vec<u32> {
    vec![MI_NOOP; count]
}

#[test]
fn test_small_reserves_accumulate_then_flush() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    let batch_handle = batch.batch_bo().handle();

    batch.write_dwords(&noops(100)).unwrap();
    assert_eq!(batch.used(), 400);
    assert_eq!(dev.submission_count(), 0);

    batch.require_space(BATCH_SZ - 400).unwrap();
    assert_eq!(dev.submission_count(), 1);
    assert_eq!(batch.used(), 0);
    assert_eq!(batch.state_used(), 1);
    assert_eq!(batch.generation(), 2);

    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.batch_index, 0);
    assert_eq!(sub.handles()[0], batch_handle);
    assert_eq!(sub.batch_dwords(), 102);
    assert_eq!(sub.batch_dword(100), MI_BATCH_BUFFER_END);
    assert_eq!(sub.batch_dword(101), MI_NOOP);
    assert!(sub.flags.contains(ExecFlags::BATCH_FIRST | ExecFlags::HANDLE_LUT));
    assert!(sub.flags.contains(ExecFlags::NO_RELOC));
}

#[test]
fn test_empty_flush_is_noop() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    assert_eq!(batch.flush_fence(None, true).unwrap(), None);
    assert_eq!(dev.submission_count(), 0);
    assert_eq!(batch.generation(), 1);
}

#[test]
fn test_fence_signal_flushes_empty_batch() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    batch.mark_contains_fence_signal();
    batch.flush().unwrap();

    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.batch.len(), 8);
    assert_eq!(sub.batch_dword(0), MI_BATCH_BUFFER_END);
}

#[test]
fn test_fences_in_and_out() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    batch.write_dwords(&noops(2)).unwrap();
    let fence = batch.flush_fence(None, true).unwrap().unwrap();
    assert!(!dev.is_fence_signalled(fence));

    batch.write_dwords(&noops(2)).unwrap();
    assert_eq!(batch.flush_fence(Some(fence), false).unwrap(), None);
    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.in_fence, Some(fence));
    assert!(sub.flags.contains(ExecFlags::FENCE_IN));
    assert!(!sub.flags.contains(ExecFlags::FENCE_OUT));

    dev.retire_all();
    assert!(dev.is_fence_signalled(fence));
}

#[test]
fn test_references_are_deduplicated() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    let bo = target(&dev, "texture");

    batch.write_reloc64(&bo, 0, RelocFlags::empty()).unwrap();
    batch.write_reloc64(&bo, 64, RelocFlags::WRITE).unwrap();

    assert_eq!(batch.validation().len(), 2);
    assert_eq!(batch.batch_relocations().len(), 2);
    assert_eq!(Arc::strong_count(&bo), 2);
    assert!(batch.references(&bo));
    assert!(batch.validation().object(1).flags().contains(BoFlags::WRITE));

    batch.flush().unwrap();
    assert_eq!(Arc::strong_count(&bo), 1);
    assert!(!batch.references(&bo));
}

#[test]
fn test_pinned_reference_needs_no_relocation() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    let bo = target(&dev, "pinned");
    assert!(bo.is_pinned());

    let addr = batch.batch_reloc(0, &bo, 16, RelocFlags::WRITE).unwrap();
    assert_eq!(addr, (bo.gpu_addr() + 16).canonical());
    assert!(batch.batch_relocations().is_empty());
    assert!(batch.references(&bo));
    assert_eq!(batch.stats().pinned_references, 1);

    let entry = batch.validation().object(1);
    assert!(entry.flags().contains(BoFlags::PINNED | BoFlags::WRITE));
    assert_eq!(entry.offset(), bo.gpu_addr());

    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();
    assert_eq!(dev.stats().exec_failures, 0);
}

#[test]
fn test_relocation_presumed_and_patched() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    let bo = target(&dev, "vertex");
    assert!(bo.gpu_addr().is_null());

    batch.write_dwords(&[MI_STORE_DATA_IMM]).unwrap();
    let presumed = batch.write_reloc64(&bo, 8, RelocFlags::WRITE).unwrap();
    assert_eq!(presumed, 8);
    batch.write_dwords(&[0xdead_beef, 0]).unwrap();
    batch.flush().unwrap();

    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.relocations, 1);
    assert_eq!(sub.patched, 1);
    assert!(!bo.gpu_addr().is_null());
    let low = sub.batch_dword(1) as u64;
    let high = sub.batch_dword(2) as u64;
    assert_eq!(low | (high << 32), bo.gpu_addr().raw() + 8);
}

#[test]
fn test_addressing_modes() {
    let (dev, mut lut) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    let bo = target(&dev, "lut");
    lut.write_reloc64(&bo, 0, RelocFlags::empty()).unwrap();
    assert_eq!(lut.batch_relocations()[0].target, 1);
    lut.flush().unwrap();
    assert_eq!(dev.last_submission().unwrap().batch_index, 0);

    let config = BatchConfig::DEFAULT.with_addressing(AddressingMode::Legacy);
    let (dev, mut legacy) = setup(SoftDeviceConfig::RELOCATION, config);
    let bo = target(&dev, "legacy");
    let batch_handle = legacy.batch_bo().handle();
    legacy.write_reloc64(&bo, 0, RelocFlags::empty()).unwrap();
    assert_eq!(legacy.batch_relocations()[0].target, bo.handle().raw());
    legacy.flush().unwrap();

    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.batch_index, sub.objects.len() - 1);
    assert_eq!(sub.handles()[sub.batch_index], batch_handle);
    assert!(!sub.flags.contains(ExecFlags::HANDLE_LUT));
    assert_eq!(sub.patched, 1);
}

#[test]
fn test_legacy_growth_retargets_relocations() {
    let config = BatchConfig::DEFAULT.with_addressing(AddressingMode::Legacy);
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, config);
    let state = batch.state_bo().clone();
    let old = state.handle();

    batch.write_reloc64(&state, 0, RelocFlags::empty()).unwrap();
    batch.write_reloc64(&state, 64, RelocFlags::empty()).unwrap();
    assert!(batch.batch_relocations().iter().all(|r| r.target == old.raw()));

    batch.set_no_wrap(true);
    batch.state_alloc(STATE_SZ, 64).unwrap();
    batch.set_no_wrap(false);
    assert_eq!(batch.stats().state_grows, 1);
    assert_ne!(state.handle(), old);
    let new = state.handle();
    assert!(batch.batch_relocations().iter().all(|r| r.target == new.raw()));

    batch.flush().unwrap();
    let sub = dev.last_submission().unwrap();
    assert!(sub.handles().contains(&new));
    assert_eq!(sub.relocations, 2);
    let base = state.gpu_addr().raw();
    assert_eq!(u64::from_le_bytes(sub.batch[..8].try_into().unwrap()), base);
    assert_eq!(u64::from_le_bytes(sub.batch[8..16].try_into().unwrap()), base + 64);
}

#[test]
fn test_32bit_relocation_is_sticky() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    let bo = target(&dev, "scanout");
    batch.write_reloc64(&bo, 0, RelocFlags::ADDR_32BIT).unwrap();
    assert!(!bo.flags().contains(BoFlags::SUPPORTS_48B_ADDRESS));
    batch.flush().unwrap();
    assert!(bo.gpu_addr().fits_low_4g(bo.size()));

    // A later plain reference keeps the restriction.
    batch.write_reloc64(&bo, 0, RelocFlags::empty()).unwrap();
    assert!(
        !batch
            .validation()
            .object(1)
            .flags()
            .contains(BoFlags::SUPPORTS_48B_ADDRESS)
    );
}

#[test]
fn test_growth_keeps_identity_and_addresses() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    let bo = target(&dev, "placed");
    batch.write_reloc64(&bo, 0, RelocFlags::empty()).unwrap();
    batch.flush().unwrap();
    let placed = bo.gpu_addr();

    let stable = batch.batch_bo().clone();
    let handle = stable.handle();
    batch.write_reloc64(&bo, 4, RelocFlags::empty()).unwrap();

    batch.set_no_wrap(true);
    batch.write_dwords(&noops(BATCH_SZ / 4)).unwrap();
    batch.set_no_wrap(false);
    assert!(Arc::ptr_eq(&stable, batch.batch_bo()));
    assert_ne!(stable.handle(), handle);
    assert_eq!(batch.batch_capacity(), BATCH_SZ + BATCH_SZ / 2);
    assert_eq!(batch.stats().batch_grows, 1);
    assert_eq!(batch.validation().object(0).handle(), stable.handle());

    let mut presumed = [0u8; 8];
    batch.read(0, &mut presumed).unwrap();
    assert_eq!(u64::from_le_bytes(presumed), placed.raw() + 4);

    batch.flush().unwrap();
    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.patched, 0);
    assert_eq!(sub.batch[..8], presumed);
    assert_eq!(bo.gpu_addr(), placed);

    // The next batch starts back at the nominal size.
    assert_eq!(batch.batch_capacity(), BATCH_SZ);
    assert_eq!(batch.state_capacity(), STATE_SZ);
}

#[test]
fn test_softpin_streams_are_doubled_and_cannot_grow() {
    let (_dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    assert_eq!(batch.batch_capacity(), BATCH_SZ * 2);
    assert_eq!(batch.state_capacity(), STATE_SZ * 2);

    batch.set_no_wrap(true);
    let result = batch.write_dwords(&noops(BATCH_SZ * 2 / 4));
    assert_eq!(result, Err(Error::GrowPinned));

    // Filling right up to the end marker still flushes.
    batch.write_dwords(&noops((BATCH_SZ * 2 - 16) / 4)).unwrap();
    batch.flush().unwrap();
    assert_eq!(batch.phase(), BatchPhase::Accumulating);
    assert_eq!(batch.used(), 0);
}

#[test]
fn test_growth_stops_at_limit() {
    let config = BatchConfig {
        max_batch_size: BATCH_SZ,
        ..BatchConfig::DEFAULT
    };
    let (_dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, config);
    batch.set_no_wrap(true);
    assert_eq!(batch.write_dwords(&noops(BATCH_SZ / 4)), Err(Error::BatchTooLarge));
}

#[test]
fn test_end_of_batch_fits_at_growth_limit() {
    let config = BatchConfig {
        max_batch_size: BATCH_SZ,
        ..BatchConfig::DEFAULT
    };
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, config);
    batch.set_no_wrap(true);

    // The last 8 bytes belong to the end marker.
    let result = batch.write_dwords(&noops((BATCH_SZ - 8) / 4));
    assert_eq!(result, Err(Error::BatchTooLarge));
    assert_eq!(batch.used(), 0);
    batch.write_dwords(&noops((BATCH_SZ - 16) / 4)).unwrap();

    batch.flush().unwrap();
    assert_eq!(batch.phase(), BatchPhase::Accumulating);
    assert!(!batch.no_wrap());
    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.batch_dwords(), (BATCH_SZ - 8) / 4);
    assert_eq!(sub.batch_dword((BATCH_SZ - 16) / 4), MI_BATCH_BUFFER_END);

    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();
    assert_eq!(dev.submission_count(), 2);
}

#[test]
fn test_flush_recovers_from_failed_buffer_allocation() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    let first = batch.batch_bo().clone();
    batch.write_dwords(&noops(2)).unwrap();

    dev.fail_next_alloc();
    assert!(batch.flush().is_err());
    assert_eq!(dev.submission_count(), 1);
    assert_eq!(batch.phase(), BatchPhase::Accumulating);
    assert_eq!(batch.used(), 0);
    assert!(Arc::ptr_eq(&first, batch.batch_bo()));

    batch.write_dwords(&noops(4)).unwrap();
    batch.flush().unwrap();
    assert_eq!(dev.submission_count(), 2);
    assert_eq!(dev.last_submission().unwrap().batch_dwords(), 6);
}

#[test]
fn test_state_allocation() {
    let config = BatchConfig::DEFAULT.with_debug(DebugFlags::BATCH);
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, config);

    let first = batch.state_alloc(64, 32).unwrap();
    assert_eq!(first, 32);
    assert_eq!(batch.state_used(), 96);
    assert_eq!(batch.state_size_at(32), Some(64));
    assert_eq!(batch.state_alloc(16, 3), Err(Error::InvalidParameter));

    batch.write_state(first, &[1, 2, 3, 4]).unwrap();
    let sum = batch.state_mut(first, 4, |range| range.iter().sum::<u8>()).unwrap();
    assert_eq!(sum, 10);
    assert_eq!(batch.write_state(first, &[0; 128]), Err(Error::BufferOverflow));

    let bo = target(&dev, "sampler");
    batch.state_reloc(first + 8, &bo, 0, RelocFlags::empty()).unwrap();
    assert_eq!(batch.state_relocations().len(), 1);
    assert!(!batch.references(batch.state_bo()));

    let state = batch.state_bo().clone();
    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();

    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.relocations, 1);
    assert_eq!(sub.patched, 1);
    assert!(sub.handles().contains(&state.handle()));
    let mut patched = [0u8; 8];
    dev.map(&state).unwrap().read(first as usize + 8, &mut patched);
    assert_eq!(u64::from_le_bytes(patched), bo.gpu_addr().raw());
    assert_eq!(batch.state_size_at(32), None);
}

#[test]
fn test_state_wraps_into_new_batch() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    batch.write_dwords(&noops(2)).unwrap();
    batch.state_alloc(STATE_SZ - 128, 64).unwrap();

    let offset = batch.state_alloc(128, 64).unwrap();
    assert_eq!(dev.submission_count(), 1);
    assert_eq!(offset, 64);
}

#[test]
fn test_snapshot_restore() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    batch.write_dwords(&noops(4)).unwrap();
    let snapshot = batch.save();

    let bo = target(&dev, "scratch");
    batch.write_reloc64(&bo, 0, RelocFlags::empty()).unwrap();
    batch.state_alloc(32, 32).unwrap();
    assert_eq!(Arc::strong_count(&bo), 2);

    batch.restore(&snapshot).unwrap();
    assert_eq!(batch.save(), snapshot);
    assert_eq!(Arc::strong_count(&bo), 1);
    assert!(batch.batch_relocations().is_empty());
    assert!(!batch.references(&bo));

    batch.flush().unwrap();
    assert_eq!(batch.restore(&snapshot), Err(Error::InvalidState));
}

#[test]
fn test_aperture_retry_replays_in_new_batch() {
    let threshold = (BATCH_SZ + 2 * 4096) as u64;
    let config = BatchConfig::DEFAULT.with_aperture_threshold(threshold);
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, config);
    let a = target(&dev, "a");
    let b = target(&dev, "b");
    let c = target(&dev, "c");

    batch
        .emit_with_aperture_retry(64, |batch| {
            batch.write_dwords(&[MI_STORE_DATA_IMM])?;
            batch.write_reloc64(&a, 0, RelocFlags::WRITE)?;
            batch.write_dwords(&[0])
        })
        .unwrap();
    assert_eq!(dev.submission_count(), 0);

    batch
        .emit_with_aperture_retry(64, |batch| {
            batch.write_reloc64(&b, 0, RelocFlags::empty())?;
            batch.write_reloc64(&c, 0, RelocFlags::empty())?;
            Ok(())
        })
        .unwrap();

    assert_eq!(batch.stats().aperture_retries, 1);
    assert_eq!(dev.submission_count(), 1);
    assert!(!batch.references(&a));
    assert!(batch.references(&b) && batch.references(&c));
    assert_eq!(batch.aperture_space(), threshold);
    assert_eq!(batch.used(), 16);
    assert!(!batch.no_wrap());
}

#[test]
fn test_oversized_unit_is_submitted_alone() {
    let threshold = (BATCH_SZ + 4096) as u64;
    let config = BatchConfig::DEFAULT.with_aperture_threshold(threshold);
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, config);
    let b = target(&dev, "b");
    let c = target(&dev, "c");
    batch.write_dwords(&noops(2)).unwrap();

    batch
        .emit_with_aperture_retry(64, |batch| {
            batch.write_reloc64(&b, 0, RelocFlags::empty())?;
            batch.write_reloc64(&c, 0, RelocFlags::empty())?;
            Ok(())
        })
        .unwrap();

    // One flush for the earlier work, one for the unit on its own.
    assert_eq!(dev.submission_count(), 2);
    assert_eq!(batch.stats().aperture_retries, 1);
    let subs = dev.submissions();
    assert!(!subs[0].handles().contains(&b.handle()));
    assert!(subs[1].handles().contains(&b.handle()));
    assert!(subs[1].handles().contains(&c.handle()));
    assert_eq!(subs[1].relocations, 2);
    assert_eq!(batch.used(), 0);
    assert!(!batch.references(&b));
    assert!(!batch.no_wrap());
}

#[test]
fn test_oversized_unit_in_empty_batch_is_not_replayed() {
    let threshold = (BATCH_SZ + 4096) as u64;
    let config = BatchConfig::DEFAULT.with_aperture_threshold(threshold);
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, config);
    let b = target(&dev, "b");
    let c = target(&dev, "c");

    batch
        .emit_with_aperture_retry(64, |batch| {
            batch.write_reloc64(&b, 0, RelocFlags::empty())?;
            batch.write_reloc64(&c, 0, RelocFlags::empty())?;
            Ok(())
        })
        .unwrap();

    assert_eq!(dev.submission_count(), 1);
    assert_eq!(batch.stats().aperture_retries, 0);
    assert_eq!(dev.last_submission().unwrap().relocations, 2);
}

#[test]
fn test_aperture_retry_rolls_back_on_error() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    let bo = target(&dev, "rollback");
    batch.write_dwords(&noops(2)).unwrap();

    let result = batch.emit_with_aperture_retry(16, |batch| {
        batch.write_reloc64(&bo, 0, RelocFlags::empty())?;
        Err(Error::InvalidState)
    });
    assert_eq!(result, Err(Error::InvalidState));
    assert_eq!(batch.used(), 8);
    assert!(!batch.references(&bo));
}

#[test]
fn test_kernel_migration_is_adopted() {
    let (dev, mut batch) = setup(SoftDeviceConfig::RELOCATION, BatchConfig::DEFAULT);
    let bo = target(&dev, "evicted");
    batch.write_reloc64(&bo, 0, RelocFlags::empty()).unwrap();
    batch.flush().unwrap();
    let before = bo.gpu_addr();

    let after = dev.evict(&bo).unwrap();
    assert_ne!(before, after);
    assert_eq!(bo.gpu_addr(), before);

    let presumed = batch.write_reloc64(&bo, 0, RelocFlags::empty()).unwrap();
    assert_eq!(presumed, before.raw());
    batch.flush().unwrap();

    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.patched, 1);
    assert_eq!(bo.gpu_addr(), after);
    assert_eq!(sub.batch_dword(0) as u64, after.raw() & 0xffff_ffff);
}

#[test]
fn test_shadow_copy_without_llc() {
    let dev = SoftDevice::shared(SoftDeviceConfig::NO_LLC);
    let caps = DeviceCaps::detect(&dev, dev.config().aperture_size);
    let config = BatchConfig::for_device(&caps);
    assert!(config.shadow_copy);
    let mut batch = Batch::new(dev.clone(), dev.clone(), config).unwrap();

    batch.write_dwords(&[MI_STORE_DATA_IMM, 1, 2, 3]).unwrap();
    let mut head = [0xffu8; 4];
    dev.map(batch.batch_bo()).unwrap().read(0, &mut head);
    assert_eq!(head, [0; 4]);
    batch.flush().unwrap();

    let sub = dev.last_submission().unwrap();
    assert_eq!(sub.batch_dword(0), MI_STORE_DATA_IMM);
    assert_eq!(sub.batch_dword(3), 3);
    assert_eq!(sub.batch_dword(4), MI_BATCH_BUFFER_END);
}

#[test]
fn test_frame_throttle_waits_on_previous_frame() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);

    batch.request_frame_throttle();
    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();
    assert_eq!(dev.blocking_waits(), 0);

    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();

    batch.request_frame_throttle();
    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();
    assert_eq!(dev.blocking_waits(), 1);
}

#[test]
fn test_throttling_disabled_never_blocks() {
    let config = BatchConfig {
        throttling: false,
        ..BatchConfig::DEFAULT
    };
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, config);
    for _ in 0..3 {
        batch.request_frame_throttle();
        batch.write_dwords(&noops(2)).unwrap();
        batch.flush().unwrap();
    }
    assert_eq!(dev.blocking_waits(), 0);
}

#[test]
fn test_flush_throttle_reaches_kernel() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    batch.request_flush_throttle();
    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();
    assert_eq!(dev.stats().throttles, 1);

    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();
    assert_eq!(dev.stats().throttles, 1);
}

#[test]
fn test_sync_debug_waits_for_idle() {
    let config = BatchConfig::DEFAULT.with_debug(DebugFlags::SYNC);
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, config);
    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();

    let last = batch.last_bo().unwrap();
    assert!(!dev.is_busy(last));
    assert_eq!(dev.blocking_waits(), 1);
}

#[test]
fn test_finish_waits_for_last_batch() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    batch.write_dwords(&noops(2)).unwrap();
    batch.finish().unwrap();
    assert!(!dev.is_busy(batch.last_bo().unwrap()));
    assert_eq!(batch.phase(), BatchPhase::Accumulating);
}

#[test]
fn test_identifier_is_in_every_batch() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    let identifier = target(&dev, "identifier");
    batch.set_identifier_bo(identifier.clone());

    for _ in 0..2 {
        assert!(batch.references(&identifier));
        batch.write_dwords(&noops(2)).unwrap();
        batch.flush().unwrap();
        assert!(
            dev.last_submission()
                .unwrap()
                .handles()
                .contains(&identifier.handle())
        );
    }
}

#[test]
fn test_sol_reset_flag() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    batch.mark_needs_sol_reset();
    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();
    assert!(dev.last_submission().unwrap().flags.contains(ExecFlags::GEN7_SOL_RESET));

    batch.write_dwords(&noops(2)).unwrap();
    batch.flush().unwrap();
    assert!(!dev.last_submission().unwrap().flags.contains(ExecFlags::GEN7_SOL_RESET));
}

#[test]
#[should_panic(expected = "failed to submit batchbuffer")]
fn test_rejected_submission_is_fatal() {
    let (dev, mut batch) = setup(SoftDeviceConfig::SOFTPIN, BatchConfig::DEFAULT);
    batch.write_dwords(&noops(2)).unwrap();
    dev.fail_next_exec(KernelError::EIO);
    let _ = batch.flush();
}
