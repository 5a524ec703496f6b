//! End-to-end behaviour of the engine against the simulated device.

use accel_engine::hal::{ALT_STATUS_WORD0, STATUS_WORD0};
use accel_engine::testing::{Completion, MockHal, leak_region, leak_shadow_page};
use accel_engine::{
    AccelError, Age, BusyOn, ChipGeneration, CommandPath, DeviceContext, EngineConfig,
    MappedResources, PollConfig, ShadowStatus, WaitFlags, command,
};

const BUS: u64 = 0x0100_0000;

fn poll() -> PollConfig {
    PollConfig {
        step_us: 10,
        fifo_timeout_us: 1_000,
        event_timeout_us: 5_000,
    }
}

fn config(page_words: usize) -> EngineConfig {
    EngineConfig {
        buffer_count: 4,
        page_words,
        zero_counter_is_idle: false,
        poll: poll(),
        ..Default::default()
    }
}

fn dma_context(hal: MockHal, page_words: usize, pages: usize) -> DeviceContext<MockHal> {
    let resources = MappedResources {
        shadow: None,
        dma: Some(leak_region(page_words * pages, BUS)),
    };
    DeviceContext::new(hal, config(page_words), resources).unwrap()
}

/// Word offset of `words` from the start of the context's DMA region.
fn offset_in_region(context: &DeviceContext<MockHal>, words: *const u32) -> usize {
    let CommandPath::Dma(ring) = context.commands() else {
        panic!("expected the DMA path");
    };
    (words as usize - ring.region().words().as_ptr() as usize) / 4
}

// =============================================================================
// Ages
// =============================================================================

#[test]
fn test_ordering_across_16_bit_wrap() {
    let before = Age::new(0xfffe, 7);
    let after = Age::new(0x0001, 8);
    assert!(before.is_before_or_eq(after));
    assert!(!after.is_before_or_eq(before));
}

#[test]
fn test_sentinel_is_always_retired() {
    for other in [Age::new(0, 0), Age::new(1, 0), Age::new(0x8000, 3), Age::new(0xffff, 9)] {
        assert!(Age::new(0, 5).is_before_or_eq(other));
    }
}

#[test]
fn test_old_wrap_tag_returns_without_polling() {
    let hal = MockHal::new();
    let mut context = dma_context(hal.clone(), 1024, 2);
    let old = context.emit_event_tag(WaitFlags::NONE).unwrap();

    for _ in 0..0x1_0000 {
        context.emit_event(WaitFlags::NONE).unwrap();
    }
    assert_eq!(context.wrap_count(), 1);

    hal.set_completion(Completion::Manual);
    context.wait_event(old).unwrap();
    assert_eq!(hal.elapsed_us(), 0);
}

// =============================================================================
// Buffers
// =============================================================================

#[test]
fn test_released_buffer_not_reused_before_retirement() {
    let hal = MockHal::new();
    hal.set_completion(Completion::Manual);
    let mut context = dma_context(hal.clone(), 1024, 2);

    let mut held = Vec::new();
    while let Some(handle) = context.acquire_buffer() {
        held.push(handle);
    }
    assert_eq!(held.len(), 4);

    let first = held[0];
    context.release_buffer(first).unwrap();
    let stamped = context.buffers().age(first).unwrap();
    assert_eq!(context.acquire_buffer(), None);

    hal.complete_all();
    assert!(stamped.is_before_or_eq(context.current_age()));
    assert_eq!(context.acquire_buffer(), Some(first));
}

#[test]
fn test_no_double_acquire_without_release() {
    let mut context = dma_context(MockHal::new(), 1024, 2);
    let mut seen = Vec::new();
    while let Some(handle) = context.acquire_buffer() {
        assert!(!seen.contains(&handle));
        seen.push(handle);
    }
    assert_eq!(
        context.release_buffer(accel_engine::BufferHandle::new(9)),
        Err(AccelError::UnknownBuffer(9))
    );
}

// =============================================================================
// Command ring
// =============================================================================

#[test]
fn test_allocations_never_overlap_until_wrap() {
    let mut context = dma_context(MockHal::new(), 32, 4);
    let mut next = 0;
    for n in [3, 29, 1, 40, 12, 2] {
        let words = context.allocate_command_space(n).unwrap().as_ptr();
        let offset = offset_in_region(&context, words);
        assert_eq!(offset, next);
        next = offset + n;
    }

    // 87 words used; 50 more do not fit, so the ring flushes and restarts.
    let words = context.allocate_command_space(50).unwrap().as_ptr();
    assert_eq!(offset_in_region(&context, words), 0);
}

#[test]
fn test_flush_pads_to_two_and_aligns_to_eight() {
    let hal = MockHal::new();
    let mut context = dma_context(hal.clone(), 1024, 2);

    context.allocate_command_space(13).unwrap().fill(0x1234);
    context.flush_command_stream().unwrap();
    let words = hal.fifo_words();
    assert_eq!(words[1], BUS as u32 | 1);
    assert_eq!(words[2], command::dma(14));

    let next = context.allocate_command_space(1).unwrap().as_ptr();
    assert_eq!(offset_in_region(&context, next), 16);
}

#[test]
fn test_four_word_pages() {
    let hal = MockHal::new();
    let mut context = dma_context(hal.clone(), 4, 2);

    context.allocate_command_space(3).unwrap();
    context.allocate_command_space(3).unwrap();
    context.flush_command_stream().unwrap();

    let CommandPath::Dma(ring) = context.commands() else {
        panic!("expected the DMA path");
    };
    let flushed_at = ring.last_age();
    assert_eq!(ring.pages()[0].age, flushed_at);
    assert_eq!(ring.pages()[0].used, 0);
    assert_eq!((ring.pages()[1].used, ring.pages()[1].flushed), (2, 2));
    assert_eq!(ring.current_page(), 1);
    assert_eq!(hal.emitted_tags(), vec![flushed_at.event]);
}

#[test]
fn test_direct_path_replays_into_fifo() {
    let hal = MockHal::new();
    let mut context =
        DeviceContext::new(hal.clone(), config(8), MappedResources::default()).unwrap();

    let words: Vec<u32> = (100..120).collect();
    context.allocate_command_space(20).unwrap().copy_from_slice(&words);
    context.flush_command_stream().unwrap();
    assert_eq!(hal.fifo_words(), words);
    assert!(hal.emitted_tags().is_empty());
}

// =============================================================================
// Timeouts
// =============================================================================

#[test]
fn test_fifo_busy_after_deadline_not_before() {
    let hal = MockHal::new();
    let mut context = dma_context(hal.clone(), 1024, 2);

    hal.set_register(ALT_STATUS_WORD0, 0x1f_ffff);
    hal.drain_fifo_after_us(ALT_STATUS_WORD0, 990);
    assert_eq!(context.emit_event(WaitFlags::NONE), Ok(1));
    assert_eq!(hal.elapsed_us(), 990);

    hal.set_register(ALT_STATUS_WORD0, 0x1f_ffff);
    assert_eq!(
        context.emit_event(WaitFlags::NONE),
        Err(AccelError::Busy(BusyOn::FifoSpace(1)))
    );
    assert_eq!(hal.elapsed_us(), 990 + 1_000);
}

#[test]
fn test_event_wait_busy_after_deadline() {
    let hal = MockHal::new();
    hal.set_completion(Completion::AfterUs(6_000));
    let mut context = dma_context(hal.clone(), 1024, 2);

    let tag = context.emit_event_tag(WaitFlags::NONE).unwrap();
    assert!(context.wait_event(tag).unwrap_err().is_busy());
    assert_eq!(hal.elapsed_us(), 5_000);

    // The retry sees the event land.
    assert_eq!(context.wait_event(tag), Ok(()));
    assert_eq!(hal.elapsed_us(), 6_000);
}

// =============================================================================
// Shadow status page
// =============================================================================

#[test]
fn test_shadow_page_drives_flow_control_and_events() {
    let shadow = leak_shadow_page();
    let hal = MockHal::with_shadow(shadow);
    let config = EngineConfig {
        generation: ChipGeneration::S3d,
        cob_size: 96,
        bci_threshold_hi: 64,
        ..config(1024)
    };
    let resources = MappedResources {
        shadow: Some(shadow),
        dma: Some(leak_region(2048, BUS)),
    };
    let mut context = DeviceContext::new(hal.clone(), config, resources).unwrap();

    // Status registers are ignored once the shadow page is in use.
    hal.set_register(STATUS_WORD0, 0x1ffff);
    let tag = context.emit_event_tag(WaitFlags::ALL).unwrap();
    assert_eq!(shadow.read(ShadowStatus::EVENT_MIRROR), tag);
    context.wait_event(tag).unwrap();

    shadow.write(ShadowStatus::FIFO_STATUS, 64);
    assert!(context.emit_event(WaitFlags::NONE).unwrap_err().is_busy());
    assert_eq!(shadow.read(ShadowStatus::EVENT_MIRROR), tag);
}
