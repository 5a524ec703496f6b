//! Simulated hardware for tests.
//!
//! This module is only compiled for unit tests or when the `testing` feature
//! is enabled.
//!
//! [`MockHal`] keeps a register file, an optional shadow status page, a log of
//! every word pushed to the FIFO and a virtual clock advanced by
//! [`AccelHal::delay_us`]. Event-tag words written to the FIFO are "completed"
//! according to the configured [`Completion`] mode by echoing the tag into the
//! event status register and the shadow page, the way the hardware would.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;

use spinning_top::Spinlock;
use x86_64::PhysAddr;

use crate::command;
use crate::dma::DmaRegion;
use crate::hal::{AccelHal, STATUS_WORD1, ShadowStatus};

/// When the simulated hardware reaches an emitted event tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// As soon as the tag is written.
    #[default]
    Immediate,
    /// Only on [`MockHal::complete_all`].
    Manual,
    /// This many virtual microseconds after the tag is written.
    AfterUs(u64),
}

#[derive(Default)]
struct MockState {
    registers: BTreeMap<u32, u32>,
    shadow: Option<ShadowStatus>,
    fifo: Vec<u32>,
    /// Tags written but not yet reached, with their due time if any.
    pending: Vec<(u16, Option<u64>)>,
    completion: Completion,
    elapsed_us: u64,
    /// Registers to clear once the virtual clock reaches the given time.
    drains: Vec<(u32, u64)>,
    /// Status register that counts words written and not yet drained.
    fill_register: Option<u32>,
}

impl MockState {
    fn set_event_counter(&mut self, tag: u16) {
        self.registers.insert(STATUS_WORD1, tag as u32);
        if let Some(shadow) = self.shadow {
            shadow.write(ShadowStatus::EVENT_STATUS, tag as u32);
        }
    }

    fn complete_due(&mut self) {
        let now = self.elapsed_us;
        let mut reached = None;
        self.pending.retain(|&(tag, due)| match due {
            Some(due) if due <= now => {
                reached = Some(tag);
                false
            }
            _ => true,
        });
        if let Some(tag) = reached {
            self.set_event_counter(tag);
        }

        let registers = &mut self.registers;
        self.drains.retain(|&(register, at)| {
            if at <= now {
                registers.insert(register, 0);
                false
            } else {
                true
            }
        });
    }
}

/// A cloneable handle to one simulated device.
#[derive(Clone, Default)]
pub struct MockHal {
    state: Arc<Spinlock<MockState>>,
}

impl MockHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that echoes completed tags into `shadow` as well.
    pub fn with_shadow(shadow: ShadowStatus) -> Self {
        let hal = Self::new();
        hal.state.lock().shadow = Some(shadow);
        hal
    }

    pub fn set_register(&self, offset: u32, value: u32) {
        self.state.lock().registers.insert(offset, value);
    }

    pub fn register(&self, offset: u32) -> u32 {
        self.state.lock().registers.get(&offset).copied().unwrap_or(0)
    }

    /// Pretend the hardware has reached `tag`.
    pub fn set_event_counter(&self, tag: u16) {
        self.state.lock().set_event_counter(tag);
    }

    pub fn set_completion(&self, completion: Completion) {
        self.state.lock().completion = completion;
    }

    /// Reach every tag written so far.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        if let Some(&(tag, _)) = state.pending.last() {
            state.set_event_counter(tag);
        }
        state.pending.clear();
    }

    /// Clear `register` once `us` more virtual microseconds have passed.
    pub fn drain_fifo_after_us(&self, register: u32, us: u64) {
        let mut state = self.state.lock();
        let at = state.elapsed_us + us;
        state.drains.push((register, at));
    }

    /// Count every FIFO write into `register`, as the hardware's fill level.
    pub fn fill_on_write(&self, register: u32) {
        self.state.lock().fill_register = Some(register);
    }

    /// Every word written to the FIFO so far.
    pub fn fifo_words(&self) -> Vec<u32> {
        self.state.lock().fifo.clone()
    }

    /// Event tags written to the FIFO so far.
    pub fn emitted_tags(&self) -> Vec<u16> {
        self.state
            .lock()
            .fifo
            .iter()
            .filter_map(|&word| command::decode_event_tag(word))
            .collect()
    }

    /// Virtual time spent in [`AccelHal::delay_us`].
    pub fn elapsed_us(&self) -> u64 {
        self.state.lock().elapsed_us
    }
}

impl AccelHal for MockHal {
    fn read_reg(&self, offset: u32) -> u32 {
        self.register(offset)
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        self.set_register(offset, value);
    }

    fn write_fifo(&mut self, words: &[u32]) {
        let mut state = self.state.lock();
        state.fifo.extend_from_slice(words);
        if let Some(register) = state.fill_register {
            *state.registers.entry(register).or_insert(0) += words.len() as u32;
        }
        for tag in words.iter().filter_map(|&word| command::decode_event_tag(word)) {
            match state.completion {
                Completion::Immediate => state.set_event_counter(tag),
                Completion::Manual => state.pending.push((tag, None)),
                Completion::AfterUs(us) => {
                    let due = state.elapsed_us + us;
                    state.pending.push((tag, Some(due)));
                }
            }
        }
    }

    fn delay_us(&mut self, us: u32) {
        let mut state = self.state.lock();
        state.elapsed_us += us as u64;
        state.complete_due();
    }
}

/// A zeroed shadow status page that lives for the rest of the test.
pub fn leak_shadow_page() -> ShadowStatus {
    let cells: &'static [AtomicU32] = Box::leak(
        (0..ShadowStatus::WORDS)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    );
    ShadowStatus::from_cells(cells).expect("page has a full set of cells")
}

/// A zeroed DMA region of `words` words at bus address `bus`.
pub fn leak_region(words: usize, bus: u64) -> DmaRegion {
    let words: &'static mut [u32] = Box::leak(alloc::vec![0u32; words].into_boxed_slice());
    DmaRegion::from_words(words, PhysAddr::new(bus))
}
