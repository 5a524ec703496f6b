//! The completion clock.
//!
//! Every unit of work the host wants to track is followed by an event-tag
//! command. When the hardware reaches it, it writes the tag back to a status
//! word. Tags are 16 bits, so the host counts rollovers itself and combines
//! the two into an [`Age`].
//!
//! The host's wrap count runs ahead of the hardware: it is bumped as soon as
//! a rollover is *emitted*, while the hardware may still be echoing tags from
//! before it. [`EventClock::current`] corrects for that.

use log::{trace, warn};

use crate::age::Age;
use crate::command;
use crate::error::{AccelError, BusyOn, Result};
use crate::fifo::Fifo;
use crate::hal::{AccelHal, STATUS_WORD1, ShadowStatus};
use crate::poll::poll_until;

/// Where the hardware's completed event tag is read from.
#[derive(Debug, Clone, Copy)]
pub enum CounterSource {
    Shadow(ShadowStatus),
    Register,
}

/// Engines the hardware should drain before accepting an event marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitFlags {
    pub wait_2d: bool,
    pub wait_3d: bool,
}

impl WaitFlags {
    pub const NONE: WaitFlags = WaitFlags {
        wait_2d: false,
        wait_3d: false,
    };
    pub const ALL: WaitFlags = WaitFlags {
        wait_2d: true,
        wait_3d: true,
    };

    pub const fn new(wait_2d: bool, wait_3d: bool) -> Self {
        Self { wait_2d, wait_3d }
    }

    /// FIFO words an event marker with these flags occupies.
    pub const fn marker_words(&self) -> usize {
        if self.wait_2d || self.wait_3d { 2 } else { 1 }
    }
}

/// An event marker ready to be written to the FIFO.
pub(crate) struct EventMarker {
    pub age: Age,
    words: [u32; 2],
    len: usize,
}

impl EventMarker {
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len]
    }
}

/// The host side of the event counter: what was emitted and how far the
/// hardware has got.
pub struct EventClock {
    last_emitted: u16,
    wrap_count: u32,
    source: CounterSource,
    zero_counter_is_idle: bool,
}

impl EventClock {
    /// A clock that has emitted nothing yet, reading completions from `source`.
    pub fn new(source: CounterSource, zero_counter_is_idle: bool) -> Self {
        let clock = Self {
            last_emitted: 0,
            wrap_count: 0,
            source,
            zero_counter_is_idle,
        };
        if let CounterSource::Shadow(shadow) = source {
            shadow.write(ShadowStatus::EVENT_MIRROR, clock.last_emitted as u32);
        }
        clock
    }

    /// The last stamp handed out.
    pub fn last_emitted(&self) -> Age {
        Age::new(self.last_emitted, self.wrap_count)
    }

    pub fn wrap_count(&self) -> u32 {
        self.wrap_count
    }

    pub fn source(&self) -> &CounterSource {
        &self.source
    }

    /// The raw 16-bit tag the hardware last completed.
    pub fn hardware_event<H: AccelHal>(&self, hal: &H) -> u16 {
        let status = match self.source {
            CounterSource::Shadow(shadow) => shadow.read(ShadowStatus::EVENT_STATUS),
            CounterSource::Register => hal.read_reg(STATUS_WORD1),
        };
        status as u16
    }

    /// How far the hardware has got.
    pub fn current<H: AccelHal>(&self, hal: &H) -> Age {
        let event = self.hardware_event(hal);
        let mut wrap = self.wrap_count;
        if event > self.last_emitted {
            // Hardware hasn't passed the last wrap yet.
            wrap = wrap.saturating_sub(1);
        }
        Age::new(event, wrap)
    }

    /// Whether work stamped `age` is done, given the hardware is at `current`.
    pub fn is_retired(&self, age: Age, current: Age) -> bool {
        age.is_before_or_eq(current) || (self.zero_counter_is_idle && current.event == 0)
    }

    /// Pick up events another producer emitted through the shared mirror cell.
    pub fn sync_shared(&mut self) {
        if let CounterSource::Shadow(shadow) = self.source {
            let count = shadow.read(ShadowStatus::EVENT_MIRROR) as u16;
            if count < self.last_emitted {
                self.wrap_count += 1;
            }
            self.last_emitted = count;
        }
    }

    /// Advance the counter and build the marker for it.
    ///
    /// The marker must be written to the FIFO; the caller has already made
    /// room for [`WaitFlags::marker_words`] words.
    pub(crate) fn stamp(&mut self, flags: WaitFlags) -> EventMarker {
        self.sync_shared();

        let mut count = self.last_emitted.wrapping_add(1);
        if count == 0 {
            // 0 means "never touched"; it is never a live stamp.
            count = 1;
            self.wrap_count += 1;
        }
        self.last_emitted = count;
        if let CounterSource::Shadow(shadow) = self.source {
            shadow.write(ShadowStatus::EVENT_MIRROR, count as u32);
        }

        let mut words = [0u32; 2];
        let mut len = 0;
        if let Some(wait) = command::wait_for(flags.wait_2d, flags.wait_3d) {
            words[len] = wait;
            len += 1;
        }
        words[len] = command::event_tag(count);
        len += 1;

        let age = self.last_emitted();
        trace!("Emitting event {}", age);
        EventMarker { age, words, len }
    }

    /// Emit an event marker and return its stamp.
    ///
    /// A full FIFO leaves the counter untouched.
    pub fn emit<H: AccelHal>(&mut self, fifo: &mut Fifo<H>, flags: WaitFlags) -> Result<Age> {
        fifo.wait(flags.marker_words())?;
        let marker = self.stamp(flags);
        fifo.write(marker.words());
        Ok(marker.age)
    }

    /// Block until `age` retires, or the event timeout runs out.
    pub fn wait_for<H: AccelHal>(&self, fifo: &mut Fifo<H>, age: Age) -> Result<()> {
        if self.is_retired(age, self.current(fifo.hal())) {
            return Ok(());
        }
        self.poll_event(fifo, age)
    }

    /// Poll the 16-bit tag alone until it reaches `age.event`.
    pub(crate) fn poll_event<H: AccelHal>(&self, fifo: &mut Fifo<H>, age: Age) -> Result<()> {
        let poll = *fifo.poll();
        let target = age.event;
        let reached = poll_until(fifo.hal_mut(), poll.event_timeout_us, poll.step_us, |hal| {
            let event = self.hardware_event(hal);
            event.wrapping_sub(target) <= 0x7fff || (self.zero_counter_is_idle && event == 0)
        });
        if reached {
            Ok(())
        } else {
            warn!("Timed out waiting for event {}", age);
            Err(AccelError::Busy(BusyOn::Event(age)))
        }
    }
}
