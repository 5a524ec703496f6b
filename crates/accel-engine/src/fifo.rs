//! Flow control for the immediate command FIFO.
//!
//! Before anything is written to the FIFO the caller must make sure the
//! hardware has room for it, or the words are silently dropped. Two ways of
//! finding out are supported, picked once at setup: poll the shadow status
//! page the hardware writes its fill level to, or poll a status register.

use log::{error, warn};

use crate::config::{ChipGeneration, EngineConfig, PollConfig};
use crate::error::{AccelError, BusyOn, Result};
use crate::hal::{AccelHal, ShadowStatus};
use crate::poll::poll_until;

/// How to tell whether the FIFO has room.
#[derive(Debug, Clone, Copy)]
pub enum FifoGate {
    /// Poll the fill level the hardware mirrors into the shadow page.
    Shadow {
        status: ShadowStatus,
        used_mask: u32,
        threshold: u32,
        capacity: u32,
    },
    /// Poll the generation's FIFO status register.
    Register {
        generation: ChipGeneration,
        capacity: u32,
    },
}

impl FifoGate {
    /// Gate on the fill level mirrored into the shadow page.
    pub fn shadow(status: ShadowStatus, config: &EngineConfig) -> Self {
        Self::Shadow {
            status,
            used_mask: config.generation.fifo_used_mask(),
            threshold: config.bci_threshold_hi,
            capacity: config.fifo_capacity(),
        }
    }

    /// Gate on the generation's FIFO status register.
    pub fn register(config: &EngineConfig) -> Self {
        Self::Register {
            generation: config.generation,
            capacity: config.fifo_capacity(),
        }
    }

    /// Most words a single wait can ever make room for.
    pub fn capacity(&self) -> usize {
        match *self {
            Self::Shadow { capacity, .. } | Self::Register { capacity, .. } => capacity as usize,
        }
    }

    /// Whether there is room for `n` words right now.
    pub fn has_room<H: AccelHal>(&self, hal: &H, n: usize) -> bool {
        match *self {
            Self::Shadow {
                status,
                used_mask,
                threshold,
                ..
            } => status.read(ShadowStatus::FIFO_STATUS) & used_mask < threshold,
            Self::Register {
                generation,
                capacity,
            } => {
                let max_used = capacity.saturating_sub(n as u32);
                let status = hal.read_reg(generation.fifo_status_register());
                status & generation.fifo_used_mask() <= max_used
            }
        }
    }

    /// Wait until there is room for `n` words.
    pub fn wait<H: AccelHal>(&self, hal: &mut H, poll: &PollConfig, n: usize) -> Result<()> {
        let capacity = self.capacity();
        if n > capacity {
            error!("Trying to reserve {} FIFO words, FIFO holds {}", n, capacity);
            return Err(AccelError::RequestTooLarge {
                requested: n,
                limit: capacity,
            });
        }
        if let Self::Shadow { threshold, .. } = *self {
            // The threshold only guarantees this much headroom.
            let guaranteed = capacity.saturating_sub(threshold as usize);
            if n > guaranteed {
                error!(
                    "Trying to emit {} words, more than the {} guaranteed by the threshold",
                    n, guaranteed
                );
            }
        }

        if poll_until(hal, poll.fifo_timeout_us, poll.step_us, |hal| {
            self.has_room(hal, n)
        }) {
            Ok(())
        } else {
            warn!("Timed out waiting for {} words of FIFO space", n);
            Err(AccelError::Busy(BusyOn::FifoSpace(n)))
        }
    }
}

/// The hardware accessor together with the gate guarding its FIFO.
pub struct Fifo<H> {
    hal: H,
    gate: FifoGate,
    poll: PollConfig,
}

impl<H: AccelHal> Fifo<H> {
    pub fn new(hal: H, gate: FifoGate, poll: PollConfig) -> Self {
        Self { hal, gate, poll }
    }

    /// Wait for room for `n` words.
    pub fn wait(&mut self, n: usize) -> Result<()> {
        self.gate.wait(&mut self.hal, &self.poll, n)
    }

    /// Push words the caller already made room for.
    pub fn write(&mut self, words: &[u32]) {
        self.hal.write_fifo(words);
    }

    /// Wait for room, then push.
    pub fn submit(&mut self, words: &[u32]) -> Result<()> {
        self.wait(words.len())?;
        self.write(words);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.gate.capacity()
    }

    pub fn gate(&self) -> &FifoGate {
        &self.gate
    }

    pub fn poll(&self) -> &PollConfig {
        &self.poll
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }
}
