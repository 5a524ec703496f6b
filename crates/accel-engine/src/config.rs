//! Engine setup parameters.
//!
//! The collaborator that maps the device fills in an [`EngineConfig`];
//! [`DeviceContext::new`](crate::DeviceContext::new) validates it before any
//! buffer or page state is built.

use crate::error::{AccelError, Result};
use crate::hal::{ALT_STATUS_WORD0, STATUS_WORD0};

/// Words in the on-chip BCI FIFO, on top of the command overflow buffer.
pub const BCI_FIFO_WORDS: u32 = 32;

/// Hardware generation, as far as FIFO status reporting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipGeneration {
    /// Older parts report the FIFO fill level in status word 0.
    S3d,
    /// Newer parts report it in the alternate status word with a wider mask.
    S4,
}

impl ChipGeneration {
    /// Register holding the FIFO fill level.
    pub const fn fifo_status_register(self) -> u32 {
        match self {
            Self::S3d => STATUS_WORD0,
            Self::S4 => ALT_STATUS_WORD0,
        }
    }

    /// Bits of the status word counting used FIFO entries.
    pub const fn fifo_used_mask(self) -> u32 {
        match self {
            Self::S3d => 0x0001_ffff,
            Self::S4 => 0x001f_ffff,
        }
    }
}

/// How the DMA engine reaches the command region. OR-ed into the kick address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DmaType {
    Pci = 1,
    Agp = 3,
}

/// Bounds on busy-polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between polls.
    pub step_us: u32,
    /// Give up waiting for FIFO space after this long.
    pub fifo_timeout_us: u32,
    /// Give up waiting for an event after this long.
    pub event_timeout_us: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            step_us: 1,
            fifo_timeout_us: 1_000_000,
            event_timeout_us: 5_000_000,
        }
    }
}

/// Everything the engine needs to know about the device it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub generation: ChipGeneration,
    /// Command overflow buffer size in words.
    pub cob_size: u32,
    /// Shadow FIFO strategy waits until fewer than this many entries are used.
    pub bci_threshold_hi: u32,
    pub dma_type: DmaType,
    /// Framebuffer bits per pixel.
    pub fb_bpp: u32,
    /// Depth buffer bits per pixel.
    pub depth_bpp: u32,
    /// Number of discrete buffers in the pool.
    pub buffer_count: usize,
    /// Command page size in words.
    pub page_words: usize,
    /// Staging pages for the direct write path.
    pub direct_pages: usize,
    /// Treat a hardware event counter of exactly 0 as "everything retired".
    ///
    /// Some boards reset the counter to 0 on mode changes, which would
    /// otherwise stall every waiter until the counter catches up.
    pub zero_counter_is_idle: bool,
    pub poll: PollConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generation: ChipGeneration::S4,
            cob_size: 0x8000 / 4,
            bci_threshold_hi: 0x8000 / 4,
            dma_type: DmaType::Pci,
            fb_bpp: 32,
            depth_bpp: 32,
            buffer_count: 32,
            page_words: 1024,
            direct_pages: 4,
            zero_counter_is_idle: true,
            poll: PollConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Total words the FIFO can absorb: the BCI FIFO plus the overflow buffer.
    pub const fn fifo_capacity(&self) -> u32 {
        self.cob_size + BCI_FIFO_WORDS
    }

    pub fn validate(&self) -> Result<()> {
        if self.fb_bpp != 16 && self.fb_bpp != 32 {
            return Err(AccelError::InvalidConfig("framebuffer bpp must be 16 or 32"));
        }
        if self.depth_bpp != 16 && self.depth_bpp != 32 {
            return Err(AccelError::InvalidConfig("depth buffer bpp must be 16 or 32"));
        }
        if self.bci_threshold_hi == 0 || self.bci_threshold_hi > self.fifo_capacity() {
            return Err(AccelError::InvalidConfig("FIFO threshold outside FIFO capacity"));
        }
        if self.page_words < 2 || self.page_words % 2 != 0 {
            return Err(AccelError::InvalidConfig("page size must be a non-zero even word count"));
        }
        if self.direct_pages == 0 {
            return Err(AccelError::InvalidConfig("direct write path needs at least one page"));
        }
        if self.poll.step_us == 0 {
            return Err(AccelError::InvalidConfig("poll step must be non-zero"));
        }
        Ok(())
    }
}
