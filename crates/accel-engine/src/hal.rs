//! Hardware access seam.
//!
//! The mapping collaborator owns the register window, the FIFO aperture and
//! the shadow status page. The engine only ever touches them through
//! [`AccelHal`] and [`ShadowStatus`].

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering, fence};

/// FIFO status word, generation S3D.
pub const STATUS_WORD0: u32 = 0x48C00;
/// Event counter status word (low 16 bits hold the last echoed tag).
pub const STATUS_WORD1: u32 = 0x48C04;
/// FIFO status word, generation S4.
pub const ALT_STATUS_WORD0: u32 = 0x48C60;

/// Single-word access to the accelerator.
///
/// Implementations are called with the device's exclusive lock held and need
/// no internal synchronization.
pub trait AccelHal {
    /// Read a 32-bit device register.
    fn read_reg(&self, offset: u32) -> u32;

    /// Write a 32-bit device register.
    fn write_reg(&mut self, offset: u32, value: u32);

    /// Push words into the immediate command FIFO, in order.
    ///
    /// The caller has already waited for room.
    fn write_fifo(&mut self, words: &[u32]);

    /// Sleep or spin for roughly `us` microseconds.
    fn delay_us(&mut self, us: u32);
}

/// The hardware-written shadow status page.
///
/// The accelerator mirrors its FIFO fill level and the last completed event
/// tag into this page, so polling does not need register reads. The last word
/// is host-owned and carries the last event tag the host emitted.
#[derive(Clone, Copy)]
pub struct ShadowStatus {
    cells: &'static [AtomicU32],
}

impl ShadowStatus {
    /// Number of 32-bit words in the shadow page.
    pub const WORDS: usize = 1024;
    /// FIFO fill level.
    pub const FIFO_STATUS: usize = 0;
    /// Last event tag the hardware completed.
    pub const EVENT_STATUS: usize = 1;
    /// Last event tag emitted by any host producer.
    pub const EVENT_MIRROR: usize = 1023;

    /// Wrap a page of cells.
    ///
    /// Returns `None` if fewer than [`WORDS`](Self::WORDS) cells are provided.
    pub fn from_cells(cells: &'static [AtomicU32]) -> Option<Self> {
        if cells.len() < Self::WORDS {
            return None;
        }
        Some(Self { cells })
    }

    /// Wrap a mapped shadow page.
    ///
    /// # Safety
    ///
    /// `ptr` must point to [`WORDS`](Self::WORDS) mapped, 4-byte aligned words
    /// that stay mapped for the rest of the program.
    pub unsafe fn from_raw(ptr: NonNull<u32>) -> Self {
        // AtomicU32 has the same layout as u32.
        let cells = unsafe {
            core::slice::from_raw_parts(ptr.as_ptr() as *const AtomicU32, Self::WORDS)
        };
        Self { cells }
    }

    /// Read a cell the hardware may have written behind our back.
    ///
    /// The fence keeps the load from being hoisted above earlier register or
    /// FIFO accesses.
    #[inline]
    pub fn read(&self, index: usize) -> u32 {
        fence(Ordering::SeqCst);
        self.cells[index].load(Ordering::Acquire)
    }

    /// Write a host-owned cell.
    #[inline]
    pub fn write(&self, index: usize, value: u32) {
        self.cells[index].store(value, Ordering::Release);
    }
}

impl core::fmt::Debug for ShadowStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShadowStatus")
            .field("base", &self.cells.as_ptr())
            .finish()
    }
}
