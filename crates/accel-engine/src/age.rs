//! Wraparound-safe completion stamps.

use core::fmt;

/// A point on the hardware's completion timeline.
///
/// `event` is the 16-bit tag the hardware echoes back; `wrap` counts how many
/// times the host has rolled that tag over. An event of 0 is never emitted, so
/// `Age` with event 0 marks memory the hardware has never been asked to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Age {
    pub event: u16,
    pub wrap: u32,
}

impl Age {
    /// The "never touched" stamp. Always retired.
    pub const NEVER: Age = Age { event: 0, wrap: 0 };

    pub const fn new(event: u16, wrap: u32) -> Self {
        Self { event, wrap }
    }

    /// Whether this stamp is the sentinel (event 0).
    pub const fn is_sentinel(&self) -> bool {
        self.event == 0
    }

    /// Whether `self` happened no later than `other`.
    ///
    /// Within one wrap the events are compared as signed 16-bit distances, so
    /// `other` may be up to 0x7fff events ahead. A sentinel is before anything.
    pub fn is_before_or_eq(&self, other: Age) -> bool {
        if self.is_sentinel() || self.wrap < other.wrap {
            return true;
        }
        self.wrap == other.wrap && other.event.wrapping_sub(self.event) <= 0x7fff
    }

    /// Pack into the 32-bit tag handed across the external interface.
    ///
    /// Only the low 16 bits of the wrap count survive.
    pub const fn to_tag(&self) -> u32 {
        (self.wrap << 16) | self.event as u32
    }

    /// Unpack a 32-bit tag produced by [`to_tag`](Self::to_tag).
    pub const fn from_tag(tag: u32) -> Self {
        Self {
            event: tag as u16,
            wrap: tag >> 16,
        }
    }

    /// The same point with its wrap truncated to the 16 bits a tag carries.
    pub const fn truncated(&self) -> Self {
        Self {
            event: self.event,
            wrap: self.wrap & 0xffff,
        }
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}@{}", self.event, self.wrap)
    }
}
