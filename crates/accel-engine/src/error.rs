//! Error types for the command engine.

use core::fmt;

use crate::age::Age;

/// Result type used throughout the engine.
pub type Result<T> = core::result::Result<T, AccelError>;

/// What a timed-out poll was waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyOn {
    /// Room for this many words in the command FIFO.
    FifoSpace(usize),
    /// The hardware echoing this event.
    Event(Age),
}

/// Errors that can occur while driving the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelError {
    /// A bounded poll ran out before the hardware made progress.
    ///
    /// The device may be wedged or just slow. Nothing was retried; the caller
    /// decides whether to try again or reset the device.
    Busy(BusyOn),
    /// The buffer is already on the free list.
    AlreadyFree(usize),
    /// No buffer with this index exists in the pool.
    UnknownBuffer(usize),
    /// A request asked for more words than can ever be satisfied.
    RequestTooLarge { requested: usize, limit: usize },
    /// A request was malformed (e.g. zero length).
    InvalidParameter(&'static str),
    /// Setup parameters were rejected before any state was built.
    InvalidConfig(&'static str),
}

impl AccelError {
    /// Whether the error is a timeout the caller may retry.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl fmt::Display for AccelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy(BusyOn::FifoSpace(words)) => {
                write!(f, "Device busy: no FIFO space for {} words", words)
            }
            Self::Busy(BusyOn::Event(age)) => write!(f, "Device busy: event {} not retired", age),
            Self::AlreadyFree(index) => write!(f, "Buffer {} is already on the free list", index),
            Self::UnknownBuffer(index) => write!(f, "No buffer with index {}", index),
            Self::RequestTooLarge { requested, limit } => {
                write!(f, "Request for {} words exceeds limit of {}", requested, limit)
            }
            Self::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}
