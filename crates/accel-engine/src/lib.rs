//! Command stream and buffer lifecycle engine for a DMA-capable 2D/3D
//! accelerator.
//!
//! The accelerator consumes commands and buffers asynchronously. This crate
//! decides when host-owned memory may be reused: every submission is stamped
//! with an [`Age`] the hardware echoes back once it has consumed the work, and
//! buffers and command pages are only handed out again once their age has
//! retired.
//!
//! The pieces, leaves first:
//! - [`EventClock`] - wrap-safe completion counter and event markers
//! - [`FifoGate`] - bounded wait for space in the immediate command FIFO
//! - [`BufferPool`] - age-ordered freelist of discrete buffers
//! - [`CommandPageAllocator`] - paged ring staging the DMA command stream
//! - [`DirectWritePath`] - FIFO replay fallback when there is no DMA region
//!
//! [`DeviceContext`] owns all of them for one device; [`Device`] wraps a
//! context in a spinlock for callers that want shared-reference entry points.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod age;
pub mod clock;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod direct;
pub mod dma;
pub mod error;
pub mod fifo;
pub mod hal;
pub mod pool;
mod poll;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use age::Age;
pub use clock::{CounterSource, EventClock, WaitFlags};
pub use config::{ChipGeneration, DmaType, EngineConfig, PollConfig};
pub use context::{CommandPath, DeviceContext, MappedResources};
pub use device::Device;
pub use direct::DirectWritePath;
pub use dma::{CommandPageAllocator, CommandRegion, DmaPage, DmaRegion, PageGeometry};
pub use error::{AccelError, BusyOn, Result};
pub use fifo::{Fifo, FifoGate};
pub use hal::{AccelHal, ShadowStatus};
pub use pool::{BufferHandle, BufferPool};
