//! Shared front end for one accelerator.

use spinning_top::Spinlock;
use spinning_top::guard::SpinlockGuard;

use crate::age::Age;
use crate::clock::WaitFlags;
use crate::config::EngineConfig;
use crate::context::{DeviceContext, MappedResources};
use crate::dma::DmaRegion;
use crate::error::Result;
use crate::hal::AccelHal;
use crate::pool::BufferHandle;

/// A [`DeviceContext`] behind a spinlock.
///
/// Each call takes the lock for its whole duration, including any polling it
/// does. Use [`lock`](Self::lock) to run several operations as one unit.
pub struct Device<H> {
    context: Spinlock<DeviceContext<H>>,
}

impl<H: AccelHal> Device<H> {
    pub fn new(hal: H, config: EngineConfig, resources: MappedResources) -> Result<Self> {
        Ok(Self::from_context(DeviceContext::new(hal, config, resources)?))
    }

    /// Wrap an already built context.
    pub fn from_context(context: DeviceContext<H>) -> Self {
        Self {
            context: Spinlock::new(context),
        }
    }

    /// Hold the context for a sequence of calls.
    pub fn lock(&self) -> SpinlockGuard<'_, DeviceContext<H>> {
        self.context.lock()
    }

    pub fn emit_event(&self, flags: WaitFlags) -> Result<u16> {
        self.context.lock().emit_event(flags)
    }

    pub fn emit_event_tag(&self, flags: WaitFlags) -> Result<u32> {
        self.context.lock().emit_event_tag(flags)
    }

    pub fn wait_event(&self, tag: u32) -> Result<()> {
        self.context.lock().wait_event(tag)
    }

    pub fn wrap_count(&self) -> u32 {
        self.context.lock().wrap_count()
    }

    pub fn acquire_buffer(&self) -> Option<BufferHandle> {
        self.context.lock().acquire_buffer()
    }

    pub fn release_buffer(&self, handle: BufferHandle) -> Result<()> {
        self.context.lock().release_buffer(handle)
    }

    pub fn release_buffer_at(&self, handle: BufferHandle, age: Age) -> Result<()> {
        self.context.lock().release_buffer_at(handle, age)
    }

    /// Reserve `n` command words and let `fill` write them.
    pub fn with_command_space<R>(&self, n: usize, fill: impl FnOnce(&mut [u32]) -> R) -> Result<R> {
        let mut context = self.context.lock();
        let words = context.allocate_command_space(n)?;
        Ok(fill(words))
    }

    /// Queue `words` and flush them to the hardware.
    pub fn submit_commands(&self, words: &[u32]) -> Result<()> {
        let mut context = self.context.lock();
        context.allocate_command_space(words.len())?.copy_from_slice(words);
        context.flush_command_stream()
    }

    pub fn flush_command_stream(&self) -> Result<()> {
        self.context.lock().flush_command_stream()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.context.lock().wait_idle()
    }

    pub fn reset_command_stream(&self) -> Result<()> {
        self.context.lock().reset_command_stream()
    }

    pub fn replace_dma_region(&self, region: Option<DmaRegion>) -> Result<()> {
        self.context.lock().replace_dma_region(region)
    }

    pub fn into_inner(self) -> DeviceContext<H> {
        self.context.into_inner()
    }
}
