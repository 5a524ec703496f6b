//! Per-device engine state.
//!
//! A [`DeviceContext`] owns everything the engine tracks for one accelerator:
//! the FIFO port, the completion clock, the buffer freelist and the command
//! path. Callers serialize access themselves; every entry point takes
//! `&mut self`.

use log::{debug, info, warn};

use crate::age::Age;
use crate::clock::{CounterSource, EventClock, WaitFlags};
use crate::config::EngineConfig;
use crate::direct::DirectWritePath;
use crate::dma::{CommandPageAllocator, DmaRegion, PageGeometry};
use crate::error::Result;
use crate::fifo::{Fifo, FifoGate};
use crate::hal::{AccelHal, ShadowStatus};
use crate::pool::{BufferHandle, BufferPool};

/// Memory the mapping layer has set up for the engine.
#[derive(Default)]
pub struct MappedResources {
    /// The shadow status page, if the hardware has been told to write it.
    pub shadow: Option<ShadowStatus>,
    /// The DMA command region, if one could be mapped.
    pub dma: Option<DmaRegion>,
}

/// Where allocated command words go.
pub enum CommandPath {
    Dma(CommandPageAllocator),
    Direct(DirectWritePath),
}

impl CommandPath {
    fn build(region: Option<DmaRegion>, config: &EngineConfig) -> Result<Self> {
        match region {
            Some(region) => {
                let geometry = PageGeometry::new(config.page_words)?;
                let allocator = CommandPageAllocator::new(region, geometry, config.dma_type)?;
                Ok(Self::Dma(allocator))
            }
            None => Ok(Self::Direct(DirectWritePath::new(
                config.page_words,
                config.direct_pages,
            ))),
        }
    }

    fn allocate<H: AccelHal>(
        &mut self,
        fifo: &mut Fifo<H>,
        clock: &mut EventClock,
        n: usize,
    ) -> Result<&mut [u32]> {
        match self {
            Self::Dma(allocator) => Ok(allocator.allocate(fifo, clock, n)?.words),
            Self::Direct(direct) => direct.allocate(fifo, n),
        }
    }

    fn flush<H: AccelHal>(&mut self, fifo: &mut Fifo<H>, clock: &mut EventClock) -> Result<()> {
        match self {
            Self::Dma(allocator) => allocator.flush(fifo, clock),
            Self::Direct(direct) => direct.flush(fifo),
        }
    }

    pub fn is_dma(&self) -> bool {
        matches!(self, Self::Dma(_))
    }
}

/// All engine state for one accelerator.
pub struct DeviceContext<H> {
    fifo: Fifo<H>,
    clock: EventClock,
    buffers: BufferPool,
    commands: CommandPath,
    config: EngineConfig,
}

impl<H: AccelHal> DeviceContext<H> {
    /// Validate `config` and build the engine state for one device.
    ///
    /// A shadow page switches both FIFO flow control and the completion
    /// counter to shadow memory; a DMA region switches the command path to
    /// the paged ring.
    pub fn new(hal: H, config: EngineConfig, resources: MappedResources) -> Result<Self> {
        config.validate()?;

        let (gate, source) = match resources.shadow {
            Some(shadow) => (FifoGate::shadow(shadow, &config), CounterSource::Shadow(shadow)),
            None => (FifoGate::register(&config), CounterSource::Register),
        };
        let commands = CommandPath::build(resources.dma, &config)?;
        info!(
            "Accelerator engine: {:?}, {} buffers, {} command path, {} FIFO words",
            config.generation,
            config.buffer_count,
            if commands.is_dma() { "DMA" } else { "direct" },
            gate.capacity()
        );

        Ok(Self {
            fifo: Fifo::new(hal, gate, config.poll),
            clock: EventClock::new(source, config.zero_counter_is_idle),
            buffers: BufferPool::new(config.buffer_count),
            commands,
            config,
        })
    }

    /// Emit an event marker and return its 16-bit tag.
    ///
    /// Pair with [`wrap_count`](Self::wrap_count) to form the full tag, or use
    /// [`emit_event_tag`](Self::emit_event_tag).
    pub fn emit_event(&mut self, flags: WaitFlags) -> Result<u16> {
        Ok(self.clock.emit(&mut self.fifo, flags)?.event)
    }

    /// Emit an event marker and return its packed 32-bit tag.
    pub fn emit_event_tag(&mut self, flags: WaitFlags) -> Result<u32> {
        Ok(self.clock.emit(&mut self.fifo, flags)?.to_tag())
    }

    /// Wait for the event named by a packed tag.
    ///
    /// Returns at once if the event retired already, including events from an
    /// older wrap.
    pub fn wait_event(&mut self, tag: u32) -> Result<()> {
        let age = Age::from_tag(tag);
        self.clock.sync_shared();
        let current = self.clock.current(self.fifo.hal()).truncated();
        if self.clock.is_retired(age, current) {
            return Ok(());
        }
        self.clock.poll_event(&mut self.fifo, age)
    }

    /// Take the oldest free buffer if the hardware is done with it.
    pub fn acquire_buffer(&mut self) -> Option<BufferHandle> {
        self.buffers.acquire(&mut self.clock, self.fifo.hal())
    }

    /// Return a buffer the hardware may still read; it is stamped with a new
    /// event so it is not handed out before that event retires.
    pub fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.buffers.check_releasable(handle)?;
        let age = self.clock.emit(&mut self.fifo, WaitFlags::NONE)?;
        self.buffers.release(handle, age)
    }

    /// Return a buffer stamped with an age the caller already emitted.
    pub fn release_buffer_at(&mut self, handle: BufferHandle, age: Age) -> Result<()> {
        self.buffers.release(handle, age)
    }

    /// Reserve `n` contiguous command words.
    ///
    /// The slice is only valid until the next call into the context.
    pub fn allocate_command_space(&mut self, n: usize) -> Result<&mut [u32]> {
        self.commands.allocate(&mut self.fifo, &mut self.clock, n)
    }

    /// Hand everything allocated since the last flush to the hardware.
    pub fn flush_command_stream(&mut self) -> Result<()> {
        self.commands.flush(&mut self.fifo, &mut self.clock)
    }

    /// Flush, then wait until both engines have drained everything queued.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.flush_command_stream()?;
        let age = self.clock.emit(&mut self.fifo, WaitFlags::ALL)?;
        self.clock.wait_for(&mut self.fifo, age)
    }

    /// Forget the queued command stream after the device has been reset.
    pub fn reset_command_stream(&mut self) -> Result<()> {
        match &mut self.commands {
            CommandPath::Dma(allocator) => allocator.reset(&mut self.fifo, &mut self.clock),
            CommandPath::Direct(direct) => {
                if direct.pending() > 0 {
                    warn!("Dropping {} staged command words", direct.pending());
                }
                direct.reset();
                Ok(())
            }
        }
    }

    /// Swap the command path for a new DMA region, or none.
    ///
    /// Pending commands on the old path are flushed first; on failure the old
    /// path stays in place.
    pub fn replace_dma_region(&mut self, region: Option<DmaRegion>) -> Result<()> {
        let commands = CommandPath::build(region, &self.config)?;
        self.flush_command_stream()?;
        if let CommandPath::Dma(old) = &self.commands {
            // The old ring may still be read by the hardware.
            self.clock.wait_for(&mut self.fifo, old.last_age())?;
        }
        debug!(
            "Command path replaced with {} path",
            if commands.is_dma() { "DMA" } else { "direct" }
        );
        self.commands = commands;
        Ok(())
    }

    /// How far the hardware has got.
    pub fn current_age(&self) -> Age {
        self.clock.current(self.fifo.hal())
    }

    /// Rollovers of the 16-bit event counter so far.
    pub fn wrap_count(&self) -> u32 {
        self.clock.wrap_count()
    }

    pub fn clock(&self) -> &EventClock {
        &self.clock
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn commands(&self) -> &CommandPath {
        &self.commands
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fifo(&self) -> &Fifo<H> {
        &self.fifo
    }

    pub fn hal(&self) -> &H {
        self.fifo.hal()
    }

    pub fn hal_mut(&mut self) -> &mut H {
        self.fifo.hal_mut()
    }
}
