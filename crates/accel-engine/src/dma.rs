//! Paged command ring fed to the DMA engine.
//!
//! The command region is split into fixed-size pages. Producers allocate
//! contiguous runs of words from the current page onwards; a flush hands
//! everything between the first unflushed word and the end of the current
//! page's data to the DMA engine in one kick, then stamps the pages it
//! consumed with a fresh event so they are not overwritten before the
//! hardware has read them.
//!
//! ```text
//!   page:   0        1        2        3
//!         [aged ] [flushed|used ] [used  ] [free ]
//!                  ^first          ^current
//! ```

use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{Ordering, fence};

use log::{debug, trace};
use x86_64::PhysAddr;
use zerocopy::FromBytes;

use crate::age::Age;
use crate::clock::{EventClock, WaitFlags};
use crate::command;
use crate::config::DmaType;
use crate::error::{AccelError, Result};
use crate::fifo::Fifo;
use crate::hal::AccelHal;

/// The mapped, DMA-visible command region.
pub struct DmaRegion {
    words: &'static mut [u32],
    bus_address: PhysAddr,
}

impl DmaRegion {
    pub fn from_words(words: &'static mut [u32], bus_address: PhysAddr) -> Self {
        Self { words, bus_address }
    }

    /// View a mapped byte region as command words.
    ///
    /// Fails if the region is not 4-byte aligned or its length is not a
    /// whole number of words.
    pub fn from_bytes(bytes: &'static mut [u8], bus_address: PhysAddr) -> Result<Self> {
        let words = <[u32]>::mut_from_bytes(bytes)
            .map_err(|_| AccelError::InvalidConfig("DMA region is not a whole number of aligned words"))?;
        Ok(Self { words, bus_address })
    }

    /// # Safety
    ///
    /// `ptr` must point to `len` mapped words that nothing else accesses and
    /// that stay mapped for the rest of the program.
    pub unsafe fn from_raw(ptr: NonNull<u32>, len: usize, bus_address: PhysAddr) -> Self {
        let words = unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
        Self { words, bus_address }
    }

    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    pub fn bus_address(&self) -> PhysAddr {
        self.bus_address
    }

    pub fn words(&self) -> &[u32] {
        self.words
    }
}

/// Page size and the alignment the next block starts on after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    page_words: usize,
    align_words: usize,
}

impl PageGeometry {
    /// Flushed lengths are padded to this many words.
    pub const PAD_WORDS: usize = 2;
    /// The DMA engine wants each block to start on this many words.
    pub const ALIGN_WORDS: usize = 8;

    /// Geometry for pages of `page_words` words.
    ///
    /// Pages whose size is not a multiple of [`ALIGN_WORDS`](Self::ALIGN_WORDS)
    /// cannot keep blocks 8-word aligned across page boundaries; they only
    /// keep the 2-word pad alignment.
    pub fn new(page_words: usize) -> Result<Self> {
        if page_words < Self::PAD_WORDS || page_words % Self::PAD_WORDS != 0 {
            return Err(AccelError::InvalidConfig("page size must be a non-zero even word count"));
        }
        let align_words = if page_words % Self::ALIGN_WORDS == 0 {
            Self::ALIGN_WORDS
        } else {
            Self::PAD_WORDS
        };
        Ok(Self {
            page_words,
            align_words,
        })
    }

    pub fn page_words(&self) -> usize {
        self.page_words
    }

    pub fn align_words(&self) -> usize {
        self.align_words
    }
}

/// Bookkeeping for one page of the command ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaPage {
    /// Words written since the page was last reset.
    pub used: usize,
    /// Words already handed to the DMA engine.
    pub flushed: usize,
    /// Retirement stamp of the page's previous contents.
    pub age: Age,
}

impl DmaPage {
    const fn reset(age: Age) -> Self {
        Self {
            used: 0,
            flushed: 0,
            age,
        }
    }
}

/// A run of command words handed out by an allocation.
#[derive(Debug)]
pub struct CommandRegion<'a> {
    /// Page the run starts in.
    pub page: usize,
    /// Word offset of the run within that page.
    pub offset: usize,
    pub words: &'a mut [u32],
}

/// Ring of command pages over a [`DmaRegion`].
pub struct CommandPageAllocator {
    region: DmaRegion,
    dma_type: DmaType,
    geometry: PageGeometry,
    pages: Vec<DmaPage>,
    first: usize,
    current: usize,
    last_age: Age,
}

impl CommandPageAllocator {
    /// Split `region` into pages, all free and never used.
    pub fn new(region: DmaRegion, geometry: PageGeometry, dma_type: DmaType) -> Result<Self> {
        let nr_pages = region.len_words() / geometry.page_words();
        if nr_pages == 0 {
            return Err(AccelError::InvalidConfig("DMA region smaller than one page"));
        }
        let end = region.bus_address().as_u64() + (nr_pages * geometry.page_words() * 4) as u64;
        if end > u64::from(u32::MAX) + 1 {
            return Err(AccelError::InvalidConfig("DMA region is not 32-bit addressable"));
        }
        debug!(
            "Command ring: {} pages of {} words at {:#x}",
            nr_pages,
            geometry.page_words(),
            region.bus_address().as_u64()
        );

        Ok(Self {
            region,
            dma_type,
            geometry,
            pages: alloc::vec![DmaPage::reset(Age::NEVER); nr_pages],
            first: 0,
            current: 0,
            last_age: Age::NEVER,
        })
    }

    /// Hand out `n` contiguous words.
    ///
    /// The run continues where the previous allocation stopped. If it would
    /// run past the end of the ring, the pending stream is flushed and the run
    /// starts over at page 0. Pages being written for the first time since
    /// their last reset wait for their previous contents to retire.
    pub fn allocate<H: AccelHal>(
        &mut self,
        fifo: &mut Fifo<H>,
        clock: &mut EventClock,
        n: usize,
    ) -> Result<CommandRegion<'_>> {
        let page_words = self.geometry.page_words();
        let nr_pages = self.pages.len();
        if n == 0 {
            return Err(AccelError::InvalidParameter("zero-length command allocation"));
        }
        if n > nr_pages * page_words {
            return Err(AccelError::RequestTooLarge {
                requested: n,
                limit: nr_pages * page_words,
            });
        }

        let cur = self.current;
        let rest = page_words - self.pages[cur].used;
        let extra_pages = n.saturating_sub(rest).div_ceil(page_words);
        let start = if cur + extra_pages < nr_pages {
            cur * page_words + self.pages[cur].used
        } else {
            self.flush(fifo, clock)?;
            let last_age = self.last_age;
            for page in &mut self.pages[cur..] {
                *page = DmaPage::reset(last_age);
            }
            self.first = 0;
            self.current = 0;
            0
        };

        let first_page = start / page_words;
        let last_page = (start + n - 1) / page_words;
        for page in first_page..=last_page {
            if self.pages[page].used == 0 {
                self.wait_for_retirement(page, fifo, clock)?;
            }
        }

        let mut remaining = n;
        let mut offset = start % page_words;
        for page in &mut self.pages[first_page..=last_page] {
            let take = remaining.min(page_words - offset);
            page.used = offset + take;
            remaining -= take;
            offset = 0;
        }
        self.current = last_page;
        trace!("Allocated {} words at page {} offset {}", n, first_page, start % page_words);

        Ok(CommandRegion {
            page: first_page,
            offset: start % page_words,
            words: &mut self.region.words[start..start + n],
        })
    }

    /// Hand everything written since the last flush to the DMA engine.
    pub fn flush<H: AccelHal>(&mut self, fifo: &mut Fifo<H>, clock: &mut EventClock) -> Result<()> {
        let page_words = self.geometry.page_words();
        let first = self.first;
        let cur = self.current;
        let used = self.pages[cur].used;
        if first == cur && used == self.pages[cur].flushed {
            return Ok(());
        }

        let pad = used % PageGeometry::PAD_WORDS;
        let align = (self.geometry.align_words() - (used + pad) % self.geometry.align_words())
            % self.geometry.align_words();
        let start = first * page_words + self.pages[first].flushed;
        let len = (cur - first) * page_words + used + pad - self.pages[first].flushed;
        let address = self.region.bus_address().as_u64() as u32 + (start * 4) as u32;

        debug!(
            "Flushing first={} cur={} first.flushed={} cur.used={} pad={} align={} len={}",
            first, cur, self.pages[first].flushed, used, pad, align, len
        );

        // Room for the kick and the marker, so nothing below can fail.
        fifo.wait(command::DMA_KICK_WORDS + WaitFlags::NONE.marker_words())?;

        let pad_start = cur * page_words + used;
        self.region.words[pad_start..pad_start + pad].fill(command::NOP);
        // The command words must be in memory before the DMA engine is told
        // to fetch them.
        fence(Ordering::Release);

        fifo.write(&command::dma_kick(address | self.dma_type as u32, len as u32));
        let marker = clock.stamp(WaitFlags::NONE);
        fifo.write(marker.words());
        let age = marker.age;

        for page in &mut self.pages[first..cur] {
            *page = DmaPage::reset(age);
        }

        let used = used + pad + align;
        if used == page_words {
            self.pages[cur] = DmaPage::reset(age);
            let next = (cur + 1) % self.pages.len();
            self.first = next;
            self.current = next;
        } else {
            self.first = cur;
            self.pages[cur].used = used;
            self.pages[cur].flushed = used;
        }
        self.last_age = age;

        trace!(
            "Flushed at {}; first=cur={} used={} flushed={}",
            age,
            self.current,
            self.pages[self.current].used,
            self.pages[self.current].flushed
        );
        Ok(())
    }

    /// Stamp every page with a fresh event and rewind the ring.
    ///
    /// Used after the device has been reset and whatever was queued is gone.
    pub fn reset<H: AccelHal>(&mut self, fifo: &mut Fifo<H>, clock: &mut EventClock) -> Result<()> {
        let age = clock.emit(fifo, WaitFlags::NONE)?;
        for page in &mut self.pages {
            *page = DmaPage::reset(age);
        }
        self.last_age = age;
        self.first = 0;
        self.current = 0;
        Ok(())
    }

    fn wait_for_retirement<H: AccelHal>(
        &self,
        page: usize,
        fifo: &mut Fifo<H>,
        clock: &mut EventClock,
    ) -> Result<()> {
        clock.sync_shared();
        let age = self.pages[page].age;
        if !clock.is_retired(age, clock.current(fifo.hal())) {
            trace!("Waiting for page {} to retire at {}", page, age);
        }
        clock.wait_for(fifo, age)
    }

    pub fn pages(&self) -> &[DmaPage] {
        &self.pages
    }

    pub fn first_page(&self) -> usize {
        self.first
    }

    pub fn current_page(&self) -> usize {
        self.current
    }

    /// Stamp of the most recent flush.
    pub fn last_age(&self) -> Age {
        self.last_age
    }

    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    pub fn region(&self) -> &DmaRegion {
        &self.region
    }

    /// Whether anything has been written that was not yet flushed.
    pub fn has_pending(&self) -> bool {
        self.first != self.current || self.pages[self.current].used != self.pages[self.current].flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::CounterSource;
    use crate::config::{EngineConfig, PollConfig};
    use crate::fifo::FifoGate;
    use crate::testing::{Completion, MockHal, leak_region};

    const BUS: u64 = 0x0800_0000;

    fn setup(page_words: usize, pages: usize) -> (CommandPageAllocator, Fifo<MockHal>, EventClock) {
        let poll = PollConfig {
            step_us: 10,
            fifo_timeout_us: 1_000,
            event_timeout_us: 5_000,
        };
        let fifo = Fifo::new(MockHal::new(), FifoGate::register(&EngineConfig::default()), poll);
        let clock = EventClock::new(CounterSource::Register, false);
        let region = leak_region(page_words * pages, BUS);
        let ring = CommandPageAllocator::new(region, PageGeometry::new(page_words).unwrap(), DmaType::Pci)
            .unwrap();
        (ring, fifo, clock)
    }

    #[test]
    fn test_region_too_small_rejected() {
        let region = leak_region(6, BUS);
        assert!(matches!(
            CommandPageAllocator::new(region, PageGeometry::new(8).unwrap(), DmaType::Pci),
            Err(AccelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_region_above_4g_rejected() {
        let region = leak_region(16, 0xffff_fff0);
        assert!(CommandPageAllocator::new(region, PageGeometry::new(8).unwrap(), DmaType::Pci).is_err());
    }

    #[test]
    fn test_geometry() {
        assert_eq!(PageGeometry::new(1024).unwrap().align_words(), 8);
        assert_eq!(PageGeometry::new(4).unwrap().align_words(), 2);
        assert!(PageGeometry::new(0).is_err());
        assert!(PageGeometry::new(5).is_err());
    }

    #[test]
    fn test_two_page_example() {
        let (mut ring, mut fifo, mut clock) = setup(4, 2);

        let a = ring.allocate(&mut fifo, &mut clock, 3).unwrap();
        assert_eq!((a.page, a.offset, a.words.len()), (0, 0, 3));
        a.words.copy_from_slice(&[0xA1, 0xA2, 0xA3]);

        let b = ring.allocate(&mut fifo, &mut clock, 3).unwrap();
        assert_eq!((b.page, b.offset, b.words.len()), (0, 3, 3));
        b.words.copy_from_slice(&[0xB1, 0xB2, 0xB3]);
        assert_eq!(ring.pages()[0].used, 4);
        assert_eq!(ring.pages()[1].used, 2);
        assert_eq!(ring.current_page(), 1);

        ring.flush(&mut fifo, &mut clock).unwrap();
        let age = ring.last_age();
        assert_eq!(age, Age::new(1, 0));
        assert_eq!(ring.pages()[0], DmaPage { used: 0, flushed: 0, age });
        assert_eq!(ring.pages()[1].used, 2);
        assert_eq!(ring.pages()[1].flushed, 2);
        assert_eq!(ring.pages()[1].age, Age::NEVER);
        assert_eq!((ring.first_page(), ring.current_page()), (1, 1));
        assert_eq!(&ring.region().words()[..6], &[0xA1, 0xA2, 0xA3, 0xB1, 0xB2, 0xB3]);

        let mut expected = command::dma_kick(BUS as u32 | DmaType::Pci as u32, 6).to_vec();
        expected.push(command::event_tag(1));
        assert_eq!(fifo.hal().fifo_words(), expected);
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let (mut ring, mut fifo, mut clock) = setup(16, 4);
        let mut next = 0;
        for n in [1, 5, 16, 3, 7, 2, 9] {
            let region = ring.allocate(&mut fifo, &mut clock, n).unwrap();
            let start = region.page * 16 + region.offset;
            assert_eq!(start, next, "allocation of {} words", n);
            next = start + n;
        }
        assert_eq!(next, 43);
        assert_eq!(ring.current_page(), 2);
    }

    #[test]
    fn test_flush_pads_and_aligns() {
        let (mut ring, mut fifo, mut clock) = setup(64, 2);
        ring.allocate(&mut fifo, &mut clock, 5).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();

        // 5 words padded to 6, next block starts at 8.
        let words = fifo.hal().fifo_words();
        assert_eq!(words[2], command::dma(6));
        assert_eq!(ring.region().words()[5], command::NOP);
        assert_eq!(ring.pages()[0].used, 8);
        assert_eq!(ring.pages()[0].flushed, 8);

        let next = ring.allocate(&mut fifo, &mut clock, 3).unwrap();
        assert_eq!(next.offset, 8);
    }

    #[test]
    fn test_second_flush_starts_at_flushed_offset() {
        let (mut ring, mut fifo, mut clock) = setup(64, 2);
        ring.allocate(&mut fifo, &mut clock, 4).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();
        ring.allocate(&mut fifo, &mut clock, 2).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();

        let words = fifo.hal().fifo_words();
        // Second kick: address after the first 8-word block, 2 words long.
        assert_eq!(words[5], (BUS as u32 + 8 * 4) | DmaType::Pci as u32);
        assert_eq!(words[6], command::dma(2));
    }

    #[test]
    fn test_flush_with_nothing_pending_is_noop() {
        let (mut ring, mut fifo, mut clock) = setup(8, 2);
        ring.flush(&mut fifo, &mut clock).unwrap();
        assert!(fifo.hal().fifo_words().is_empty());

        ring.allocate(&mut fifo, &mut clock, 2).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();
        let written = fifo.hal().fifo_words().len();
        ring.flush(&mut fifo, &mut clock).unwrap();
        assert_eq!(fifo.hal().fifo_words().len(), written);
        assert!(!ring.has_pending());
    }

    #[test]
    fn test_full_page_advances_cursor() {
        let (mut ring, mut fifo, mut clock) = setup(8, 2);
        ring.allocate(&mut fifo, &mut clock, 8).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();
        assert_eq!((ring.first_page(), ring.current_page()), (1, 1));
        assert_eq!(ring.pages()[0].age, ring.last_age());

        ring.allocate(&mut fifo, &mut clock, 8).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();
        assert_eq!((ring.first_page(), ring.current_page()), (0, 0));
    }

    #[test]
    fn test_wrap_flushes_and_restarts() {
        let (mut ring, mut fifo, mut clock) = setup(8, 2);
        ring.allocate(&mut fifo, &mut clock, 6).unwrap();
        ring.allocate(&mut fifo, &mut clock, 6).unwrap();
        assert_eq!(ring.current_page(), 1);

        // Does not fit in what is left; flush and start over at page 0.
        let region = ring.allocate(&mut fifo, &mut clock, 6).unwrap();
        assert_eq!((region.page, region.offset), (0, 0));
        assert_eq!(fifo.hal().fifo_words()[2], command::dma(12));
        assert_eq!(ring.pages()[1].age, ring.last_age());
        assert_eq!(ring.pages()[1].used, 0);
    }

    #[test]
    fn test_wrap_keeps_retired_page_ages() {
        let (mut ring, mut fifo, mut clock) = setup(8, 3);
        fifo.hal().set_completion(Completion::Manual);
        ring.allocate(&mut fifo, &mut clock, 8).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();
        fifo.hal().complete_all();
        ring.allocate(&mut fifo, &mut clock, 16).unwrap();
        assert_eq!(ring.current_page(), 2);

        // The implicit flush fills the last page and moves the cursor round to
        // page 0, which only ever held the retired first batch.
        let region = ring.allocate(&mut fifo, &mut clock, 4).unwrap();
        assert_eq!((region.page, region.offset), (0, 0));
        assert_eq!(fifo.hal().elapsed_us(), 0);
        assert_eq!(ring.pages()[0].age, Age::new(1, 0));
        assert_eq!(ring.pages()[1].age, Age::new(2, 0));
        assert_eq!(ring.pages()[2].age, Age::new(2, 0));
    }

    #[test]
    fn test_reclaiming_page_waits_for_retirement() {
        let (mut ring, mut fifo, mut clock) = setup(8, 2);
        fifo.hal().set_completion(Completion::Manual);

        ring.allocate(&mut fifo, &mut clock, 8).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();
        ring.allocate(&mut fifo, &mut clock, 8).unwrap();
        ring.flush(&mut fifo, &mut clock).unwrap();

        // Page 0 was consumed by the first flush, which never retired.
        let err = ring.allocate(&mut fifo, &mut clock, 2).unwrap_err();
        assert!(err.is_busy());
        assert_eq!(fifo.hal().elapsed_us(), 5_000);
        assert_eq!(ring.pages()[0].used, 0);

        fifo.hal().complete_all();
        let region = ring.allocate(&mut fifo, &mut clock, 2).unwrap();
        assert_eq!((region.page, region.offset), (0, 0));
    }

    #[test]
    fn test_busy_flush_leaves_ring_untouched() {
        let (mut ring, mut fifo, mut clock) = setup(8, 2);
        ring.allocate(&mut fifo, &mut clock, 3).unwrap();
        fifo.hal().set_register(crate::hal::ALT_STATUS_WORD0, 0x1f_ffff);

        assert!(ring.flush(&mut fifo, &mut clock).unwrap_err().is_busy());
        assert_eq!(ring.pages()[0].used, 3);
        assert_eq!(ring.pages()[0].flushed, 0);
        assert_eq!(clock.last_emitted(), Age::NEVER);
        assert!(ring.has_pending());
    }

    #[test]
    fn test_request_limits() {
        let (mut ring, mut fifo, mut clock) = setup(8, 2);
        assert!(matches!(
            ring.allocate(&mut fifo, &mut clock, 0),
            Err(AccelError::InvalidParameter(_))
        ));
        assert_eq!(
            ring.allocate(&mut fifo, &mut clock, 17).unwrap_err(),
            AccelError::RequestTooLarge {
                requested: 17,
                limit: 16
            }
        );
        assert_eq!(ring.allocate(&mut fifo, &mut clock, 16).unwrap().words.len(), 16);
    }

    #[test]
    fn test_reset_stamps_every_page() {
        let (mut ring, mut fifo, mut clock) = setup(8, 3);
        ring.allocate(&mut fifo, &mut clock, 10).unwrap();
        ring.reset(&mut fifo, &mut clock).unwrap();

        let age = ring.last_age();
        assert!(ring.pages().iter().all(|page| *page == DmaPage { used: 0, flushed: 0, age }));
        assert_eq!((ring.first_page(), ring.current_page()), (0, 0));
        assert!(!ring.has_pending());
    }

    #[test]
    fn test_region_from_bytes() {
        use zerocopy::IntoBytes;

        let words: &'static mut [u32] = Box::leak(vec![0u32; 8].into_boxed_slice());
        let bytes = words.as_mut_bytes();
        let (head, tail) = bytes.split_at_mut(1);
        assert!(DmaRegion::from_bytes(tail, PhysAddr::new(BUS)).is_err());
        assert_eq!(head.len(), 1);

        let words: &'static mut [u32] = Box::leak(vec![0u32; 8].into_boxed_slice());
        let region = DmaRegion::from_bytes(words.as_mut_bytes(), PhysAddr::new(BUS)).unwrap();
        assert_eq!(region.len_words(), 8);
        assert_eq!(region.bus_address().as_u64(), BUS);
    }
}
