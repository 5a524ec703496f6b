//! Freelist of discrete DMA buffers.
//!
//! Buffers are released with the age of the last command that reads them and
//! pushed at the front of the free queue; the back therefore holds the buffer
//! released longest ago. Acquiring only ever looks at the back: if that one has
//! not retired yet, nothing newer has either.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::{debug, error};

use crate::age::Age;
use crate::clock::EventClock;
use crate::error::{AccelError, Result};
use crate::hal::AccelHal;

/// Identity of a buffer, as assigned by the caller's buffer allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

impl BufferHandle {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct BufferEntry {
    /// Retirement stamp of the last work that read this buffer.
    age: Age,
    on_free_list: bool,
}

/// Free buffers ordered by when they were released.
pub struct BufferPool {
    entries: Vec<BufferEntry>,
    /// Indices of free buffers, most recently released at the front.
    free: VecDeque<usize>,
}

impl BufferPool {
    /// Create a pool of `count` buffers, all free and never used.
    pub fn new(count: usize) -> Self {
        let entries = alloc::vec![
            BufferEntry {
                age: Age::NEVER,
                on_free_list: true,
            };
            count
        ];
        let mut free = VecDeque::with_capacity(count);
        for index in 0..count {
            free.push_front(index);
        }
        Self { entries, free }
    }

    /// Take the oldest free buffer if the hardware is done with it.
    ///
    /// `None` means "try again later", not a failure. Events another producer
    /// emitted through the shared mirror cell are picked up first.
    pub fn acquire<H: AccelHal>(&mut self, clock: &mut EventClock, hal: &H) -> Option<BufferHandle> {
        let &index = self.free.back()?;
        clock.sync_shared();
        let current = clock.current(hal);
        let entry = &mut self.entries[index];
        if !clock.is_retired(entry.age, current) {
            return None;
        }

        self.free.pop_back();
        entry.on_free_list = false;
        Some(BufferHandle(index))
    }

    /// Return a buffer, stamped with the age of the last work reading it.
    pub fn release(&mut self, handle: BufferHandle, age: Age) -> Result<()> {
        self.check_releasable(handle)?;
        debug!("Releasing buffer {} at age {}", handle.0, age);

        let entry = &mut self.entries[handle.0];
        entry.age = age;
        entry.on_free_list = true;
        self.free.push_front(handle.0);
        Ok(())
    }

    /// Fail unless `handle` names a checked-out buffer.
    pub fn check_releasable(&self, handle: BufferHandle) -> Result<()> {
        let Some(entry) = self.entries.get(handle.0) else {
            error!("Release of unknown buffer {}", handle.0);
            return Err(AccelError::UnknownBuffer(handle.0));
        };
        if entry.on_free_list {
            error!("Buffer {} is already on the free list", handle.0);
            return Err(AccelError::AlreadyFree(handle.0));
        }
        Ok(())
    }

    /// Total number of buffers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffers on the free list, retired or not.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn is_free(&self, handle: BufferHandle) -> Option<bool> {
        self.entries.get(handle.0).map(|entry| entry.on_free_list)
    }

    /// The stamp the buffer was last released with.
    pub fn age(&self, handle: BufferHandle) -> Option<Age> {
        self.entries.get(handle.0).map(|entry| entry.age)
    }
}
