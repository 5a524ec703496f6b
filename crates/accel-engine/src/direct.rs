//! Command staging for devices without a DMA region.
//!
//! Commands are collected in host memory and copied into the FIFO at flush
//! time. Nothing here is stamped with an age: once a word is in the FIFO the
//! staging buffer is free again.

use alloc::vec::Vec;

use log::{debug, warn};

use crate::error::{AccelError, Result};
use crate::fifo::Fifo;
use crate::hal::AccelHal;

/// Host-memory staging replayed through the FIFO.
pub struct DirectWritePath {
    staging: Vec<u32>,
    used: usize,
    chunk_words: usize,
}

impl DirectWritePath {
    /// Staging for `pages` page-equivalents of `page_words` words each.
    pub fn new(page_words: usize, pages: usize) -> Self {
        Self {
            staging: alloc::vec![0; page_words * pages],
            used: 0,
            chunk_words: page_words,
        }
    }

    /// Hand out `n` staged words, flushing first if they do not fit.
    pub fn allocate<H: AccelHal>(&mut self, fifo: &mut Fifo<H>, n: usize) -> Result<&mut [u32]> {
        if n == 0 {
            return Err(AccelError::InvalidParameter("zero-length command allocation"));
        }
        if n > self.staging.len() {
            return Err(AccelError::RequestTooLarge {
                requested: n,
                limit: self.staging.len(),
            });
        }
        if self.used + n > self.staging.len() {
            self.flush(fifo)?;
        }

        let start = self.used;
        self.used += n;
        Ok(&mut self.staging[start..start + n])
    }

    /// Copy everything staged into the FIFO.
    ///
    /// On timeout the chunks already written are dropped from staging and the
    /// rest stays queued for the next flush.
    pub fn flush<H: AccelHal>(&mut self, fifo: &mut Fifo<H>) -> Result<()> {
        if self.used == 0 {
            return Ok(());
        }
        let chunk_words = self.chunk_words.min(fifo.capacity()).max(1);
        debug!("Replaying {} staged words in chunks of {}", self.used, chunk_words);

        let mut written = 0;
        while written < self.used {
            let end = (written + chunk_words).min(self.used);
            if let Err(err) = fifo.submit(&self.staging[written..end]) {
                warn!("Direct flush stalled after {} of {} words", written, self.used);
                self.staging.copy_within(written..self.used, 0);
                self.used -= written;
                return Err(err);
            }
            written = end;
        }
        self.used = 0;
        Ok(())
    }

    /// Words staged and not yet written.
    pub fn pending(&self) -> usize {
        self.used
    }

    /// Staged words visible for inspection.
    pub fn staged(&self) -> &[u32] {
        &self.staging[..self.used]
    }

    pub fn capacity(&self) -> usize {
        self.staging.len()
    }

    /// Forget everything staged.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}
