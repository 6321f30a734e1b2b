//! Sliced ingest of a chunk's message array.
//!
//! Messages are indexed from the end of the array toward the start, one
//! slice per [`IngestTask::step`], so callers can handle input and paint
//! between slices. A task is bound to the load generation it was created
//! for and must not be stepped once that generation is superseded.

use tracing::debug;

use crate::window::MessageWindow;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// What one call to [`IngestTask::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceReport {
    pub processed: usize,
    /// This was the first slice of the task.
    pub first: bool,
    /// Slices remain after this one.
    pub remaining: bool,
}

#[derive(Debug)]
pub struct IngestTask {
    generation: u64,
    batch_size: usize,
    /// Number of array positions still to process; the next slice ends at
    /// `cursor - 1`.
    cursor: usize,
    slices: usize,
}

impl IngestTask {
    pub fn new(generation: u64, total: usize, batch_size: usize) -> Self {
        Self {
            generation,
            batch_size: batch_size.max(1),
            cursor: total,
            slices: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_done(&self) -> bool {
        self.cursor == 0 && self.slices > 0
    }

    /// Index the next slice into `window`.
    pub fn step(&mut self, window: &mut MessageWindow) -> SliceReport {
        let end = self.cursor;
        let start = end.saturating_sub(self.batch_size);
        for pos in (start..end).rev() {
            window.index_message(pos);
        }
        self.cursor = start;
        self.slices += 1;

        let report = SliceReport {
            processed: end - start,
            first: self.slices == 1,
            remaining: self.cursor > 0,
        };
        debug!(
            generation = self.generation,
            slice = self.slices,
            processed = report.processed,
            left = self.cursor,
            "ingest slice"
        );
        report
    }

    /// Run every remaining slice.
    pub fn drain(&mut self, window: &mut MessageWindow) {
        while !self.is_done() {
            self.step(window);
        }
    }
}
