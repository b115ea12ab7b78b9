//! Range validation and subscription coverage

use std::ops::Range;

use crate::error::DatastoreError;

/// Whether `count` datapoints starting at `start` fit inside `0..total`.
///
/// The start id itself must name a datapoint, so `start == total` is never in
/// bounds even for an empty run. Arithmetic overflow is out of bounds.
pub fn in_bounds(start: usize, count: usize, total: usize) -> bool {
    start < total && start.checked_add(count).is_some_and(|end| end <= total)
}

/// [`in_bounds`] as a `Result`, carrying the rejected range
pub(crate) fn check_bounds(start: usize, count: usize, total: usize) -> Result<(), DatastoreError> {
    if in_bounds(start, count, total) {
        Ok(())
    } else {
        Err(DatastoreError::InvalidRange {
            start,
            count,
            total,
        })
    }
}

/// A contiguous run of datapoint ids watched by one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubRange {
    pub start: usize,
    pub length: usize,
}

impl SubRange {
    pub const fn new(start: usize, length: usize) -> Self {
        SubRange { start, length }
    }

    /// One past the last covered id
    pub fn end(&self) -> usize {
        self.start.saturating_add(self.length)
    }

    pub fn covers(&self, id: usize) -> bool {
        self.start <= id && id < self.end()
    }

    pub fn ids(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// Number of ids shared with the run `start..start + count`
    pub fn overlap(&self, start: usize, count: usize) -> usize {
        let lo = self.start.max(start);
        let hi = self.end().min(start.saturating_add(count));
        hi.saturating_sub(lo)
    }
}
