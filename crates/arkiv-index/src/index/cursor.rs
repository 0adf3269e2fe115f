//! Batch-paging cursors over listing queries
//!
//! A cursor re-issues its bounded select per batch instead of holding a live
//! statement open, so it never pins an engine lock across client work. The
//! trade-off is the documented one: no snapshot isolation across reader
//! queries that straddle a writer commit.

use crate::error::Result;

/// Rows fetched per batch.
const CURSOR_BATCH: u64 = 256;

/// A paging cursor over a listing query.
///
/// Iterate with [`IndexCursor::try_next`], or through the [`Iterator`]
/// implementation yielding `Result<T>` items.
pub struct IndexCursor<T> {
    fetch: Box<dyn FnMut(u64, u64) -> Result<Vec<T>> + Send>,
    buffer: std::collections::VecDeque<T>,
    offset: u64,
    remaining: Option<u64>,
    batch: u64,
    exhausted: bool,
}

impl<T> IndexCursor<T> {
    /// `fetch(offset, limit)` produces one batch; `start` and `limit` come
    /// from the caller's filter.
    pub(crate) fn new(
        start: u64,
        limit: Option<u64>,
        fetch: impl FnMut(u64, u64) -> Result<Vec<T>> + Send + 'static,
    ) -> Self {
        Self {
            fetch: Box::new(fetch),
            buffer: std::collections::VecDeque::new(),
            offset: start,
            remaining: limit,
            batch: CURSOR_BATCH,
            exhausted: false,
        }
    }

    #[cfg(test)]
    fn with_batch(mut self, batch: u64) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Next row, `None` at the end.
    pub fn try_next(&mut self) -> Result<Option<T>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn fill(&mut self) -> Result<()> {
        let want = match self.remaining {
            Some(0) => {
                self.exhausted = true;
                return Ok(());
            }
            Some(remaining) => remaining.min(self.batch),
            None => self.batch,
        };

        let rows = (self.fetch)(self.offset, want)?;
        let fetched = rows.len() as u64;
        self.offset += fetched;
        if let Some(remaining) = &mut self.remaining {
            *remaining -= fetched.min(*remaining);
        }
        if fetched < want {
            self.exhausted = true;
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl<T> Iterator for IndexCursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(total: u64) -> impl FnMut(u64, u64) -> Result<Vec<u64>> + Send + 'static {
        move |offset, limit| Ok((offset..total.min(offset + limit)).collect())
    }

    #[test]
    fn test_pages_through_all_rows() {
        let cursor = IndexCursor::new(0, None, numbers(10)).with_batch(3);
        let rows: Result<Vec<u64>> = cursor.collect();
        assert_eq!(rows.unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_honors_start_and_limit() {
        let cursor = IndexCursor::new(4, Some(3), numbers(10)).with_batch(2);
        let rows: Result<Vec<u64>> = cursor.collect();
        assert_eq!(rows.unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn test_empty_source() {
        let mut cursor = IndexCursor::new(0, None, numbers(0));
        assert!(cursor.try_next().unwrap().is_none());
        assert!(cursor.try_next().unwrap().is_none());
    }

    #[test]
    fn test_limit_larger_than_rows() {
        let cursor = IndexCursor::new(0, Some(100), numbers(5)).with_batch(2);
        let rows: Result<Vec<u64>> = cursor.collect();
        assert_eq!(rows.unwrap().len(), 5);
    }

    #[test]
    fn test_error_is_surfaced() {
        let mut failed = false;
        let mut cursor = IndexCursor::new(0, None, move |_, _| {
            if failed {
                Ok(Vec::<u64>::new())
            } else {
                failed = true;
                Err(crate::error::IndexError::Interrupted)
            }
        });
        assert!(cursor.try_next().is_err());
    }
}
