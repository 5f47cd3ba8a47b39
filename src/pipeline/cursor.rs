//! Cursor adapter: "has more / next item / terminal error" over any [`SourceCursor`], with the
//! cursor closed on every exit path.

use anyhow::Error;

use crate::source::{Interrupter, SourceCursor};

pub struct CursorAdapter<C: SourceCursor> {
    cursor: C,
    last_error: Option<Error>,
    done: bool,
    failed: bool,
    closed: bool,
}

impl<C: SourceCursor> CursorAdapter<C> {
    pub fn new(cursor: C) -> Self {
        Self {
            cursor,
            last_error: None,
            done: false,
            failed: false,
            closed: false,
        }
    }

    /// Next item, or `None` when the scan is over (end or error; see [`Self::last_error`]).
    /// After the first error or end, never touches the underlying cursor again.
    pub fn advance(&mut self) -> Option<C::Item> {
        if self.done {
            return None;
        }
        match self.cursor.advance() {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                self.failed = true;
                self.last_error = Some(err);
                None
            }
        }
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// True once end-of-cursor was reached without an error.
    pub fn is_exhausted(&self) -> bool {
        self.done && !self.failed
    }

    pub fn interrupter(&self) -> Option<Interrupter> {
        self.cursor.interrupter()
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.cursor.close();
        }
    }
}

impl<C: SourceCursor> Drop for CursorAdapter<C> {
    fn drop(&mut self) {
        self.close();
    }
}
