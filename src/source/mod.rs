//! Data sources: the backing store seen as a sequential cursor plus an independent count.

pub mod memory;
pub mod sqlite;

use anyhow::Result;

use crate::pipeline::Context;

pub use memory::{MemoryCursor, MemorySource};
pub use sqlite::{RowDecoder, ScanQuery, SortOrder, SqliteCursor, SqliteSource};

/// Wakes a cursor or count blocked in I/O. Must be callable from any thread.
pub type Interrupter = Box<dyn Fn() + Send + Sync>;

/// Sequential, possibly I/O-bound iterator over the store. Driven by one thread at a time.
pub trait SourceCursor: Send {
    type Item: Send;

    /// Next item, `Ok(None)` at end of scan. An error is terminal for the scan.
    fn advance(&mut self) -> Result<Option<Self::Item>>;

    /// Release underlying resources. Called exactly once, on every exit path.
    fn close(&mut self);

    /// Handle that aborts an in-flight `advance` from another thread.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

/// A store that can open a scan and, independently, count what the scan would return.
pub trait DataSource: Sync {
    type Item: Send;
    type Query: Sync;
    type Cursor: SourceCursor<Item = Self::Item>;

    fn open(&self, query: &Self::Query) -> Result<Self::Cursor>;

    /// Count the rows `query` selects. Runs concurrently with the scan on its own connection;
    /// implementations should register an interrupt with `ctx` if the count can block.
    fn count(&self, query: &Self::Query, ctx: &Context) -> Result<i64>;
}
