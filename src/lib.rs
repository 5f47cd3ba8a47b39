//! Bulkpipe: concurrent bulk retrieval and transform with order preservation, bounded memory,
//! cancellation, and an independently obtained total count.

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod types;
pub mod users;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use error::{CancelReason, PipelineError};
pub use pipeline::{Context, run_bulk_pipeline, run_bulk_pipeline_observed};
pub use source::{
    DataSource, MemoryCursor, MemorySource, RowDecoder, ScanQuery, SortOrder, SourceCursor,
    SqliteCursor, SqliteSource,
};

/// Result alias used by the public bulkpipe API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Export every user in `db_path` as a [`UserResponse`](users::UserResponse), newest first.
///
/// Convenience over [`run_bulk_pipeline`] with [`SqliteSource`], [`users::users_query`] and
/// [`users::to_response`].
pub fn export_users(
    ctx: &Context,
    db_path: &std::path::Path,
    passphrase: Option<&str>,
    opts: &PipelineOpts,
) -> PipelineOutcome<users::UserResponse> {
    let source = SqliteSource::new(db_path, users::UserDecoder).with_passphrase(passphrase);
    run_bulk_pipeline(ctx, &source, &users::users_query(), users::to_response, opts)
}
