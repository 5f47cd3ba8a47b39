//! Pipeline components: context, cursor adapter, count estimator, producer, worker pool,
//! collector, and the orchestrator that wires them.
//!
//! Count thread ─────────────────────────────────────────────┐
//! Cursor → producer → job queue (bounded) → workers → result sink (bounded) → collector → outcome

pub mod collector;
pub mod context;
pub mod count;
pub mod cursor;
pub mod error_handler;
pub mod orchestrator;
pub mod producer;
pub mod workers;

pub use collector::Collector;
pub use context::{CancelHook, Context, HookGuard, Signal, Wait};
pub use count::{CountResult, await_count, spawn_count_estimator};
pub use cursor::CursorAdapter;
pub use error_handler::finalize_outcome;
pub use orchestrator::{run_bulk_pipeline, run_bulk_pipeline_observed};
pub use producer::{ProducerReport, run_producer};
pub use workers::{apply_transform, resolve_worker_count, run_sequential, spawn_workers};
