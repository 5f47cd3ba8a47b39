//! Engine module for the command-line export

pub mod arg_parser;
pub mod cli;
pub mod export;
pub mod progress;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use cli::handle_run;
pub use export::{Envelope, write_envelope};
