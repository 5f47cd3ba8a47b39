pub mod bulkpipe_toml;
pub mod config;
pub mod logger;
pub mod passphrase;

pub use config::*;
pub use logger::{Colors, setup_logging};
pub use passphrase::get_passphrase;
