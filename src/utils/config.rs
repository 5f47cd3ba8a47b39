//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    db_filename: String,
    config_filename: String,
    db_env_var: String,
    key_env_var: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            let upper = pkg.to_uppercase();
            PackagePaths {
                pkg_name: pkg,
                db_filename: format!("{pkg}.db"),
                config_filename: format!(".{pkg}.toml"),
                db_env_var: format!("{upper}_DB"),
                key_env_var: format!("{upper}_DB_KEY"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Default users database filename (in the working directory).
    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    /// Optional settings file looked up in the working directory.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Env var naming the database path.
    pub fn db_env_var(&self) -> &str {
        &self.db_env_var
    }

    /// Env var holding the SQLCipher passphrase.
    pub fn key_env_var(&self) -> &str {
        &self.key_env_var
    }
}

// ---- Pipeline ----

/// Defaults for [`PipelineOpts`](crate::PipelineOpts).
pub struct PipelineDefaults;

impl PipelineDefaults {
    /// Job queue / result sink capacity.
    pub const QUEUE_CAPACITY: usize = 2_000;
    /// Workers per available thread. The transform is CPU-light, so oversubscribe a little.
    pub const WORKER_MULTIPLIER: usize = 3;
    /// Hard cap on pool size.
    pub const MAX_WORKERS: usize = 100;
    /// Below this many items the pool is skipped and transforms run on the calling thread.
    pub const SEQUENTIAL_THRESHOLD: usize = 100;
}

// ---- Progress ----

pub struct ProgressConsts;

impl ProgressConsts {
    /// Collector calls the progress callback once per this many results.
    pub const PROGRESS_UPDATE_BATCH_SIZE: usize = 100;
}

// ---- Database ----

/// Rows fetched per cursor batch.
pub const DB_SCAN_BATCH_SIZE: usize = 2_000;

/// Rows per insert transaction when seeding.
pub const DB_INSERT_BATCH_SIZE: usize = 500;

/// Password every seeded user gets (stored only as a digest).
pub const SEED_PASSWORD: &str = "123456";
