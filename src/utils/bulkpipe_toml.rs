//! Load `.bulkpipe.toml` from a directory (CLI only). Library callers pass `PipelineOpts`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::types::{CountPolicy, FailurePolicy, Opts};
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BulkpipeToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    db_path: Option<String>,
    timeout: Option<u64>,
    workers: Option<usize>,
    queue_cap: Option<usize>,
    threshold: Option<usize>,
    batch_size: Option<usize>,
    abort_on_failure: Option<bool>,
    require_count: Option<bool>,
    verbose: Option<bool>,
    encrypt: Option<bool>,
}

/// Load the settings file from `dir` if present. None if missing or unreadable.
pub(crate) fn load_bulkpipe_toml(dir: &Path) -> Option<BulkpipeToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_bulkpipe_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

pub(crate) fn parse_bulkpipe_toml(s: &str) -> Result<BulkpipeToml, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($set:expr, $opts:expr, $set_field:ident => $($opts_field:ident).+) => {
        if let Some(v) = $set.$set_field {
            $opts.$($opts_field).+ = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI.
pub(crate) fn apply_file_to_opts(file: &BulkpipeToml, opts: &mut Opts) {
    let set = &file.settings;
    if let Some(ref p) = set.db_path {
        opts.db_path = Some(PathBuf::from(p));
    }
    if set.timeout.is_some() {
        opts.timeout_secs = set.timeout;
    }
    if set.workers.is_some() {
        opts.pipeline.num_workers = set.workers;
    }
    apply_file_opt!(set, opts, queue_cap => pipeline.queue_capacity);
    apply_file_opt!(set, opts, threshold => pipeline.sequential_threshold);
    apply_file_opt!(set, opts, batch_size => batch_size);
    if let Some(abort) = set.abort_on_failure {
        opts.pipeline.failure_policy = failure_policy(abort);
    }
    if let Some(required) = set.require_count {
        opts.pipeline.count_policy = count_policy(required);
    }
    apply_file_opt!(set, opts, verbose => verbose);
    apply_file_opt!(set, opts, encrypt => encrypt);
}

pub(crate) fn failure_policy(abort_on_failure: bool) -> FailurePolicy {
    if abort_on_failure {
        FailurePolicy::AbortAll
    } else {
        FailurePolicy::CollectPartial
    }
}

pub(crate) fn count_policy(require_count: bool) -> CountPolicy {
    if require_count {
        CountPolicy::Mandatory
    } else {
        CountPolicy::Degrade
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_settings_override_defaults() {
        let file = parse_bulkpipe_toml(
            r#"
            [settings]
            db_path = "users.db"
            workers = 8
            queue_cap = 64
            threshold = 0
            abort_on_failure = true
            verbose = true
            "#,
        )
        .unwrap();
        let mut opts = Opts::default();
        apply_file_to_opts(&file, &mut opts);
        assert_eq!(opts.db_path, Some(PathBuf::from("users.db")));
        assert_eq!(opts.pipeline.num_workers, Some(8));
        assert_eq!(opts.pipeline.queue_capacity, 64);
        assert_eq!(opts.pipeline.sequential_threshold, 0);
        assert_eq!(opts.pipeline.failure_policy, FailurePolicy::AbortAll);
        assert_eq!(opts.pipeline.count_policy, CountPolicy::Degrade);
        assert!(opts.verbose);
        assert!(!opts.encrypt);
    }

    #[test]
    fn missing_section_keeps_defaults() {
        let file = parse_bulkpipe_toml("").unwrap();
        let mut opts = Opts::default();
        apply_file_to_opts(&file, &mut opts);
        assert_eq!(opts.batch_size, Opts::default().batch_size);
        assert!(opts.db_path.is_none());
    }
}
