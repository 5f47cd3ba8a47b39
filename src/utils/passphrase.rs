//! Passphrase loading for SQLCipher: env var → .env in dir → secure prompt.

use anyhow::{Context, Result};
use colored::Colorize;
use log::{info, warn};
use std::path::Path;

use crate::utils::config::PackagePaths;

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn try_env_then_dotenv(dir: &Path) -> Option<String> {
    let key = PackagePaths::get().key_env_var();
    if let Some(s) = non_empty_env(key) {
        return Some(s);
    }
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
        return non_empty_env(key);
    }
    None
}

/// Read passphrase: env (BULKPIPE_DB_KEY) → .env in `dir` → secure prompt.
/// `is_new`: true when the encrypted database is about to be created.
pub fn get_passphrase(dir: &Path, is_new: bool) -> Result<String> {
    info!("Encryption mode (flag was provided or an encrypted database was detected)");
    if let Some(s) = try_env_then_dotenv(dir) {
        info!("Passphrase found in environment");
        return Ok(s);
    }
    let label = format!("[{}]", env!("CARGO_PKG_NAME")).cyan().bold();
    let prompt = if is_new {
        "Create new passphrase: "
    } else {
        "Enter passphrase: "
    };
    let pass =
        rpassword::prompt_password(format!("{} {}", label, prompt)).context("read passphrase")?;
    if is_new {
        warn!("Lost passphrase = lost access");
    }
    Ok(pass.trim().to_string())
}
