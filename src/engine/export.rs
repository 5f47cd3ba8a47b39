//! Response envelope written by the CLI.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::types::{PipelineOutcome, TransformFailure};

#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub ordinal: usize,
    pub message: String,
}

impl From<&TransformFailure> for FailureEntry {
    fn from(f: &TransformFailure) -> Self {
        Self {
            ordinal: f.ordinal,
            message: f.message.clone(),
        }
    }
}

/// `{"success", "data", "total", "partial", "error"}` plus per-item failures when there are any.
#[derive(Debug, Serialize)]
pub struct Envelope<'a, O> {
    pub success: bool,
    pub data: Vec<&'a O>,
    pub total: Option<i64>,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureEntry>,
}

impl<'a, O> Envelope<'a, O> {
    pub fn from_outcome(outcome: &'a PipelineOutcome<O>) -> Self {
        let failures: Vec<FailureEntry> = outcome.failures().map(FailureEntry::from).collect();
        let error = outcome.error.as_ref().map(|e| e.to_string()).or_else(|| {
            (!failures.is_empty()).then(|| format!("{} items failed to transform", failures.len()))
        });
        Self {
            success: error.is_none(),
            data: outcome.successes().collect(),
            total: outcome.total,
            partial: outcome.partial,
            error,
            failures,
        }
    }
}

/// Serialize `envelope` as pretty JSON to `out`, or to stdout when None.
pub fn write_envelope<O: Serialize>(envelope: &Envelope<'_, O>, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("create output file {}", path.display()))?;
            let mut w = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut w, envelope).context("serialize output")?;
            writeln!(w).context("write output")?;
            w.flush().context("flush output")?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut w = BufWriter::new(stdout.lock());
            serde_json::to_writer_pretty(&mut w, envelope).context("serialize output")?;
            writeln!(w).context("write output")?;
            w.flush().context("flush output")?;
        }
    }
    Ok(())
}
