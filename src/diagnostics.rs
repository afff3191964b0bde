//! Diagnostic artefacts persisted on shutdown. Not part of the protocol;
//! purely for after-the-fact inspection of a run.

use std::fs::OpenOptions;
use std::io::Write;

use anyhow::{Context, Result};

/// Appends this peer's last measured end-to-end latency (if any were ever
/// measured) to `times.txt`, and its final child count to `child.txt`.
pub fn record_shutdown(last_latency_ms: Option<f64>, child_count: usize) -> Result<()> {
    if let Some(latency_ms) = last_latency_ms {
        append_line("times.txt", &latency_ms.to_string())?;
    }

    append_line("child.txt", &child_count.to_string())?;
    Ok(())
}

fn append_line(path: &str, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {path}"))?;

    writeln!(file, "{line}").with_context(|| format!("writing {path}"))
}
