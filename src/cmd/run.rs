//! One-shot round from a request file: `pagesmith run`.

use anyhow::{Context, Result};
use std::path::Path;

use pagesmith::config::PagesmithConfig;
use pagesmith::models::BuildRequest;
use pagesmith::pipeline::{Pipeline, RoundRunner};

/// Run a single round and print its report. Fails if the round aborted.
pub async fn cmd_run(config_path: Option<&Path>, request_path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read request file {}", request_path.display()))?;
    let request: BuildRequest = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid build request in {}", request_path.display()))?;

    let config = PagesmithConfig::load(config_path)?;
    let pipeline = Pipeline::from_config(&config).context("Failed to assemble pipeline")?;

    let report = pipeline.run_round(request).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_done() {
        anyhow::bail!(
            "round {} of task '{}' aborted: {}",
            report.round,
            report.task,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
