//! Webhook server: `pagesmith serve`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use pagesmith::config::PagesmithConfig;
use pagesmith::pipeline::Pipeline;
use pagesmith::server;

pub async fn cmd_serve(config_path: Option<&Path>, port: Option<u16>) -> Result<()> {
    let mut config = PagesmithConfig::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }

    let secret = config
        .secrets
        .build_secret
        .clone()
        .context("MY_SECRET is not set; refusing to accept unauthenticated builds")?;

    let pipeline = Pipeline::from_config(&config).context("Failed to assemble pipeline")?;
    tracing::info!(
        provider = ?config.hosting.provider,
        backend = ?config.generator.backend,
        work_root = %config.pipeline.work_root.display(),
        "pipeline ready"
    );

    let state = server::app_state(Arc::new(pipeline), &secret);
    server::start_server(&config.server, state).await
}
