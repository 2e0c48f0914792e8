//! Chapter build command.

use std::path::{Path, PathBuf};

use anyhow::Result;
use galley_build::Builder;

use crate::config::load_config;

/// Run the build command.
pub async fn run(config_path: &Path, output: Option<PathBuf>, jobs: Option<usize>) -> Result<()> {
    tracing::info!("Building chapters...");

    let config = load_config(config_path)?.into_build_config(output, jobs);
    let result = Builder::new(config).build().await?;

    tracing::info!(
        "Built {} chapters with {} runnable blocks in {}ms",
        result.documents,
        result.blocks,
        result.duration_ms
    );

    tracing::info!("Output: {}", result.output_dir.display());

    Ok(())
}
