//! Validate chapters without running them.

use std::path::Path;

use anyhow::Result;
use galley_build::Builder;

use crate::config::load_config;

/// Run the check command.
pub fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?.into_build_config(None, None);
    let result = Builder::new(config).check()?;

    tracing::info!(
        "{} chapters OK, {} runnable blocks",
        result.documents,
        result.blocks
    );

    Ok(())
}
