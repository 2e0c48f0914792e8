//! Scaffold a galley project.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Run the init command.
pub fn run(config_path: &Path, yes: bool) -> Result<()> {
    tracing::info!("Initializing galley...");

    if !config_path.exists() || yes {
        fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        tracing::info!("Created {}", config_path.display());
    } else {
        tracing::warn!("{} already exists. Use --yes to overwrite.", config_path.display());
    }

    let chapters_dir = Path::new("chapters");
    fs::create_dir_all(chapters_dir).context("Failed to create chapters directory")?;

    let chapter_path = chapters_dir.join("01-getting-started.md");
    if !chapter_path.exists() || yes {
        fs::write(&chapter_path, DEFAULT_CHAPTER).context("Failed to write sample chapter")?;
        tracing::info!("Created {}", chapter_path.display());
    }

    tracing::info!("Initialization complete!");
    tracing::info!("Run 'galley build' to run the chapters.");

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Galley Configuration

[docs]
# Source directory for chapters
dir = "chapters"

# Output directory for finished chapters
output = "dist"

[assets]
# Screenshots and checkpoints are written here
dir = "dist/assets"

# URL prefix for screenshot references
url = "/screenshots"

[project]
# Scratch project the chapters' commands run in
dir = "scratch"

[runner]
# Code blocks tagged `<namespace>:<kind>` are executed
namespace = "run"
shell = "sh"
jobs = 1

[browser]
# Reads the generated puppeteer program from stdin
program = "node"
args = []
timeout = 120
"#;

const DEFAULT_CHAPTER: &str = r#"---
title: Getting Started
---

# Getting Started

Every block tagged `run:` is executed when the chapter is built, and its
real output replaces it.

```run:command
mkdir -p hello && echo "created hello/"
```

```run:file:create path=hello/greet.sh
echo "Hello from galley"
```

```run:command cwd=hello
sh greet.sh
```

```run:checkpoint name=hello
```
"#;
