//! Configuration file (galley.toml).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use galley_build::BuildConfig;
use galley_exec::BrowserConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
}

#[derive(Debug, Deserialize)]
pub struct DocsConfig {
    #[serde(default = "default_docs_dir")]
    pub dir: String,
    #[serde(default = "default_output")]
    pub output: String,
}

#[derive(Debug, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_dir")]
    pub dir: String,
    /// URL prefix the screenshots are served under
    #[serde(default = "default_assets_url")]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_dir")]
    pub dir: String,
}

#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

#[derive(Debug, Deserialize)]
pub struct BrowserSettings {
    #[serde(default = "default_browser")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds
    #[serde(default = "default_browser_timeout")]
    pub timeout: u64,
}

fn default_docs_dir() -> String {
    "chapters".to_string()
}
fn default_output() -> String {
    "dist".to_string()
}
fn default_assets_dir() -> String {
    "dist/assets".to_string()
}
fn default_assets_url() -> String {
    "/screenshots".to_string()
}
fn default_project_dir() -> String {
    "scratch".to_string()
}
fn default_namespace() -> String {
    "run".to_string()
}
fn default_shell() -> String {
    "sh".to_string()
}
fn default_jobs() -> usize {
    1
}
fn default_browser() -> String {
    "node".to_string()
}
fn default_browser_timeout() -> u64 {
    120
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            dir: default_docs_dir(),
            output: default_output(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: default_assets_dir(),
            url: default_assets_url(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            dir: default_project_dir(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            shell: default_shell(),
            jobs: default_jobs(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            program: default_browser(),
            args: Vec::new(),
            timeout: default_browser_timeout(),
        }
    }
}

impl ConfigFile {
    /// Build settings, with CLI overrides taking precedence.
    pub fn into_build_config(self, output: Option<PathBuf>, jobs: Option<usize>) -> BuildConfig {
        BuildConfig {
            docs_dir: PathBuf::from(&self.docs.dir),
            output_dir: output.unwrap_or_else(|| PathBuf::from(&self.docs.output)),
            assets_dir: PathBuf::from(&self.assets.dir),
            project_dir: PathBuf::from(&self.project.dir),
            namespace: self.runner.namespace,
            shell: self.runner.shell,
            screenshot_url_base: self.assets.url,
            browser: BrowserConfig {
                program: self.browser.program,
                args: self.browser.args,
                timeout: Duration::from_secs(self.browser.timeout),
            },
            jobs: jobs.unwrap_or(self.runner.jobs),
        }
    }
}

/// Load configuration from `path` if it exists.
/// Returns an error if the config file exists but is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());

    Ok(config)
}
