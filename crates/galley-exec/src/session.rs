//! Per-document execution context.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ExecError, Result};
use crate::server::{ServerRegistry, DEFAULT_GRACE};

/// Program used to run generated browser automation scripts.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserConfig {
    /// Executable that reads the program from stdin (e.g. `node`)
    pub program: String,

    /// Extra arguments passed before stdin is read
    pub args: Vec<String>,

    /// Upper bound on one screenshot run
    pub timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec![],
            timeout: Duration::from_secs(120),
        }
    }
}

/// Settings for running one document.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Working directory shared by all blocks of the document
    pub workdir: PathBuf,

    /// Root for screenshots and checkpoints
    pub assets_root: PathBuf,

    /// Document basename used to namespace generated assets
    pub basename: Option<String>,

    /// Tag namespace that marks runnable blocks
    pub namespace: String,

    /// Shell used for commands and servers
    pub shell: String,

    /// URL prefix under which `assets_root/screenshots` is served
    pub screenshot_url_base: String,

    pub browser: BrowserConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            assets_root: PathBuf::from("assets"),
            basename: None,
            namespace: "run".to_string(),
            shell: "sh".to_string(),
            screenshot_url_base: "/screenshots".to_string(),
            browser: BrowserConfig::default(),
        }
    }
}

/// State threaded through every block of one document.
#[derive(Debug)]
pub struct Session {
    options: SessionOptions,
    servers: ServerRegistry,
    checkpoints: HashSet<String>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            servers: ServerRegistry::new(),
            checkpoints: HashSet::new(),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn cwd(&self) -> &Path {
        &self.options.workdir
    }

    pub fn shell(&self) -> &str {
        &self.options.shell
    }

    pub fn assets_root(&self) -> &Path {
        &self.options.assets_root
    }

    /// Basename of the document; generated assets cannot be placed without it.
    pub fn basename(&self) -> Result<&str> {
        self.options
            .basename
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                ExecError::resource("document has no basename to namespace its assets")
            })
    }

    /// Working directory for one block, honouring a `cwd=` override.
    pub fn block_cwd(&self, cwd: Option<&str>) -> Result<PathBuf> {
        let dir = match cwd {
            Some(cwd) => self.options.workdir.join(cwd),
            None => self.options.workdir.clone(),
        };
        if !dir.is_dir() {
            return Err(ExecError::precondition(format!(
                "working directory {} does not exist",
                dir.display()
            )));
        }
        Ok(dir)
    }

    pub fn servers(&self) -> &ServerRegistry {
        &self.servers
    }

    pub fn servers_mut(&mut self) -> &mut ServerRegistry {
        &mut self.servers
    }

    /// Record a checkpoint name; false if it was already used.
    pub fn record_checkpoint(&mut self, name: &str) -> bool {
        self.checkpoints.insert(name.to_string())
    }

    /// Stop every server after a failed block.
    pub async fn abort(&mut self) {
        let names = self.servers.shutdown_all(DEFAULT_GRACE).await;
        if !names.is_empty() {
            tracing::info!("stopped {} server(s) after failure", names.len());
        }
    }

    /// End of document: any server still running is a leak.
    pub async fn finish(&mut self) -> Result<()> {
        if self.servers.is_empty() {
            return Ok(());
        }
        let names = self.servers.shutdown_all(DEFAULT_GRACE).await;
        tracing::warn!("server(s) left running: {}", names.join(", "));
        Err(ExecError::Leaked { names })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::StartOptions;

    #[test]
    fn resolves_block_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        let session = Session::new(SessionOptions {
            workdir: dir.path().to_path_buf(),
            ..Default::default()
        });

        assert_eq!(session.block_cwd(None).unwrap(), dir.path());
        assert_eq!(session.block_cwd(Some("app")).unwrap(), dir.path().join("app"));
        assert!(matches!(
            session.block_cwd(Some("missing")),
            Err(ExecError::Precondition(_))
        ));
    }

    #[test]
    fn basename_is_required_for_assets() {
        let session = Session::new(SessionOptions::default());
        assert!(matches!(session.basename(), Err(ExecError::Resource(_))));

        let session = Session::new(SessionOptions {
            basename: Some("intro".to_string()),
            ..Default::default()
        });
        assert_eq!(session.basename().unwrap(), "intro");
    }

    #[test]
    fn checkpoint_names_are_unique() {
        let mut session = Session::new(SessionOptions::default());
        assert!(session.record_checkpoint("one"));
        assert!(!session.record_checkpoint("one"));
    }

    #[tokio::test]
    async fn finish_reports_leaked_servers() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(SessionOptions {
            workdir: dir.path().to_path_buf(),
            ..Default::default()
        });

        StartOptions::parse("name=dev hidden", "sleep 30")
            .unwrap()
            .run(&mut session)
            .await
            .unwrap();

        let err = session.finish().await.unwrap_err();
        assert!(matches!(err, ExecError::Leaked { ref names } if names == &["dev".to_string()]));
        assert!(session.servers().is_empty());
        assert!(session.finish().await.is_ok());
    }
}
