//! Tutorial builder.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use galley_exec::{plan_document, run_document, BrowserConfig, RunError, Session, SessionOptions};
use galley_mdx::{parse_document, Document};

/// Configuration for building a set of chapters.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Source chapters directory
    pub docs_dir: PathBuf,

    /// Output directory for finished chapters
    pub output_dir: PathBuf,

    /// Root for screenshots and checkpoints
    pub assets_dir: PathBuf,

    /// Scratch project the chapters' commands run in
    pub project_dir: PathBuf,

    /// Tag namespace of runnable blocks
    pub namespace: String,

    /// Shell for commands and servers
    pub shell: String,

    /// URL prefix for screenshot references
    pub screenshot_url_base: String,

    pub browser: BrowserConfig,

    /// Maximum number of chapters running at once
    pub jobs: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("chapters"),
            output_dir: PathBuf::from("dist"),
            assets_dir: PathBuf::from("dist/assets"),
            project_dir: PathBuf::from("scratch"),
            namespace: "run".to_string(),
            shell: "sh".to_string(),
            screenshot_url_base: "/screenshots".to_string(),
            browser: BrowserConfig::default(),
            jobs: 1,
        }
    }
}

/// Result of a build or check.
#[derive(Debug)]
pub struct BuildResult {
    /// Number of chapters processed
    pub documents: usize,

    /// Number of runnable blocks found
    pub blocks: usize,

    /// Total time in milliseconds
    pub duration_ms: u64,

    pub output_dir: PathBuf,
}

/// Errors that can occur during a build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to read chapters: {0}")]
    Read(String),

    #[error("Failed to parse chapter: {path}: {message}")]
    Parse { path: String, message: String },

    #[error("{path}: {source}")]
    Run {
        path: String,
        #[source]
        source: RunError,
    },

    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Build task failed: {0}")]
    Task(String),
}

/// A chapter to be built.
#[derive(Debug)]
struct Chapter {
    /// Relative path from the docs dir
    relative_path: PathBuf,

    /// Namespace for generated assets
    basename: String,

    /// Working directory the chapter's blocks run in
    workdir: PathBuf,

    /// Runnable blocks found while planning
    blocks: usize,

    doc: Document,
}

/// Builds every chapter under the docs directory.
pub struct Builder {
    config: Arc<BuildConfig>,
}

impl Builder {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run every chapter and write the finished markdown.
    ///
    /// Chapters sharing a working directory run one after another in path
    /// order; other chapters run concurrently up to `jobs`. Nothing is
    /// written to the output directory unless every chapter succeeded.
    pub async fn build(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();

        let chapters = self.discover_chapters()?;
        let documents = chapters.len();
        let blocks = chapters.iter().map(|c| c.blocks).sum();

        for dir in [&self.config.assets_dir, &self.config.project_dir] {
            fs::create_dir_all(dir)
                .map_err(|e| BuildError::Write(format!("{}: {}", dir.display(), e)))?;
        }

        // Chapters in one working directory depend on each other's effects
        let mut lineages: BTreeMap<PathBuf, Vec<(usize, Chapter)>> = BTreeMap::new();
        for (index, chapter) in chapters.into_iter().enumerate() {
            lineages
                .entry(chapter.workdir.clone())
                .or_default()
                .push((index, chapter));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.jobs.max(1)));
        let mut tasks = JoinSet::new();
        for (_, lineage) in lineages {
            let config = Arc::clone(&self.config);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let mut finished = Vec::with_capacity(lineage.len());
                for (index, chapter) in lineage {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| BuildError::Task(e.to_string()))?;
                    let markdown = run_chapter(&config, &chapter).await?;
                    finished.push((index, chapter.relative_path, markdown));
                }
                Ok::<_, BuildError>(finished)
            });
        }

        let mut outputs = Vec::with_capacity(documents);
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| BuildError::Task(e.to_string()));
            match result.and_then(|r| r) {
                Ok(finished) => outputs.extend(finished),
                Err(e) => {
                    // Dropping the remaining chapters kills their processes
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(e);
                }
            }
        }
        outputs.sort_by_key(|(index, _, _)| *index);

        for (_, relative_path, markdown) in &outputs {
            self.write_chapter(relative_path, markdown)?;
        }

        let duration = start.elapsed();

        Ok(BuildResult {
            documents,
            blocks,
            duration_ms: duration.as_millis() as u64,
            output_dir: self.config.output_dir.clone(),
        })
    }

    /// Parse and plan every chapter without running anything.
    pub fn check(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        let chapters = self.discover_chapters()?;

        Ok(BuildResult {
            documents: chapters.len(),
            blocks: chapters.iter().map(|c| c.blocks).sum(),
            duration_ms: start.elapsed().as_millis() as u64,
            output_dir: self.config.output_dir.clone(),
        })
    }

    /// Discover, parse and plan all chapters in the docs directory.
    fn discover_chapters(&self) -> Result<Vec<Chapter>, BuildError> {
        let docs_dir = &self.config.docs_dir;
        if !docs_dir.is_dir() {
            return Err(BuildError::Read(format!(
                "Docs directory not found: {}",
                docs_dir.display()
            )));
        }

        let mut chapters = Vec::new();
        let mut basenames: HashMap<String, PathBuf> = HashMap::new();

        for entry in WalkDir::new(docs_dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| BuildError::Read(e.to_string()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }

            let relative_path = path.strip_prefix(docs_dir).unwrap_or(path).to_path_buf();
            let display = relative_path.display().to_string();

            let content = fs::read_to_string(path)
                .map_err(|e| BuildError::Read(format!("{}: {}", path.display(), e)))?;
            let doc = parse_document(&content).map_err(|e| BuildError::Parse {
                path: display.clone(),
                message: e.to_string(),
            })?;

            let frontmatter = doc.frontmatter.clone().unwrap_or_default();
            let basename = match frontmatter.basename {
                Some(basename) => basename,
                None => path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("chapter")
                    .to_string(),
            };
            if let Some(other) = basenames.insert(basename.clone(), relative_path.clone()) {
                return Err(BuildError::Parse {
                    path: display,
                    message: format!(
                        "basename `{}` is already used by {}",
                        basename,
                        other.display()
                    ),
                });
            }

            let workdir = match &frontmatter.cwd {
                Some(cwd) => self.config.project_dir.join(cwd),
                None => self.config.project_dir.clone(),
            };

            let blocks = plan_document(&doc, &self.config.namespace)
                .map_err(|source| BuildError::Run {
                    path: display.clone(),
                    source,
                })?
                .len();

            chapters.push(Chapter {
                relative_path,
                basename,
                workdir,
                blocks,
                doc,
            });
        }

        Ok(chapters)
    }

    fn write_chapter(&self, relative_path: &Path, markdown: &str) -> Result<(), BuildError> {
        let output_path = self.config.output_dir.join(relative_path);
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::Write(e.to_string()))?;
        }
        fs::write(&output_path, markdown)
            .map_err(|e| BuildError::Write(format!("{}: {}", output_path.display(), e)))
    }
}

/// Run one chapter in a fresh session and render the result.
async fn run_chapter(config: &BuildConfig, chapter: &Chapter) -> Result<String, BuildError> {
    let path = chapter.relative_path.display().to_string();
    fs::create_dir_all(&chapter.workdir)
        .map_err(|e| BuildError::Write(format!("{}: {}", chapter.workdir.display(), e)))?;

    tracing::info!("Running {} ({} blocks)", path, chapter.blocks);

    let mut session = Session::new(SessionOptions {
        workdir: chapter.workdir.clone(),
        assets_root: config.assets_dir.clone(),
        basename: Some(chapter.basename.clone()),
        namespace: config.namespace.clone(),
        shell: config.shell.clone(),
        screenshot_url_base: config.screenshot_url_base.clone(),
        browser: config.browser.clone(),
    });

    let finished = run_document(&chapter.doc, &mut session)
        .await
        .map_err(|source| BuildError::Run { path, source })?;

    Ok(finished.to_markdown())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn config(root: &Path) -> BuildConfig {
        BuildConfig {
            docs_dir: root.join("chapters"),
            output_dir: root.join("dist"),
            assets_dir: root.join("dist/assets"),
            project_dir: root.join("scratch"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn builds_chapters() {
        let temp = tempdir().unwrap();
        let docs = temp.path().join("chapters");
        fs::create_dir_all(docs.join("part-1")).unwrap();
        fs::write(
            docs.join("part-1/01-setup.md"),
            "---\ntitle: Setup\n---\n# Setup\n\n```run:command\necho hello\n```\n",
        )
        .unwrap();

        let result = Builder::new(config(temp.path())).build().await.unwrap();

        assert_eq!(result.documents, 1);
        assert_eq!(result.blocks, 1);
        let out = fs::read_to_string(temp.path().join("dist/part-1/01-setup.md")).unwrap();
        assert_eq!(
            out,
            "---\ntitle: Setup\n---\n# Setup\n\n```console\n$ echo hello\nhello\n```\n"
        );
    }

    #[tokio::test]
    async fn chapters_share_the_project_in_order() {
        let temp = tempdir().unwrap();
        let docs = temp.path().join("chapters");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("01.md"), "```run:command hidden\necho one > log.txt\n```\n").unwrap();
        fs::write(docs.join("02.md"), "```run:command\ncat log.txt\n```\n").unwrap();

        let config = BuildConfig {
            jobs: 4,
            ..config(temp.path())
        };
        Builder::new(config).build().await.unwrap();

        let out = fs::read_to_string(temp.path().join("dist/02.md")).unwrap();
        assert!(out.contains("$ cat log.txt\none\n"), "{out}");
    }

    #[tokio::test]
    async fn failure_writes_nothing() {
        let temp = tempdir().unwrap();
        let docs = temp.path().join("chapters");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("a.md"), "```run:command\necho fine\n```\n").unwrap();
        fs::write(docs.join("b.md"), "text\n\n```run:command\nexit 2\n```\n").unwrap();

        let err = Builder::new(config(temp.path())).build().await.unwrap_err();

        match err {
            BuildError::Run { path, source } => {
                assert_eq!(path, "b.md");
                assert!(matches!(source, RunError::Block { line: 3, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!temp.path().join("dist/a.md").exists());
    }

    #[tokio::test]
    async fn run_false_copies_chapter_through() {
        let temp = tempdir().unwrap();
        let docs = temp.path().join("chapters");
        fs::create_dir_all(&docs).unwrap();
        let source = "---\nrun: false\n---\n```run:command\nexit 1\n```\n";
        fs::write(docs.join("draft.md"), source).unwrap();

        let result = Builder::new(config(temp.path())).build().await.unwrap();

        assert_eq!(result.blocks, 0);
        assert_eq!(fs::read_to_string(temp.path().join("dist/draft.md")).unwrap(), source);
    }

    #[test]
    fn check_counts_blocks_without_running() {
        let temp = tempdir().unwrap();
        let docs = temp.path().join("chapters");
        fs::create_dir_all(&docs).unwrap();
        fs::write(
            docs.join("a.md"),
            "```run:command\ntouch ran\n```\n\n```run:checkpoint name=start\n```\n",
        )
        .unwrap();

        let result = Builder::new(config(temp.path())).check().unwrap();

        assert_eq!(result.documents, 1);
        assert_eq!(result.blocks, 2);
        assert!(!temp.path().join("scratch").exists());
    }

    #[test]
    fn check_reports_invalid_blocks() {
        let temp = tempdir().unwrap();
        let docs = temp.path().join("chapters");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("a.md"), "```run:screenshot alt=x\nvisit http://x\n```\n").unwrap();

        let err = Builder::new(config(temp.path())).check().unwrap_err();
        assert!(matches!(err, BuildError::Run { .. }));
    }

    #[test]
    fn rejects_duplicate_basenames() {
        let temp = tempdir().unwrap();
        let docs = temp.path().join("chapters");
        fs::create_dir_all(docs.join("a")).unwrap();
        fs::create_dir_all(docs.join("b")).unwrap();
        fs::write(docs.join("a/intro.md"), "# A\n").unwrap();
        fs::write(docs.join("b/intro.md"), "# B\n").unwrap();

        let err = Builder::new(config(temp.path())).check().unwrap_err();
        assert!(matches!(err, BuildError::Parse { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn walk_errors_fail_discovery() {
        let temp = tempdir().unwrap();
        let docs = temp.path().join("chapters");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("intro.md"), "# Intro\n").unwrap();
        std::os::unix::fs::symlink(&docs, docs.join("loop")).unwrap();

        let err = Builder::new(config(temp.path())).check().unwrap_err();
        assert!(matches!(err, BuildError::Read(_)));
    }

    #[test]
    fn missing_docs_dir() {
        let temp = tempdir().unwrap();
        let err = Builder::new(config(temp.path())).check().unwrap_err();
        assert!(matches!(err, BuildError::Read(_)));
    }
}
