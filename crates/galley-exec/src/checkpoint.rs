//! `checkpoint` blocks: snapshot the working directory under the assets root.

use std::fs;
use std::path::Path;

use galley_mdx::{parse_args, Coercion, Field, Node};
use walkdir::WalkDir;

use crate::error::{ExecError, Result};
use crate::options::file_name;
use crate::session::Session;

pub const SCHEMA: &[Field] = &[
    Field::required("name", Coercion::Str),
    Field::with_default("exclude", Coercion::Str, ".git,node_modules,target"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointOptions {
    pub name: String,
    /// File names skipped at any depth
    pub exclude: Vec<String>,
}

impl CheckpointOptions {
    pub fn parse(args: &str, _body: &str) -> Result<Self> {
        let args = parse_args(args, SCHEMA)?;
        let name = file_name("name", args.str("name").unwrap_or_default())?;
        let exclude = args
            .str("exclude")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self { name, exclude })
    }

    pub async fn run(&self, session: &mut Session) -> Result<Option<Node>> {
        let basename = session.basename()?.to_string();
        if !session.record_checkpoint(&self.name) {
            return Err(ExecError::precondition(format!(
                "checkpoint `{}` was already taken in this document",
                self.name
            )));
        }

        let parent = session.assets_root().join("checkpoints").join(&basename);
        fs::create_dir_all(&parent).map_err(|e| {
            ExecError::resource(format!("cannot create {}: {e}", parent.display()))
        })?;
        let staging = tempfile::Builder::new()
            .prefix(".galley-")
            .tempdir_in(&parent)
            .map_err(|e| ExecError::io(&parent, e))?;

        let skip = fs::canonicalize(session.assets_root())
            .map_err(|e| ExecError::io(session.assets_root(), e))?;
        let files = copy_tree(session.cwd(), staging.path(), &self.exclude, &skip)?;

        let target = parent.join(&self.name);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| ExecError::io(&target, e))?;
        }
        fs::rename(staging.path(), &target).map_err(|e| ExecError::io(&target, e))?;
        tracing::info!(checkpoint = %self.name, files, "saved checkpoint");

        Ok(None)
    }
}

/// Copy `src` into `dest`, returning the number of files copied.
///
/// Entries named in `exclude` and anything under `skip` are left out.
fn copy_tree(src: &Path, dest: &Path, exclude: &[String], skip: &Path) -> Result<usize> {
    let mut files = 0;
    let walker = WalkDir::new(src).min_depth(1).into_iter().filter_entry(|entry| {
        let excluded = entry
            .file_name()
            .to_str()
            .is_some_and(|name| exclude.iter().any(|e| e == name));
        let inside_skip = fs::canonicalize(entry.path()).is_ok_and(|p| p.starts_with(skip));
        !excluded && !inside_skip
    });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            ExecError::io(path, e.into())
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let to = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&to).map_err(|e| ExecError::io(&to, e))?;
        } else if file_type.is_symlink() {
            copy_link(entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to).map_err(|e| ExecError::io(entry.path(), e))?;
            files += 1;
        }
    }

    Ok(files)
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    let link = fs::read_link(from).map_err(|e| ExecError::io(from, e))?;
    std::os::unix::fs::symlink(link, to).map_err(|e| ExecError::io(to, e))
}

#[cfg(not(unix))]
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map_err(|e| ExecError::io(from, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOptions;

    fn session(root: &Path, assets: &Path) -> Session {
        Session::new(SessionOptions {
            workdir: root.to_path_buf(),
            assets_root: assets.to_path_buf(),
            basename: Some("ch1".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn parses_exclude_list() {
        let opts = CheckpointOptions::parse("name=step-1", "").unwrap();
        assert_eq!(opts.exclude, vec![".git", "node_modules", "target"]);

        let opts = CheckpointOptions::parse("name=step-1 exclude=\"dist, .cache\"", "").unwrap();
        assert_eq!(opts.exclude, vec!["dist", ".cache"]);

        assert!(CheckpointOptions::parse("", "").is_err());
        assert!(CheckpointOptions::parse("name=a/b", "").is_err());
    }

    #[tokio::test]
    async fn copies_tree_without_excluded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(project.join("src")).unwrap();
        fs::create_dir_all(project.join("node_modules/pkg")).unwrap();
        fs::write(project.join("src/main.js"), "main").unwrap();
        fs::write(project.join("node_modules/pkg/index.js"), "dep").unwrap();
        let assets = dir.path().join("assets");
        fs::create_dir_all(&assets).unwrap();

        let mut session = session(&project, &assets);
        let node = CheckpointOptions::parse("name=start", "")
            .unwrap()
            .run(&mut session)
            .await
            .unwrap();

        assert!(node.is_none());
        let snapshot = assets.join("checkpoints/ch1/start");
        assert_eq!(fs::read_to_string(snapshot.join("src/main.js")).unwrap(), "main");
        assert!(!snapshot.join("node_modules").exists());
    }

    #[tokio::test]
    async fn skips_assets_inside_project() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let assets = dir.path().join("assets");
        fs::create_dir_all(&assets).unwrap();

        let mut session = session(dir.path(), &assets);
        CheckpointOptions::parse("name=one", "")
            .unwrap()
            .run(&mut session)
            .await
            .unwrap();

        let snapshot = assets.join("checkpoints/ch1/one");
        assert!(snapshot.join("a.txt").is_file());
        assert!(!snapshot.join("assets").exists());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_and_existing_snapshot_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("new.txt"), "new").unwrap();
        let assets = dir.path().join("assets");
        let stale = assets.join("checkpoints/ch1/one");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.txt"), "old").unwrap();

        let mut session = session(&project, &assets);
        let opts = CheckpointOptions::parse("name=one", "").unwrap();
        opts.run(&mut session).await.unwrap();

        assert!(stale.join("new.txt").is_file());
        assert!(!stale.join("old.txt").exists());

        let err = opts.run(&mut session).await.unwrap_err();
        assert!(matches!(err, ExecError::Precondition(_)));
    }
}
