//! `file:create` blocks and atomic file writes.

use std::fs::{self, Permissions};
use std::io::Write;
use std::path::Path;

use galley_mdx::{language_for_path, parse_args, Coercion, Field, Node};
use tempfile::NamedTempFile;

use crate::error::{ExecError, Result};
use crate::options::relative_path;
use crate::session::Session;

pub const CREATE_SCHEMA: &[Field] = &[
    Field::required("path", Coercion::Str),
    Field::optional("cwd", Coercion::Str),
    Field::optional("lang", Coercion::Str),
    Field::with_default("hidden", Coercion::Bool, "false"),
];

/// Options for a `file:create` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOptions {
    pub path: String,
    pub cwd: Option<String>,
    pub lang: String,
    pub hidden: bool,
    pub content: String,
}

impl CreateOptions {
    pub fn parse(args: &str, body: &str) -> Result<Self> {
        let args = parse_args(args, CREATE_SCHEMA)?;
        let path = relative_path("path", args.str("path").unwrap_or_default())?;
        let lang = args
            .str("lang")
            .unwrap_or_else(|| language_for_path(&path))
            .to_string();

        Ok(Self {
            lang,
            path,
            cwd: args.str("cwd").map(str::to_string),
            hidden: args.flag("hidden"),
            content: body.to_string(),
        })
    }

    pub async fn run(&self, session: &mut Session) -> Result<Option<Node>> {
        let target = session.block_cwd(self.cwd.as_deref())?.join(&self.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ExecError::io(parent, e))?;
        }

        let permissions = fs::metadata(&target).ok().map(|m| m.permissions());
        write_atomic(&target, self.content.as_bytes(), permissions)?;
        tracing::info!(path = %self.path, "created file");

        if self.hidden {
            return Ok(None);
        }
        Ok(Some(
            Node::code(self.lang.as_str(), self.content.as_str())
                .with_data("file", self.path.as_str()),
        ))
    }
}

/// Replace `path` with `contents` via a temporary file in the same directory.
///
/// The temporary file is removed on every failure path, so `path` holds
/// either its old content or the complete new content.
pub(crate) fn write_atomic(
    path: &Path,
    contents: &[u8],
    permissions: Option<Permissions>,
) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ExecError::io(dir, e))?;

    if let Err(e) = fill(&mut tmp, contents) {
        return Err(ExecError::io(tmp.path(), e));
    }

    publish(tmp, path, permissions)
}

fn fill(tmp: &mut NamedTempFile, contents: &[u8]) -> std::io::Result<()> {
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.as_file().sync_all()
}

/// Move a finished temporary file onto `path`.
///
/// Without explicit `permissions` the file gets the usual `0644` rather
/// than the private mode temporary files are created with.
pub(crate) fn publish(
    tmp: NamedTempFile,
    path: &Path,
    permissions: Option<Permissions>,
) -> Result<()> {
    let permissions = permissions.or_else(default_permissions);
    if let Some(permissions) = permissions {
        fs::set_permissions(tmp.path(), permissions).map_err(|e| ExecError::io(tmp.path(), e))?;
    }

    tmp.persist(path).map_err(|e| ExecError::io(path, e.error))?;
    Ok(())
}

#[cfg(unix)]
fn default_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<Permissions> {
    None
}
