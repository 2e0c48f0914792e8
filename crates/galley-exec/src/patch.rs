//! `file:patch` blocks: strict unified-diff application.
//!
//! Hunks apply only at the line their header names, and every context and
//! removed line must match the file exactly. There is no fuzz or offset
//! search: a chapter whose patch no longer matches the code fails the build.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::sync::LazyLock;

use galley_mdx::{parse_args, Coercion, Field, Node};
use regex::Regex;

use crate::error::{ExecError, Result};
use crate::file::write_atomic;
use crate::options::relative_path;
use crate::session::Session;

pub const PATCH_SCHEMA: &[Field] = &[
    Field::optional("path", Coercion::Str),
    Field::optional("cwd", Coercion::Str),
    Field::with_default("hidden", Coercion::Bool, "false"),
];

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk header regex")
});

/// One line of a hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

/// A parsed single-file unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Path from the `+++` header, without its `b/` prefix
    pub target: Option<String>,
    pub hunks: Vec<Hunk>,
    /// The new side ends without a trailing newline
    pub no_final_newline: bool,
    /// The old side ends without a trailing newline
    pub old_no_final_newline: bool,
}

/// A hunk that does not match the current file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub hunk: usize,
    pub line: usize,
    pub expected: String,
    pub found: Option<String>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.found {
            Some(found) => write!(
                f,
                "hunk {} does not apply at line {}: expected {:?}, found {:?}",
                self.hunk, self.line, self.expected, found
            ),
            None => write!(
                f,
                "hunk {} does not apply at line {}: expected {:?}, found end of file",
                self.hunk, self.line, self.expected
            ),
        }
    }
}

impl Patch {
    /// Parse unified diff text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut patch = Patch {
            target: None,
            hunks: Vec::new(),
            no_final_newline: false,
            old_no_final_newline: false,
        };
        // Lines still expected by the open hunk: (old, new)
        let mut remaining: Option<(usize, usize)> = None;

        for (idx, line) in text.lines().enumerate() {
            let lineno = idx + 1;

            if let Some(caps) = HUNK_HEADER.captures(line) {
                if let Some((old, new)) = remaining {
                    if old > 0 || new > 0 {
                        return Err(truncated(patch.hunks.len(), old, new));
                    }
                }
                let num = |i: usize| -> Result<usize> {
                    caps.get(i)
                        .map(|m| m.as_str().parse::<usize>())
                        .unwrap_or(Ok(1))
                        .map_err(|_| {
                            ExecError::validation(format!(
                                "line {lineno}: hunk header number out of range"
                            ))
                        })
                };
                let hunk = Hunk {
                    old_start: num(1)?,
                    old_len: num(2)?,
                    new_start: num(3)?,
                    new_len: num(4)?,
                    lines: Vec::new(),
                };
                if hunk.old_len > 0 && hunk.old_start == 0 {
                    return Err(ExecError::validation(format!(
                        "line {lineno}: hunk removes lines but starts at line 0"
                    )));
                }
                remaining = Some((hunk.old_len, hunk.new_len));
                patch.hunks.push(hunk);
                continue;
            }

            if line.starts_with('\\') {
                // "\ No newline at end of file" marks the line before it
                match patch.hunks.last().and_then(|h| h.lines.last()) {
                    Some(HunkLine::Add(_)) => patch.no_final_newline = true,
                    Some(HunkLine::Remove(_)) => patch.old_no_final_newline = true,
                    Some(HunkLine::Context(_)) => {
                        patch.no_final_newline = true;
                        patch.old_no_final_newline = true;
                    }
                    None => {}
                }
                continue;
            }

            let open = matches!(remaining, Some((old, new)) if old > 0 || new > 0);
            if !open {
                if patch.hunks.is_empty() {
                    if let Some(path) = line.strip_prefix("+++ ") {
                        patch.target = header_path(path);
                        continue;
                    }
                    if line.starts_with("--- ")
                        || line.starts_with("diff ")
                        || line.starts_with("index ")
                        || line.trim().is_empty()
                    {
                        continue;
                    }
                } else if line.trim().is_empty() {
                    continue;
                }
                return Err(ExecError::validation(format!(
                    "line {lineno}: unexpected text outside a hunk: {line:?}"
                )));
            }

            let (old, new) = remaining.unwrap_or_default();
            let (old_left, new_left) = (old.checked_sub(1), new.checked_sub(1));
            let (entry, old, new) = match line.chars().next() {
                Some(' ') => (HunkLine::Context(line[1..].to_string()), old_left, new_left),
                // Editors strip the space from blank context lines
                None => (HunkLine::Context(String::new()), old_left, new_left),
                Some('-') => (HunkLine::Remove(line[1..].to_string()), old_left, Some(new)),
                Some('+') => (HunkLine::Add(line[1..].to_string()), Some(old), new_left),
                Some(_) => {
                    return Err(ExecError::validation(format!(
                        "line {lineno}: hunk lines must start with ' ', '-' or '+': {line:?}"
                    )))
                }
            };
            let (Some(old), Some(new)) = (old, new) else {
                return Err(ExecError::validation(format!(
                    "line {lineno}: hunk {} has more lines than its header declares",
                    patch.hunks.len()
                )));
            };
            remaining = Some((old, new));
            if let Some(hunk) = patch.hunks.last_mut() {
                hunk.lines.push(entry);
            }
        }

        if let Some((old, new)) = remaining {
            if old > 0 || new > 0 {
                return Err(truncated(patch.hunks.len(), old, new));
            }
        }
        if patch.hunks.is_empty() {
            return Err(ExecError::validation("patch has no hunks"));
        }

        Ok(patch)
    }

    /// Whether the patch only makes sense against an empty or missing file.
    pub fn creates_file(&self) -> bool {
        self.hunks.iter().all(|h| h.old_start == 0 && h.old_len == 0)
    }

    /// Apply the patch to `original`, returning the new content.
    pub fn apply(&self, original: &str) -> std::result::Result<String, Mismatch> {
        let had_final_newline = original.is_empty() || original.ends_with('\n');
        let lines: Vec<&str> = if original.is_empty() {
            Vec::new()
        } else {
            original.strip_suffix('\n').unwrap_or(original).split('\n').collect()
        };

        let mut out: Vec<&str> = Vec::with_capacity(lines.len());
        let mut pos = 0;

        for (n, hunk) in self.hunks.iter().enumerate() {
            let start = if hunk.old_len == 0 {
                hunk.old_start
            } else {
                hunk.old_start - 1
            };
            if start < pos || start > lines.len() {
                return Err(Mismatch {
                    hunk: n + 1,
                    line: hunk.old_start,
                    expected: format!("hunk starting at line {}", hunk.old_start),
                    found: Some(format!(
                        "file of {} lines with {} already patched",
                        lines.len(),
                        pos
                    )),
                });
            }

            out.extend_from_slice(&lines[pos..start]);
            let mut cursor = start;

            for line in &hunk.lines {
                match line {
                    HunkLine::Context(text) | HunkLine::Remove(text) => {
                        let found = lines.get(cursor).copied();
                        if found != Some(text.as_str()) {
                            return Err(Mismatch {
                                hunk: n + 1,
                                line: cursor + 1,
                                expected: text.clone(),
                                found: found.map(str::to_string),
                            });
                        }
                        if matches!(line, HunkLine::Context(_)) {
                            out.push(text);
                        }
                        cursor += 1;
                    }
                    HunkLine::Add(text) => out.push(text),
                }
            }

            pos = cursor;
        }
        out.extend_from_slice(&lines[pos..]);

        // A marker on the old side means the hunk reached the end of the file
        let final_newline = if self.no_final_newline {
            false
        } else {
            self.old_no_final_newline || had_final_newline
        };
        let mut result = out.join("\n");
        if !out.is_empty() && final_newline {
            result.push('\n');
        }
        Ok(result)
    }
}

fn truncated(hunk: usize, old: usize, new: usize) -> ExecError {
    ExecError::validation(format!(
        "hunk {hunk} is truncated: {old} old and {new} new line(s) missing"
    ))
}

fn header_path(raw: &str) -> Option<String> {
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    if path == "/dev/null" || path.is_empty() {
        return None;
    }
    Some(path.strip_prefix("b/").unwrap_or(path).to_string())
}

/// Options for a `file:patch` block.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOptions {
    pub path: String,
    pub cwd: Option<String>,
    pub hidden: bool,
    pub patch: Patch,
    pub body: String,
}

impl PatchOptions {
    pub fn parse(args: &str, body: &str) -> Result<Self> {
        let args = parse_args(args, PATCH_SCHEMA)?;
        let patch = Patch::parse(body)?;

        let path = match args.str("path").or(patch.target.as_deref()) {
            Some(path) => relative_path("path", path)?,
            None => {
                return Err(ExecError::validation(
                    "file:patch needs `path=` or a `+++` header naming the file",
                ))
            }
        };

        Ok(Self {
            path,
            cwd: args.str("cwd").map(str::to_string),
            hidden: args.flag("hidden"),
            patch,
            body: body.to_string(),
        })
    }

    pub async fn run(&self, session: &mut Session) -> Result<Option<Node>> {
        let target = session.block_cwd(self.cwd.as_deref())?.join(&self.path);

        let (original, permissions) = match fs::read_to_string(&target) {
            Ok(content) => {
                let permissions = fs::metadata(&target).ok().map(|m| m.permissions());
                (content, permissions)
            }
            Err(e) if e.kind() == ErrorKind::NotFound && self.patch.creates_file() => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| ExecError::io(parent, e))?;
                }
                (String::new(), None)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ExecError::precondition(format!(
                    "cannot patch {}: file does not exist",
                    self.path
                )))
            }
            Err(e) => return Err(ExecError::io(&target, e)),
        };

        let patched = self
            .patch
            .apply(&original)
            .map_err(|m| ExecError::precondition(format!("{}: {}", self.path, m)))?;
        write_atomic(&target, patched.as_bytes(), permissions)?;
        tracing::info!(path = %self.path, hunks = self.patch.hunks.len(), "patched file");

        if self.hidden {
            return Ok(None);
        }
        Ok(Some(
            Node::code("diff", self.body.as_str()).with_data("file", self.path.as_str()),
        ))
    }
}
