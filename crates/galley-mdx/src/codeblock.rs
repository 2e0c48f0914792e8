//! Fenced code blocks and the runnable tag grammar.

use std::fmt;

/// Kind of a runnable block, taken from the tag after the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnableKind {
    Command,
    FilePatch,
    FileCreate,
    ServerStart,
    ServerStop,
    Screenshot,
    Checkpoint,
}

impl RunnableKind {
    /// Parse the part of a tag after `<namespace>:`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "command" => Some(Self::Command),
            "file:patch" => Some(Self::FilePatch),
            "file:create" => Some(Self::FileCreate),
            "server:start" => Some(Self::ServerStart),
            "server:stop" => Some(Self::ServerStop),
            "screenshot" => Some(Self::Screenshot),
            "checkpoint" => Some(Self::Checkpoint),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::FilePatch => "file:patch",
            Self::FileCreate => "file:create",
            Self::ServerStart => "server:start",
            Self::ServerStop => "server:stop",
            Self::Screenshot => "screenshot",
            Self::Checkpoint => "checkpoint",
        }
    }
}

impl fmt::Display for RunnableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Location of a block in its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Line of the opening fence (1-indexed)
    pub line: usize,

    /// Byte offset of the opening fence in the full source
    pub offset: usize,
}

/// A fenced code block as it appears in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    /// Info string after the opening fence
    pub info: String,

    /// Block content
    pub body: String,

    /// Original source text, used to re-render untouched blocks verbatim
    pub raw: Option<String>,
}

impl CodeBlock {
    /// Create a code block that has no source text of its own.
    pub fn new(info: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            body: body.into(),
            raw: None,
        }
    }

    /// Language token of the info string.
    pub fn language(&self) -> &str {
        self.info.split_whitespace().next().unwrap_or("")
    }

    /// Recognize this block as runnable under `namespace`.
    ///
    /// Returns `Ok(None)` for ordinary code blocks and an error for a tag
    /// that uses the namespace with an unknown kind.
    pub fn runnable(&self, namespace: &str) -> Result<Option<RunnableBlock>, UnknownKind> {
        let info = self.info.trim();
        let (tag, rest) = match info.find(char::is_whitespace) {
            Some(idx) => (&info[..idx], info[idx..].trim_start()),
            None => (info, ""),
        };

        let Some(kind_tag) = tag
            .strip_prefix(namespace)
            .and_then(|t| t.strip_prefix(':'))
        else {
            return Ok(None);
        };

        let kind = RunnableKind::from_tag(kind_tag).ok_or_else(|| UnknownKind {
            tag: tag.to_string(),
        })?;

        Ok(Some(RunnableBlock {
            kind,
            args: rest.to_string(),
            body: self.body.clone(),
        }))
    }
}

/// A code block tagged for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnableBlock {
    pub kind: RunnableKind,

    /// Info string after the tag (`key=value ...`)
    pub args: String,

    /// Kind-specific body
    pub body: String,
}

/// A tag used the runnable namespace with a kind that does not exist.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown runnable block kind `{tag}`")]
pub struct UnknownKind {
    pub tag: String,
}

/// Guess a fence language from a file path's extension.
pub fn language_for_path(path: &str) -> &str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext {
        "rs" => "rust",
        "js" | "mjs" | "cjs" => "js",
        "jsx" => "jsx",
        "ts" | "mts" => "ts",
        "tsx" => "tsx",
        "py" => "python",
        "sh" | "bash" => "bash",
        "md" => "markdown",
        "yml" | "yaml" => "yaml",
        "json" | "toml" | "html" | "css" => ext,
        _ => "",
    }
}
