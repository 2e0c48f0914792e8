//! Error types for block execution.

use std::path::PathBuf;

use galley_mdx::{ArgsError, RunnableKind, UnknownKind};

/// Failure of a single runnable block or of a document's run.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Malformed arguments, patch or script; raised before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// The world is not in the state the block expects.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A child process exited unsuccessfully.
    #[error("`{command}` failed ({status})\n{output}")]
    Execution {
        command: String,
        status: String,
        output: String,
    },

    #[error("timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: f64 },

    /// A required resource is missing or could not be created.
    #[error("resource error: {0}")]
    Resource(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Servers still registered when the document finished.
    #[error("servers still running at end of document: {}", .names.join(", "))]
    Leaked { names: Vec<String> },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ExecError>;

impl ExecError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<ArgsError> for ExecError {
    fn from(err: ArgsError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<UnknownKind> for ExecError {
    fn from(err: UnknownKind) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Error from running a document, located at the block that caused it.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("line {line}: {kind} block: {source}")]
    Block {
        line: usize,
        kind: String,
        #[source]
        source: ExecError,
    },

    #[error(transparent)]
    Document(#[from] ExecError),
}

impl RunError {
    pub fn block(line: usize, kind: Option<RunnableKind>, source: ExecError) -> Self {
        Self::Block {
            line,
            kind: kind.map(|k| k.to_string()).unwrap_or_else(|| "runnable".to_string()),
            source,
        }
    }

    /// The underlying execution error.
    pub fn exec_error(&self) -> &ExecError {
        match self {
            Self::Block { source, .. } => source,
            Self::Document(source) => source,
        }
    }
}
