//! Execution engine for runnable chapter code blocks.
//!
//! A document is planned first: every block tagged `<namespace>:<kind>` is
//! parsed into an [`Action`] and validated. The walker then runs the plan
//! strictly in order against a [`Session`], replacing each block with the
//! output its handler produced.

pub mod checkpoint;
pub mod command;
pub mod error;
pub mod file;
pub mod patch;
pub mod plan;
mod options;
mod process;
pub mod screenshot;
pub mod server;
pub mod session;
pub mod walker;

pub use error::{ExecError, Result, RunError};
pub use plan::{plan_document, Action, PlannedBlock};
pub use server::{ServerHandle, ServerRegistry};
pub use session::{BrowserConfig, Session, SessionOptions};
pub use walker::run_document;
