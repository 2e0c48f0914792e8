//! Tutorial markdown parser with runnable code block extraction.
//!
//! This crate splits a chapter into nodes, extracts YAML frontmatter,
//! recognizes code blocks tagged for execution and validates their arguments.

pub mod args;
pub mod codeblock;
pub mod frontmatter;
pub mod parser;
pub mod render;

pub use args::{parse_args, Args, ArgsError, Coercion, Field, Value};
pub use codeblock::{
    language_for_path, CodeBlock, Position, RunnableBlock, RunnableKind, UnknownKind,
};
pub use frontmatter::Frontmatter;
pub use parser::{parse_document, Document, Node, NodeKind, ParseError};
pub use render::{escape_attr, render_node};
