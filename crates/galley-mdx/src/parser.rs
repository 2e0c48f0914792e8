//! Chapter parser.
//!
//! Splits a markdown source into an ordered list of [`Node`]s: verbatim
//! markdown runs and fenced code blocks with their positions.

use std::collections::BTreeMap;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

use crate::codeblock::{CodeBlock, Position};
use crate::frontmatter::{extract_frontmatter, Frontmatter, FrontmatterError};

/// A parsed chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Parsed frontmatter (if present)
    pub frontmatter: Option<Frontmatter>,

    /// Content nodes in source order; the frontmatter block is the first
    /// markdown node when present
    pub nodes: Vec<Node>,
}

/// A node in the document tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,

    /// Source position, kept when a handler replaces the node
    pub position: Option<Position>,

    /// Prefix applied to continuation lines when rendering
    pub indent: String,

    /// Side-channel metadata for downstream consumers
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Verbatim markdown source
    Markdown(String),

    /// Fenced code block
    Code(CodeBlock),

    /// Markdown image reference
    Image { url: String, alt: String },

    /// Raw embeddable markup
    Html(String),
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            position: None,
            indent: String::new(),
            data: BTreeMap::new(),
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Markdown(text.into()))
    }

    pub fn code(info: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(NodeKind::Code(CodeBlock::new(info, body)))
    }

    pub fn image(url: impl Into<String>, alt: impl Into<String>) -> Self {
        Self::new(NodeKind::Image {
            url: url.into(),
            alt: alt.into(),
        })
    }

    pub fn html(markup: impl Into<String>) -> Self {
        Self::new(NodeKind::Html(markup.into()))
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn as_code(&self) -> Option<&CodeBlock> {
        match &self.kind {
            NodeKind::Code(block) => Some(block),
            _ => None,
        }
    }
}

impl Document {
    /// Fenced code blocks in document order.
    pub fn code_blocks(&self) -> impl Iterator<Item = (&Node, &CodeBlock)> {
        self.nodes
            .iter()
            .filter_map(|node| node.as_code().map(|block| (node, block)))
    }
}

/// Errors that can occur when parsing a chapter.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Frontmatter error: {0}")]
    Frontmatter(#[from] FrontmatterError),
}

/// Parse a chapter into nodes.
pub fn parse_document(source: &str) -> Result<Document, ParseError> {
    let (frontmatter, content) = extract_frontmatter(source)?;
    let content_offset = source.len() - content.len();

    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS;

    let mut nodes = Vec::new();
    // Absolute offset of the first byte not yet assigned to a node
    let mut cursor = 0;
    let mut current: Option<(String, String, usize)> = None; // (info, body, start)

    for (event, range) in Parser::new_ext(content, options).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                current = Some((info.to_string(), String::new(), content_offset + range.start));
            }

            Event::Text(text) => {
                if let Some((_, ref mut body, _)) = current {
                    body.push_str(&text);
                }
            }

            Event::End(TagEnd::CodeBlock) => {
                // Indented code blocks stay in the surrounding markdown
                let Some((info, body, start)) = current.take() else {
                    continue;
                };

                // Leave the closing fence's line ending to the following markdown
                let mut end = (content_offset + range.end).max(start);
                while end > start && matches!(source.as_bytes()[end - 1], b'\n' | b'\r') {
                    end -= 1;
                }

                if cursor < start {
                    nodes.push(Node::markdown(&source[cursor..start]));
                }

                let mut block = CodeBlock::new(info, body);
                block.raw = Some(source[start..end].to_string());

                let mut node = Node::new(NodeKind::Code(block));
                node.position = Some(Position {
                    line: line_of(source, start),
                    offset: start,
                });
                node.indent = continuation_indent(source, start);
                nodes.push(node);

                cursor = end;
            }

            _ => {}
        }
    }

    if cursor < source.len() {
        nodes.push(Node::markdown(&source[cursor..]));
    }

    Ok(Document { frontmatter, nodes })
}

/// 1-indexed line number of a byte offset.
fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

/// Prefix of a fence's line, with container markers other than `>` blanked.
fn continuation_indent(source: &str, offset: usize) -> String {
    let line_start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    source[line_start..offset]
        .chars()
        .map(|c| match c {
            '>' | '\t' => c,
            _ => ' ',
        })
        .collect()
}
