//! Rendering nodes back to markdown.

use crate::parser::{Document, Node, NodeKind};

impl Document {
    /// Render the document back to markdown.
    ///
    /// Untouched code blocks and markdown runs are emitted verbatim.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            out.push_str(&render_node(node));
        }
        out
    }
}

/// Render a single node, indenting continuation lines.
pub fn render_node(node: &Node) -> String {
    let text = match &node.kind {
        NodeKind::Markdown(text) => return text.clone(),
        NodeKind::Code(block) => {
            if let Some(raw) = &block.raw {
                return raw.clone();
            }
            let fence = fence_for(&block.body);
            let mut body = block.body.clone();
            if !body.is_empty() && !body.ends_with('\n') {
                body.push('\n');
            }
            format!("{fence}{}\n{body}{fence}", block.info)
        }
        NodeKind::Image { url, alt } => format!("![{}]({})", escape_alt(alt), url),
        NodeKind::Html(markup) => markup.clone(),
    };

    indent_continuation(&text, &node.indent)
}

/// Escape a value for use inside a double-quoted HTML attribute.
///
/// Only `<`, `>` and `"` are replaced.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Backtick fence longer than any backtick run in `body`.
fn fence_for(body: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in body.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

fn escape_alt(alt: &str) -> String {
    alt.replace('[', "\\[").replace(']', "\\]")
}

fn indent_continuation(text: &str, indent: &str) -> String {
    if indent.is_empty() {
        return text.to_string();
    }
    let mut lines = text.split('\n');
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        if !line.is_empty() {
            out.push_str(indent);
        }
        out.push_str(line);
    }
    out
}
