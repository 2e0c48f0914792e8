//! Frontmatter extraction and parsing.

use serde::Deserialize;

/// Parsed frontmatter from a chapter.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Frontmatter {
    /// Chapter title
    #[serde(default)]
    pub title: Option<String>,

    /// Overrides the file stem used to namespace screenshots and checkpoints
    #[serde(default)]
    pub basename: Option<String>,

    /// Working directory for this chapter, relative to the project root
    #[serde(default)]
    pub cwd: Option<String>,

    /// Whether runnable blocks are executed (`false` copies the chapter through)
    #[serde(default = "default_true")]
    pub run: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Frontmatter {
    fn default() -> Self {
        Self {
            title: None,
            basename: None,
            cwd: None,
            run: true,
        }
    }
}

/// Split a leading `---` fenced YAML block off `source`.
///
/// The returned remainder is a suffix of `source`, starting right after the
/// closing fence line, so byte offsets into it map back onto `source`.
pub fn extract_frontmatter(source: &str) -> Result<(Option<Frontmatter>, &str), FrontmatterError> {
    let Some(after_open) = source
        .strip_prefix("---\n")
        .or_else(|| source.strip_prefix("---\r\n"))
    else {
        return Ok((None, source));
    };

    let mut yaml_len = 0;
    let mut rest = None;
    for line in after_open.split_inclusive('\n') {
        if line.trim_end() == "---" {
            rest = Some(&after_open[yaml_len + line.len()..]);
            break;
        }
        yaml_len += line.len();
    }
    let remaining = rest.ok_or(FrontmatterError::Unclosed)?;
    let yaml = after_open[..yaml_len].trim();

    // An empty block deserializes to unit, not a map
    let frontmatter = if yaml.is_empty() {
        Frontmatter::default()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| FrontmatterError::InvalidYaml(e.to_string()))?
    };

    Ok((Some(frontmatter), remaining))
}

/// Errors that can occur when parsing frontmatter.
#[derive(Debug, thiserror::Error)]
pub enum FrontmatterError {
    #[error("frontmatter block is never closed with `---`")]
    Unclosed,

    #[error("invalid YAML in frontmatter: {0}")]
    InvalidYaml(String),
}
