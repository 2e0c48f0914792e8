//! `command` blocks: run shell commands and inline their output.

use std::time::Duration;

use galley_mdx::{parse_args, Coercion, Field, Node};

use crate::error::{ExecError, Result};
use crate::options::seconds;
use crate::process::{ensure_success, output_text, run_captured, shell_command};
use crate::session::Session;

pub const SCHEMA: &[Field] = &[
    Field::optional("cwd", Coercion::Str),
    Field::with_default("hidden", Coercion::Bool, "false"),
    Field::with_default("lang", Coercion::Str, "console"),
    Field::with_default("prompt", Coercion::Str, "$"),
    Field::with_default("output", Coercion::Bool, "true"),
    Field::optional("timeout", Coercion::Number),
];

/// Options for a `command` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOptions {
    /// One shell command per non-empty body line
    pub lines: Vec<String>,
    pub cwd: Option<String>,
    pub hidden: bool,
    pub lang: String,
    pub prompt: String,
    pub show_output: bool,
    pub timeout: Option<Duration>,
}

impl CommandOptions {
    pub fn parse(args: &str, body: &str) -> Result<Self> {
        let args = parse_args(args, SCHEMA)?;

        let lines: Vec<String> = body
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        if lines.is_empty() {
            return Err(ExecError::validation("command block has no commands"));
        }

        Ok(Self {
            lines,
            cwd: args.str("cwd").map(str::to_string),
            hidden: args.flag("hidden"),
            lang: args.str("lang").unwrap_or("console").to_string(),
            prompt: args.str("prompt").unwrap_or("$").to_string(),
            show_output: args.flag("output"),
            timeout: seconds(&args, "timeout")?,
        })
    }

    /// Run each line in order; the first failure aborts the block.
    pub async fn run(&self, session: &mut Session) -> Result<Option<Node>> {
        let cwd = session.block_cwd(self.cwd.as_deref())?;
        let mut transcript = String::new();

        for line in &self.lines {
            let cmd = shell_command(session.shell(), line, &cwd);
            let output = run_captured(cmd, line, None, self.timeout).await?;
            ensure_success(line, &output)?;
            tracing::info!(command = %line, "command succeeded");

            transcript.push_str(&self.prompt);
            transcript.push(' ');
            transcript.push_str(line);
            transcript.push('\n');

            if self.show_output {
                let text = output_text(&output);
                transcript.push_str(&text);
                if !text.is_empty() && !text.ends_with('\n') {
                    transcript.push('\n');
                }
            }
        }

        if self.hidden {
            return Ok(None);
        }
        Ok(Some(Node::code(self.lang.as_str(), transcript)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOptions;
    use pretty_assertions::assert_eq;

    fn session(dir: &std::path::Path) -> Session {
        Session::new(SessionOptions {
            workdir: dir.to_path_buf(),
            ..Default::default()
        })
    }

    #[test]
    fn parses_lines_and_defaults() {
        let opts = CommandOptions::parse("", "git init\n\n  git status  \n").unwrap();

        assert_eq!(opts.lines, vec!["git init", "  git status"]);
        assert_eq!(opts.lang, "console");
        assert!(opts.show_output);
        assert!(!opts.hidden);
        assert_eq!(opts.timeout, None);
    }

    #[test]
    fn rejects_empty_body_and_unknown_fields() {
        assert!(CommandOptions::parse("", "\n \n").is_err());
        assert!(matches!(
            CommandOptions::parse("hiden", "ls"),
            Err(ExecError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        let opts = CommandOptions::parse("", "echo hi\nprintf done").unwrap();
        let node = opts.run(&mut session).await.unwrap().unwrap();
        let block = node.as_code().unwrap();

        assert_eq!(block.info, "console");
        assert_eq!(block.body, "$ echo hi\nhi\n$ printf done\ndone\n");
    }

    #[tokio::test]
    async fn effects_persist_between_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        CommandOptions::parse("hidden", "echo 1 > counter.txt")
            .unwrap()
            .run(&mut session)
            .await
            .unwrap();
        let node = CommandOptions::parse("output=false prompt=%", "cat counter.txt")
            .unwrap()
            .run(&mut session)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(node.as_code().unwrap().body, "% cat counter.txt\n");
    }

    #[tokio::test]
    async fn hidden_commands_produce_no_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        let opts = CommandOptions::parse("hidden", "true").unwrap();
        assert!(opts.run(&mut session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn runs_in_cwd_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        let mut session = session(dir.path());

        let node = CommandOptions::parse("cwd=app", "touch here && ls")
            .unwrap()
            .run(&mut session)
            .await
            .unwrap()
            .unwrap();

        assert!(node.as_code().unwrap().body.contains("here"));
        assert!(dir.path().join("app/here").exists());
    }

    #[tokio::test]
    async fn failing_command_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        let opts = CommandOptions::parse("", "echo before\nfalse\ntouch after").unwrap();
        let err = opts.run(&mut session).await.unwrap_err();

        assert!(matches!(err, ExecError::Execution { ref command, .. } if command == "false"));
        assert!(!dir.path().join("after").exists());
    }
}
