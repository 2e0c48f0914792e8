//! Planning: every runnable block is parsed and validated before any runs.

use galley_mdx::{Document, Node, RunnableBlock, RunnableKind};

use crate::checkpoint::CheckpointOptions;
use crate::command::CommandOptions;
use crate::error::{Result, RunError};
use crate::file::CreateOptions;
use crate::patch::PatchOptions;
use crate::screenshot::ScreenshotOptions;
use crate::server::{StartOptions, StopOptions};
use crate::session::Session;

/// A validated runnable block, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Command(CommandOptions),
    Patch(PatchOptions),
    Create(CreateOptions),
    StartServer(StartOptions),
    StopServer(StopOptions),
    Screenshot(ScreenshotOptions),
    Checkpoint(CheckpointOptions),
}

impl Action {
    pub fn from_block(block: &RunnableBlock) -> Result<Self> {
        let (args, body) = (block.args.as_str(), block.body.as_str());
        Ok(match block.kind {
            RunnableKind::Command => Self::Command(CommandOptions::parse(args, body)?),
            RunnableKind::FilePatch => Self::Patch(PatchOptions::parse(args, body)?),
            RunnableKind::FileCreate => Self::Create(CreateOptions::parse(args, body)?),
            RunnableKind::ServerStart => Self::StartServer(StartOptions::parse(args, body)?),
            RunnableKind::ServerStop => Self::StopServer(StopOptions::parse(args, body)?),
            RunnableKind::Screenshot => Self::Screenshot(ScreenshotOptions::parse(args, body)?),
            RunnableKind::Checkpoint => Self::Checkpoint(CheckpointOptions::parse(args, body)?),
        })
    }

    pub fn kind(&self) -> RunnableKind {
        match self {
            Self::Command(_) => RunnableKind::Command,
            Self::Patch(_) => RunnableKind::FilePatch,
            Self::Create(_) => RunnableKind::FileCreate,
            Self::StartServer(_) => RunnableKind::ServerStart,
            Self::StopServer(_) => RunnableKind::ServerStop,
            Self::Screenshot(_) => RunnableKind::Screenshot,
            Self::Checkpoint(_) => RunnableKind::Checkpoint,
        }
    }

    /// Execute against the session, returning the replacement node.
    pub async fn run(&self, session: &mut Session) -> Result<Option<Node>> {
        match self {
            Self::Command(opts) => opts.run(session).await,
            Self::Patch(opts) => opts.run(session).await,
            Self::Create(opts) => opts.run(session).await,
            Self::StartServer(opts) => opts.run(session).await,
            Self::StopServer(opts) => opts.run(session).await,
            Self::Screenshot(opts) => opts.run(session).await,
            Self::Checkpoint(opts) => opts.run(session).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBlock {
    /// Index into `Document::nodes`
    pub index: usize,
    pub line: usize,
    pub action: Action,
}

impl PlannedBlock {
    pub fn kind(&self) -> RunnableKind {
        self.action.kind()
    }
}

/// Plan every runnable block of `doc` under `namespace`.
///
/// A document whose frontmatter sets `run: false` plans to nothing.
pub fn plan_document(
    doc: &Document,
    namespace: &str,
) -> std::result::Result<Vec<PlannedBlock>, RunError> {
    if doc.frontmatter.as_ref().is_some_and(|fm| !fm.run) {
        return Ok(Vec::new());
    }

    let mut plan = Vec::new();
    for (index, node) in doc.nodes.iter().enumerate() {
        let Some(code) = node.as_code() else {
            continue;
        };
        let line = node.position.map(|p| p.line).unwrap_or(0);

        let block = match code.runnable(namespace) {
            Ok(Some(block)) => block,
            Ok(None) => continue,
            Err(e) => return Err(RunError::block(line, None, e.into())),
        };
        let action =
            Action::from_block(&block).map_err(|e| RunError::block(line, Some(block.kind), e))?;
        plan.push(PlannedBlock { index, line, action });
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use galley_mdx::parse_document;

    #[test]
    fn plans_runnable_blocks_in_order() {
        let doc = parse_document(
            "# Setup\n\n```run:command\nnpm init -y\n```\n\n```js\nplain();\n```\n\n```run:file:create path=a.txt\nhi\n```\n",
        )
        .unwrap();
        let plan = plan_document(&doc, "run").unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].kind(), RunnableKind::Command);
        assert_eq!(plan[0].line, 3);
        assert_eq!(plan[1].kind(), RunnableKind::FileCreate);
        assert!(plan[0].index < plan[1].index);
    }

    #[test]
    fn custom_namespace() {
        let doc = parse_document("```tut:command\nls\n```\n\n```run:command\nls\n```\n").unwrap();
        let plan = plan_document(&doc, "tut").unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].line, 1);
    }

    #[test]
    fn reports_unknown_kind_with_line() {
        let doc = parse_document("text\n\n```run:comand\nls\n```\n").unwrap();
        let err = plan_document(&doc, "run").unwrap_err();

        assert!(matches!(err, RunError::Block { line: 3, .. }));
        assert!(matches!(err.exec_error(), ExecError::Validation(_)));
    }

    #[test]
    fn reports_invalid_args_with_kind() {
        let source = "```run:screenshot filename=a.gif alt=x\nvisit http://x\n```\n";
        let doc = parse_document(source).unwrap();
        let err = plan_document(&doc, "run").unwrap_err();

        let msg = err.to_string();
        assert!(msg.starts_with("line 1: screenshot block:"), "{msg}");
    }

    #[test]
    fn oversized_timeouts_are_validation_errors() {
        for source in [
            "```run:command timeout=1e300\nls\n```\n",
            "```run:server:start expect=ready timeout=1e300\nserve\n```\n",
            "```run:server:stop grace=1e300\nserve\n```\n",
        ] {
            let doc = parse_document(source).unwrap();
            let err = plan_document(&doc, "run").unwrap_err();
            assert!(matches!(err.exec_error(), ExecError::Validation(_)), "{source}");
        }
    }

    #[test]
    fn run_false_skips_planning() {
        let doc = parse_document("---\nrun: false\n---\n```run:comand\nls\n```\n").unwrap();
        assert!(plan_document(&doc, "run").unwrap().is_empty());
    }
}
