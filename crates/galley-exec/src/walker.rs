//! Sequential execution of a planned document.

use galley_mdx::Document;

use crate::error::RunError;
use crate::plan::plan_document;
use crate::session::Session;

/// Run every runnable block of `doc` in order and return the finished document.
///
/// Each block's node is replaced by its handler's node, which inherits the
/// block's position, indent and metadata; a handler returning nothing
/// removes the block. The first failure stops every server the session
/// still holds and is returned with the block's line.
pub async fn run_document(doc: &Document, session: &mut Session) -> Result<Document, RunError> {
    let plan = plan_document(doc, &session.options().namespace)?;
    let mut slots: Vec<_> = doc.nodes.iter().cloned().map(Some).collect();

    for step in &plan {
        tracing::info!(line = step.line, kind = %step.kind(), "running block");

        let result = step.action.run(session).await;
        let replacement = match result {
            Ok(node) => node,
            Err(e) => {
                session.abort().await;
                return Err(RunError::block(step.line, Some(step.kind()), e));
            }
        };

        let slot = &mut slots[step.index];
        *slot = match (slot.take(), replacement) {
            (Some(original), Some(mut node)) => {
                node.position = original.position;
                node.indent = original.indent;
                let mut data = original.data;
                data.append(&mut node.data);
                node.data = data;
                Some(node)
            }
            (_, replacement) => replacement,
        };
    }

    session.finish().await?;

    Ok(Document {
        frontmatter: doc.frontmatter.clone(),
        nodes: slots.into_iter().flatten().collect(),
    })
}
