//! The `visit` / `wait` screenshot script.

use crate::error::{ExecError, Result};

/// One browser step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Navigate and wait for the network to go idle
    Visit(String),
    /// Block until an element matches the CSS selector
    Wait(String),
}

/// Compile a script body, one step per non-empty line.
///
/// The whole script is checked before anything runs, so an unknown verb on
/// the last line still means no step executes.
pub fn compile(body: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::new();

    for (idx, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (verb, arg) = match line.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (line, ""),
        };
        let step = match verb {
            "visit" => Step::Visit(arg.to_string()),
            "wait" => Step::Wait(arg.to_string()),
            other => {
                return Err(ExecError::validation(format!(
                    "screenshot script line {}: unknown step `{other}` (expected `visit` or `wait`)",
                    idx + 1
                )))
            }
        };
        if arg.is_empty() {
            return Err(ExecError::validation(format!(
                "screenshot script line {}: `{verb}` needs an argument",
                idx + 1
            )));
        }
        steps.push(step);
    }

    match steps.first() {
        None => Err(ExecError::validation("screenshot script has no steps")),
        Some(Step::Wait(_)) => Err(ExecError::validation(
            "screenshot script must start with `visit`",
        )),
        Some(Step::Visit(_)) => Ok(steps),
    }
}
