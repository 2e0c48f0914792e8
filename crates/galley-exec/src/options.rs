//! Typed helpers shared by the per-kind option parsers.

use std::path::{Component, Path};
use std::time::Duration;

use galley_mdx::Args;

use crate::error::{ExecError, Result};

/// A seconds-valued field as a [`Duration`]; must be positive when present.
pub(crate) fn seconds(args: &Args, name: &str) -> Result<Option<Duration>> {
    match args.number(name) {
        None => Ok(None),
        Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
            ExecError::validation(format!("field `{name}` is out of range, got {secs}"))
        }),
        Some(secs) => Err(ExecError::validation(format!(
            "field `{name}` must be greater than 0, got {secs}"
        ))),
    }
}

/// Reject paths that are absolute or climb out of the working directory.
pub(crate) fn relative_path(field: &str, value: &str) -> Result<String> {
    let path = Path::new(value);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if value.is_empty() || escapes {
        return Err(ExecError::validation(format!(
            "field `{field}` must be a relative path inside the working directory, got `{value}`"
        )));
    }
    Ok(value.to_string())
}

/// Reject values that are not a single file name.
pub(crate) fn file_name(field: &str, value: &str) -> Result<String> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(value.to_string()),
        _ => Err(ExecError::validation(format!(
            "field `{field}` must be a plain file name, got `{value}`"
        ))),
    }
}
