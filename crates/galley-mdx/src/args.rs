//! Info-string argument parsing.
//!
//! A runnable block's info string carries `key=value` pairs after its tag.
//! Each block kind declares a schema of [`Field`]s; [`parse_args`] checks the
//! tokens against it and coerces every value before any handler runs.

use std::collections::BTreeMap;

/// How a raw token value is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Str,
    Number,
    Bool,
}

impl Coercion {
    fn expected(&self) -> &'static str {
        match self {
            Self::Str => "a string",
            Self::Number => "a number",
            Self::Bool => "one of true/false/yes/no/on/off/1/0",
        }
    }
}

/// Whether a field must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional(Option<&'static str>),
}

/// One entry in a block kind's argument schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub presence: Presence,
    pub coercion: Coercion,
}

impl Field {
    pub const fn required(name: &'static str, coercion: Coercion) -> Self {
        Self {
            name,
            presence: Presence::Required,
            coercion,
        }
    }

    pub const fn optional(name: &'static str, coercion: Coercion) -> Self {
        Self {
            name,
            presence: Presence::Optional(None),
            coercion,
        }
    }

    pub const fn with_default(
        name: &'static str,
        coercion: Coercion,
        default: &'static str,
    ) -> Self {
        Self {
            name,
            presence: Presence::Optional(Some(default)),
            coercion,
        }
    }
}

/// A coerced argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Number(f64),
    Bool(bool),
}

/// Validated arguments for one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: BTreeMap<&'static str, Value>,
}

impl Args {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Boolean field, `false` when absent.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(Value::Bool(true)))
    }

    /// Numeric field that must be a non-negative whole number.
    pub fn uint(&self, name: &'static str) -> Result<Option<u32>, ArgsError> {
        let Some(n) = self.number(name) else {
            return Ok(None);
        };
        if n < 0.0 || n.fract() != 0.0 || n > f64::from(u32::MAX) {
            return Err(ArgsError::Invalid {
                field: name.to_string(),
                value: n.to_string(),
                expected: "a non-negative whole number",
            });
        }
        Ok(Some(n as u32))
    }
}

/// Errors produced while validating an info string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgsError {
    #[error("missing required field `{field}`")]
    Missing { field: String },

    #[error("invalid value `{value}` for field `{field}`: expected {expected}")]
    Invalid {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("unknown field `{field}` (expected one of: {allowed})")]
    Unknown { field: String, allowed: String },

    #[error("field `{field}` given more than once")]
    Duplicate { field: String },

    #[error("malformed arguments: {0}")]
    Syntax(String),
}

/// Validate `input` against `schema`.
///
/// Tokens are whitespace separated `key=value` pairs; values may be double
/// quoted. A bare `key` sets a boolean field to true.
pub fn parse_args(input: &str, schema: &[Field]) -> Result<Args, ArgsError> {
    let mut raw: BTreeMap<&'static str, Option<String>> = BTreeMap::new();

    for (key, value) in tokenize(input)? {
        let field = schema.iter().find(|f| f.name == key).ok_or_else(|| {
            ArgsError::Unknown {
                field: key.clone(),
                allowed: schema.iter().map(|f| f.name).collect::<Vec<_>>().join(", "),
            }
        })?;
        if raw.insert(field.name, value).is_some() {
            return Err(ArgsError::Duplicate { field: key });
        }
    }

    let mut values = BTreeMap::new();
    for field in schema {
        let value = match raw.remove(field.name) {
            Some(Some(value)) => coerce(field, &value)?,
            Some(None) if field.coercion == Coercion::Bool => Value::Bool(true),
            Some(None) => {
                return Err(ArgsError::Invalid {
                    field: field.name.to_string(),
                    value: String::new(),
                    expected: "key=value",
                })
            }
            None => match field.presence {
                Presence::Required => {
                    return Err(ArgsError::Missing {
                        field: field.name.to_string(),
                    })
                }
                Presence::Optional(Some(default)) => coerce(field, default)?,
                Presence::Optional(None) => continue,
            },
        };
        values.insert(field.name, value);
    }

    Ok(Args { values })
}

fn coerce(field: &Field, value: &str) -> Result<Value, ArgsError> {
    let invalid = || ArgsError::Invalid {
        field: field.name.to_string(),
        value: value.to_string(),
        expected: field.coercion.expected(),
    };

    match field.coercion {
        Coercion::Str => Ok(Value::Str(value.to_string())),
        Coercion::Number => value
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Number)
            .ok_or_else(invalid),
        Coercion::Bool => match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
    }
}

/// Split an info string into `(key, value)` pairs.
fn tokenize(input: &str) -> Result<Vec<(String, Option<String>)>, ArgsError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != '=') {
            key.push(c);
        }
        if key.is_empty() {
            return Err(ArgsError::Syntax("`=` without a field name".to_string()));
        }

        if chars.next_if_eq(&'=').is_none() {
            tokens.push((key, None));
            continue;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => break,
                    },
                    Some(c) => value.push(c),
                    None => {
                        return Err(ArgsError::Syntax(format!(
                            "unterminated quote in value of `{key}`"
                        )))
                    }
                }
            }
            if chars.peek().is_some_and(|c| !c.is_whitespace()) {
                return Err(ArgsError::Syntax(format!(
                    "unexpected text after quoted value of `{key}`"
                )));
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }
        tokens.push((key, Some(value)));
    }

    Ok(tokens)
}
