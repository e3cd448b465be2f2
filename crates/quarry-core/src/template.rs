//! Statement templates.
//!
//! Template parameters splice caller-supplied text directly into a statement
//! before it reaches the backend, e.g. `SELECT * FROM {{table}} WHERE id = $id`.
//! This is the only way to vary identifiers such as table or column names.
//!
//! # Security
//!
//! Substitution is plain text replacement. Values are neither quoted nor
//! escaped, so a template parameter can inject arbitrary statement text.
//! Only expose template parameters to callers trusted with that power, and
//! prefer bound parameters for values.

use crate::error::ParameterError;
use crate::params::{ParamValue, Parameter};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Matches `{{name}}` and `{{.name}}`, with optional inner whitespace.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap()
});

/// Names referenced by placeholders, in order of first appearance.
pub fn placeholder_names(statement: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(statement) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Substitute every declared template parameter into `statement`.
///
/// All declared template parameters must be present in `input`; each value
/// is type-checked against its declaration before rendering.
pub fn resolve_template_params(
    template_params: &[Parameter],
    statement: &str,
    input: &Map<String, Value>,
) -> Result<String, ParameterError> {
    if template_params.is_empty() {
        return Ok(statement.to_string());
    }

    let mut rendered = Vec::with_capacity(template_params.len());
    for param in template_params {
        let value = match input.get(&param.name) {
            Some(raw) if !raw.is_null() => param.coerce(raw)?,
            _ => match &param.default {
                Some(default) => param.coerce(default)?,
                None => {
                    return Err(ParameterError::MissingTemplateParameter {
                        name: param.name.clone(),
                    });
                }
            },
        };
        rendered.push((param.name.as_str(), render(&value)));
    }

    let resolved = PLACEHOLDER.replace_all(statement, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        rendered
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, text)| text.clone())
            .unwrap_or_else(|| caps[0].to_string())
    });
    Ok(resolved.into_owned())
}

fn render(value: &ParamValue) -> String {
    match value {
        ParamValue::Null(_) => String::new(),
        ParamValue::String(s) => s.clone(),
        ParamValue::Integer(i) => i.to_string(),
        ParamValue::Float(f) => f.to_string(),
        ParamValue::Boolean(b) => b.to_string(),
        ParamValue::Array { values, .. } => values
            .iter()
            .map(render)
            .collect::<Vec<_>>()
            .join(", "),
    }
}
