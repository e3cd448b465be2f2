//! Typed parameter declarations and the values resolved from caller input.
//!
//! A tool declares its parameters once in configuration. Every invocation
//! validates the caller's flat JSON object against those declarations with
//! [`parse_params`], producing a fresh [`ParamValues`] that backends bind as
//! typed values.

use crate::auth::VerifiedAuth;
use crate::error::ParameterError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Float => "float",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
        }
    }

    /// Name of the matching JSON Schema type.
    pub fn json_schema_type(self) -> &'static str {
        match self {
            ParameterType::Float => "number",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binds a parameter to a claim of a verified auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBinding {
    /// Name of the auth service that must be verified.
    pub name: String,
    /// Claim field holding the value.
    pub field: String,
}

fn default_required() -> bool {
    true
}

/// A declared tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ParameterType,

    #[serde(default)]
    pub description: String,

    /// Whether the caller must supply a value. Ignored when `default` is set.
    #[serde(default = "default_required")]
    pub required: bool,

    /// Value used when the caller omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Item schema, mandatory for `array` parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Parameter>>,

    /// Claims that supply the value instead of caller input, in priority order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_services: Vec<AuthBinding>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParameterType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
            items: None,
            auth_services: Vec::new(),
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterType::String, description)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Integer, description)
    }

    pub fn float(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Float, description)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Boolean, description)
    }

    pub fn array(name: impl Into<String>, description: impl Into<String>, items: Parameter) -> Self {
        let mut param = Self::new(name, ParameterType::Array, description);
        param.items = Some(Box::new(items));
        param
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_auth(mut self, service: impl Into<String>, field: impl Into<String>) -> Self {
        self.auth_services.push(AuthBinding {
            name: service.into(),
            field: field.into(),
        });
        self
    }

    /// True when the value comes from verified claims rather than the caller.
    pub fn is_auth_bound(&self) -> bool {
        !self.auth_services.is_empty()
    }

    /// True when a caller must supply the value.
    pub fn is_required(&self) -> bool {
        self.required && self.default.is_none() && !self.is_auth_bound()
    }

    /// Structural checks that do not depend on other parameters.
    pub fn check(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("parameter name must not be empty".to_string());
        }
        match (&self.kind, &self.items) {
            (ParameterType::Array, None) => {
                return Err(format!("array parameter {:?} must declare items", self.name));
            }
            (ParameterType::Array, Some(items)) => items.check_item()?,
            (_, Some(_)) => {
                return Err(format!(
                    "parameter {:?} of type {} cannot declare items",
                    self.name, self.kind
                ));
            }
            (_, None) => {}
        }
        if let Some(default) = &self.default {
            self.coerce(default)
                .map_err(|err| format!("invalid default: {err}"))?;
        }
        Ok(())
    }

    fn check_item(&self) -> Result<(), String> {
        if self.is_auth_bound() {
            return Err("array items cannot be auth-bound".to_string());
        }
        match (&self.kind, &self.items) {
            (ParameterType::Array, None) => Err("nested array items must declare items".to_string()),
            (ParameterType::Array, Some(items)) => items.check_item(),
            _ => Ok(()),
        }
    }

    /// Coerce a JSON value to this parameter's type without lossy conversion.
    pub fn coerce(&self, value: &Value) -> Result<ParamValue, ParameterError> {
        self.coerce_named(&self.name, value)
    }

    fn coerce_named(&self, name: &str, value: &Value) -> Result<ParamValue, ParameterError> {
        let mismatch = || ParameterError::TypeMismatch {
            name: name.to_string(),
            expected: self.kind.to_string(),
            got: json_type_name(value).to_string(),
        };
        match self.kind {
            ParameterType::String => value
                .as_str()
                .map(|s| ParamValue::String(s.to_string()))
                .ok_or_else(mismatch),
            ParameterType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .map(ParamValue::Integer)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ParameterType::Float => match value {
                Value::Number(n) => exact_f64(n).map(ParamValue::Float).ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ParameterType::Boolean => value.as_bool().map(ParamValue::Boolean).ok_or_else(mismatch),
            ParameterType::Array => {
                let items = value.as_array().ok_or_else(mismatch)?;
                let schema = self.items.as_deref().ok_or_else(mismatch)?;
                let values = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| schema.coerce_named(&format!("{name}[{i}]"), item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ParamValue::Array {
                    item: schema.kind,
                    values,
                })
            }
        }
    }
}

/// `n` as `f64`, or `None` when an integral value has no exact `f64` form.
fn exact_f64(n: &serde_json::Number) -> Option<f64> {
    let f = n.as_f64()?;
    if let Some(i) = n.as_i64() {
        // i64::MAX rounds up to 2^63, which does not fit back into i64.
        return (f < 9_223_372_036_854_775_808.0 && f as i64 == i).then_some(f);
    }
    if let Some(u) = n.as_u64() {
        return (f < 18_446_744_073_709_551_616.0 && f as u64 == u).then_some(f);
    }
    Some(f)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A resolved, typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Absent optional value; keeps the declared type for typed NULL binds.
    Null(ParameterType),
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Array {
        item: ParameterType,
        values: Vec<ParamValue>,
    },
}

impl ParamValue {
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Null(_) => Value::Null,
            ParamValue::String(s) => Value::String(s.clone()),
            ParamValue::Integer(i) => Value::from(*i),
            ParamValue::Float(f) => Value::from(*f),
            ParamValue::Boolean(b) => Value::Bool(*b),
            ParamValue::Array { values, .. } => {
                Value::Array(values.iter().map(ParamValue::to_json).collect())
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null(_))
    }
}

impl Serialize for ParamValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Ordered `(name, value)` pairs for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamValues {
    entries: Vec<(String, ParamValue)>,
}

impl ParamValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: ParamValue) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name to JSON view, used for logging and template rendering.
    pub fn as_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect()
    }
}

/// Validate caller input against declared parameters.
///
/// Auth-bound parameters are resolved from `auth` only; a same-named key in
/// `input` is ignored.
pub fn parse_params(
    params: &[Parameter],
    input: &Map<String, Value>,
    auth: &VerifiedAuth,
) -> Result<ParamValues, ParameterError> {
    let mut values = ParamValues::new();
    for param in params {
        let value = if param.is_auth_bound() {
            if input.contains_key(&param.name) {
                tracing::debug!(
                    parameter = %param.name,
                    "ignoring caller-supplied value for auth-bound parameter"
                );
            }
            resolve_from_claims(param, auth)?
        } else {
            match input.get(&param.name) {
                Some(raw) if !raw.is_null() => param.coerce(raw)?,
                _ => match &param.default {
                    Some(default) => param.coerce(default)?,
                    None if param.required => {
                        return Err(ParameterError::MissingParameter {
                            name: param.name.clone(),
                        });
                    }
                    None => ParamValue::Null(param.kind),
                },
            }
        };
        values.push(param.name.clone(), value);
    }
    Ok(values)
}

fn resolve_from_claims(param: &Parameter, auth: &VerifiedAuth) -> Result<ParamValue, ParameterError> {
    for binding in &param.auth_services {
        let Some(claims) = auth.claims(&binding.name) else {
            continue;
        };
        let value = claims
            .get(&binding.field)
            .ok_or_else(|| ParameterError::MissingClaimField {
                name: param.name.clone(),
                service: binding.name.clone(),
                field: binding.field.clone(),
            })?;
        return param.coerce(value);
    }
    Err(ParameterError::AuthParameterUnresolved {
        name: param.name.clone(),
        services: param.auth_services.iter().map(|b| b.name.clone()).collect(),
    })
}
