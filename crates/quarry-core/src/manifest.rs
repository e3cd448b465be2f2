//! Caller-facing descriptions of a tool.
//!
//! Two projections are built from the same declarations:
//!
//! - [`Manifest`]: the discovery form, listing every parameter (auth-bound
//!   ones carry their `authSources` so callers know not to send them).
//! - [`ProtocolManifest`]: a tool-calling protocol entry with a JSON Schema
//!   `inputSchema`. Auth-bound parameters are left out because the caller
//!   cannot set them.
//!
//! Template parameters always come first, then bound parameters.

use crate::params::Parameter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discovery manifest for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterManifest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub description: String,
    #[serde(rename = "authSources", default)]
    pub auth_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterManifest>>,
}

impl ParameterManifest {
    fn from_parameter(param: &Parameter, required: bool) -> Self {
        Self {
            name: param.name.clone(),
            kind: param.kind.as_str().to_string(),
            required,
            description: param.description.clone(),
            auth_sources: param.auth_services.iter().map(|b| b.name.clone()).collect(),
            items: param
                .items
                .as_deref()
                .map(|items| Box::new(Self::from_parameter(items, true))),
        }
    }
}

/// Discovery manifest for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub description: String,
    pub parameters: Vec<ParameterManifest>,
    #[serde(rename = "authRequired")]
    pub auth_required: Vec<String>,
}

/// JSON Schema for one caller-supplied parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
}

impl ParameterSchema {
    fn from_parameter(param: &Parameter) -> Self {
        Self {
            kind: param.kind.json_schema_type().to_string(),
            description: param.description.clone(),
            default: param.default.clone(),
            items: param
                .items
                .as_deref()
                .map(|items| Box::new(Self::from_parameter(items))),
        }
    }
}

/// `inputSchema` of a [`ProtocolManifest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: BTreeMap<String, ParameterSchema>,
    pub required: Vec<String>,
}

/// Tool entry for structured tool-calling clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolManifest {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: InputSchema,
}

/// Build both manifests for a tool. Pure and deterministic.
pub fn build_manifests(
    name: &str,
    description: &str,
    template_params: &[Parameter],
    params: &[Parameter],
    auth_required: &[String],
) -> (Manifest, ProtocolManifest) {
    // A template parameter is only optional when a default can fill it in.
    let all = || {
        template_params
            .iter()
            .map(|p| (p, p.default.is_none()))
            .chain(params.iter().map(|p| (p, p.required && p.default.is_none())))
    };

    let manifest = Manifest {
        description: description.to_string(),
        parameters: all()
            .map(|(p, required)| ParameterManifest::from_parameter(p, required))
            .collect(),
        auth_required: auth_required.to_vec(),
    };

    let callable = || all().filter(|(p, _)| !p.is_auth_bound());
    let protocol = ProtocolManifest {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: InputSchema {
            kind: "object".to_string(),
            properties: callable()
                .map(|(p, _)| (p.name.clone(), ParameterSchema::from_parameter(p)))
                .collect(),
            required: callable()
                .filter(|(_, required)| *required)
                .map(|(p, _)| p.name.clone())
                .collect(),
        },
    };

    (manifest, protocol)
}
