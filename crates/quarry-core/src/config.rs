//! Toolbox configuration file.
//!
//! A single YAML document declares sources, tools and optional toolsets, each
//! keyed by name:
//!
//! ```yaml
//! sources:
//!   my-pg:
//!     kind: postgres
//!     host: 127.0.0.1
//!     password: ${PG_PASSWORD}
//! tools:
//!   search-users:
//!     kind: postgres-sql
//!     source: my-pg
//!     description: Find users by id.
//!     statement: SELECT * FROM users WHERE id = $id
//!     parameters:
//!       - name: id
//!         type: integer
//!         description: user id
//! toolsets:
//!   users: [search-users]
//! ```
//!
//! Entries stay as raw YAML here; each kind's factory decodes its own fields.
//! `${VAR}` references are replaced from the environment before parsing.

use crate::error::ConfigError;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Parsed toolbox configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolboxConfig {
    /// Source entries keyed by source name.
    #[serde(default)]
    pub sources: BTreeMap<String, serde_yaml::Value>,

    /// Tool entries keyed by tool name.
    #[serde(default)]
    pub tools: BTreeMap<String, serde_yaml::Value>,

    /// Named lists of tool names.
    #[serde(default)]
    pub toolsets: BTreeMap<String, Vec<String>>,
}

impl ToolboxConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content, expanding `${VAR}` from the environment.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(content, |name| std::env::var(name).ok())?;
        serde_yaml::from_str(&expanded).map_err(ConfigError::from)
    }

    /// The `kind` field of a raw entry.
    pub fn kind_of(name: &str, entry: &serde_yaml::Value) -> Result<String, ConfigError> {
        entry
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::invalid(name, "missing `kind`"))
    }
}

/// Decode a raw entry into a kind-specific config struct.
pub fn decode_entry<T: DeserializeOwned>(
    name: &str,
    entry: serde_yaml::Value,
) -> Result<T, ConfigError> {
    serde_yaml::from_value(entry).map_err(|source| ConfigError::Decode {
        name: name.to_string(),
        source,
    })
}

/// Replace every `${VAR}` using `lookup`. Unknown variables are an error.
pub fn expand_env(
    content: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for caps in ENV_REF.captures_iter(content) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let name = &caps[1];
        let value = lookup(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;
        out.push_str(&content[last..whole.start]);
        out.push_str(&value);
        last = whole.end;
    }
    out.push_str(&content[last..]);
    Ok(out)
}
