//! Sources and the capabilities they expose.
//!
//! A [`Source`] is a configured backend connection. Tools never depend on a
//! source's concrete kind; they ask for a capability (see [`crate::binder`]).
//! The only capability today is [`StatementSource`]: hand out a connection
//! that can prepare a statement and stream its rows.

use async_trait::async_trait;
use futures::stream::BoxStream;
use quarry_core::{BackendError, ClientCredential, ParamValues};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Built sources keyed by name.
pub type SourceMap = HashMap<String, Arc<dyn Source>>;

/// A configured backend.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Configured name.
    fn name(&self) -> &str;

    /// Kind the source was built from.
    fn kind(&self) -> &str;

    /// Statement execution capability, if this source has one.
    fn statements(&self) -> Option<Arc<dyn StatementSource>> {
        None
    }

    /// Release backend resources. Called once at shutdown.
    async fn close(&self) {}
}

/// Capability: connections that prepare and execute statements.
#[async_trait]
pub trait StatementSource: Send + Sync {
    /// Whether every call must carry a caller credential.
    fn requires_client_credential(&self) -> bool {
        false
    }

    /// Connection for one invocation. Shared sources ignore `credential`.
    async fn connect(
        &self,
        credential: Option<&ClientCredential>,
    ) -> Result<Arc<dyn StatementConnection>, BackendError>;
}

#[async_trait]
pub trait StatementConnection: Send + Sync {
    /// Prepare `statement`, where each `$name` in `bind_names` is a bound parameter.
    async fn prepare(
        &self,
        statement: &str,
        bind_names: &[&str],
    ) -> Result<Box<dyn PreparedStatement>, BackendError>;
}

pub trait PreparedStatement: Send + Sync {
    /// Result column names in backend order. Empty for statements that return no rows.
    fn columns(&self) -> &[String];

    /// Execute with `values`. Dropping the stream releases the backend cursor.
    fn execute(&self, values: &ParamValues) -> RowStream;
}

/// Rows produced by one execution.
pub type RowStream = BoxStream<'static, Result<Row, BackendError>>;

/// One result row: column name to JSON value, in backend column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Append a column. A name already present gets the first free `_2`, `_3`,
    /// ... suffix so every key stays addressable.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        let mut name = name.into();
        if self.get(&name).is_some() {
            name = (2..)
                .map(|n| format!("{name}_{n}"))
                .find(|candidate| self.get(candidate).is_none())
                .unwrap_or(name);
        }
        self.columns.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (N, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.push(name, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
