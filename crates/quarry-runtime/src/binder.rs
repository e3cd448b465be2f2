//! Binding tools to the capabilities of their sources.
//!
//! A tool kind names the [`Capability`] it needs. Any source that exposes
//! that capability is compatible, whatever its kind.

use crate::source::{Source, SourceMap, StatementSource};
use quarry_core::ConfigError;
use std::sync::Arc;

/// A narrow interface a source may expose.
pub trait Capability {
    /// Name used in error messages.
    const NAME: &'static str;

    type Handle: ?Sized + Send + Sync;

    fn lookup(source: &dyn Source) -> Option<Arc<Self::Handle>>;
}

/// Prepare and execute statements.
pub struct Statements;

impl Capability for Statements {
    const NAME: &'static str = "statements";

    type Handle = dyn StatementSource;

    fn lookup(source: &dyn Source) -> Option<Arc<dyn StatementSource>> {
        source.statements()
    }
}

/// Resolve `source_name` for `tool` and fetch capability `C` from it.
pub fn bind_source<C: Capability>(
    tool: &str,
    source_name: &str,
    sources: &SourceMap,
) -> Result<Arc<C::Handle>, ConfigError> {
    let source = sources
        .get(source_name)
        .ok_or_else(|| ConfigError::UnknownSource {
            tool: tool.to_string(),
            source_name: source_name.to_string(),
        })?;

    C::lookup(source.as_ref()).ok_or_else(|| ConfigError::IncompatibleSource {
        tool: tool.to_string(),
        source_name: source_name.to_string(),
        capability: C::NAME,
    })
}
