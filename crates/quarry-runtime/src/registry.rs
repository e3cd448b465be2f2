//! Kind registries.
//!
//! A [`Registry`] maps kind strings to factories for sources and tools. It is
//! filled once during startup by each adapter's `register` function, then
//! shared read-only while configuration is built.

use crate::source::{Source, SourceMap};
use crate::tool::Tool;
use async_trait::async_trait;
use quarry_core::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a [`Source`] from its raw configuration entry.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn build(
        &self,
        name: &str,
        entry: serde_yaml::Value,
    ) -> Result<Arc<dyn Source>, ConfigError>;
}

/// Builds a [`Tool`] from its raw configuration entry and the built sources.
pub trait ToolFactory: Send + Sync {
    fn build(
        &self,
        name: &str,
        entry: serde_yaml::Value,
        sources: &SourceMap,
    ) -> Result<Arc<dyn Tool>, ConfigError>;
}

impl<F> ToolFactory for F
where
    F: Fn(&str, serde_yaml::Value, &SourceMap) -> Result<Arc<dyn Tool>, ConfigError> + Send + Sync,
{
    fn build(
        &self,
        name: &str,
        entry: serde_yaml::Value,
        sources: &SourceMap,
    ) -> Result<Arc<dyn Tool>, ConfigError> {
        self(name, entry, sources)
    }
}

/// Kind string to factory.
pub struct KindRegistry<F: ?Sized> {
    role: &'static str,
    factories: HashMap<String, Arc<F>>,
}

impl<F: ?Sized> KindRegistry<F> {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            factories: HashMap::new(),
        }
    }

    /// Register `factory` under `kind`. Returns false, leaving the existing
    /// entry untouched, if the kind is taken.
    pub fn register(&mut self, kind: impl Into<String>, factory: Arc<F>) -> bool {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            tracing::warn!(role = self.role, kind = %kind, "kind already registered");
            return false;
        }
        self.factories.insert(kind, factory);
        true
    }

    pub fn get(&self, kind: &str) -> Result<&Arc<F>, ConfigError> {
        self.factories
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownKind {
                role: self.role,
                kind: kind.to_string(),
            })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    fn duplicate(&self, kind: &str) -> ConfigError {
        ConfigError::DuplicateKindRegistration {
            role: self.role,
            kind: kind.to_string(),
        }
    }
}

/// Source and tool registries.
pub struct Registry {
    sources: KindRegistry<dyn SourceFactory>,
    tools: KindRegistry<dyn ToolFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sources: KindRegistry::new("source"),
            tools: KindRegistry::new("tool"),
        }
    }

    pub fn register_source(
        &mut self,
        kind: impl Into<String>,
        factory: impl SourceFactory + 'static,
    ) -> bool {
        self.sources.register(kind, Arc::new(factory))
    }

    pub fn register_tool(
        &mut self,
        kind: impl Into<String>,
        factory: impl ToolFactory + 'static,
    ) -> bool {
        self.tools.register(kind, Arc::new(factory))
    }

    /// Like [`Registry::register_source`], but a taken kind is an error.
    pub fn install_source(
        &mut self,
        kind: &str,
        factory: impl SourceFactory + 'static,
    ) -> Result<(), ConfigError> {
        if self.register_source(kind, factory) {
            Ok(())
        } else {
            Err(self.sources.duplicate(kind))
        }
    }

    /// Like [`Registry::register_tool`], but a taken kind is an error.
    pub fn install_tool(
        &mut self,
        kind: &str,
        factory: impl ToolFactory + 'static,
    ) -> Result<(), ConfigError> {
        if self.register_tool(kind, factory) {
            Ok(())
        } else {
            Err(self.tools.duplicate(kind))
        }
    }

    pub fn sources(&self) -> &KindRegistry<dyn SourceFactory> {
        &self.sources
    }

    pub fn tools(&self) -> &KindRegistry<dyn ToolFactory> {
        &self.tools
    }

    pub async fn build_source(
        &self,
        name: &str,
        kind: &str,
        entry: serde_yaml::Value,
    ) -> Result<Arc<dyn Source>, ConfigError> {
        self.sources.get(kind)?.build(name, entry).await
    }

    pub fn build_tool(
        &self,
        name: &str,
        kind: &str,
        entry: serde_yaml::Value,
        sources: &SourceMap,
    ) -> Result<Arc<dyn Tool>, ConfigError> {
        self.tools.get(kind)?.build(name, entry, sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedFactory(&'static str);

    #[async_trait]
    impl SourceFactory for NamedFactory {
        async fn build(
            &self,
            name: &str,
            _entry: serde_yaml::Value,
        ) -> Result<Arc<dyn Source>, ConfigError> {
            Err(ConfigError::invalid(name, self.0))
        }
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = KindRegistry::<dyn SourceFactory>::new("source");
        assert!(registry.register("pg", Arc::new(NamedFactory("first"))));
        assert!(!registry.register("pg", Arc::new(NamedFactory("second"))));
        assert_eq!(registry.kinds(), vec!["pg"]);
    }

    #[tokio::test]
    async fn test_first_factory_survives_duplicate() {
        let mut registry = Registry::new();
        assert!(registry.register_source("pg", NamedFactory("first")));
        let err = registry.install_source("pg", NamedFactory("second")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKindRegistration { role: "source", .. }));

        let err = registry
            .build_source("db", "pg", serde_yaml::Value::Null)
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "invalid configuration for \"db\": first");
    }

    #[tokio::test]
    async fn test_unknown_kind() {
        let registry = Registry::new();
        let err = registry
            .build_source("db", "mystery", serde_yaml::Value::Null)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownKind { ref kind, .. } if kind == "mystery"));

        let err = registry
            .build_tool("t", "mystery-sql", serde_yaml::Value::Null, &SourceMap::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownKind { role: "tool", .. }));
    }
}
