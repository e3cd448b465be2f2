//! The built set of sources, tools and toolsets.

use crate::pipeline::{InvocationContext, ToolOutput};
use crate::registry::Registry;
use crate::source::SourceMap;
use crate::tool::Tool;
use quarry_core::{ConfigError, InvocationError, Manifest, ProtocolManifest, ToolboxConfig};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Discovery response for a toolset.
#[derive(Debug, Clone, Serialize)]
pub struct ToolsetManifest {
    #[serde(rename = "serverVersion")]
    pub server_version: String,
    pub tools: BTreeMap<String, Manifest>,
}

pub struct Toolbox {
    sources: SourceMap,
    tools: BTreeMap<String, Arc<dyn Tool>>,
    toolsets: BTreeMap<String, Vec<String>>,
}

impl Toolbox {
    /// Build every source, then every tool, then validate toolsets.
    ///
    /// On failure, sources built so far are closed before returning.
    pub async fn build(registry: &Registry, config: ToolboxConfig) -> Result<Self, ConfigError> {
        let mut sources = SourceMap::new();
        let result = Self::build_into(registry, config, &mut sources).await;
        match result {
            Ok((tools, toolsets)) => Ok(Self {
                sources,
                tools,
                toolsets,
            }),
            Err(err) => {
                for source in sources.values() {
                    source.close().await;
                }
                Err(err)
            }
        }
    }

    async fn build_into(
        registry: &Registry,
        config: ToolboxConfig,
        sources: &mut SourceMap,
    ) -> Result<(BTreeMap<String, Arc<dyn Tool>>, BTreeMap<String, Vec<String>>), ConfigError> {
        for (name, entry) in config.sources {
            let kind = ToolboxConfig::kind_of(&name, &entry)?;
            let source = registry.build_source(&name, &kind, entry).await?;
            tracing::info!(source = %name, kind = %kind, "initialized source");
            sources.insert(name, source);
        }

        let mut tools = BTreeMap::new();
        for (name, entry) in config.tools {
            let kind = ToolboxConfig::kind_of(&name, &entry)?;
            let tool = registry.build_tool(&name, &kind, entry, sources)?;
            tracing::info!(tool = %name, kind = %kind, "initialized tool");
            tools.insert(name, tool);
        }

        for (toolset, members) in &config.toolsets {
            if let Some(missing) = members.iter().find(|t| !tools.contains_key(*t)) {
                return Err(ConfigError::UnknownTool {
                    toolset: toolset.clone(),
                    tool: missing.clone(),
                });
            }
        }

        Ok((tools, config.toolsets))
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn toolset_names(&self) -> impl Iterator<Item = &str> {
        self.toolsets.keys().map(String::as_str)
    }

    /// Tools of `toolset`, or every tool when `None`. `None` if the toolset is unknown.
    pub fn toolset(&self, toolset: Option<&str>) -> Option<Vec<&Arc<dyn Tool>>> {
        match toolset {
            None => Some(self.tools.values().collect()),
            Some(name) => self
                .toolsets
                .get(name)
                .map(|members| members.iter().filter_map(|t| self.tools.get(t)).collect()),
        }
    }

    pub fn toolset_manifest(&self, toolset: Option<&str>) -> Option<ToolsetManifest> {
        let tools = self.toolset(toolset)?;
        Some(ToolsetManifest {
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            tools: tools
                .into_iter()
                .map(|t| (t.name().to_string(), t.manifest().clone()))
                .collect(),
        })
    }

    pub fn protocol_manifests(&self, toolset: Option<&str>) -> Option<Vec<ProtocolManifest>> {
        let tools = self.toolset(toolset)?;
        Some(tools.into_iter().map(|t| t.protocol_manifest().clone()).collect())
    }

    /// Run one invocation of `tool`.
    ///
    /// Tool-level authorization and the client credential requirement are
    /// checked before the tool sees the input.
    pub async fn invoke(
        &self,
        tool: &str,
        input: &Map<String, Value>,
        ctx: &InvocationContext,
    ) -> Result<ToolOutput, InvocationError> {
        let span = tracing::info_span!("invoke", tool = %tool, invocation_id = %ctx.id);
        async move {
            let tool = self
                .tools
                .get(tool)
                .ok_or_else(|| InvocationError::ToolNotFound(tool.to_string()))?;

            if !tool.is_authorized(&ctx.auth) {
                tracing::warn!("tool invocation not authorized");
                return Err(InvocationError::ToolNotAuthorized {
                    tool: tool.name().to_string(),
                    required: tool.auth_required().to_vec(),
                });
            }
            if tool.requires_client_credential() && ctx.credential.is_none() {
                return Err(InvocationError::ClientCredentialRequired {
                    tool: tool.name().to_string(),
                });
            }

            let started = Instant::now();
            let result = tool.invoke(input, ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(output) => {
                    tracing::info!(rows = output.row_count(), elapsed_ms, "invocation completed")
                }
                Err(err) => tracing::warn!(
                    error = %err,
                    class = ?err.class(),
                    elapsed_ms,
                    "invocation failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Close every source. Tools must not be invoked afterwards.
    pub async fn shutdown(&self) {
        for (name, source) in &self.sources {
            tracing::debug!(source = %name, "closing source");
            source.close().await;
        }
    }
}
