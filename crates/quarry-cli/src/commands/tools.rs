//! Tools introspection commands.
//!
//! `quarry tools list` - List the tools of a toolset (default: all tools).
//! `quarry tools describe` - Print the manifest of one tool.

use anyhow::{Context, Result};
use std::path::Path;

pub async fn list(config_path: &Path, toolset: Option<&str>) -> Result<()> {
    let toolbox = super::load_toolbox(config_path).await?;
    let tools = toolbox
        .toolset(toolset)
        .with_context(|| format!("Unknown toolset {:?}", toolset.unwrap_or_default()))?;

    println!("Available tools ({}):", tools.len());
    for tool in tools {
        let mut badges = vec![tool.kind().to_string()];
        if !tool.auth_required().is_empty() {
            badges.push(format!("auth: {}", tool.auth_required().join(", ")));
        }
        if tool.requires_client_credential() {
            badges.push("client credential".to_string());
        }
        println!("  • {} ({})", tool.name(), badges.join("; "));
        let description = &tool.manifest().description;
        if !description.is_empty() {
            println!("    {}", description);
        }
    }

    toolbox.shutdown().await;
    Ok(())
}

pub async fn describe(config_path: &Path, name: &str, protocol: bool) -> Result<()> {
    let toolbox = super::load_toolbox(config_path).await?;
    println!("{}", render_manifest(&toolbox, name, protocol)?);
    toolbox.shutdown().await;
    Ok(())
}

fn render_manifest(toolbox: &quarry_runtime::Toolbox, name: &str, protocol: bool) -> Result<String> {
    let tool = toolbox
        .tool(name)
        .with_context(|| format!("Tool {:?} not found", name))?;
    let rendered = if protocol {
        serde_json::to_string_pretty(tool.protocol_manifest())?
    } else {
        serde_json::to_string_pretty(tool.manifest())?
    };
    Ok(rendered)
}
