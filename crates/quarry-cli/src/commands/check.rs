//! `quarry check`: build every source and tool and report what was built.

use anyhow::Result;
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    let toolbox = super::load_toolbox(config_path).await?;

    let sources: Vec<_> = toolbox.source_names().collect();
    let tools: Vec<_> = toolbox.tools().collect();
    let toolsets: Vec<_> = toolbox.toolset_names().collect();

    println!("Configuration OK: {:?}", config_path);
    println!("  sources  ({}): {}", sources.len(), sorted(sources).join(", "));
    println!("  tools    ({}):", tools.len());
    for tool in &tools {
        println!("    {} [{}]", tool.name(), tool.kind());
    }
    println!("  toolsets ({}): {}", toolsets.len(), toolsets.join(", "));

    toolbox.shutdown().await;
    Ok(())
}

fn sorted(mut names: Vec<&str>) -> Vec<&str> {
    names.sort_unstable();
    names
}
