//! CLI command implementations.

pub mod check;
pub mod invoke;
pub mod tools;

use anyhow::{Context, Result};
use quarry_core::ToolboxConfig;
use quarry_runtime::{Registry, Toolbox};
use std::path::Path;

/// Registry with every backend this binary ships.
pub fn registry() -> Result<Registry> {
    let mut registry = Registry::new();
    quarry_adapter_pg::register(&mut registry).context("Failed to register postgres kinds")?;
    quarry_adapter_sqlite::register(&mut registry).context("Failed to register sqlite kinds")?;
    Ok(registry)
}

/// Load the configuration at `path` and build every source and tool.
pub async fn load_toolbox(path: &Path) -> Result<Toolbox> {
    let config = ToolboxConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    Toolbox::build(&registry()?, config)
        .await
        .with_context(|| format!("Invalid configuration in {:?}", path))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;
    use tempfile::NamedTempFile;

    pub const CONFIG: &str = r#"
sources:
  lite:
    kind: sqlite
tools:
  run-sql:
    kind: sqlite-execute-sql
    source: lite
    description: Run arbitrary SQL.
  echo:
    kind: sqlite-sql
    source: lite
    description: Echo a number back.
    statement: SELECT $n AS n
    parameters:
      - name: n
        type: integer
        description: number to echo
  whoami:
    kind: sqlite-sql
    source: lite
    description: Caller email.
    statement: SELECT $email AS email
    authRequired: [svcA]
    parameters:
      - name: email
        type: string
        description: caller email
        authServices:
          - name: svcA
            field: email
toolsets:
  basic: [echo]
"#;

    pub fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }
}
