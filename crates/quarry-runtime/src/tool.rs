//! Tools and the generic statement tool kinds.
//!
//! Two tool shapes cover every statement backend:
//!
//! - [`StatementTool`]: a configured statement with template and bound
//!   parameters (`postgres-sql`, `sqlite-sql`, ...).
//! - [`ExecuteSqlTool`]: runs caller-supplied SQL verbatim through a single
//!   `sql` parameter (`postgres-execute-sql`, ...).
//!
//! Both bind to any source exposing the [`Statements`] capability. Adapters
//! register them under their own kind names.

use crate::binder::{bind_source, Statements};
use crate::pipeline::{bind_invocation, execute_statement, InvocationContext, ToolOutput};
use crate::registry::ToolFactory;
use crate::source::{SourceMap, StatementSource};
use async_trait::async_trait;
use quarry_core::template::placeholder_names;
use quarry_core::{
    build_manifests, decode_entry, is_authorized, ConfigError, InvocationError, Manifest,
    Parameter, ParamValue, ParamValues, ProtocolManifest, VerifiedAuth,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// A built, immutable tool shared by concurrent invocations.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    fn manifest(&self) -> &Manifest;

    fn protocol_manifest(&self) -> &ProtocolManifest;

    /// Auth services that must all be verified before the tool may run.
    fn auth_required(&self) -> &[String];

    fn is_authorized(&self, verified: &VerifiedAuth) -> bool {
        is_authorized(self.auth_required(), verified)
    }

    /// Whether invocations must carry a caller credential.
    fn requires_client_credential(&self) -> bool {
        false
    }

    async fn invoke(
        &self,
        input: &Map<String, Value>,
        ctx: &InvocationContext,
    ) -> Result<ToolOutput, InvocationError>;
}

/// Configuration of a [`StatementTool`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementToolConfig {
    pub kind: String,
    pub source: String,
    #[serde(default)]
    pub description: String,
    pub statement: String,
    #[serde(default)]
    pub auth_required: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub template_parameters: Vec<Parameter>,
}

pub struct StatementTool {
    name: String,
    kind: String,
    statement: String,
    template_parameters: Vec<Parameter>,
    parameters: Vec<Parameter>,
    auth_required: Vec<String>,
    source: Arc<dyn StatementSource>,
    manifest: Manifest,
    protocol_manifest: ProtocolManifest,
}

impl StatementTool {
    pub fn new(
        name: &str,
        config: StatementToolConfig,
        sources: &SourceMap,
    ) -> Result<Self, ConfigError> {
        let source = bind_source::<Statements>(name, &config.source, sources)?;
        check_parameters(name, &config.template_parameters, &config.parameters)?;

        for placeholder in placeholder_names(&config.statement) {
            if !config
                .template_parameters
                .iter()
                .any(|p| p.name == placeholder)
            {
                return Err(ConfigError::invalid(
                    name,
                    format!("statement references undeclared template parameter {placeholder:?}"),
                ));
            }
        }

        let (manifest, protocol_manifest) = build_manifests(
            name,
            &config.description,
            &config.template_parameters,
            &config.parameters,
            &config.auth_required,
        );

        Ok(Self {
            name: name.to_string(),
            kind: config.kind,
            statement: config.statement,
            template_parameters: config.template_parameters,
            parameters: config.parameters,
            auth_required: config.auth_required,
            source,
            manifest,
            protocol_manifest,
        })
    }
}

#[async_trait]
impl Tool for StatementTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn protocol_manifest(&self) -> &ProtocolManifest {
        &self.protocol_manifest
    }

    fn auth_required(&self) -> &[String] {
        &self.auth_required
    }

    fn requires_client_credential(&self) -> bool {
        self.source.requires_client_credential()
    }

    async fn invoke(
        &self,
        input: &Map<String, Value>,
        ctx: &InvocationContext,
    ) -> Result<ToolOutput, InvocationError> {
        let (statement, values) = bind_invocation(
            &self.name,
            &self.statement,
            &self.template_parameters,
            &self.parameters,
            input,
            &ctx.auth,
        )?;
        tracing::debug!(params = ?values.as_map(), "parameters bound");
        execute_statement(&self.name, self.source.as_ref(), &statement, &values, ctx).await
    }
}

/// Configuration of an [`ExecuteSqlTool`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSqlToolConfig {
    pub kind: String,
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auth_required: Vec<String>,
}

pub struct ExecuteSqlTool {
    name: String,
    kind: String,
    parameters: Vec<Parameter>,
    auth_required: Vec<String>,
    source: Arc<dyn StatementSource>,
    manifest: Manifest,
    protocol_manifest: ProtocolManifest,
}

impl ExecuteSqlTool {
    pub fn new(
        name: &str,
        config: ExecuteSqlToolConfig,
        sources: &SourceMap,
    ) -> Result<Self, ConfigError> {
        let source = bind_source::<Statements>(name, &config.source, sources)?;
        let parameters = vec![Parameter::string("sql", "The SQL statement to execute.")];
        let (manifest, protocol_manifest) = build_manifests(
            name,
            &config.description,
            &[],
            &parameters,
            &config.auth_required,
        );
        Ok(Self {
            name: name.to_string(),
            kind: config.kind,
            parameters,
            auth_required: config.auth_required,
            source,
            manifest,
            protocol_manifest,
        })
    }
}

#[async_trait]
impl Tool for ExecuteSqlTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn protocol_manifest(&self) -> &ProtocolManifest {
        &self.protocol_manifest
    }

    fn auth_required(&self) -> &[String] {
        &self.auth_required
    }

    fn requires_client_credential(&self) -> bool {
        self.source.requires_client_credential()
    }

    async fn invoke(
        &self,
        input: &Map<String, Value>,
        ctx: &InvocationContext,
    ) -> Result<ToolOutput, InvocationError> {
        let values = quarry_core::parse_params(&self.parameters, input, &ctx.auth)
            .map_err(|err| InvocationError::parameter(&self.name, err))?;
        let Some(ParamValue::String(sql)) = values.get("sql") else {
            return Err(InvocationError::parameter(
                &self.name,
                quarry_core::ParameterError::MissingParameter { name: "sql".into() },
            ));
        };
        tracing::debug!(sql = %sql, "executing caller-supplied statement");
        execute_statement(&self.name, self.source.as_ref(), sql, &ParamValues::new(), ctx).await
    }
}

/// Structural checks shared by tool kinds: declarations are well-formed,
/// names are unique across both lists, template parameters are not auth-bound.
pub fn check_parameters(
    tool: &str,
    template_params: &[Parameter],
    params: &[Parameter],
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for param in template_params.iter().chain(params) {
        if !seen.insert(param.name.as_str()) {
            return Err(ConfigError::DuplicateParameter {
                tool: tool.to_string(),
                name: param.name.clone(),
            });
        }
        param
            .check()
            .map_err(|reason| ConfigError::invalid(tool, reason))?;
    }
    if let Some(param) = template_params.iter().find(|p| p.is_auth_bound()) {
        return Err(ConfigError::invalid(
            tool,
            format!("template parameter {:?} cannot use authServices", param.name),
        ));
    }
    // Absent template values cannot render; optional ones need a default.
    if let Some(param) = template_params
        .iter()
        .find(|p| !p.required && p.default.is_none())
    {
        return Err(ConfigError::invalid(
            tool,
            format!(
                "template parameter {:?} is optional but declares no default",
                param.name
            ),
        ));
    }
    Ok(())
}

/// Factory for [`StatementTool`] kinds.
pub struct StatementToolFactory;

impl ToolFactory for StatementToolFactory {
    fn build(
        &self,
        name: &str,
        entry: serde_yaml::Value,
        sources: &SourceMap,
    ) -> Result<Arc<dyn Tool>, ConfigError> {
        let config: StatementToolConfig = decode_entry(name, entry)?;
        Ok(Arc::new(StatementTool::new(name, config, sources)?))
    }
}

/// Factory for [`ExecuteSqlTool`] kinds.
pub struct ExecuteSqlToolFactory;

impl ToolFactory for ExecuteSqlToolFactory {
    fn build(
        &self,
        name: &str,
        entry: serde_yaml::Value,
        sources: &SourceMap,
    ) -> Result<Arc<dyn Tool>, ConfigError> {
        let config: ExecuteSqlToolConfig = decode_entry(name, entry)?;
        Ok(Arc::new(ExecuteSqlTool::new(name, config, sources)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{PreparedStatement, RowStream, Source, StatementConnection};
    use quarry_core::{BackendError, ClientCredential};

    struct NullDb {
        per_caller: bool,
    }

    #[async_trait]
    impl StatementSource for NullDb {
        fn requires_client_credential(&self) -> bool {
            self.per_caller
        }

        async fn connect(
            &self,
            _credential: Option<&ClientCredential>,
        ) -> Result<Arc<dyn StatementConnection>, BackendError> {
            Ok(Arc::new(NullConnection))
        }
    }

    struct NullConnection;

    #[async_trait]
    impl StatementConnection for NullConnection {
        async fn prepare(
            &self,
            _statement: &str,
            _bind_names: &[&str],
        ) -> Result<Box<dyn PreparedStatement>, BackendError> {
            Ok(Box::new(NullPrepared))
        }
    }

    struct NullPrepared;

    impl PreparedStatement for NullPrepared {
        fn columns(&self) -> &[String] {
            &[]
        }

        fn execute(&self, _values: &ParamValues) -> RowStream {
            Box::pin(futures::stream::empty())
        }
    }

    struct NullSource {
        per_caller: bool,
    }

    #[async_trait]
    impl Source for NullSource {
        fn name(&self) -> &str {
            "db"
        }

        fn kind(&self) -> &str {
            "null"
        }

        fn statements(&self) -> Option<Arc<dyn StatementSource>> {
            Some(Arc::new(NullDb {
                per_caller: self.per_caller,
            }))
        }
    }

    fn sources(per_caller: bool) -> SourceMap {
        let mut map = SourceMap::new();
        map.insert("db".into(), Arc::new(NullSource { per_caller }) as Arc<dyn Source>);
        map
    }

    fn config(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_statement_tool_from_yaml() {
        let entry = config(
            r#"
kind: null-sql
source: db
description: Read a row
statement: SELECT * FROM {{.tableName}} WHERE id = $id
authRequired: [corp]
templateParameters:
  - name: tableName
    type: string
    description: table
parameters:
  - name: id
    type: integer
    description: row id
"#,
        );
        let tool = StatementToolFactory.build("read", entry, &sources(false)).unwrap();

        assert_eq!(tool.name(), "read");
        assert_eq!(tool.kind(), "null-sql");
        assert_eq!(tool.auth_required(), ["corp".to_string()]);
        assert!(!tool.requires_client_credential());
        let names: Vec<_> = tool.manifest().parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["tableName", "id"]);
        assert!(!tool.is_authorized(&VerifiedAuth::new()));
    }

    #[test]
    fn test_duplicate_parameter_names_rejected() {
        let entry = config(
            r#"
kind: null-sql
source: db
statement: SELECT * FROM {{id}} WHERE id = $id
templateParameters:
  - {name: id, type: string, description: table}
parameters:
  - {name: id, type: integer, description: row id}
"#,
        );
        let err = StatementToolFactory.build("read", entry, &sources(false)).err().unwrap();
        assert!(matches!(err, ConfigError::DuplicateParameter { ref name, .. } if name == "id"));
    }

    #[test]
    fn test_undeclared_template_placeholder_rejected() {
        let entry = config("kind: null-sql\nsource: db\nstatement: SELECT * FROM {{tableName}}\n");
        let err = StatementToolFactory.build("read", entry, &sources(false)).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_unknown_source_rejected() {
        let entry = config("kind: null-sql\nsource: elsewhere\nstatement: SELECT 1\n");
        let err = StatementToolFactory.build("read", entry, &sources(false)).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownSource { .. }));
    }

    #[test]
    fn test_auth_bound_template_parameter_rejected() {
        let template = vec![Parameter::string("t", "").with_auth("corp", "table")];
        let err = check_parameters("read", &template, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_optional_template_parameter_needs_default() {
        let template = vec![Parameter::string("tableName", "table").optional()];
        let err = check_parameters("read", &template, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref reason, .. } if reason.contains("tableName")));

        let template = vec![Parameter::string("tableName", "table")
            .optional()
            .with_default(serde_json::json!("people"))];
        assert!(check_parameters("read", &template, &[]).is_ok());

        // Bound parameters may still be optional without a default.
        let params = vec![Parameter::string("label", "label").optional()];
        assert!(check_parameters("read", &[], &params).is_ok());
    }

    #[tokio::test]
    async fn test_execute_sql_tool() {
        let entry = config("kind: null-execute-sql\nsource: db\ndescription: Run SQL\n");
        let tool = ExecuteSqlToolFactory.build("exec", entry, &sources(true)).unwrap();
        assert!(tool.requires_client_credential());
        assert_eq!(
            tool.protocol_manifest().input_schema.required,
            vec!["sql".to_string()]
        );

        let input = serde_json::json!({"sql": "CREATE TABLE t (id INT)"});
        let out = tool
            .invoke(input.as_object().unwrap(), &InvocationContext::new())
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::NoContent);

        let err = tool
            .invoke(&Map::new(), &InvocationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Parameter { .. }));
    }
}
