//! Toolbox tests against an in-memory statement source.

use async_trait::async_trait;
use futures::stream;
use pretty_assertions::assert_eq;
use quarry_core::{
    BackendError, ClientCredential, ConfigError, ErrorClass, InvocationError, ParamValue,
    ParamValues, ParameterError, ToolboxConfig, VerifiedAuth,
};
use quarry_runtime::{
    ExecuteSqlToolFactory, InvocationContext, PreparedStatement, Registry, Row, RowStream, Source,
    SourceFactory, StatementConnection, StatementSource, StatementToolFactory, ToolOutput, Toolbox,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Table `people(id, email)`; understands `... WHERE id = $id` and `... WHERE email = $email`.
struct MemorySource {
    name: String,
    per_caller: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryConfig {
    #[serde(default)]
    use_client_credentials: bool,
}

struct MemoryFactory;

#[async_trait]
impl SourceFactory for MemoryFactory {
    async fn build(
        &self,
        name: &str,
        entry: serde_yaml::Value,
    ) -> Result<Arc<dyn Source>, ConfigError> {
        let config: MemoryConfig = quarry_core::decode_entry(name, entry)?;
        Ok(Arc::new(MemorySource {
            name: name.to_string(),
            per_caller: config.use_client_credentials,
        }))
    }
}

#[async_trait]
impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "memory"
    }

    fn statements(&self) -> Option<Arc<dyn StatementSource>> {
        Some(Arc::new(MemoryStatements {
            per_caller: self.per_caller,
        }))
    }
}

struct MemoryStatements {
    per_caller: bool,
}

#[async_trait]
impl StatementSource for MemoryStatements {
    fn requires_client_credential(&self) -> bool {
        self.per_caller
    }

    async fn connect(
        &self,
        credential: Option<&ClientCredential>,
    ) -> Result<Arc<dyn StatementConnection>, BackendError> {
        if self.per_caller && credential.is_none() {
            return Err(BackendError::MissingCredential);
        }
        Ok(Arc::new(MemoryConnection))
    }
}

struct MemoryConnection;

#[async_trait]
impl StatementConnection for MemoryConnection {
    async fn prepare(
        &self,
        statement: &str,
        _bind_names: &[&str],
    ) -> Result<Box<dyn PreparedStatement>, BackendError> {
        if !statement.contains("people") {
            return Err(BackendError::prepare(std::io::Error::other(format!(
                "no such table in: {statement}"
            ))));
        }
        Ok(Box::new(MemoryPrepared {
            columns: vec!["id".into(), "email".into()],
        }))
    }
}

struct MemoryPrepared {
    columns: Vec<String>,
}

impl PreparedStatement for MemoryPrepared {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn execute(&self, values: &ParamValues) -> RowStream {
        let people = [(1, "ada@example.com"), (2, "grace@example.com"), (3, "linus@example.com")];
        let rows: Vec<Result<Row, BackendError>> = people
            .into_iter()
            .filter(|(id, email)| match (values.get("id"), values.get("email")) {
                (Some(ParamValue::Integer(want)), _) => want == id,
                (_, Some(ParamValue::String(want))) => want == email,
                _ => true,
            })
            .map(|(id, email)| Ok([("id", json!(id)), ("email", json!(email))].into_iter().collect()))
            .collect();
        Box::pin(stream::iter(rows))
    }
}

const CONFIG: &str = r#"
sources:
  mem:
    kind: memory
  mem-per-caller:
    kind: memory
    useClientCredentials: true
tools:
  get-person:
    kind: memory-sql
    source: mem
    description: Fetch a person by id.
    statement: SELECT * FROM people WHERE id = $id
    parameters:
      - name: id
        type: integer
        description: person id
  get-person-from-table:
    kind: memory-sql
    source: mem
    description: Fetch a person by id from a chosen table.
    statement: SELECT * FROM {{tableName}} WHERE id = $id
    templateParameters:
      - name: tableName
        type: string
        description: table to read
    parameters:
      - name: id
        type: integer
        description: person id
  whoami:
    kind: memory-sql
    source: mem
    description: The caller's own record.
    statement: SELECT * FROM people WHERE email = $email
    authRequired: [svcA]
    parameters:
      - name: email
        type: string
        description: caller email
        authServices:
          - name: svcA
            field: email
  run-sql:
    kind: memory-execute-sql
    source: mem-per-caller
    description: Run a statement as the caller.
toolsets:
  people: [get-person, whoami]
"#;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.install_source("memory", MemoryFactory).unwrap();
    registry.install_tool("memory-sql", StatementToolFactory).unwrap();
    registry.install_tool("memory-execute-sql", ExecuteSqlToolFactory).unwrap();
    registry
}

async fn toolbox() -> Toolbox {
    let config = ToolboxConfig::from_yaml(CONFIG).unwrap();
    Toolbox::build(&registry(), config).await.unwrap()
}

fn input(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn claims(value: Value) -> quarry_core::Claims {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_lookup_by_id() {
    let toolbox = toolbox().await;
    let ctx = InvocationContext::new();

    let out = toolbox
        .invoke("get-person", &input(json!({"id": 3})), &ctx)
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&out).unwrap(),
        json!([{"id": 3, "email": "linus@example.com"}])
    );

    let err = toolbox
        .invoke("get-person", &input(json!({})), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InvocationError::Parameter {
            source: ParameterError::MissingParameter { .. },
            ..
        }
    ));
    assert_eq!(err.class(), ErrorClass::InvalidInput);

    let out = toolbox
        .invoke("get-person", &input(json!({"id": 999})), &ctx)
        .await
        .unwrap();
    assert_eq!(out, ToolOutput::NoRows);
}

#[tokio::test]
async fn test_template_parameter_substitution() {
    let toolbox = toolbox().await;
    let ctx = InvocationContext::new();

    let out = toolbox
        .invoke(
            "get-person-from-table",
            &input(json!({"tableName": "people", "id": 1})),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(out.row_count(), 1);

    let err = toolbox
        .invoke("get-person-from-table", &input(json!({"id": 1})), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InvocationError::Parameter {
            source: ParameterError::MissingTemplateParameter { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_auth_required_tool() {
    let toolbox = toolbox().await;

    let err = toolbox
        .invoke("whoami", &Map::new(), &InvocationContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::ToolNotAuthorized { .. }));
    assert_eq!(err.class(), ErrorClass::Unauthorized);

    let auth = VerifiedAuth::new().with_service("svcA", claims(json!({"email": "grace@example.com"})));
    let ctx = InvocationContext::new().with_auth(auth);
    let out = toolbox
        .invoke("whoami", &input(json!({"email": "ada@example.com"})), &ctx)
        .await
        .unwrap();
    assert_eq!(out.rows()[0].get("id"), Some(&json!(2)));
}

#[tokio::test]
async fn test_authorized_tool_can_still_fail_parameter_auth() {
    let toolbox = toolbox().await;
    let auth = VerifiedAuth::new().with_service("svcA", claims(json!({"sub": "42"})));
    let err = toolbox
        .invoke("whoami", &Map::new(), &InvocationContext::new().with_auth(auth))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InvocationError::Parameter {
            source: ParameterError::MissingClaimField { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_client_credential_required() {
    let toolbox = toolbox().await;
    let sql = input(json!({"sql": "DELETE FROM people"}));

    let err = toolbox
        .invoke("run-sql", &sql, &InvocationContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::ClientCredentialRequired { .. }));

    let ctx = InvocationContext::new().with_credential(ClientCredential::new("token"));
    let out = toolbox.invoke("run-sql", &sql, &ctx).await.unwrap();
    assert_eq!(out.row_count(), 3);
}

#[tokio::test]
async fn test_unknown_tool() {
    let toolbox = toolbox().await;
    let err = toolbox
        .invoke("nope", &Map::new(), &InvocationContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::ToolNotFound(ref name) if name == "nope"));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_toolsets_and_manifests() {
    let toolbox = toolbox().await;

    let manifest = toolbox.toolset_manifest(Some("people")).unwrap();
    let names: Vec<_> = manifest.tools.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["get-person", "whoami"]);
    assert_eq!(manifest.tools["whoami"].auth_required, vec!["svcA".to_string()]);

    let all = toolbox.protocol_manifests(None).unwrap();
    assert_eq!(all.len(), 4);
    let whoami = all.iter().find(|m| m.name == "whoami").unwrap();
    assert!(whoami.input_schema.properties.is_empty());

    assert!(toolbox.toolset_manifest(Some("missing")).is_none());
}

#[tokio::test]
async fn test_build_errors() {
    let config = ToolboxConfig::from_yaml(
        "sources:\n  mem:\n    kind: memory\ntools:\n  t:\n    kind: memory-sql\n    source: other\n    statement: SELECT 1\n",
    )
    .unwrap();
    let err = Toolbox::build(&registry(), config).await.err().unwrap();
    assert!(matches!(err, ConfigError::UnknownSource { .. }));

    let config = ToolboxConfig::from_yaml("sources:\n  mem:\n    kind: warehouse\n").unwrap();
    let err = Toolbox::build(&registry(), config).await.err().unwrap();
    assert!(matches!(err, ConfigError::UnknownKind { role: "source", .. }));

    let config = ToolboxConfig::from_yaml(
        "sources:\n  mem:\n    kind: memory\ntoolsets:\n  s: [ghost]\n",
    )
    .unwrap();
    let err = Toolbox::build(&registry(), config).await.err().unwrap();
    assert!(matches!(err, ConfigError::UnknownTool { .. }));
}
