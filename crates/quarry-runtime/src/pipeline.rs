//! Per-invocation execution pipeline.
//!
//! ```text
//! input + claims
//!   │ 1. resolve template parameters  → statement text
//!   │ 2. validate / bind parameters   → ParamValues
//!   │ 3. connect + prepare            → PreparedStatement
//!   │ 4. execute                      → RowStream
//!   │ 5. collect rows                 → ToolOutput
//!   ▼
//! ```
//!
//! Stages run strictly in order. A template failure never reaches binding,
//! a binding failure never reaches the backend. Every await on the backend
//! races the invocation's cancellation token; dropping the row stream on any
//! exit releases the backend cursor.

use crate::source::{Row, StatementSource};
use futures::StreamExt;
use quarry_core::{
    parse_params, resolve_template_params, ClientCredential, InvocationError, ParamValues,
    Parameter, VerifiedAuth,
};
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Status returned when a row-returning statement matched nothing.
pub const NO_ROWS_MESSAGE: &str = "The query returned 0 rows.";

/// Status returned for statements without a result set.
pub const NO_CONTENT_MESSAGE: &str = "Query executed successfully and returned no content.";

/// Everything about the caller that an invocation needs besides its input.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Correlates log lines of one invocation.
    pub id: Uuid,
    pub auth: VerifiedAuth,
    pub credential: Option<ClientCredential>,
    pub cancel: CancellationToken,
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            auth: VerifiedAuth::new(),
            credential: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_auth(mut self, auth: VerifiedAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_credential(mut self, credential: ClientCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Successful result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// At least one row.
    Rows(Vec<Row>),
    /// A row-returning statement matched nothing.
    NoRows,
    /// The statement has no result set (DDL, plain DML).
    NoContent,
}

impl ToolOutput {
    pub fn rows(&self) -> &[Row] {
        match self {
            ToolOutput::Rows(rows) => rows,
            _ => &[],
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows().len()
    }

    /// Status text for results without rows.
    pub fn status(&self) -> Option<&'static str> {
        match self {
            ToolOutput::Rows(_) => None,
            ToolOutput::NoRows => Some(NO_ROWS_MESSAGE),
            ToolOutput::NoContent => Some(NO_CONTENT_MESSAGE),
        }
    }
}

impl Serialize for ToolOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolOutput::Rows(rows) => rows.serialize(serializer),
            other => serializer.serialize_str(other.status().unwrap_or_default()),
        }
    }
}

/// Stages 1 and 2: final statement text and bound values.
pub fn bind_invocation(
    tool: &str,
    statement: &str,
    template_params: &[Parameter],
    params: &[Parameter],
    input: &Map<String, Value>,
    auth: &VerifiedAuth,
) -> Result<(String, ParamValues), InvocationError> {
    let statement = resolve_template_params(template_params, statement, input)
        .map_err(|err| InvocationError::parameter(tool, err))?;
    let values = parse_params(params, input, auth).map_err(|err| InvocationError::parameter(tool, err))?;
    Ok((statement, values))
}

/// Stages 3 to 5 against a statement source.
pub async fn execute_statement(
    tool: &str,
    source: &dyn StatementSource,
    statement: &str,
    values: &ParamValues,
    ctx: &InvocationContext,
) -> Result<ToolOutput, InvocationError> {
    let cancel = &ctx.cancel;

    let connection = cancellable(tool, cancel, source.connect(ctx.credential.as_ref()))
        .await?
        .map_err(|err| InvocationError::backend(tool, err))?;

    let bind_names: Vec<&str> = values.names().collect();
    let prepared = cancellable(tool, cancel, connection.prepare(statement, &bind_names))
        .await?
        .map_err(|err| InvocationError::backend(tool, err))?;
    tracing::debug!(columns = prepared.columns().len(), "statement prepared");

    let mut stream = prepared.execute(values);
    let mut rows = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InvocationError::cancelled(tool)),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(row)) => rows.push(row),
            Some(Err(err)) => return Err(InvocationError::backend(tool, err)),
            None => break,
        }
    }

    Ok(if !rows.is_empty() {
        ToolOutput::Rows(rows)
    } else if prepared.columns().is_empty() {
        ToolOutput::NoContent
    } else {
        ToolOutput::NoRows
    })
}

async fn cancellable<T>(
    tool: &str,
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, InvocationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(InvocationError::cancelled(tool)),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{PreparedStatement, RowStream, StatementConnection};
    use async_trait::async_trait;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use quarry_core::{BackendError, ParameterError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory table `t(id, name)` answering `... WHERE id = $id`.
    #[derive(Default)]
    struct FakeDb {
        prepared: AtomicUsize,
        last_statement: Mutex<Option<String>>,
        stall_rows: bool,
    }

    struct FakeConnection(Arc<FakeDb>);

    struct FakePrepared {
        columns: Vec<String>,
        stall: bool,
    }

    #[async_trait]
    impl StatementSource for Arc<FakeDb> {
        async fn connect(
            &self,
            _credential: Option<&ClientCredential>,
        ) -> Result<Arc<dyn StatementConnection>, BackendError> {
            Ok(Arc::new(FakeConnection(self.clone())))
        }
    }

    #[async_trait]
    impl StatementConnection for FakeConnection {
        async fn prepare(
            &self,
            statement: &str,
            _bind_names: &[&str],
        ) -> Result<Box<dyn PreparedStatement>, BackendError> {
            self.0.prepared.fetch_add(1, Ordering::SeqCst);
            *self.0.last_statement.lock().unwrap() = Some(statement.to_string());
            if statement.starts_with("SELEC ") {
                return Err(BackendError::prepare(std::io::Error::other(
                    "syntax error at or near \"SELEC\"",
                )));
            }
            let columns = if statement.starts_with("SELECT") {
                vec!["id".to_string(), "name".to_string()]
            } else {
                Vec::new()
            };
            Ok(Box::new(FakePrepared {
                columns,
                stall: self.0.stall_rows,
            }))
        }
    }

    impl PreparedStatement for FakePrepared {
        fn columns(&self) -> &[String] {
            &self.columns
        }

        fn execute(&self, values: &ParamValues) -> RowStream {
            if self.stall {
                return Box::pin(stream::pending());
            }
            if self.columns.is_empty() {
                return Box::pin(stream::empty());
            }
            let wanted = match values.get("id") {
                Some(quarry_core::ParamValue::Integer(id)) => Some(*id),
                _ => None,
            };
            let rows: Vec<Result<Row, BackendError>> = [(1, "ada"), (2, "grace"), (3, "linus")]
                .into_iter()
                .filter(|(id, _)| wanted.is_none_or(|w| w == *id))
                .map(|(id, name)| {
                    Ok([("id", json!(id)), ("name", json!(name))].into_iter().collect())
                })
                .collect();
            Box::pin(stream::iter(rows))
        }
    }

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn run(
        db: &Arc<FakeDb>,
        statement: &str,
        template: &[Parameter],
        params: &[Parameter],
        raw: Value,
        ctx: &InvocationContext,
    ) -> Result<ToolOutput, InvocationError> {
        let (statement, values) =
            bind_invocation("t-tool", statement, template, params, &input(raw), &ctx.auth)?;
        execute_statement("t-tool", db, &statement, &values, ctx).await
    }

    #[tokio::test]
    async fn test_rows_and_empty_results() {
        let db = Arc::new(FakeDb::default());
        let params = [Parameter::integer("id", "row id")];
        let ctx = InvocationContext::new();

        let out = run(&db, "SELECT * FROM t WHERE id = $id", &[], &params, json!({"id": 3}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"[{"id":3,"name":"linus"}]"#
        );

        let out = run(&db, "SELECT * FROM t WHERE id = $id", &[], &params, json!({"id": 999}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::NoRows);
        assert_eq!(serde_json::to_value(&out).unwrap(), json!(NO_ROWS_MESSAGE));

        let out = run(&db, "CREATE TABLE x (id INT)", &[], &[], json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.status(), Some(NO_CONTENT_MESSAGE));
    }

    #[tokio::test]
    async fn test_parameter_failure_never_reaches_backend() {
        let db = Arc::new(FakeDb::default());
        let params = [Parameter::integer("id", "row id")];
        let err = run(
            &db,
            "SELECT * FROM t WHERE id = $id",
            &[],
            &params,
            json!({}),
            &InvocationContext::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            InvocationError::Parameter {
                source: ParameterError::MissingParameter { .. },
                ..
            }
        ));
        assert_eq!(db.prepared.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_template_failure_comes_before_binding() {
        let db = Arc::new(FakeDb::default());
        let template = [Parameter::string("tableName", "table")];
        let params = [Parameter::integer("id", "row id")];

        // `id` is also missing, but the template error must win.
        let err = run(
            &db,
            "SELECT * FROM {{tableName}} WHERE id = $id",
            &template,
            &params,
            json!({}),
            &InvocationContext::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            InvocationError::Parameter {
                source: ParameterError::MissingTemplateParameter { .. },
                ..
            }
        ));
        assert_eq!(db.prepared.load(Ordering::SeqCst), 0);

        let out = run(
            &db,
            "SELECT * FROM {{tableName}} WHERE id = $id",
            &template,
            &params,
            json!({"tableName": "t", "id": 1}),
            &InvocationContext::new(),
        )
        .await
        .unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(
            db.last_statement.lock().unwrap().as_deref(),
            Some("SELECT * FROM t WHERE id = $id")
        );
    }

    #[tokio::test]
    async fn test_backend_error_is_wrapped_with_tool_name() {
        let db = Arc::new(FakeDb::default());
        let err = run(&db, "SELEC 1", &[], &[], json!({}), &InvocationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Backend { ref tool, .. } if tool == "t-tool"));
        assert!(err.to_string().contains("syntax error"));
    }

    #[tokio::test]
    async fn test_cancellation_during_row_iteration() {
        let db = Arc::new(FakeDb {
            stall_rows: true,
            ..FakeDb::default()
        });
        let ctx = InvocationContext::new();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = run(&db, "SELECT * FROM t", &[], &[], json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_prepare() {
        let db = Arc::new(FakeDb::default());
        let ctx = InvocationContext::new();
        ctx.cancel.cancel();

        let err = run(&db, "SELECT * FROM t", &[], &[], json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Cancelled { .. }));
        assert_eq!(db.prepared.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_returns_no_rows() {
        struct Failing;

        #[async_trait]
        impl StatementSource for Failing {
            async fn connect(
                &self,
                _credential: Option<&ClientCredential>,
            ) -> Result<Arc<dyn StatementConnection>, BackendError> {
                Ok(Arc::new(Failing))
            }
        }

        #[async_trait]
        impl StatementConnection for Failing {
            async fn prepare(
                &self,
                _statement: &str,
                _bind_names: &[&str],
            ) -> Result<Box<dyn PreparedStatement>, BackendError> {
                Ok(Box::new(Failing))
            }
        }

        impl PreparedStatement for Failing {
            fn columns(&self) -> &[String] {
                &[]
            }

            fn execute(&self, _values: &ParamValues) -> RowStream {
                Box::pin(stream::iter(vec![
                    Ok(Row::new()),
                    Err(BackendError::Row("connection reset".into())),
                ]))
            }
        }

        let err = execute_statement(
            "t-tool",
            &Failing,
            "SELECT 1",
            &ParamValues::new(),
            &InvocationContext::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InvocationError::Backend { .. }));
    }
}
