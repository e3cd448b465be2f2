//! Statement preparation, binding and row decoding on a `SqlitePool`.

use async_stream::try_stream;
use async_trait::async_trait;
use base64::Engine;
use futures::TryStreamExt;
use quarry_core::{BackendError, ParamValue, ParamValues, ParameterType};
use quarry_runtime::{
    rewrite_named, PlaceholderStyle, PreparedStatement, Row, RowStream, StatementConnection,
};
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow, SqliteStatement};
use sqlx::{Arguments, Column, Executor, Row as _, SqlitePool, Statement, TypeInfo, ValueRef};

fn args_add<T>(args: &mut SqliteArguments<'static>, name: &str, v: T) -> Result<(), BackendError>
where
    T: Send + 'static,
    T: sqlx::Encode<'static, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    args.add(v).map_err(|e| BackendError::bind(name, e.to_string()))
}

pub struct SqliteSession {
    pool: SqlitePool,
}

impl SqliteSession {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatementConnection for SqliteSession {
    async fn prepare(
        &self,
        statement: &str,
        bind_names: &[&str],
    ) -> Result<Box<dyn PreparedStatement>, BackendError> {
        let positional = rewrite_named(statement, bind_names, PlaceholderStyle::QuestionNumbered);
        let prepared = self
            .pool
            .prepare(positional.sql.as_str())
            .await
            .map_err(BackendError::prepare)?;
        let statement: SqliteStatement<'static> = Statement::to_owned(&prepared);
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        Ok(Box::new(SqlitePrepared {
            pool: self.pool.clone(),
            statement,
            order: positional.order,
            columns,
        }))
    }
}

struct SqlitePrepared {
    pool: SqlitePool,
    statement: SqliteStatement<'static>,
    order: Vec<String>,
    columns: Vec<String>,
}

impl PreparedStatement for SqlitePrepared {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn execute(&self, values: &ParamValues) -> RowStream {
        let arguments = bind_arguments(&self.order, values);
        let pool = self.pool.clone();
        let statement = self.statement.clone();
        Box::pin(try_stream! {
            let arguments = arguments?;
            let mut rows = statement.query_with(arguments).fetch(&pool);
            while let Some(row) = rows.try_next().await.map_err(BackendError::execute)? {
                yield row_to_json(&row)?;
            }
        })
    }
}

/// Positional arguments in `order`. Arrays have no SQLite type and are bound
/// as JSON text, usable with `json_each`.
pub fn bind_arguments(
    order: &[String],
    values: &ParamValues,
) -> Result<SqliteArguments<'static>, BackendError> {
    let mut args = SqliteArguments::default();
    for name in order {
        let value = values
            .get(name)
            .ok_or_else(|| BackendError::bind(name.as_str(), "no value resolved"))?;
        match value {
            ParamValue::Null(ParameterType::Integer) => args_add(&mut args, name, None::<i64>)?,
            ParamValue::Null(ParameterType::Float) => args_add(&mut args, name, None::<f64>)?,
            ParamValue::Null(ParameterType::Boolean) => args_add(&mut args, name, None::<bool>)?,
            ParamValue::Null(_) => args_add(&mut args, name, None::<String>)?,
            ParamValue::String(s) => args_add(&mut args, name, s.clone())?,
            ParamValue::Integer(i) => args_add(&mut args, name, *i)?,
            ParamValue::Float(f) => args_add(&mut args, name, *f)?,
            ParamValue::Boolean(b) => args_add(&mut args, name, *b)?,
            ParamValue::Array { .. } => args_add(&mut args, name, value.to_json().to_string())?,
        }
    }
    Ok(args)
}

/// Project a SQLite row into column order name → JSON.
///
/// SQLite values carry their own storage class, so decoding follows the
/// value rather than the declared column type, except for `BOOLEAN` columns.
pub fn row_to_json(row: &SqliteRow) -> Result<Row, BackendError> {
    let mut out = Row::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let declared_bool = column.type_info().name() == "BOOLEAN";
        let value = decode_column(row, i, declared_bool)
            .map_err(|e| BackendError::Row(format!("column {:?}: {e}", column.name())))?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn decode_column(row: &SqliteRow, i: usize, declared_bool: bool) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(i)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" if declared_bool => json!(row.try_get::<bool, _>(i)?),
        "INTEGER" | "BOOLEAN" => json!(row.try_get::<i64, _>(i)?),
        "REAL" => json!(row.try_get::<f64, _>(i)?),
        "BLOB" => json!(base64::engine::general_purpose::STANDARD.encode(row.try_get::<Vec<u8>, _>(i)?)),
        _ => json!(row.try_get::<String, _>(i)?),
    };
    Ok(value)
}
