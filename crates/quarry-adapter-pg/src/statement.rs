//! Statement preparation, binding and row decoding on a `PgPool`.

use async_stream::try_stream;
use async_trait::async_trait;
use base64::Engine;
use bigdecimal::{BigDecimal, ToPrimitive};
use futures::TryStreamExt;
use quarry_core::{BackendError, ParamValue, ParamValues, ParameterType};
use quarry_runtime::{
    rewrite_named, PlaceholderStyle, PreparedStatement, Row, RowStream, StatementConnection,
};
use serde_json::{json, Value};
use std::str::FromStr;
use sqlx::postgres::types::{PgInterval, PgTimeTz};
use sqlx::postgres::{PgArguments, PgRow, PgStatement, PgTypeInfo, PgTypeKind};
use sqlx::{Arguments, Column, Executor, PgPool, Row as _, Statement, TypeInfo};

fn args_add<T>(args: &mut PgArguments, name: &str, v: T) -> Result<(), BackendError>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v).map_err(|e| BackendError::bind(name, e.to_string()))
}

/// A pool handed to one invocation.
pub struct PgSession {
    pool: PgPool,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatementConnection for PgSession {
    async fn prepare(
        &self,
        statement: &str,
        bind_names: &[&str],
    ) -> Result<Box<dyn PreparedStatement>, BackendError> {
        let positional = rewrite_named(statement, bind_names, PlaceholderStyle::Dollar);
        let prepared = self
            .pool
            .prepare(positional.sql.as_str())
            .await
            .map_err(BackendError::prepare)?;
        let statement: PgStatement<'static> = Statement::to_owned(&prepared);
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        Ok(Box::new(PgPrepared {
            pool: self.pool.clone(),
            statement,
            order: positional.order,
            columns,
        }))
    }
}

struct PgPrepared {
    pool: PgPool,
    statement: PgStatement<'static>,
    order: Vec<String>,
    columns: Vec<String>,
}

impl PreparedStatement for PgPrepared {
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

/// Positional arguments in `order`, typed from the resolved values.
pub fn bind_arguments(order: &[String], values: &ParamValues) -> Result<PgArguments, BackendError> {
    let mut args = PgArguments::default();
    for name in order {
        let value = values
            .get(name)
            .ok_or_else(|| BackendError::bind(name.as_str(), "no value resolved"))?;
        bind_value(&mut args, name, value)?;
    }
    Ok(args)
}

fn bind_value(args: &mut PgArguments, name: &str, value: &ParamValue) -> Result<(), BackendError> {
    match value {
        ParamValue::Null(kind) => match kind {
            ParameterType::String => args_add(args, name, None::<String>),
            ParameterType::Integer => args_add(args, name, None::<i64>),
            ParameterType::Float => args_add(args, name, None::<f64>),
            ParameterType::Boolean => args_add(args, name, None::<bool>),
            ParameterType::Array => args_add(args, name, None::<Vec<String>>),
        },
        ParamValue::String(s) => args_add(args, name, s.clone()),
        ParamValue::Integer(i) => args_add(args, name, *i),
        ParamValue::Float(f) => args_add(args, name, *f),
        ParamValue::Boolean(b) => args_add(args, name, *b),
        ParamValue::Array { item, values } => match item {
            ParameterType::String => args_add(
                args,
                name,
                items(name, values, |v| match v {
                    ParamValue::String(s) => Some(s.clone()),
                    _ => None,
                })?,
            ),
            ParameterType::Integer => args_add(
                args,
                name,
                items(name, values, |v| match v {
                    ParamValue::Integer(i) => Some(*i),
                    _ => None,
                })?,
            ),
            ParameterType::Float => args_add(
                args,
                name,
                items(name, values, |v| match v {
                    ParamValue::Float(f) => Some(*f),
                    _ => None,
                })?,
            ),
            ParameterType::Boolean => args_add(
                args,
                name,
                items(name, values, |v| match v {
                    ParamValue::Boolean(b) => Some(*b),
                    _ => None,
                })?,
            ),
            ParameterType::Array => Err(BackendError::bind(name, "nested arrays cannot be bound")),
        },
    }
}

fn items<T>(
    name: &str,
    values: &[ParamValue],
    pick: impl Fn(&ParamValue) -> Option<T>,
) -> Result<Vec<T>, BackendError> {
    values
        .iter()
        .map(|v| pick(v).ok_or_else(|| BackendError::bind(name, "array item has the wrong type")))
        .collect()
}

/// Project a Postgres row into column order name → JSON.
///
/// Columns of a type with no JSON mapping fail the row rather than being
/// dropped; cast them to `text` in the statement to read them.
pub fn row_to_json(row: &PgRow) -> Result<Row, BackendError> {
    let mut out = Row::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, i, column.type_info()).map_err(|e| {
            BackendError::Row(format!("column {:?}: {e}", column.name()))
        })?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, i: usize, type_info: &PgTypeInfo) -> Result<Value, sqlx::Error> {
    let value = match type_info.name() {
        "BOOL" => json!(row.try_get::<Option<bool>, _>(i)?),
        "INT2" => json!(row.try_get::<Option<i16>, _>(i)?),
        "INT4" => json!(row.try_get::<Option<i32>, _>(i)?),
        "INT8" => json!(row.try_get::<Option<i64>, _>(i)?),
        "FLOAT4" => json!(row.try_get::<Option<f32>, _>(i)?),
        "FLOAT8" => json!(row.try_get::<Option<f64>, _>(i)?),
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(i)?
            .map_or(Value::Null, |d| numeric_to_json(&d)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => json!(row.try_get::<Option<String>, _>(i)?),
        "CITEXT" => json!(row.try_get_unchecked::<Option<String>, _>(i)?),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i)?.unwrap_or(Value::Null),
        "UUID" => json!(row.try_get::<Option<uuid::Uuid>, _>(i)?.map(|u| u.to_string())),
        "TIMESTAMPTZ" => json!(
            row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(|t| t.to_rfc3339())
        ),
        "TIMESTAMP" => json!(
            row.try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        ),
        "DATE" => json!(row.try_get::<Option<chrono::NaiveDate>, _>(i)?.map(|d| d.to_string())),
        "TIME" => json!(row.try_get::<Option<chrono::NaiveTime>, _>(i)?.map(|t| t.to_string())),
        "TIMETZ" => json!(
            row.try_get::<Option<PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>>, _>(i)?
                .map(|t| timetz_to_string(&t))
        ),
        "INTERVAL" => row
            .try_get::<Option<PgInterval>, _>(i)?
            .map_or(Value::Null, |iv| interval_to_json(&iv)),
        "BYTEA" => json!(
            row.try_get::<Option<Vec<u8>>, _>(i)?
                .map(|b| base64::engine::general_purpose::STANDARD.encode(b))
        ),
        "BOOL[]" => json!(row.try_get::<Option<Vec<bool>>, _>(i)?),
        "INT2[]" => json!(row.try_get::<Option<Vec<i16>>, _>(i)?),
        "INT4[]" => json!(row.try_get::<Option<Vec<i32>>, _>(i)?),
        "INT8[]" => json!(row.try_get::<Option<Vec<i64>>, _>(i)?),
        "FLOAT4[]" => json!(row.try_get::<Option<Vec<f32>>, _>(i)?),
        "FLOAT8[]" => json!(row.try_get::<Option<Vec<f64>>, _>(i)?),
        "TEXT[]" | "VARCHAR[]" => json!(row.try_get::<Option<Vec<String>>, _>(i)?),
        // Enum labels travel as text in both wire formats.
        _ if matches!(type_info.kind(), PgTypeKind::Enum(_)) => {
            json!(row.try_get_unchecked::<Option<String>, _>(i)?)
        }
        other => {
            return Err(sqlx::Error::Decode(
                format!("unsupported column type {other}; cast it to text").into(),
            ));
        }
    };
    Ok(value)
}

/// NUMERIC as a JSON number when that number is exactly the stored value,
/// else as its decimal text.
fn numeric_to_json(d: &BigDecimal) -> Value {
    if d.is_integer() {
        if let Some(i) = d.to_i64() {
            return json!(i);
        }
    } else if let Some(f) = d.to_f64().filter(|f| f.is_finite()) {
        let exact = BigDecimal::from_str(&f.to_string()).is_ok_and(|back| &back == d);
        if let (true, Some(n)) = (exact, serde_json::Number::from_f64(f)) {
            return Value::Number(n);
        }
    }
    Value::String(d.to_string())
}

fn interval_to_json(interval: &PgInterval) -> Value {
    json!({
        "months": interval.months,
        "days": interval.days,
        "microseconds": interval.microseconds,
    })
}

fn timetz_to_string(t: &PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>) -> String {
    format!("{}{}", t.time, t.offset)
}
