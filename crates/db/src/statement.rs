//! Running a parameterized statement on a checked-out connection.
//!
//! Rows are returned as JSON objects (one per row) so callers can forward
//! them to a session without knowing the statement's column types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::{Arguments, PgConnection};

/// A positional statement parameter (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Shape of the result the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    /// Execute only; report the number of affected rows.
    None,
    /// The first row, if any.
    One,
    /// Every row.
    All,
}

/// Result of a statement in the requested [`RowShape`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Affected(u64),
    Row(Option<Value>),
    Rows(Vec<Value>),
}

impl From<QueryOutput> for Value {
    fn from(output: QueryOutput) -> Self {
        match output {
            QueryOutput::Affected(n) => Value::from(n),
            QueryOutput::Row(row) => row.unwrap_or(Value::Null),
            QueryOutput::Rows(rows) => Value::Array(rows),
        }
    }
}

fn arguments(params: &[QueryParam]) -> Result<PgArguments, sqlx::Error> {
    let mut args = PgArguments::default();
    for param in params {
        match param {
            QueryParam::Null => args.add(None::<String>),
            QueryParam::Bool(v) => args.add(*v),
            QueryParam::Int(v) => args.add(*v),
            QueryParam::Float(v) => args.add(*v),
            QueryParam::Text(v) => args.add(v.clone()),
        }
        .map_err(sqlx::Error::Encode)?;
    }
    Ok(args)
}

/// Run `sql` with `params` on `conn`, returning rows in `shape`.
pub async fn run(
    conn: &mut PgConnection,
    sql: &str,
    params: &[QueryParam],
    shape: RowShape,
) -> Result<QueryOutput, sqlx::Error> {
    let args = arguments(params)?;

    match shape {
        RowShape::None => {
            let result = sqlx::query_with(sql, args).execute(&mut *conn).await?;
            Ok(QueryOutput::Affected(result.rows_affected()))
        }
        RowShape::One | RowShape::All => {
            let wrapped = format!("SELECT to_jsonb(t) FROM ({sql}) AS t");
            let query = sqlx::query_scalar_with::<_, Value, _>(&wrapped, args);
            if shape == RowShape::One {
                Ok(QueryOutput::Row(query.fetch_optional(&mut *conn).await?))
            } else {
                Ok(QueryOutput::Rows(query.fetch_all(&mut *conn).await?))
            }
        }
    }
}
