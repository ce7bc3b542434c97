//! Dynamic row decoding and write-value coercion.
//!
//! Served tables have no compile-time structs; rows are decoded into JSON
//! objects using the declared column types, and incoming JSON write values
//! are coerced into SQL binds the same way.

use std::collections::HashMap;

use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::schema::{ColumnType, TableSpec};

/// Decode type of one select-list column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Text,
}

impl From<ColumnType> for ValueType {
    fn from(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Integer => ValueType::Int,
            ColumnType::Real => ValueType::Float,
            ColumnType::Boolean => ValueType::Bool,
            ColumnType::Text | ColumnType::Date | ColumnType::Datetime => ValueType::Text,
        }
    }
}

/// Ordered (label, type) list describing how to decode a fetched row.
#[derive(Debug, Clone, Default)]
pub struct RowShape {
    cols: Vec<(String, ValueType)>,
}

impl RowShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, ty: ValueType) {
        self.cols.push((name.to_string(), ty));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ValueType)> {
        self.cols.iter().map(|(n, t)| (n.as_str(), *t))
    }
}

/// A positional bind parameter for dynamically assembled SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlBind {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Attach binds to a query in order.
pub fn bind_values(mut query: SqliteQuery<'_>, binds: Vec<SqlBind>) -> SqliteQuery<'_> {
    for bind in binds {
        query = match bind {
            SqlBind::Null => query.bind(None::<i64>),
            SqlBind::Int(v) => query.bind(v),
            SqlBind::Real(v) => query.bind(v),
            SqlBind::Text(v) => query.bind(v),
        };
    }
    query
}

/// Decode a fetched row into a JSON object following the shape.
pub fn decode_row(shape: &RowShape, row: &SqliteRow) -> Result<Map<String, Value>, sqlx::Error> {
    let mut out = Map::new();
    for (idx, (name, ty)) in shape.iter().enumerate() {
        let value = match ty {
            ValueType::Int => row
                .try_get::<Option<i64>, _>(idx)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ValueType::Float => match row.try_get::<Option<f64>, _>(idx) {
                Ok(v) => v.map(Value::from).unwrap_or(Value::Null),
                // REAL columns may hold integer storage in SQLite
                Err(_) => row
                    .try_get::<Option<i64>, _>(idx)?
                    .map(|v| Value::from(v as f64))
                    .unwrap_or(Value::Null),
            },
            ValueType::Bool => row
                .try_get::<Option<bool>, _>(idx)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ValueType::Text => row
                .try_get::<Option<String>, _>(idx)?
                .map(Value::from)
                .unwrap_or(Value::Null),
        };
        out.insert(name.to_string(), value);
    }
    Ok(out)
}

/// Coerce a JSON write value into a SQL bind for a column of the given type.
///
/// Form clients submit strings, so strings are accepted wherever they parse:
/// booleans additionally understand true/false/on/off (any case), and an
/// empty string means NULL everywhere except plain text columns.
pub fn coerce_value(ty: ColumnType, value: &Value) -> Result<SqlBind, String> {
    if value.is_null() {
        return Ok(SqlBind::Null);
    }

    match ty {
        ColumnType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .map(SqlBind::Int)
                .ok_or_else(|| "expected an integer".to_string()),
            Value::String(s) if s.is_empty() => Ok(SqlBind::Null),
            Value::String(s) => s
                .parse::<i64>()
                .map(SqlBind::Int)
                .map_err(|_| format!("'{}' is not an integer", s)),
            _ => Err("expected an integer".to_string()),
        },
        ColumnType::Real => match value {
            Value::Number(n) => n
                .as_f64()
                .map(SqlBind::Real)
                .ok_or_else(|| "expected a number".to_string()),
            Value::String(s) if s.is_empty() => Ok(SqlBind::Null),
            Value::String(s) => s
                .parse::<f64>()
                .map(SqlBind::Real)
                .map_err(|_| format!("'{}' is not a number", s)),
            _ => Err("expected a number".to_string()),
        },
        ColumnType::Boolean => match value {
            Value::Bool(b) => Ok(SqlBind::Int(*b as i64)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(SqlBind::Int(0)),
                Some(1) => Ok(SqlBind::Int(1)),
                _ => Err("expected a boolean".to_string()),
            },
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "on" => Ok(SqlBind::Int(1)),
                "false" | "off" => Ok(SqlBind::Int(0)),
                "" => Ok(SqlBind::Null),
                other => Err(format!("'{}' is not a boolean", other)),
            },
            _ => Err("expected a boolean".to_string()),
        },
        ColumnType::Text => match value {
            Value::String(s) => Ok(SqlBind::Text(s.clone())),
            Value::Number(n) => Ok(SqlBind::Text(n.to_string())),
            _ => Err("expected a string".to_string()),
        },
        ColumnType::Date => match value {
            Value::String(s) if s.is_empty() => Ok(SqlBind::Null),
            Value::String(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|_| SqlBind::Text(s.clone()))
                .map_err(|_| format!("'{}' is not a YYYY-MM-DD date", s)),
            _ => Err("expected a date string".to_string()),
        },
        ColumnType::Datetime => match value {
            Value::String(s) if s.is_empty() => Ok(SqlBind::Null),
            Value::String(s) => {
                let ok = chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").is_ok()
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok();
                if ok {
                    Ok(SqlBind::Text(s.clone()))
                } else {
                    Err(format!("'{}' is not a datetime", s))
                }
            }
            _ => Err("expected a datetime string".to_string()),
        },
    }
}

/// SQL and shape for fetching one row's stored columns by id (raw foreign key
/// values, no joins). Used by forms and computed-column recomputes.
pub fn stored_select(spec: &TableSpec) -> (String, RowShape) {
    let mut shape = RowShape::new();
    shape.push("id", ValueType::Int);
    let mut cols = vec!["\"id\"".to_string()];
    for col in spec.stored_columns() {
        cols.push(format!("\"{}\"", col.name));
        shape.push(&col.name, ValueType::from(col.effective_type()));
    }
    let sql = format!(
        "SELECT {} FROM \"{}\" WHERE \"id\" = ?",
        cols.join(", "),
        spec.name
    );
    (sql, shape)
}

/// Extract the numeric columns of a stored row for expression evaluation.
pub fn numeric_vars(spec: &TableSpec, row: &Map<String, Value>) -> HashMap<String, Option<f64>> {
    let mut vars = HashMap::new();
    for col in spec.stored_columns() {
        if col.effective_type().is_numeric() && col.computed.is_none() {
            let value = row.get(&col.name).and_then(Value::as_f64);
            vars.insert(col.name.clone(), value);
        }
    }
    vars
}
