//! Row mutation endpoints: fetch one, create, update, delete.
//!
//! Writes go through the form-field specs: only spec'd form columns are
//! writable, values are coerced by declared type, and computed columns are
//! refreshed from their expressions after every successful write.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::catalog::TableEntry;
use crate::db::rows::{
    bind_values, coerce_value, decode_row, numeric_vars, stored_select, SqlBind,
};
use crate::db::DbPool;
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::tables::{resolve, shape_row};

/// Fetch one row in its shaped API form.
pub(crate) async fn fetch_shaped_row(
    pool: &DbPool,
    entry: &TableEntry,
    id: i64,
) -> Result<Option<Value>, sqlx::Error> {
    let sql = entry.plan.select_one_sql();
    let row = bind_values(sqlx::query(&sql), vec![SqlBind::Int(id)])
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => {
            let decoded = decode_row(&entry.plan.shape, &row)?;
            Ok(Some(shape_row(entry, decoded)))
        }
        None => Ok(None),
    }
}

/// Re-evaluate every computed column of the row and persist the results.
/// NULL inputs (and division by zero) store NULL.
pub(crate) async fn recompute_computed(
    pool: &DbPool,
    entry: &TableEntry,
    id: i64,
) -> Result<(), sqlx::Error> {
    if entry.computed.is_empty() {
        return Ok(());
    }

    let (select_sql, shape) = stored_select(&entry.spec);
    let row = bind_values(sqlx::query(&select_sql), vec![SqlBind::Int(id)])
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(());
    };
    let stored = decode_row(&shape, &row)?;
    let vars = numeric_vars(&entry.spec, &stored);

    let mut sets = Vec::new();
    let mut binds = Vec::new();
    for (name, expr) in &entry.computed {
        sets.push(format!("\"{}\" = ?", name));
        binds.push(match expr.eval(&vars) {
            Some(v) => SqlBind::Real(v),
            None => SqlBind::Null,
        });
    }
    binds.push(SqlBind::Int(id));

    let update_sql = format!(
        "UPDATE \"{}\" SET {} WHERE \"id\" = ?",
        entry.spec.name,
        sets.join(", ")
    );
    bind_values(sqlx::query(&update_sql), binds)
        .execute(pool)
        .await?;
    Ok(())
}

/// Coerce a write body against the table's form fields. `creating` enforces
/// presence of required fields; updates only reject explicit nulls on them.
fn coerce_fields(
    entry: &TableEntry,
    body: &Map<String, Value>,
    creating: bool,
) -> Result<Vec<(String, SqlBind)>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    let mut fields = Vec::new();

    for key in body.keys() {
        if !entry
            .spec
            .form_columns()
            .any(|col| col.name == *key)
        {
            errors.add(key.clone(), "unknown field");
        }
    }

    for col in entry.spec.form_columns() {
        match body.get(&col.name) {
            Some(value) => match coerce_value(col.effective_type(), value) {
                Ok(SqlBind::Null) if col.required => {
                    errors.add(col.name.clone(), format!("{} is required", col.label()));
                }
                Ok(bind) => fields.push((col.name.clone(), bind)),
                Err(message) => {
                    errors.add(col.name.clone(), message);
                }
            },
            None if creating && col.required => {
                errors.add(col.name.clone(), format!("{} is required", col.label()));
            }
            None => {}
        }
    }

    errors.finish()?;
    Ok(fields)
}

/// GET /api/:database/tables/:table/rows/:id
pub async fn get_row(
    State(state): State<Arc<AppState>>,
    Path((database, table, id)): Path<(String, String, i64)>,
) -> Result<Json<Value>, ApiError> {
    let (db, entry) = resolve(&state, &database, &table)?;
    let row = fetch_shaped_row(&db.pool, entry, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No record with id = {}", id)))?;
    Ok(Json(row))
}

/// POST /api/:database/tables/:table/rows
pub async fn create_row(
    State(state): State<Arc<AppState>>,
    Path((database, table)): Path<(String, String)>,
    Json(body): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (db, entry) = resolve(&state, &database, &table)?;
    let fields = coerce_fields(entry, &body, true)?;

    let id = if fields.is_empty() {
        let sql = format!("INSERT INTO \"{}\" DEFAULT VALUES", entry.spec.name);
        sqlx::query(&sql).execute(&db.pool).await?.last_insert_rowid()
    } else {
        let columns: Vec<String> = fields.iter().map(|(n, _)| format!("\"{}\"", n)).collect();
        let placeholders: Vec<&str> = fields.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            entry.spec.name,
            columns.join(", "),
            placeholders.join(", ")
        );
        let binds = fields.into_iter().map(|(_, b)| b).collect();
        bind_values(sqlx::query(&sql), binds)
            .execute(&db.pool)
            .await?
            .last_insert_rowid()
    };

    recompute_computed(&db.pool, entry, id).await?;

    let row = fetch_shaped_row(&db.pool, entry, id)
        .await?
        .ok_or_else(|| ApiError::internal("Created record could not be read back"))?;

    tracing::info!(database = %db.name, table = %entry.spec.name, id, "Record created");
    Ok((StatusCode::CREATED, Json(row)))
}

/// PUT /api/:database/tables/:table/rows/:id
pub async fn update_row(
    State(state): State<Arc<AppState>>,
    Path((database, table, id)): Path<(String, String, i64)>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    let (db, entry) = resolve(&state, &database, &table)?;

    let exists = fetch_shaped_row(&db.pool, entry, id).await?.is_some();
    if !exists {
        return Err(ApiError::not_found(format!("No record with id = {}", id)));
    }

    let fields = coerce_fields(entry, &body, false)?;
    if !fields.is_empty() {
        let sets: Vec<String> = fields.iter().map(|(n, _)| format!("\"{}\" = ?", n)).collect();
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"id\" = ?",
            entry.spec.name,
            sets.join(", ")
        );
        let mut binds: Vec<SqlBind> = fields.into_iter().map(|(_, b)| b).collect();
        binds.push(SqlBind::Int(id));
        bind_values(sqlx::query(&sql), binds)
            .execute(&db.pool)
            .await?;
    }

    recompute_computed(&db.pool, entry, id).await?;

    let row = fetch_shaped_row(&db.pool, entry, id)
        .await?
        .ok_or_else(|| ApiError::internal("Updated record could not be read back"))?;

    tracing::info!(database = %db.name, table = %entry.spec.name, id, "Record updated");
    Ok(Json(row))
}

/// DELETE /api/:database/tables/:table/rows/:id
pub async fn delete_row(
    State(state): State<Arc<AppState>>,
    Path((database, table, id)): Path<(String, String, i64)>,
) -> Result<StatusCode, ApiError> {
    let (db, entry) = resolve(&state, &database, &table)?;

    let sql = format!("DELETE FROM \"{}\" WHERE \"id\" = ?", entry.spec.name);
    let result = bind_values(sqlx::query(&sql), vec![SqlBind::Int(id)])
        .execute(&db.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("No record with id = {}", id)));
    }

    tracing::info!(database = %db.name, table = %entry.spec.name, id, "Record deleted");
    Ok(StatusCode::NO_CONTENT)
}
