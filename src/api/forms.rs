//! Form descriptor endpoint: everything a client needs to render the create
//! or update form for a table, derived from the column form specs.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::catalog::Database;
use crate::db::rows::{bind_values, decode_row, stored_select, RowShape, SqlBind, ValueType};
use crate::schema::{InputKind, Reference};
use crate::AppState;

use super::error::ApiError;
use super::tables::resolve;

#[derive(Debug, Deserialize, Default)]
pub struct FormParams {
    /// When present, the form edits this row and fields carry its values
    pub id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SelectOption {
    pub id: i64,
    pub text: Value,
}

#[derive(Debug, Serialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub input: InputKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub required: bool,
    pub value: Value,
    /// Dropdown choices, present on select inputs only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
}

#[derive(Debug, Serialize)]
pub struct FormDescriptor {
    pub database: String,
    pub table: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub fields: Vec<FormField>,
}

/// Dropdown options for a foreign key field: every row of the referenced
/// table, ordered by its display column.
async fn select_options(
    db: &Database,
    reference: &Reference,
) -> Result<Vec<SelectOption>, ApiError> {
    let display_type = db
        .table(&reference.table)
        .and_then(|target| target.spec.column(&reference.display))
        .map(|col| ValueType::from(col.effective_type()))
        .unwrap_or(ValueType::Int);

    let sql = format!(
        "SELECT \"id\", \"{}\" FROM \"{}\" ORDER BY \"{}\"",
        reference.display, reference.table, reference.display
    );
    let mut shape = RowShape::new();
    shape.push("id", ValueType::Int);
    shape.push("text", display_type);

    let fetched = sqlx::query(&sql).fetch_all(&db.pool).await?;
    let mut options = Vec::with_capacity(fetched.len());
    for row in &fetched {
        let decoded = decode_row(&shape, row)?;
        let id = decoded
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ApiError::internal("Dropdown option without an id"))?;
        let text = decoded.get("text").cloned().unwrap_or(Value::Null);
        options.push(SelectOption { id, text });
    }
    Ok(options)
}

/// GET /api/:database/tables/:table/form
///
/// Without `id`, a create form with spec defaults; with `id`, an update form
/// carrying the row's current stored values (raw foreign key ids, no joins).
pub async fn get_form(
    State(state): State<Arc<AppState>>,
    Path((database, table)): Path<(String, String)>,
    Query(params): Query<FormParams>,
) -> Result<Json<FormDescriptor>, ApiError> {
    let (db, entry) = resolve(&state, &database, &table)?;

    let current: Option<Map<String, Value>> = match params.id {
        Some(id) => {
            let (sql, shape) = stored_select(&entry.spec);
            let row = bind_values(sqlx::query(&sql), vec![SqlBind::Int(id)])
                .fetch_optional(&db.pool)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("No record with id = {}", id)))?;
            Some(decode_row(&shape, &row)?)
        }
        None => None,
    };

    let mut fields = Vec::new();
    for col in entry.spec.form_columns() {
        let Some(form) = col.form.as_ref() else {
            continue;
        };

        let value = match current {
            Some(ref row) => row.get(&col.name).cloned().unwrap_or(Value::Null),
            None => form
                .value
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        };

        let options = match (&form.input, &col.references) {
            (InputKind::Select, Some(reference)) => Some(select_options(db, reference).await?),
            _ => None,
        };

        fields.push(FormField {
            name: col.name.clone(),
            label: form.label.clone().unwrap_or_else(|| col.label()),
            input: form.input,
            placeholder: form.placeholder.clone(),
            required: col.required,
            value,
            options,
        });
    }

    let title = match params.id {
        Some(_) => format!("Update {}", entry.spec.title()),
        None => format!("Create {}", entry.spec.title()),
    };

    Ok(Json(FormDescriptor {
        database: db.name.clone(),
        table: entry.spec.name.clone(),
        title,
        id: params.id,
        fields,
    }))
}
