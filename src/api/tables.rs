//! Table browsing endpoints: the schema index, per-table grid configuration,
//! and paginated/sortable/filterable row listings.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::Row;
use std::sync::Arc;

use crate::catalog::{fk_companion, Database, RowQuery, TableEntry};
use crate::db::rows::{bind_values, decode_row, SqlBind};
use crate::db::DbPool;
use crate::schema::{RenderHint, SortDir};
use crate::AppState;

use super::error::ApiError;

const DEFAULT_PER_PAGE: i64 = 25;
const MAX_PER_PAGE: i64 = 500;

/// Resolve a `(database, table)` path pair against the catalog.
pub(crate) fn resolve<'a>(
    state: &'a AppState,
    database: &str,
    table: &str,
) -> Result<(&'a Database, &'a TableEntry), ApiError> {
    state.catalog.resolve(database, table).ok_or_else(|| {
        ApiError::not_found(format!("Unknown table '{}' in database '{}'", table, database))
    })
}

// ---------------------------------------------------------------------------
// GET /api/schema
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SchemaIndex {
    pub databases: Vec<DatabaseIndex>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseIndex {
    pub name: String,
    pub tables: Vec<TableIndex>,
}

#[derive(Debug, Serialize)]
pub struct TableIndex {
    pub name: String,
    pub title: String,
}

/// List every served database and its tables, the index page payload.
pub async fn schema_index(State(state): State<Arc<AppState>>) -> Json<SchemaIndex> {
    let databases = state
        .catalog
        .databases()
        .map(|db| DatabaseIndex {
            name: db.name.clone(),
            tables: db
                .tables()
                .map(|entry| TableIndex {
                    name: entry.spec.name.clone(),
                    title: entry.spec.title(),
                })
                .collect(),
        })
        .collect();
    Json(SchemaIndex { databases })
}

// ---------------------------------------------------------------------------
// GET /api/:database/tables/:table
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct GridColumn {
    pub name: String,
    pub label: String,
    pub kind: &'static str,
    pub sortable: bool,
    pub link: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderHint>,
}

#[derive(Debug, Serialize)]
pub struct GridConfig {
    pub database: String,
    pub table: String,
    pub title: String,
    pub display_column: String,
    pub columns: Vec<GridColumn>,
    /// Default sort: [column, direction]
    pub order: (String, SortDir),
}

/// Grid configuration for one table: ordered column descriptors and the
/// default sort.
pub async fn grid_config(
    State(state): State<Arc<AppState>>,
    Path((database, table)): Path<(String, String)>,
) -> Result<Json<GridConfig>, ApiError> {
    let (db, entry) = resolve(&state, &database, &table)?;

    let columns = entry
        .spec
        .columns
        .iter()
        .map(|col| GridColumn {
            name: col.name.clone(),
            label: col.label(),
            kind: col.kind_name(),
            sortable: entry.plan.is_sortable(&col.name),
            link: col.is_link(),
            render: col.render.clone(),
        })
        .collect();

    Ok(Json(GridConfig {
        database: db.name.clone(),
        table: entry.spec.name.clone(),
        title: entry.spec.title(),
        display_column: entry.spec.display_column().to_string(),
        columns,
        order: entry.spec.default_order(),
    }))
}

// ---------------------------------------------------------------------------
// GET /api/:database/tables/:table/rows
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct RowsParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub sort: Option<String>,
    pub dir: Option<SortDir>,
    pub search: Option<String>,
    /// Relational link filter: `id` or a foreign key column of the table
    pub filter_col: Option<String>,
    pub filter_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RowsPage {
    pub database: String,
    pub table: String,
    pub page: i64,
    pub per_page: i64,
    /// Total rows in the table
    pub total: i64,
    /// Rows matching the filters, before pagination
    pub filtered: i64,
    pub rows: Vec<Value>,
}

fn build_row_query(entry: &TableEntry, params: &RowsParams) -> Result<RowQuery, ApiError> {
    let page = params.page.unwrap_or(1);
    if page < 1 {
        return Err(ApiError::validation_field("page", "page starts at 1"));
    }
    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);
    if per_page < 1 || per_page > MAX_PER_PAGE {
        return Err(ApiError::validation_field(
            "per_page",
            format!("per_page must be between 1 and {}", MAX_PER_PAGE),
        ));
    }

    let sort = match params.sort {
        Some(ref col) => {
            if !entry.plan.is_sortable(col) {
                return Err(ApiError::validation_field(
                    "sort",
                    format!("'{}' is not a sortable column", col),
                ));
            }
            Some((col.clone(), params.dir.unwrap_or(SortDir::Asc)))
        }
        None => None,
    };

    let filter = match (&params.filter_col, params.filter_id) {
        (Some(col), Some(id)) => {
            if !entry.plan.is_filterable(col) {
                return Err(ApiError::validation_field(
                    "filter_col",
                    format!("'{}' is not a filterable column", col),
                ));
            }
            Some((col.clone(), id))
        }
        (None, None) => None,
        _ => {
            return Err(ApiError::bad_request(
                "filter_col and filter_id must be given together",
            ))
        }
    };

    let offset = (page - 1)
        .checked_mul(per_page)
        .ok_or_else(|| ApiError::validation_field("page", "page is out of range"))?;

    Ok(RowQuery {
        filter,
        search: params.search.clone(),
        sort,
        limit: per_page,
        offset,
    })
}

pub(crate) async fn fetch_count(
    pool: &DbPool,
    sql: &str,
    binds: Vec<SqlBind>,
) -> Result<i64, sqlx::Error> {
    let row = bind_values(sqlx::query(sql), binds).fetch_one(pool).await?;
    row.try_get::<i64, _>(0)
}

/// Paginated rows with relationship link cells.
pub async fn list_rows(
    State(state): State<Arc<AppState>>,
    Path((database, table)): Path<(String, String)>,
    Query(params): Query<RowsParams>,
) -> Result<Json<RowsPage>, ApiError> {
    let (db, entry) = resolve(&state, &database, &table)?;
    let query = build_row_query(entry, &params)?;

    let total = fetch_count(&db.pool, &entry.plan.count_sql(), Vec::new()).await?;
    let (filtered_sql, filtered_binds) = entry.plan.filtered_count_sql(&query);
    let filtered = fetch_count(&db.pool, &filtered_sql, filtered_binds).await?;

    let (sql, binds) = entry.plan.select_sql(&query);
    let fetched = bind_values(sqlx::query(&sql), binds)
        .fetch_all(&db.pool)
        .await?;

    let mut rows = Vec::with_capacity(fetched.len());
    for row in &fetched {
        let decoded = decode_row(&entry.plan.shape, row)?;
        rows.push(shape_row(entry, decoded));
    }

    Ok(Json(RowsPage {
        database: db.name.clone(),
        table: entry.spec.name.clone(),
        page: params.page.unwrap_or(1),
        per_page: query.limit,
        total,
        filtered,
        rows,
    }))
}

/// Turn a decoded row into its API shape: link-enabled relationship columns
/// become navigable link cells, fk companion columns are folded away.
pub(crate) fn shape_row(entry: &TableEntry, decoded: Map<String, Value>) -> Value {
    let row_id = decoded.get("id").cloned().unwrap_or(Value::Null);
    let mut out = Map::new();
    out.insert("id".to_string(), row_id.clone());

    for col in &entry.spec.columns {
        if col.name == "id" {
            continue;
        }
        let cell = decoded.get(&col.name).cloned().unwrap_or(Value::Null);

        if let Some(ref reference) = col.references {
            let fk = decoded
                .get(&fk_companion(&col.name))
                .cloned()
                .unwrap_or(Value::Null);
            if fk.is_null() {
                out.insert(col.name.clone(), Value::Null);
            } else if col.is_link() {
                out.insert(
                    col.name.clone(),
                    json!({
                        "text": cell,
                        "table": reference.table,
                        "filter_col": "id",
                        "filter_id": fk,
                    }),
                );
            } else {
                out.insert(col.name.clone(), cell);
            }
        } else if let Some(ref has_many) = col.has_many {
            if col.is_link() {
                out.insert(
                    col.name.clone(),
                    json!({
                        "text": cell,
                        "table": has_many.table,
                        "filter_col": has_many.foreign_key,
                        "filter_id": row_id,
                    }),
                );
            } else {
                out.insert(col.name.clone(), cell);
            }
        } else {
            out.insert(col.name.clone(), cell);
        }
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testutil::test_state;

    #[tokio::test]
    async fn schema_index_lists_tables() {
        let state = test_state().await;
        let Json(index) = schema_index(State(state)).await;
        assert_eq!(index.databases.len(), 1);
        assert_eq!(index.databases[0].name, "pab");
        let names: Vec<&str> = index.databases[0]
            .tables
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["user", "pet"]);
    }

    #[tokio::test]
    async fn grid_config_describes_columns() {
        let state = test_state().await;
        let Json(config) = grid_config(
            State(state),
            Path(("pab".to_string(), "pet".to_string())),
        )
        .await
        .unwrap();

        assert_eq!(config.title, "Pets");
        assert_eq!(config.display_column, "name");
        assert_eq!(config.order, ("weight_lb".to_string(), SortDir::Desc));

        let owner = config.columns.iter().find(|c| c.name == "owner_id").unwrap();
        assert_eq!(owner.kind, "belongs_to");
        assert!(owner.link);
        assert!(owner.sortable);

        let kg = config.columns.iter().find(|c| c.name == "weight_kg").unwrap();
        assert_eq!(kg.kind, "computed");
        assert!(kg.render.is_some());
    }

    #[tokio::test]
    async fn grid_config_unknown_table_is_404() {
        let state = test_state().await;
        let err = grid_config(
            State(state),
            Path(("pab".to_string(), "nope".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), crate::api::error::ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn lists_rows_with_link_cells() {
        let state = test_state().await;
        let Json(page) = list_rows(
            State(state),
            Path(("pab".to_string(), "pet".to_string())),
            Query(RowsParams::default()),
        )
        .await
        .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.filtered, 3);
        assert_eq!(page.rows.len(), 3);

        // default order: weight_lb desc -> rex (44.1) first
        let rex = &page.rows[0];
        assert_eq!(rex["name"], "rex");
        let owner = &rex["owner_id"];
        assert_eq!(owner["text"], "ann");
        assert_eq!(owner["table"], "user");
        assert_eq!(owner["filter_col"], "id");
        assert_eq!(owner["filter_id"], 1);

        // stray has a NULL owner -> plain null cell
        let stray = page.rows.iter().find(|r| r["name"] == "stray").unwrap();
        assert!(stray["owner_id"].is_null());
    }

    #[tokio::test]
    async fn lists_rows_with_has_many_counts() {
        let state = test_state().await;
        let Json(page) = list_rows(
            State(state),
            Path(("pab".to_string(), "user".to_string())),
            Query(RowsParams {
                sort: Some("id".to_string()),
                dir: Some(SortDir::Asc),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let ann = &page.rows[0];
        assert_eq!(ann["name"], "ann");
        assert_eq!(ann["pets"]["text"], 2);
        assert_eq!(ann["pets"]["table"], "pet");
        assert_eq!(ann["pets"]["filter_col"], "owner_id");
        assert_eq!(ann["pets"]["filter_id"], 1);

        let bob = &page.rows[1];
        assert_eq!(bob["pets"]["text"], 0);
    }

    #[tokio::test]
    async fn paginates_and_reports_counts() {
        let state = test_state().await;
        let Json(page) = list_rows(
            State(state),
            Path(("pab".to_string(), "pet".to_string())),
            Query(RowsParams {
                page: Some(2),
                per_page: Some(2),
                sort: Some("id".to_string()),
                dir: Some(SortDir::Asc),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0]["id"], 3);
    }

    #[tokio::test]
    async fn filters_by_foreign_key_link() {
        let state = test_state().await;
        let Json(page) = list_rows(
            State(state),
            Path(("pab".to_string(), "pet".to_string())),
            Query(RowsParams {
                filter_col: Some("owner_id".to_string()),
                filter_id: Some(1),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.filtered, 2);
        assert!(page.rows.iter().all(|r| r["owner_id"]["filter_id"] == 1));
    }

    #[tokio::test]
    async fn searches_text_columns() {
        let state = test_state().await;
        let Json(page) = list_rows(
            State(state),
            Path(("pab".to_string(), "pet".to_string())),
            Query(RowsParams {
                search: Some("re".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(page.filtered, 1);
        assert_eq!(page.rows[0]["name"], "rex");
    }

    #[tokio::test]
    async fn rejects_out_of_range_pagination() {
        let state = test_state().await;
        let cases = [
            RowsParams {
                page: Some(0),
                ..Default::default()
            },
            RowsParams {
                per_page: Some(0),
                ..Default::default()
            },
            RowsParams {
                per_page: Some(501),
                ..Default::default()
            },
            // offset multiplication must not overflow
            RowsParams {
                page: Some(i64::MAX),
                per_page: Some(2),
                ..Default::default()
            },
        ];
        for params in cases {
            let err = list_rows(
                State(state.clone()),
                Path(("pab".to_string(), "pet".to_string())),
                Query(params),
            )
            .await
            .unwrap_err();
            assert_eq!(err.code(), crate::api::error::ErrorCode::ValidationError);
        }
    }

    #[tokio::test]
    async fn rejects_half_specified_link_filter() {
        let state = test_state().await;
        let err = list_rows(
            State(state.clone()),
            Path(("pab".to_string(), "pet".to_string())),
            Query(RowsParams {
                filter_col: Some("owner_id".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), crate::api::error::ErrorCode::BadRequest);

        let err = list_rows(
            State(state),
            Path(("pab".to_string(), "pet".to_string())),
            Query(RowsParams {
                filter_id: Some(1),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), crate::api::error::ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn rejects_unknown_sort_and_filter_columns() {
        let state = test_state().await;
        let err = list_rows(
            State(state.clone()),
            Path(("pab".to_string(), "pet".to_string())),
            Query(RowsParams {
                sort: Some("nope".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), crate::api::error::ErrorCode::ValidationError);

        let err = list_rows(
            State(state),
            Path(("pab".to_string(), "pet".to_string())),
            Query(RowsParams {
                filter_col: Some("name".to_string()),
                filter_id: Some(1),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), crate::api::error::ErrorCode::ValidationError);
    }
}
