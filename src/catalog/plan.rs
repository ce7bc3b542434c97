//! Per-table select plans.
//!
//! A `SelectPlan` is built once at startup for every served table. It fixes
//! the select list (stored columns, LEFT JOINs for foreign key display
//! columns, correlated COUNT subqueries for has-many columns), the default
//! ordering, and the sets of sortable/searchable/filterable columns. Request
//! handlers only append WHERE/ORDER/LIMIT fragments with bound parameters;
//! no identifier from the request ever reaches the SQL text.

use std::collections::HashSet;

use crate::db::rows::{RowShape, SqlBind, ValueType};
use crate::schema::{DatabaseSchema, SortDir, TableSpec};

/// Companion select label carrying the raw foreign key id next to a display
/// column, used to build link cells and to detect NULL references.
pub fn fk_companion(column: &str) -> String {
    format!("{}__fk", column)
}

/// Per-request query parameters applied on top of a plan.
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    /// Relational link filter: (stored column name, id value)
    pub filter: Option<(String, i64)>,
    /// Substring search across stored text columns
    pub search: Option<String>,
    /// Sort override; defaults to the plan's default order
    pub sort: Option<(String, SortDir)>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub table: String,
    /// `SELECT ... FROM "t" t LEFT JOIN ...` without WHERE/ORDER/LIMIT
    select_from: String,
    /// Decode shape of a fetched row, in select-list order
    pub shape: RowShape,
    pub default_order: (String, SortDir),
    sortable: HashSet<String>,
    /// Qualified stored text columns participating in `search`
    searchable: Vec<String>,
    /// Columns accepted as `filter_col`: `id` plus stored foreign keys
    filterable: HashSet<String>,
}

impl SelectPlan {
    pub fn build(schema: &DatabaseSchema, spec: &TableSpec) -> SelectPlan {
        let mut select = vec!["t.\"id\" AS \"id\"".to_string()];
        let mut joins = Vec::new();
        let mut shape = RowShape::new();
        shape.push("id", ValueType::Int);

        let mut sortable: HashSet<String> = HashSet::new();
        sortable.insert("id".to_string());
        let mut searchable = Vec::new();
        let mut filterable: HashSet<String> = HashSet::new();
        filterable.insert("id".to_string());

        let mut alias_idx = 0usize;
        for col in &spec.columns {
            if col.name == "id" {
                continue;
            }
            sortable.insert(col.name.clone());

            if let Some(ref reference) = col.references {
                // one alias per fk column; a table may reference the same
                // target twice (e.g. two user fks)
                let alias = format!("r{}", alias_idx);
                alias_idx += 1;
                joins.push(format!(
                    "LEFT JOIN \"{}\" {} ON t.\"{}\" = {}.\"id\"",
                    reference.table, alias, col.name, alias
                ));
                select.push(format!(
                    "{}.\"{}\" AS \"{}\"",
                    alias, reference.display, col.name
                ));
                let display_ty = if reference.display == "id" {
                    ValueType::Int
                } else {
                    schema
                        .table(&reference.table)
                        .and_then(|t| t.column(&reference.display))
                        .map(|c| ValueType::from(c.effective_type()))
                        .unwrap_or(ValueType::Text)
                };
                shape.push(&col.name, display_ty);
                select.push(format!("{}.\"id\" AS \"{}\"", alias, fk_companion(&col.name)));
                shape.push(&fk_companion(&col.name), ValueType::Int);
                filterable.insert(col.name.clone());
            } else if let Some(ref has_many) = col.has_many {
                select.push(format!(
                    "(SELECT COUNT(*) FROM \"{}\" WHERE \"{}\".\"{}\" = t.\"id\") AS \"{}\"",
                    has_many.table, has_many.table, has_many.foreign_key, col.name
                ));
                shape.push(&col.name, ValueType::Int);
            } else {
                select.push(format!("t.\"{}\" AS \"{}\"", col.name, col.name));
                let ty = ValueType::from(col.effective_type());
                shape.push(&col.name, ty);
                if matches!(ty, ValueType::Text) {
                    searchable.push(format!("t.\"{}\"", col.name));
                }
            }
        }

        let mut select_from = format!(
            "SELECT {} FROM \"{}\" t",
            select.join(", "),
            spec.name
        );
        for join in &joins {
            select_from.push(' ');
            select_from.push_str(join);
        }

        SelectPlan {
            table: spec.name.clone(),
            select_from,
            shape,
            default_order: spec.default_order(),
            sortable,
            searchable,
            filterable,
        }
    }

    pub fn is_sortable(&self, column: &str) -> bool {
        self.sortable.contains(column)
    }

    pub fn is_filterable(&self, column: &str) -> bool {
        self.filterable.contains(column)
    }

    fn where_clause(&self, query: &RowQuery) -> (String, Vec<SqlBind>) {
        let mut parts = Vec::new();
        let mut binds = Vec::new();

        if let Some((ref col, id)) = query.filter {
            parts.push(format!("t.\"{}\" = ?", col));
            binds.push(SqlBind::Int(id));
        }

        if let Some(ref needle) = query.search {
            if !needle.is_empty() && !self.searchable.is_empty() {
                let pattern = format!("%{}%", needle);
                let likes: Vec<String> = self
                    .searchable
                    .iter()
                    .map(|col| format!("{} LIKE ?", col))
                    .collect();
                parts.push(format!("({})", likes.join(" OR ")));
                for _ in &self.searchable {
                    binds.push(SqlBind::Text(pattern.clone()));
                }
            }
        }

        if parts.is_empty() {
            (String::new(), binds)
        } else {
            (format!(" WHERE {}", parts.join(" AND ")), binds)
        }
    }

    /// Full page query: select list, filters, order, pagination.
    pub fn select_sql(&self, query: &RowQuery) -> (String, Vec<SqlBind>) {
        let (where_sql, mut binds) = self.where_clause(query);
        let (order_col, order_dir) = query
            .sort
            .clone()
            .unwrap_or_else(|| self.default_order.clone());
        let sql = format!(
            "{}{} ORDER BY \"{}\" {} LIMIT ? OFFSET ?",
            self.select_from,
            where_sql,
            order_col,
            order_dir.as_sql()
        );
        binds.push(SqlBind::Int(query.limit));
        binds.push(SqlBind::Int(query.offset));
        (sql, binds)
    }

    /// Single-row fetch by primary key.
    pub fn select_one_sql(&self) -> String {
        format!("{} WHERE t.\"id\" = ?", self.select_from)
    }

    /// Unfiltered row count for the grid footer.
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM \"{}\" t", self.table)
    }

    /// Count with the request's filters applied. Filters only touch stored
    /// columns of `t`, so the joins can be skipped.
    pub fn filtered_count_sql(&self, query: &RowQuery) -> (String, Vec<SqlBind>) {
        let (where_sql, binds) = self.where_clause(query);
        (
            format!("SELECT COUNT(*) FROM \"{}\" t{}", self.table, where_sql),
            binds,
        )
    }
}
