//! The catalog: everything the service knows about its tables, built once at
//! startup from the configuration and schema metadata files. Request handlers
//! resolve `(database, table)` against it and reuse the prebuilt select plans
//! and parsed computed-column expressions.

pub mod plan;

pub use plan::{fk_companion, RowQuery, SelectPlan};

use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::info;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::schema::{DatabaseSchema, Expr, TableSpec};

pub struct TableEntry {
    pub spec: TableSpec,
    pub plan: SelectPlan,
    /// Computed columns with their parsed expressions, in spec order
    pub computed: Vec<(String, Expr)>,
}

pub struct Database {
    pub name: String,
    pub pool: DbPool,
    tables: Vec<TableEntry>,
    index: HashMap<String, usize>,
}

impl Database {
    /// Open the pool, create missing tables, and build the per-table plans.
    pub async fn open(name: &str, path: &str, schema: DatabaseSchema) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open database '{}' at {}", name, path))?;
        db::ensure_tables(&pool, &schema)
            .await
            .with_context(|| format!("Failed to ensure tables for database '{}'", name))?;

        let mut tables = Vec::new();
        let mut index = HashMap::new();
        for spec in &schema.tables {
            let plan = SelectPlan::build(&schema, spec);
            let mut computed = Vec::new();
            for col in spec.computed_columns() {
                // already validated at schema load
                let src = col.computed.as_deref().unwrap_or_default();
                let expr = Expr::parse(src).with_context(|| {
                    format!("{}.{}: invalid computed expression", spec.name, col.name)
                })?;
                computed.push((col.name.clone(), expr));
            }
            index.insert(spec.name.clone(), tables.len());
            tables.push(TableEntry {
                spec: spec.clone(),
                plan,
                computed,
            });
        }

        info!(database = name, tables = tables.len(), "Database opened");
        Ok(Database {
            name: name.to_string(),
            pool,
            tables,
            index,
        })
    }

    pub fn table(&self, name: &str) -> Option<&TableEntry> {
        self.index.get(name).map(|&i| &self.tables[i])
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableEntry> {
        self.tables.iter()
    }
}

pub struct Catalog {
    databases: Vec<Database>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub async fn build(config: &Config) -> Result<Self> {
        let mut databases = Vec::new();
        for db_config in &config.databases {
            let schema = DatabaseSchema::load(&db_config.schema)?;
            let database = Database::open(&db_config.name, &db_config.path, schema).await?;
            databases.push(database);
        }
        Ok(Self::from_databases(databases))
    }

    pub fn from_databases(databases: Vec<Database>) -> Self {
        let index = databases
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        Catalog { databases, index }
    }

    pub fn database(&self, name: &str) -> Option<&Database> {
        self.index.get(name).map(|&i| &self.databases[i])
    }

    pub fn databases(&self) -> impl Iterator<Item = &Database> {
        self.databases.iter()
    }

    pub fn resolve(&self, database: &str, table: &str) -> Option<(&Database, &TableEntry)> {
        let db = self.database(database)?;
        let entry = db.table(table)?;
        Some((db, entry))
    }
}
