pub mod rows;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

use crate::schema::{DatabaseSchema, TableSpec};

pub type DbPool = SqlitePool;

/// Open a pool for one SQLite file with WAL and foreign key enforcement.
/// `:memory:` databases are capped at a single connection so every handle
/// sees the same data.
pub async fn connect(path: &str) -> Result<DbPool> {
    let in_memory = path == ":memory:";
    let options = SqliteConnectOptions::from_str(if in_memory { ":memory:" } else { path })?
        .create_if_missing(true)
        .journal_mode(if in_memory {
            SqliteJournalMode::Memory
        } else {
            SqliteJournalMode::Wal
        })
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create any missing tables from the schema metadata.
///
/// SQLite resolves foreign key targets at DML time, so creation order does
/// not matter.
pub async fn ensure_tables(pool: &DbPool, schema: &DatabaseSchema) -> Result<()> {
    for table in &schema.tables {
        sqlx::query(&create_table_sql(table)).execute(pool).await?;
    }
    info!(tables = schema.tables.len(), "Schema tables ensured");
    Ok(())
}

/// Generate `CREATE TABLE IF NOT EXISTS` DDL for one table spec.
pub fn create_table_sql(spec: &TableSpec) -> String {
    let mut defs = vec!["\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    for col in spec.stored_columns() {
        let mut def = format!("\"{}\" {}", col.name, col.effective_type().sql_affinity());
        if col.required && col.computed.is_none() {
            def.push_str(" NOT NULL");
        }
        if let Some(ref reference) = col.references {
            def.push_str(&format!(
                " REFERENCES \"{}\"(\"id\") ON DELETE SET NULL ON UPDATE CASCADE",
                reference.table
            ));
        }
        defs.push(def);
    }
    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        spec.name,
        defs.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pet_schema() -> DatabaseSchema {
        DatabaseSchema::from_toml(
            r#"
            [[tables]]
            name = "user"
            [[tables.columns]]
            name = "name"
            type = "text"
            required = true
            [[tables.columns]]
            name = "pets"
            has_many = { table = "pet", foreign_key = "owner_id" }

            [[tables]]
            name = "pet"
            [[tables.columns]]
            name = "name"
            type = "text"
            required = true
            [[tables.columns]]
            name = "owner_id"
            references = { table = "user", display = "name" }
            [[tables.columns]]
            name = "weight_lb"
            type = "real"
            [[tables.columns]]
            name = "weight_kg"
            type = "real"
            computed = "weight_lb / 2.205"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn generates_ddl_with_fk_clause() {
        let schema = pet_schema();
        let sql = create_table_sql(schema.table("pet").unwrap());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"pet\" (\
             \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"name\" TEXT NOT NULL, \
             \"owner_id\" INTEGER REFERENCES \"user\"(\"id\") ON DELETE SET NULL ON UPDATE CASCADE, \
             \"weight_lb\" REAL, \
             \"weight_kg\" REAL)"
        );
    }

    #[test]
    fn virtual_columns_are_not_in_ddl() {
        let schema = pet_schema();
        let sql = create_table_sql(schema.table("user").unwrap());
        assert!(!sql.contains("pets"));
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        use sqlx::Row;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pets.sqlite");
        let path = path.to_str().unwrap();
        let schema = pet_schema();

        let pool = connect(path).await.unwrap();
        ensure_tables(&pool, &schema).await.unwrap();
        sqlx::query("INSERT INTO user (name) VALUES ('ann')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = connect(path).await.unwrap();
        let row = sqlx::query("SELECT COUNT(*) FROM user")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.try_get::<i64, _>(0).unwrap(), 1);
    }

    #[tokio::test]
    async fn creates_tables_in_memory() {
        let schema = pet_schema();
        let pool = connect(":memory:").await.unwrap();
        ensure_tables(&pool, &schema).await.unwrap();

        sqlx::query("INSERT INTO user (name) VALUES ('ann')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO pet (name, owner_id, weight_lb) VALUES ('rex', 1, 44.1)")
            .execute(&pool)
            .await
            .unwrap();

        // FK enforcement is on: inserting a pet for a missing owner fails
        let err = sqlx::query("INSERT INTO pet (name, owner_id) VALUES ('ghost', 99)")
            .execute(&pool)
            .await;
        assert!(err.is_err());
    }
}
