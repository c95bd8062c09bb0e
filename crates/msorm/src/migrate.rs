//! Schema initialization and the migration ledger.
//!
//! A [`DbContext`] owns the schema catalog and the ordered migration scripts.
//! `initialize` probes the reserved `_migration` table: when it is missing
//! (or `force` is set) the whole database is rebuilt from the catalog and the
//! ledger seeded with every known migration code; otherwise only scripts
//! newer than the last recorded code are applied, in code order, each
//! execution followed by its ledger entry.
//!
//! `initialize` performs no transaction control of its own; run it inside a
//! unit of work so a mid-batch failure rolls the ledger and schema back
//! together.

use std::sync::Arc;

use crate::conn::DbConn;
use crate::ddl;
use crate::error::{OrmError, OrmResult};
use crate::plan::Queryable;
use crate::schema::{ColumnSchema, DataType, SchemaCatalog, SortOrder, TableSchema};
use crate::value::Value;

const MIGRATION_TABLE: &str = "_migration";

/// One migration: a unique, ordered code and its script.
#[derive(Clone, Debug, PartialEq)]
pub struct Migration {
    pub code: String,
    pub sql: String,
}

impl Migration {
    pub fn new(code: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            sql: sql.into(),
        }
    }
}

/// Catalog plus migrations: the root object plans are derived from.
pub struct DbContext {
    catalog: Arc<SchemaCatalog>,
    migrations: Vec<Migration>,
}

impl DbContext {
    pub fn new(catalog: Arc<SchemaCatalog>, migrations: Vec<Migration>) -> Self {
        Self {
            catalog,
            migrations,
        }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Root a plan at a registered table.
    pub fn from(&self, table: &str) -> OrmResult<Queryable> {
        Queryable::from_table(self.catalog.clone(), table)
    }

    /// Root a plan at the `UNION ALL` of the given plans.
    pub fn union_all(&self, plans: Vec<Queryable>) -> OrmResult<Queryable> {
        Queryable::union_all(self.catalog.clone(), plans)
    }

    /// Initialize or catch up the database schema.
    pub async fn initialize(&self, conn: &mut DbConn, force: bool) -> OrmResult<()> {
        let probe = format!(
            "SELECT COUNT(*) AS [cnt] FROM sys.tables WHERE name = '{MIGRATION_TABLE}'"
        );
        let sets = conn.query(&probe).await?;
        let has_ledger = match sets.first().and_then(|set| set.first()) {
            Some(row) => {
                row.try_get::<i32, _>(0)
                    .map_err(|e| OrmError::decode("cnt", e.to_string()))?
                    .unwrap_or(0)
                    > 0
            }
            None => false,
        };

        if force || !has_ledger {
            self.rebuild(conn).await
        } else {
            self.catch_up(conn).await
        }
    }

    /// Drop everything, replay the catalog, seed the ledger.
    async fn rebuild(&self, conn: &mut DbConn) -> OrmResult<()> {
        if let Some(schema) = conn.default_schema().map(str::to_string) {
            conn.execute(&ddl::create_schema(&schema)).await?;
        }
        conn.execute(&ddl::clear_database()).await?;

        for table in self.catalog.tables() {
            if table.columns.is_empty() {
                return Err(OrmError::Migration(format!(
                    "table '{}' declares no columns",
                    table.name
                )));
            }
            conn.execute(&ddl::create_table(table)).await?;
            if let Some(pk) = ddl::create_primary_key(table) {
                conn.execute(&pk).await?;
            }
            for index in &table.indexes {
                conn.execute(&ddl::create_index(table, index)).await?;
            }
        }

        // Foreign keys last, once every table exists.
        for table in self.catalog.tables() {
            for fk in &table.foreign_keys {
                let target = self.catalog.table(&fk.target_table)?;
                conn.execute(&ddl::create_foreign_key(table, fk, target))
                    .await?;
            }
        }

        for function in self.catalog.functions() {
            conn.execute(&function.body).await?;
        }
        for procedure in self.catalog.procedures() {
            conn.execute(&procedure.body).await?;
        }

        let ledger = ledger_schema();
        let mut batch = vec![ddl::create_table(&ledger)];
        if let Some(pk) = ddl::create_primary_key(&ledger) {
            batch.push(pk);
        }
        for migration in &self.migrations {
            batch.push(record_statement(&migration.code));
        }
        conn.execute(&batch.join("\n")).await?;
        Ok(())
    }

    /// Apply only migrations newer than the last recorded code, in order.
    async fn catch_up(&self, conn: &mut DbConn) -> OrmResult<()> {
        let sets = conn
            .query(&format!(
                "SELECT MAX([code]) AS [code] FROM [{MIGRATION_TABLE}]"
            ))
            .await?;
        let last: Option<String> = match sets.first().and_then(|set| set.first()) {
            Some(row) => row
                .try_get::<&str, _>(0)
                .map_err(|e| OrmError::decode("code", e.to_string()))?
                .map(str::to_string),
            None => None,
        };

        let mut pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| match &last {
                Some(code) => m.code.as_str() > code.as_str(),
                None => true,
            })
            .collect();
        pending.sort_by(|a, b| a.code.cmp(&b.code));

        for migration in pending {
            conn.execute(&migration.sql).await?;
            conn.execute(&record_statement(&migration.code)).await?;
        }
        Ok(())
    }
}

fn ledger_schema() -> TableSchema {
    TableSchema::builder(MIGRATION_TABLE)
        .column(ColumnSchema::new("code", DataType::String(Some(255))))
        .primary_key("code", SortOrder::Asc)
        .build()
}

fn record_statement(code: &str) -> String {
    format!(
        "INSERT INTO [{MIGRATION_TABLE}] ([code]) VALUES ({});",
        Value::from(code).to_sql()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_schema_shape() {
        let ledger = ledger_schema();
        assert_eq!(ledger.name, "_migration");
        assert_eq!(ledger.primary_key.len(), 1);
        assert_eq!(ledger.primary_key[0].name, "code");
    }

    #[test]
    fn test_record_statement_escapes_code() {
        assert_eq!(
            record_statement("2024-01-01-init"),
            "INSERT INTO [_migration] ([code]) VALUES (N'2024-01-01-init');"
        );
    }
}
