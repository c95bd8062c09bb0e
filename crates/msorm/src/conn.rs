//! Connection and transaction management.
//!
//! A [`DbConn`] is one pooled connection plus at most one active READ
//! COMMITTED transaction. All statement text is executed as-is: queries run
//! through `simple_query` (multiple result sets), mutations without result
//! rows through `execute` (affected-row counts). A client-side prepared
//! buffer batches statement text and flushes it in a single round trip.

use deadpool::managed::Object;
use tiberius::Row;

use crate::error::{OrmError, OrmResult};
use crate::ident::quote;
use crate::pool::{TdsManager, TdsPool};
use crate::schema::TableSchema;
use crate::value::Value;

/// Connection descriptor.
#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Default schema ensured at initialization; table names in compiled SQL
    /// are used verbatim.
    pub schema: Option<String>,
}

impl DbConfig {
    pub(crate) fn to_driver_config(&self) -> tiberius::Config {
        let mut config = tiberius::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(tiberius::AuthMethod::sql_server(&self.user, &self.password));
        config.trust_cert();
        config
    }
}

/// One checked-out connection with optional active transaction.
pub struct DbConn {
    client: Object<TdsManager>,
    default_schema: Option<String>,
    in_transaction: bool,
    prepared: Vec<String>,
}

impl DbConn {
    /// Check a connection out of the pool.
    pub async fn connect(pool: &TdsPool) -> OrmResult<Self> {
        let default_schema = pool.manager().default_schema().map(str::to_string);
        let client = pool.get().await?;
        Ok(Self {
            client,
            default_schema,
            in_transaction: false,
            prepared: Vec::new(),
        })
    }

    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Begin a READ COMMITTED transaction. Nested transactions are a usage
    /// error; one unit of work owns exactly one transaction.
    pub async fn begin(&mut self) -> OrmResult<()> {
        if self.in_transaction {
            return Err(OrmError::usage("a transaction is already active"));
        }
        self.query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED; BEGIN TRANSACTION;")
            .await?;
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit(&mut self) -> OrmResult<()> {
        if !self.in_transaction {
            return Err(OrmError::usage("no active transaction to commit"));
        }
        self.query("COMMIT TRANSACTION;").await?;
        self.in_transaction = false;
        Ok(())
    }

    pub async fn rollback(&mut self) -> OrmResult<()> {
        if !self.in_transaction {
            return Err(OrmError::usage("no active transaction to roll back"));
        }
        self.query("ROLLBACK TRANSACTION;").await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Execute statement text and collect every result set.
    pub async fn query(&mut self, sql: &str) -> OrmResult<Vec<Vec<Row>>> {
        tracing::debug!(sql = %sql, "execute query");
        let stream = self.client.simple_query(sql).await.map_err(|e| {
            tracing::error!(error = %e, sql = %sql, "query failed");
            OrmError::from_db_error(sql, e)
        })?;
        stream.into_results().await.map_err(|e| {
            tracing::error!(error = %e, sql = %sql, "query failed");
            OrmError::from_db_error(sql, e)
        })
    }

    /// Execute statement text and return the summed affected-row count.
    pub async fn execute(&mut self, sql: &str) -> OrmResult<u64> {
        tracing::debug!(sql = %sql, "execute statement");
        let result = self.client.execute(sql, &[]).await.map_err(|e| {
            tracing::error!(error = %e, sql = %sql, "statement failed");
            OrmError::from_db_error(sql, e)
        })?;
        Ok(result.rows_affected().iter().sum())
    }

    /// Enqueue statement text on the client-side prepared buffer.
    pub fn prepare(&mut self, sql: impl Into<String>) {
        self.prepared.push(sql.into());
    }

    pub fn prepared_len(&self) -> usize {
        self.prepared.len()
    }

    /// Flush the prepared buffer as one batch and clear it.
    pub async fn execute_prepared(&mut self) -> OrmResult<Vec<Vec<Row>>> {
        if self.prepared.is_empty() {
            return Ok(Vec::new());
        }
        let sql = self.prepared.join("\n\n");
        self.prepared.clear();
        self.query(&sql).await
    }

    /// Call a stored procedure with named parameters; returns its result
    /// sets.
    pub async fn call(&mut self, name: &str, params: &[(&str, Value)]) -> OrmResult<Vec<Vec<Row>>> {
        let args: Vec<String> = params
            .iter()
            .map(|(key, value)| format!("@{key} = {}", value.to_sql()))
            .collect();
        let sql = if args.is_empty() {
            format!("EXEC {}", quote(name))
        } else {
            format!("EXEC {} {}", quote(name), args.join(", "))
        };
        self.query(&sql).await
    }

    /// Stream records through the server bulk-copy channel.
    pub async fn bulk(
        &mut self,
        table: &TableSchema,
        records: &[Vec<(String, Value)>],
    ) -> OrmResult<()> {
        let rows = crate::bulk::token_rows(table, records)?;
        tracing::debug!(table = %table.name, rows = rows.len(), "bulk insert");
        let context = format!("BULK INSERT {}", table.name);
        let mut request = self
            .client
            .bulk_insert(&table.name)
            .await
            .map_err(|e| OrmError::from_db_error(context.clone(), e))?;
        for row in rows {
            request
                .send(row)
                .await
                .map_err(|e| OrmError::from_db_error(context.clone(), e))?;
        }
        request
            .finalize()
            .await
            .map_err(|e| OrmError::from_db_error(context.clone(), e))?;
        Ok(())
    }
}

/// Runs the given block as one unit of work: check out a connection, begin a
/// transaction, commit on `Ok`, roll back (then propagate) on `Err`.
///
/// The block must evaluate to `msorm::OrmResult<T>`.
///
/// # Example
///
/// ```ignore
/// let total = msorm::unit_of_work!(&pool, conn, {
///     ctx.initialize(&mut conn, false).await?;
///     ctx.from("Customer")?.count(&mut conn).await
/// })?;
/// ```
#[macro_export]
macro_rules! unit_of_work {
    ($pool:expr, $conn:ident, $body:block) => {{
        let mut $conn = $crate::conn::DbConn::connect($pool).await?;
        $conn.begin().await?;

        let __msorm_body_result = async { $body }.await;
        match __msorm_body_result {
            Ok(value) => {
                $conn.commit().await?;
                Ok(value)
            }
            Err(error) => match $conn.rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::OrmError::Connection(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}
