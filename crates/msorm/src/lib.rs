//! # msorm
//!
//! A plan-first, SQL Server-only ORM for Rust.
//!
//! ## Features
//!
//! - **Immutable query plans**: chainable builder calls over a declared
//!   schema catalog; every call clones before mutating, so plans branch freely
//! - **Lazy compilation**: a plan becomes T-SQL text only when a terminal
//!   call runs; compiling the same plan twice yields identical SQL
//! - **Relation-aware joins**: `include` walks foreign-key metadata and picks
//!   a flat JOIN or a correlated APPLY per plan shape
//! - **Nested results**: flat rowsets with dotted join-path columns map back
//!   into nested entity trees
//! - **Managed units of work**: one pooled connection, one READ COMMITTED
//!   transaction, commit on success, rollback on error
//!
//! ## Example
//!
//! ```ignore
//! use msorm::{expr, record, unit_of_work, DbContext};
//!
//! let customers = ctx.from("Customer")?;
//! let rows = unit_of_work!(&pool, conn, {
//!     customers
//!         .include("region")?
//!         .filter(|e| vec![expr::greater_than(e.col("id"), 100)])
//!         .result(&mut conn)
//!         .await
//! })?;
//! ```

pub mod conn;
pub mod ddl;
pub mod error;
pub mod expr;
pub mod ident;
pub mod mapper;
pub mod migrate;
pub mod plan;
pub mod pool;
pub mod row;
pub mod schema;
pub mod value;

mod bulk;

pub use conn::{DbConfig, DbConn};
pub use error::{OrmError, OrmResult};
pub use expr::{CaseBuilder, Operand, QueryUnit};
pub use mapper::SelectMeta;
pub use migrate::{DbContext, Migration};
pub use plan::{Entity, JoinSource, Queryable};
pub use pool::{create_pool, create_pool_with_size, TdsClient, TdsManager, TdsPool};
pub use row::{Cell, Record};
pub use schema::{
    ColumnSchema, DataType, ForeignKeySchema, ForeignKeyTargetSchema, FunctionSchema,
    IndexSchema, PrimaryKeyColumn, ProcedureSchema, SchemaCatalog, SortOrder, TableSchema,
};
pub use value::Value;

/// Build a mutation payload: `record! { "id" => 7, "name" => "x" }`.
#[macro_export]
macro_rules! record {
    ($($key:expr => $value:expr),* $(,)?) => {
        vec![$(($key.to_string(), $crate::Value::from($value))),*]
    };
}
