//! Mutation compilers: INSERT, MERGE upsert, UPDATE…FROM, tuple-correlated
//! DELETE and INSERT…SELECT.
//!
//! Every compiler fails with a usage error on union-sourced (tableless)
//! plans. Statements that may carry an explicit value for an identity column
//! are wrapped in a catalog-probed `SET IDENTITY_INSERT` toggle.

use crate::error::{OrmError, OrmResult};
use crate::expr::Operand;
use crate::ident::{quote, quote_path};
use crate::plan::{Entity, Queryable};
use crate::value::Value;

pub(crate) fn insert_sql(plan: &Queryable, record: &[(String, Value)]) -> OrmResult<String> {
    let table = plan.require_table()?;
    if record.is_empty() {
        return Err(OrmError::usage("insert requires at least one column value"));
    }

    let columns: Vec<String> = record.iter().map(|(key, _)| quote(key)).collect();
    let values: Vec<String> = record.iter().map(|(_, value)| value.to_sql()).collect();

    let mut stmt = format!("INSERT INTO {} ({})", quote(&table.name), columns.join(", "));
    if table.primary_key.len() == 1 {
        stmt.push_str(&format!(" OUTPUT INSERTED.{}", quote(&table.primary_key[0].name)));
    }
    stmt.push_str(&format!(" VALUES ({});", values.join(", ")));

    if payload_carries_primary_key(plan, record)? {
        stmt = wrap_identity_toggle(&table.name, &stmt);
    }
    Ok(stmt)
}

pub(crate) fn insert_range_sql(
    plan: &Queryable,
    records: &[Vec<(String, Value)>],
) -> OrmResult<String> {
    let statements = records
        .iter()
        .map(|record| insert_sql(plan, record))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(statements.join("\n"))
}

pub(crate) fn upsert_sql(
    plan: &Queryable,
    record: &[(String, Value)],
    keys: Option<&[&str]>,
) -> OrmResult<String> {
    let table = plan.require_table()?;
    if record.is_empty() {
        return Err(OrmError::usage("upsert requires at least one column value"));
    }

    let pk_names: Vec<String> = table
        .primary_key
        .iter()
        .map(|pk| pk.name.clone())
        .collect();
    let keys: Vec<String> = match keys {
        Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
        None => pk_names.clone(),
    };
    if keys.is_empty() {
        return Err(OrmError::usage("upsert requires at least one key column"));
    }

    let source: Vec<String> = keys
        .iter()
        .map(|key| format!("{} AS {}", value_of(record, key).to_sql(), quote(key)))
        .collect();
    let on: Vec<String> = keys
        .iter()
        .map(|key| {
            format!(
                "{} = {}",
                quote_path(&[table.name.as_str(), key.as_str()]),
                quote_path(&["match", key.as_str()])
            )
        })
        .collect();
    let updates: Vec<String> = record
        .iter()
        .filter(|(key, _)| !keys.contains(key))
        .map(|(key, value)| {
            format!(
                "{} = {}",
                quote_path(&[table.name.as_str(), key.as_str()]),
                value.to_sql()
            )
        })
        .collect();
    let columns: Vec<String> = record.iter().map(|(key, _)| quote(key)).collect();
    let values: Vec<String> = record.iter().map(|(_, value)| value.to_sql()).collect();

    let mut stmt = format!(
        "MERGE {} USING (SELECT {}) AS {} ON {}",
        quote(&table.name),
        source.join(", "),
        quote("match"),
        on.join(" AND ")
    );
    if !updates.is_empty() {
        stmt.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", updates.join(", ")));
    }
    stmt.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({}) OUTPUT INSERTED.{};",
        columns.join(", "),
        values.join(", "),
        quote(&keys[0])
    ));

    // The toggle only applies when merging on the primary key itself: an
    // upsert keyed by some other unique column never inserts an explicit
    // identity value on the key path.
    let mut sorted_keys = keys.clone();
    sorted_keys.sort();
    let mut sorted_pk = pk_names.clone();
    sorted_pk.sort();
    if payload_carries_primary_key(plan, record)? && sorted_keys == sorted_pk {
        stmt = wrap_identity_toggle(&table.name, &stmt);
    }
    Ok(stmt)
}

pub(crate) fn upsert_range_sql(
    plan: &Queryable,
    records: &[Vec<(String, Value)>],
    keys: Option<&[&str]>,
) -> OrmResult<String> {
    let statements = records
        .iter()
        .map(|record| upsert_sql(plan, record, keys))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(statements.join("\n"))
}

pub(crate) fn update_sql<F>(plan: &Queryable, f: F) -> OrmResult<String>
where
    F: FnOnce(&Entity) -> Vec<(String, Operand)>,
{
    plan.require_table()?;
    let select_sql = plan.to_sql()?;

    // The projector sees the post-projection shape: assignments reference
    // the wrapped alias, and unchanged entries diff out.
    let entity = plan.wrap().entity();
    let assignments = f(&entity);

    let mut sets: Vec<String> = Vec::new();
    for (key, op) in assignments {
        let current = entity.col(&key);
        if matches!(&op, Operand::Unit(unit) if unit.sql == current.sql) {
            continue;
        }
        sets.push(format!("{} = {}", quote(&key), op.value_sql()));
    }
    if sets.is_empty() {
        return Err(OrmError::usage("update produced no changed assignments"));
    }

    Ok(format!(
        "UPDATE {} SET {} FROM ({select_sql}) AS {}",
        quote(&plan.alias),
        sets.join(", "),
        quote(&plan.alias)
    ))
}

pub(crate) fn delete_sql(plan: &Queryable) -> OrmResult<String> {
    let table = plan.require_table()?;
    if table.primary_key.is_empty() {
        return Err(OrmError::usage("delete requires a primary key"));
    }
    let pk: Vec<String> = table
        .primary_key
        .iter()
        .map(|col| col.name.clone())
        .collect();

    let subquery = plan
        .select(|e| {
            pk.iter()
                .map(|key| (key.clone(), Operand::Unit(e.col(key))))
                .collect()
        })
        .to_sql()?;

    // Tuple-equality correlation: one EXISTS over the key subquery, each key
    // column compared separately, so distinct key tuples never collide.
    let correlation: Vec<String> = pk
        .iter()
        .map(|key| {
            format!(
                "{} = {}",
                quote_path(&["KEYS", key.as_str()]),
                quote_path(&[table.name.as_str(), key.as_str()])
            )
        })
        .collect();

    Ok(format!(
        "DELETE FROM {} WHERE EXISTS (SELECT 1 FROM ({subquery}) AS [KEYS] WHERE {})",
        quote(&table.name),
        correlation.join(" AND ")
    ))
}

pub(crate) fn insert_to_sql<F>(
    plan: &Queryable,
    target: &Queryable,
    f: F,
) -> OrmResult<String>
where
    F: FnOnce(&Entity) -> Vec<(String, Operand)>,
{
    let target_table = target.require_table()?;
    let projected = plan.select(f);

    let columns: Vec<String> = projected.select.iter().map(|(key, _)| quote(key)).collect();
    let mut stmt = format!(
        "INSERT INTO {} ({})",
        quote(&target_table.name),
        columns.join(", ")
    );
    if target_table.primary_key.len() == 1 {
        stmt.push_str(&format!(
            " OUTPUT INSERTED.{}",
            quote(&target_table.primary_key[0].name)
        ));
    }
    stmt.push(' ');
    stmt.push_str(&projected.to_sql()?);
    Ok(stmt)
}

fn payload_carries_primary_key(
    plan: &Queryable,
    record: &[(String, Value)],
) -> OrmResult<bool> {
    let table = plan.require_table()?;
    Ok(table
        .primary_key
        .iter()
        .any(|pk| record.iter().any(|(key, _)| *key == pk.name)))
}

fn wrap_identity_toggle(table: &str, stmt: &str) -> String {
    let probe = |state: &str| {
        format!(
            "IF EXISTS (SELECT [NAME] FROM SYS.IDENTITY_COLUMNS WHERE OBJECT_NAME(OBJECT_ID) = {}) \
             BEGIN SET IDENTITY_INSERT {} {state}; END",
            Value::from(table).to_sql(),
            quote(table)
        )
    };
    format!("{}\n{stmt}\n{}", probe("ON"), probe("OFF"))
}

fn value_of(record: &[(String, Value)], key: &str) -> Value {
    record
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .unwrap_or(Value::Null)
}
