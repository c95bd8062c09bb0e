//! Result mapper: flat rowsets with dotted join-path columns become nested
//! entity trees.
//!
//! Columns belonging to a joined relation arrive as `alias.sub.column`. The
//! mapper collects the distinct join-path prefixes, processes them deepest
//! first, and for each prefix groups rows by structural equality of every
//! column outside the prefix, collapsing the prefixed columns into one nested
//! record (single relations) or a list of them (multi relations). Inner
//! relations are therefore materialized before the outer ones consume them.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::OrmResult;
use crate::row::{Cell, Record};
use crate::schema::DataType;
use crate::value::Value;

/// Per-plan metadata the mapper needs: logical column tags for read coercion
/// and the multiplicity of each join path.
#[derive(Clone, Debug, Default)]
pub struct SelectMeta {
    /// Flat (dotted) select key to logical type, where known.
    pub column_types: HashMap<String, DataType>,
    /// Join path to multiplicity (`true` = multi).
    pub multi_paths: HashMap<String, bool>,
}

/// Map a flat rowset into nested records.
pub fn map_rows(meta: &SelectMeta, raw_rows: Vec<Vec<(String, Value)>>) -> OrmResult<Vec<Record>> {
    let mut rows: Vec<Record> = Vec::with_capacity(raw_rows.len());
    let mut paths: Vec<String> = Vec::new();

    for raw in raw_rows {
        let mut rec = Record::new();
        for (key, value) in raw {
            if let Some((prefix, _)) = key.rsplit_once('.') {
                if !paths.iter().any(|p| p == prefix) {
                    paths.push(prefix.to_string());
                }
            }
            let value = coerce(meta, &key, value);
            rec.insert(key, Cell::Scalar(value));
        }
        rows.push(rec);
    }

    // Deepest paths first; insertion order breaks ties.
    paths.sort_by(|a, b| b.matches('.').count().cmp(&a.matches('.').count()));

    for path in &paths {
        let multi = meta.multi_paths.get(path).copied().unwrap_or(false);
        rows = regroup(rows, path, multi);
    }

    Ok(rows)
}

/// Read-side coercion: boolean tags to strict booleans, date-only tags
/// delivered as date-times to dates, UUID-shaped strings to UUIDs.
fn coerce(meta: &SelectMeta, key: &str, value: Value) -> Value {
    match (meta.column_types.get(key), value) {
        (Some(DataType::Boolean), Value::I32(v)) => Value::Bool(v != 0),
        (Some(DataType::Boolean), Value::I64(v)) => Value::Bool(v != 0),
        (Some(DataType::DateOnly), Value::DateTime(dt)) => Value::Date(dt.date()),
        (_, Value::String(s)) => match parse_uuid_shape(&s) {
            Some(u) => Value::Uuid(u),
            None => Value::String(s),
        },
        (_, v) => v,
    }
}

fn parse_uuid_shape(s: &str) -> Option<Uuid> {
    if s.len() != 36 {
        return None;
    }
    Uuid::parse_str(s).ok()
}

/// Collapse one join path: group rows by everything outside the path, then
/// fold the path's columns of each group into nested records.
fn regroup(rows: Vec<Record>, path: &str, multi: bool) -> Vec<Record> {
    let prefix = format!("{path}.");

    let mut groups: Vec<(Record, Vec<Record>)> = Vec::new();
    for row in rows {
        let key: Record = row
            .iter()
            .filter(|(k, _)| !k.starts_with(&prefix))
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(row),
            None => groups.push((key, vec![row])),
        }
    }

    groups
        .into_iter()
        .map(|(mut key, members)| {
            let mut nested: Vec<Record> = Vec::new();
            for member in members {
                let sub: Record = member
                    .0
                    .into_iter()
                    .filter_map(|(k, cell)| {
                        if !k.starts_with(&prefix) {
                            return None;
                        }
                        if matches!(cell, Cell::Scalar(Value::Null)) {
                            return None;
                        }
                        Some((k[prefix.len()..].to_string(), cell))
                    })
                    .collect();
                if !sub.is_empty() {
                    nested.push(sub);
                }
            }
            if multi {
                if !nested.is_empty() {
                    key.insert(path, Cell::Rows(nested));
                }
            } else if let Some(first) = nested.into_iter().next() {
                key.insert(path, Cell::Row(first));
            }
            key
        })
        .collect()
}
