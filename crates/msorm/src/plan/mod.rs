//! Query plans: immutable, clone-on-write descriptions of a query.
//!
//! A [`Queryable`] is rooted at a table (or a union of plans), accumulates
//! projections, joins, predicates, grouping, ordering and limits through pure
//! builder calls, and compiles to T-SQL only when a terminal operation runs.
//! Every builder method clones before mutating, so plans can be branched
//! freely; nothing observable is shared between derived plans.

mod compile;
mod entity;
mod mutation;
#[cfg(test)]
mod tests;

pub use entity::Entity;

use std::collections::HashMap;
use std::sync::Arc;

use crate::conn::DbConn;
use crate::error::{OrmError, OrmResult};
use crate::expr::{self, Operand, QueryUnit};
use crate::ident::quote_path;
use crate::mapper::{self, SelectMeta};
use crate::row::{self, Record};
use crate::schema::{DataType, SchemaCatalog, SortOrder, TableSchema};
use crate::value::Value;

/// What a plan selects from.
#[derive(Clone, Debug)]
pub(crate) enum Source {
    Table(String),
    Plan(Box<Queryable>),
    Union(Vec<Queryable>),
}

/// One join attached to a plan.
#[derive(Clone, Debug)]
pub(crate) struct JoinDef {
    pub inner: bool,
    pub multi: bool,
    pub plan: Queryable,
}

/// Target of an explicit join: a registered table or an existing plan.
pub enum JoinSource {
    Table(String),
    Plan(Queryable),
}

impl From<&str> for JoinSource {
    fn from(name: &str) -> Self {
        JoinSource::Table(name.to_string())
    }
}

impl From<String> for JoinSource {
    fn from(name: String) -> Self {
        JoinSource::Table(name)
    }
}

impl From<Queryable> for JoinSource {
    fn from(plan: Queryable) -> Self {
        JoinSource::Plan(plan)
    }
}

impl From<&Queryable> for JoinSource {
    fn from(plan: &Queryable) -> Self {
        JoinSource::Plan(plan.clone())
    }
}

/// An immutable query plan.
#[derive(Clone, Debug)]
pub struct Queryable {
    pub(crate) catalog: Arc<SchemaCatalog>,
    /// Root table name; `None` for union-sourced plans.
    pub(crate) table: Option<String>,
    pub(crate) source: Source,
    pub(crate) alias: String,
    /// Insertion-ordered projection.
    pub(crate) select: Vec<(String, Operand)>,
    pub(crate) has_custom_select: bool,
    pub(crate) joins: Vec<JoinDef>,
    pub(crate) where_: Vec<QueryUnit>,
    pub(crate) group_by: Vec<Operand>,
    pub(crate) having: Vec<QueryUnit>,
    pub(crate) order_by: Vec<(Operand, SortOrder)>,
    pub(crate) top: Option<u64>,
    pub(crate) distinct: bool,
}

const BASE_ALIAS: &str = "TBL";
const ROWNUM_KEY: &str = "__rownum__";

impl Queryable {
    /// Root a plan at a registered table.
    pub fn from_table(catalog: Arc<SchemaCatalog>, table: &str) -> OrmResult<Self> {
        Self::table_with_alias(catalog, table, BASE_ALIAS)
    }

    pub(crate) fn table_with_alias(
        catalog: Arc<SchemaCatalog>,
        table: &str,
        alias: &str,
    ) -> OrmResult<Self> {
        let schema = catalog.table(table)?;
        let select = schema
            .columns
            .iter()
            .map(|col| {
                let unit = QueryUnit::typed(
                    col.data_type.clone(),
                    quote_path(&[alias, col.name.as_str()]),
                );
                (col.name.clone(), Operand::Unit(unit))
            })
            .collect();
        let name = schema.name.clone();
        Ok(Queryable {
            catalog,
            table: Some(name.clone()),
            source: Source::Table(name),
            alias: alias.to_string(),
            select,
            has_custom_select: false,
            joins: Vec::new(),
            where_: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            top: None,
            distinct: false,
        })
    }

    /// Root a plan at the `UNION ALL` of the given plans.
    pub fn union_all(catalog: Arc<SchemaCatalog>, plans: Vec<Queryable>) -> OrmResult<Self> {
        let first = plans
            .first()
            .ok_or_else(|| OrmError::usage("union requires at least one plan"))?;
        let alias = BASE_ALIAS.to_string();
        let select = first
            .select
            .iter()
            .map(|(key, op)| {
                let unit = QueryUnit::demoted(op.ty(), quote_path(&[alias.as_str(), key.as_str()]));
                (key.clone(), Operand::Unit(unit))
            })
            .collect();
        Ok(Queryable {
            catalog,
            table: None,
            source: Source::Union(plans),
            alias,
            select,
            has_custom_select: false,
            joins: Vec::new(),
            where_: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            top: None,
            distinct: false,
        })
    }

    /// Re-root `inner` as an opaque subquery under `alias`: each selected key
    /// becomes a fresh `[alias].[key]` column (predicate tags demote to plain
    /// bit columns).
    pub(crate) fn derived(inner: Queryable, alias: &str) -> Self {
        let select = inner
            .select
            .iter()
            .map(|(key, op)| {
                let unit = QueryUnit::demoted(op.ty(), quote_path(&[alias, key.as_str()]));
                (key.clone(), Operand::Unit(unit))
            })
            .collect();
        Queryable {
            catalog: inner.catalog.clone(),
            table: inner.table.clone(),
            alias: alias.to_string(),
            select,
            has_custom_select: false,
            source: Source::Plan(Box::new(inner)),
            joins: Vec::new(),
            where_: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            top: None,
            distinct: false,
        }
    }

    /// Treat the current plan as an opaque subquery before further
    /// composition. Operations chained afterwards reference post-projection
    /// names, not original column names.
    pub fn wrap(&self) -> Self {
        let alias = self.alias.clone();
        Self::derived(self.clone(), &alias)
    }

    /// The plan's current shape, for projection and filter closures.
    pub fn entity(&self) -> Entity {
        Entity::new(self.alias.clone(), self.select.clone())
    }

    /// The alias this plan's rows are referenced by in generated SQL.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    // ==================== builder operations ====================

    /// Replace the projection. A plan that already carries a custom
    /// projection is wrapped first, so the previous shape becomes a subquery.
    pub fn select<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Entity) -> Vec<(String, Operand)>,
    {
        let mut result = if self.has_custom_select {
            self.wrap()
        } else {
            self.clone()
        };
        result.select = f(&result.entity());
        result.has_custom_select = true;
        result
    }

    /// Append predicates: to WHERE, or to HAVING once grouping is active.
    pub fn filter<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Entity) -> Vec<QueryUnit>,
    {
        let mut result = self.clone();
        let predicates = f(&result.entity());
        if result.group_by.is_empty() {
            result.where_.extend(predicates);
        } else {
            result.having.extend(predicates);
        }
        result
    }

    /// Filter by column/value pairs; `NULL` values compile to `IS NULL`.
    pub fn find(&self, filter: Vec<(String, Operand)>) -> Self {
        self.filter(move |e| {
            filter
                .iter()
                .map(|(key, value)| {
                    if value.is_null_value() {
                        expr::is_null(e.col(key))
                    } else {
                        expr::equal(e.col(key), value.clone())
                    }
                })
                .collect()
        })
    }

    /// Null-tolerant range filter over one column path: an open bound (NULL)
    /// does not constrain.
    pub fn between_on(
        &self,
        path: &str,
        from: impl Into<Operand>,
        to: impl Into<Operand>,
    ) -> Self {
        let from = from.into();
        let to = to.into();
        self.filter(move |e| vec![expr::between(e.col(path), from, to)])
    }

    /// Word-wise text search: every word must match (`LIKE '%word%'`) in at
    /// least one of the given fields. Blank input is the identity.
    pub fn search<F>(&self, text: Option<&str>, fields: F) -> Self
    where
        F: FnOnce(&Entity) -> Vec<QueryUnit>,
    {
        let words: Vec<String> = match text {
            Some(t) => t.split_whitespace().map(str::to_string).collect(),
            None => return self.clone(),
        };
        if words.is_empty() {
            return self.clone();
        }
        self.filter(move |e| {
            let per_field: Vec<Operand> = fields(e)
                .into_iter()
                .map(|field| {
                    let all_words: Vec<Operand> = words
                        .iter()
                        .map(|w| expr::contains(field.clone(), w.as_str()).into())
                        .collect();
                    expr::and(all_words).into()
                })
                .collect();
            vec![expr::or(per_field)]
        })
    }

    pub fn order_by<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Entity) -> Vec<(Operand, SortOrder)>,
    {
        let mut result = if self.has_custom_select {
            self.wrap()
        } else {
            self.clone()
        };
        let orders = f(&result.entity());
        result.order_by.extend(orders);
        result
    }

    pub fn group_by<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Entity) -> Vec<Operand>,
    {
        let mut result = if self.has_custom_select {
            self.wrap()
        } else {
            self.clone()
        };
        let keys = f(&result.entity());
        result.group_by.extend(keys);
        result
    }

    /// Group and project in one step: the grouping keys double as the leading
    /// select entries, followed by the aggregate projection.
    pub fn group_by_select<K, V>(&self, key_f: K, value_f: V) -> Self
    where
        K: FnOnce(&Entity) -> Vec<(String, Operand)>,
        V: FnOnce(&Entity) -> Vec<(String, Operand)>,
    {
        let mut result = if self.has_custom_select {
            self.wrap()
        } else {
            self.clone()
        };
        let entity = result.entity();
        let keys = key_f(&entity);
        let values = value_f(&entity);
        result.group_by.extend(keys.iter().map(|(_, op)| op.clone()));
        result.select = keys.into_iter().chain(values).collect();
        result.has_custom_select = true;
        result
    }

    pub fn top(&self, n: u64) -> Self {
        let mut result = self.clone();
        result.top = Some(n);
        result
    }

    pub fn distinct(&self) -> Self {
        let mut result = self.clone();
        result.distinct = true;
        result
    }

    /// Skip/take pagination over a deterministic ordering.
    ///
    /// Projects a `ROW_NUMBER() OVER (ORDER BY …)` pseudo-column, caps with
    /// `TOP skip+take`, wraps, filters `rownum > skip`, and drops the
    /// pseudo-column from the outer projection.
    pub fn limit<F>(&self, skip: u64, take: u64, f: F) -> Self
    where
        F: FnOnce(&Entity) -> Vec<(Operand, SortOrder)>,
    {
        let mut result = if self.has_custom_select {
            self.wrap()
        } else {
            self.clone()
        };
        let orders = f(&result.entity());
        result.top = Some(skip + take);
        result
            .select
            .push((ROWNUM_KEY.to_string(), Operand::Unit(expr::row_number(&orders))));
        let mut outer = result.wrap();
        outer.select.retain(|(key, _)| key != ROWNUM_KEY);
        let rownum = QueryUnit::typed(
            DataType::BigInt,
            quote_path(&[outer.alias.as_str(), ROWNUM_KEY]),
        );
        outer.where_.push(expr::greater_than(rownum, skip as i64));
        outer
    }

    /// Join another table or plan under `alias` as a to-one relation.
    ///
    /// `f` receives the fresh joined plan and the current entity, and returns
    /// the joined plan with its correlation predicates applied.
    pub fn join<F>(
        &self,
        target: impl Into<JoinSource>,
        alias: &str,
        f: F,
        inner: bool,
    ) -> OrmResult<Self>
    where
        F: FnOnce(Queryable, &Entity) -> OrmResult<Queryable>,
    {
        self.join_fn(target.into(), alias, f, inner, false)
    }

    /// Join as a to-many relation; mapped rows expose a list under `alias`.
    pub fn join_multi<F>(
        &self,
        target: impl Into<JoinSource>,
        alias: &str,
        f: F,
        inner: bool,
    ) -> OrmResult<Self>
    where
        F: FnOnce(Queryable, &Entity) -> OrmResult<Queryable>,
    {
        self.join_fn(target.into(), alias, f, inner, true)
    }

    fn join_fn<F>(
        &self,
        target: JoinSource,
        alias: &str,
        f: F,
        inner: bool,
        multi: bool,
    ) -> OrmResult<Self>
    where
        F: FnOnce(Queryable, &Entity) -> OrmResult<Queryable>,
    {
        if self.has_custom_select {
            return self.wrap().join_fn(target, alias, f, inner, multi);
        }

        let prev = self
            .joins
            .iter()
            .find(|j| j.plan.alias == alias)
            .cloned();
        let result = if prev.is_some() {
            self.wrap()
        } else {
            self.clone()
        };

        let new_plan = match target {
            JoinSource::Table(name) => {
                Queryable::table_with_alias(self.catalog.clone(), &name, alias)?
            }
            JoinSource::Plan(plan) => Queryable::derived(plan, alias),
        };
        let joined = f(new_plan, &result.entity())?;

        if let Some(prev) = prev {
            // Re-joining an identical plan under the same alias is a no-op.
            if prev.inner == inner && prev.plan.to_sql()? == joined.to_sql()? {
                return Ok(result);
            }
        }

        let mut result = result;
        for (key, op) in &joined.select {
            let unit = QueryUnit::demoted(op.ty(), quote_path(&[alias, key.as_str()]));
            result
                .select
                .push((format!("{alias}.{key}"), Operand::Unit(unit)));
        }
        result.joins.push(JoinDef {
            inner,
            multi,
            plan: joined,
        });
        Ok(result)
    }

    /// Join a relation by its dotted path through FK / FK-target metadata.
    ///
    /// A forward foreign key joins as a to-one relation, a back-reference as
    /// to-many. Path segments may also traverse previously joined aliases.
    pub fn include(&self, path: &str) -> OrmResult<Self> {
        self.include_with(path, Ok, false)
    }

    /// [`include`](Self::include) plus a refinement applied to the joined
    /// plan and an inner-join flag.
    pub fn include_with<F>(&self, path: &str, refine: F, inner: bool) -> OrmResult<Self>
    where
        F: FnOnce(Queryable) -> OrmResult<Queryable>,
    {
        let root = self.table.clone().ok_or_else(|| {
            OrmError::usage("include is not available on a union-sourced plan")
        })?;
        let segments: Vec<&str> = path.split('.').collect();

        let mut table = self.catalog.table(&root)?;
        for i in 0..segments.len() - 1 {
            let segment = segments[i];
            if let Some(fk) = table.foreign_key(segment) {
                table = self.catalog.table(&fk.target_table)?;
            } else if let Some(fkt) = table.foreign_key_target(segment) {
                table = self.catalog.table(&fkt.source_table)?;
            } else if let Some(join) = self.find_join(&segments[..=i].join(".")) {
                let name = join.plan.table.clone().ok_or_else(|| {
                    OrmError::schema(format!(
                        "joined alias '{}' has no table to resolve '{path}' against",
                        segments[..=i].join(".")
                    ))
                })?;
                table = self.catalog.table(&name)?;
            } else {
                return Err(OrmError::schema(format!(
                    "cannot resolve relation path '{path}': no foreign key, back-reference \
                     or prior join named '{segment}'"
                )));
            }
        }

        let last = segments[segments.len() - 1];
        let parent = &segments[..segments.len() - 1];

        let (join_table, multi, filter) = if let Some(fk) = table.foreign_key(last) {
            let target = self.catalog.table(&fk.target_table)?;
            let mut filter = Vec::with_capacity(target.primary_key.len());
            for (i, pk) in target.primary_key.iter().enumerate() {
                let chain = chain_key(parent, &fk.column_names[i]);
                filter.push((pk.name.clone(), Operand::Unit(self.entity_unit(&chain)?)));
            }
            (fk.target_table.clone(), false, filter)
        } else if let Some(fkt) = table.foreign_key_target(last) {
            let source = self.catalog.table(&fkt.source_table)?;
            let fk = source.foreign_key(&fkt.source_foreign_key).ok_or_else(|| {
                OrmError::schema(format!(
                    "back-reference '{last}' names missing foreign key '{}' on '{}'",
                    fkt.source_foreign_key, source.name
                ))
            })?;
            let target = self.catalog.table(&fk.target_table)?;
            let mut filter = Vec::with_capacity(target.primary_key.len());
            for (i, pk) in target.primary_key.iter().enumerate() {
                let chain = chain_key(parent, &pk.name);
                filter.push((
                    fk.column_names[i].clone(),
                    Operand::Unit(self.entity_unit(&chain)?),
                ));
            }
            (fkt.source_table.clone(), true, filter)
        } else {
            return Err(OrmError::schema(format!(
                "no foreign key or back-reference named '{last}' on '{}'",
                table.name
            )));
        };

        self.join_fn(
            JoinSource::Table(join_table),
            path,
            move |q, _| refine(q.find(filter)),
            inner,
            multi,
        )
    }

    // ==================== compilation ====================

    /// Compile this plan to T-SQL. Pure: the same plan always yields the
    /// same text.
    pub fn to_sql(&self) -> OrmResult<String> {
        compile::render(self)
    }

    pub(crate) fn is_simple(&self) -> bool {
        self.top.is_none()
            && !self.distinct
            && self.group_by.is_empty()
            && self.having.is_empty()
            && self.order_by.is_empty()
            && self.joins.is_empty()
            && matches!(self.source, Source::Table(_))
            && !self.has_custom_select
    }

    pub(crate) fn require_table(&self) -> OrmResult<&TableSchema> {
        let name = self
            .table
            .as_ref()
            .ok_or_else(|| OrmError::usage("operation is not available on a union-sourced plan"))?;
        self.catalog.table(name)
    }

    fn entity_unit(&self, chain: &str) -> OrmResult<QueryUnit> {
        match self.select.iter().find(|(key, _)| key == chain) {
            Some((_, Operand::Unit(unit))) => Ok(unit.clone()),
            Some((_, op)) => Ok(QueryUnit {
                ty: op.ty(),
                sql: op.value_sql(),
                predicate: false,
            }),
            None => Err(OrmError::schema(format!("'{chain}' is not joined"))),
        }
    }

    fn find_join(&self, alias: &str) -> Option<&JoinDef> {
        if let Some(join) = self.joins.iter().find(|j| j.plan.alias == alias) {
            return Some(join);
        }
        match &self.source {
            Source::Plan(inner) => inner.find_join(alias),
            Source::Union(plans) => plans.first().and_then(|p| p.find_join(alias)),
            Source::Table(_) => None,
        }
    }

    /// Metadata the result mapper needs for this plan's rowsets.
    pub fn select_meta(&self) -> SelectMeta {
        let mut meta = SelectMeta::default();
        for (key, op) in &self.select {
            if let Some(ty) = op.ty() {
                meta.column_types.insert(key.clone(), ty);
            }
        }
        self.collect_multi_paths("", &mut meta.multi_paths);
        meta
    }

    fn collect_multi_paths(&self, prefix: &str, out: &mut HashMap<String, bool>) {
        for join in &self.joins {
            let path = if prefix.is_empty() {
                join.plan.alias.clone()
            } else {
                format!("{prefix}.{}", join.plan.alias)
            };
            out.insert(path.clone(), join.multi);
            join.plan.collect_multi_paths(&path, out);
        }
        match &self.source {
            Source::Plan(inner) => inner.collect_multi_paths(prefix, out),
            Source::Union(plans) => {
                if let Some(first) = plans.first() {
                    first.collect_multi_paths(prefix, out);
                }
            }
            Source::Table(_) => {}
        }
    }

    // ==================== terminal operations ====================

    /// Execute and map all rows.
    pub async fn result(&self, conn: &mut DbConn) -> OrmResult<Vec<Record>> {
        let sql = self.to_sql()?;
        let sets = conn.query(&sql).await?;
        let rows = sets.into_iter().next().unwrap_or_default();
        let mut flat = Vec::with_capacity(rows.len());
        for row in rows {
            flat.push(row::flatten_row(row)?);
        }
        mapper::map_rows(&self.select_meta(), flat)
    }

    /// Execute and require exactly one mapped row.
    pub async fn single(&self, conn: &mut DbConn) -> OrmResult<Record> {
        let mut rows = self.result(conn).await?;
        match rows.len() {
            0 => Err(OrmError::cardinality("expected one row, found none")),
            1 => Ok(rows.remove(0)),
            n => Err(OrmError::cardinality(format!("expected one row, found {n}"))),
        }
    }

    /// Execute and return at most one mapped row.
    pub async fn single_or_none(&self, conn: &mut DbConn) -> OrmResult<Option<Record>> {
        let mut rows = self.result(conn).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.remove(0))),
            n => Err(OrmError::cardinality(format!("expected one row, found {n}"))),
        }
    }

    /// Count matching rows (summed across groups when grouping is active).
    pub async fn count(&self, conn: &mut DbConn) -> OrmResult<i64> {
        let rows = self
            .select(|_| vec![("cnt".to_string(), expr::count(None).into())])
            .result(conn)
            .await?;
        Ok(rows.iter().filter_map(|r| r.get_i64("cnt")).sum())
    }

    pub async fn exists(&self, conn: &mut DbConn) -> OrmResult<bool> {
        Ok(self.count(conn).await? > 0)
    }

    // ==================== mutations ====================

    /// Insert one record; returns the generated key when the table has a
    /// single primary-key column.
    pub async fn insert(
        &self,
        conn: &mut DbConn,
        record: &[(String, Value)],
    ) -> OrmResult<Option<Value>> {
        let sql = mutation::insert_sql(self, record)?;
        let sets = conn.query(&sql).await?;
        first_output(sets)
    }

    /// Compile an insert and enqueue it on the connection's prepared buffer.
    pub fn insert_prepare(&self, conn: &mut DbConn, record: &[(String, Value)]) -> OrmResult<()> {
        conn.prepare(mutation::insert_sql(self, record)?);
        Ok(())
    }

    /// Insert many records as one batch; returns one generated key per record.
    pub async fn insert_range(
        &self,
        conn: &mut DbConn,
        records: &[Vec<(String, Value)>],
    ) -> OrmResult<Vec<Option<Value>>> {
        let sql = mutation::insert_range_sql(self, records)?;
        let sets = conn.query(&sql).await?;
        sets.into_iter().map(set_first_value).collect()
    }

    pub fn insert_range_prepare(
        &self,
        conn: &mut DbConn,
        records: &[Vec<(String, Value)>],
    ) -> OrmResult<()> {
        conn.prepare(mutation::insert_range_sql(self, records)?);
        Ok(())
    }

    /// Stream records through the server bulk-copy channel.
    pub async fn bulk_insert(
        &self,
        conn: &mut DbConn,
        records: &[Vec<(String, Value)>],
    ) -> OrmResult<()> {
        let table = self.require_table()?;
        conn.bulk(table, records).await
    }

    /// Insert-or-update keyed by `keys` (default: the primary key). Returns
    /// the `OUTPUT INSERTED` value of the first key column on insert.
    pub async fn upsert(
        &self,
        conn: &mut DbConn,
        record: &[(String, Value)],
        keys: Option<&[&str]>,
    ) -> OrmResult<Option<Value>> {
        let sql = mutation::upsert_sql(self, record, keys)?;
        let sets = conn.query(&sql).await?;
        first_output(sets)
    }

    pub fn upsert_prepare(
        &self,
        conn: &mut DbConn,
        record: &[(String, Value)],
        keys: Option<&[&str]>,
    ) -> OrmResult<()> {
        conn.prepare(mutation::upsert_sql(self, record, keys)?);
        Ok(())
    }

    /// Upsert many records as one batch.
    pub async fn upsert_range(
        &self,
        conn: &mut DbConn,
        records: &[Vec<(String, Value)>],
        keys: Option<&[&str]>,
    ) -> OrmResult<Vec<Option<Value>>> {
        let sql = mutation::upsert_range_sql(self, records, keys)?;
        let sets = conn.query(&sql).await?;
        sets.into_iter().map(set_first_value).collect()
    }

    /// Update the rows this plan selects. The projector receives the plan's
    /// post-projection shape; assignments equal to the current shape are
    /// dropped, and dotted keys address joined sub-aliases.
    pub async fn update<F>(&self, conn: &mut DbConn, f: F) -> OrmResult<u64>
    where
        F: FnOnce(&Entity) -> Vec<(String, Operand)>,
    {
        let sql = mutation::update_sql(self, f)?;
        conn.execute(&sql).await
    }

    pub fn update_prepare<F>(&self, conn: &mut DbConn, f: F) -> OrmResult<()>
    where
        F: FnOnce(&Entity) -> Vec<(String, Operand)>,
    {
        conn.prepare(mutation::update_sql(self, f)?);
        Ok(())
    }

    /// Delete the rows this plan selects, correlated by primary-key tuple.
    pub async fn delete(&self, conn: &mut DbConn) -> OrmResult<u64> {
        let sql = mutation::delete_sql(self)?;
        conn.execute(&sql).await
    }

    pub fn delete_prepare(&self, conn: &mut DbConn) -> OrmResult<()> {
        conn.prepare(mutation::delete_sql(self)?);
        Ok(())
    }

    /// Project this plan and insert the projected rows directly into the
    /// target plan's table, without a client round trip.
    pub async fn insert_to<F>(
        &self,
        conn: &mut DbConn,
        target: &Queryable,
        f: F,
    ) -> OrmResult<Vec<Option<Value>>>
    where
        F: FnOnce(&Entity) -> Vec<(String, Operand)>,
    {
        let sql = mutation::insert_to_sql(self, target, f)?;
        let sets = conn.query(&sql).await?;
        sets.into_iter().map(set_first_value).collect()
    }
}

fn chain_key(parent: &[&str], last: &str) -> String {
    if parent.is_empty() {
        last.to_string()
    } else {
        format!("{}.{last}", parent.join("."))
    }
}

fn set_first_value(set: Vec<tiberius::Row>) -> OrmResult<Option<Value>> {
    match set.into_iter().next() {
        Some(row) => Ok(row::flatten_row(row)?.into_iter().next().map(|(_, v)| v)),
        None => Ok(None),
    }
}

fn first_output(sets: Vec<Vec<tiberius::Row>>) -> OrmResult<Option<Value>> {
    match sets.into_iter().find(|set| !set.is_empty()) {
        Some(set) => set_first_value(set),
        None => Ok(None),
    }
}
