//! SELECT compiler: renders a plan (and its nested plans) to T-SQL text.

use crate::error::{OrmError, OrmResult};
use crate::ident::quote;
use crate::plan::{Queryable, Source};

/// Render a plan as a `SELECT` statement.
///
/// Clause order: `SELECT [DISTINCT] [TOP n] <select-list> FROM <source> AS
/// <alias> <joins> [WHERE] [GROUP BY] [HAVING] [ORDER BY]`. The select list
/// follows projection insertion order and joins follow the order they were
/// added, so compilation is a pure function of plan state.
pub(crate) fn render(plan: &Queryable) -> OrmResult<String> {
    if plan.select.is_empty() {
        return Err(OrmError::usage("cannot compile a plan with an empty projection"));
    }

    let mut sql = String::from("SELECT");
    if plan.distinct {
        sql.push_str(" DISTINCT");
    }
    if let Some(top) = plan.top {
        sql.push_str(&format!(" TOP {top}"));
    }

    let items: Vec<String> = plan
        .select
        .iter()
        .map(|(key, op)| format!("{} AS {}", op.value_sql(), quote(key)))
        .collect();
    sql.push(' ');
    sql.push_str(&items.join(", "));

    sql.push_str(" FROM ");
    match &plan.source {
        Source::Table(table) => sql.push_str(&quote(table)),
        Source::Plan(inner) => {
            sql.push('(');
            sql.push_str(&render(inner)?);
            sql.push(')');
        }
        Source::Union(plans) => {
            let members = plans.iter().map(render).collect::<OrmResult<Vec<_>>>()?;
            sql.push('(');
            sql.push_str(&members.join(" UNION ALL "));
            sql.push(')');
        }
    }
    sql.push_str(&format!(" AS {}", quote(&plan.alias)));

    for join in &plan.joins {
        let joined = &join.plan;
        if joined.is_simple() {
            // An equality-only lookup over a bare table preserves row
            // multiplicity, so it can stay a flat join; its predicates
            // become the ON clause.
            let Source::Table(table) = &joined.source else {
                return Err(OrmError::usage("simple join must have a bare-table source"));
            };
            let keyword = if join.inner {
                "INNER JOIN"
            } else {
                "LEFT OUTER JOIN"
            };
            let on = if joined.where_.is_empty() {
                "1 = 1".to_string()
            } else {
                joined
                    .where_
                    .iter()
                    .map(|unit| unit.sql.clone())
                    .collect::<Vec<_>>()
                    .join(") AND (")
            };
            sql.push_str(&format!(
                " {keyword} {} AS {} ON ({on})",
                quote(table),
                quote(&joined.alias)
            ));
        } else {
            // Aggregation, ordering, limiting or a custom projection must
            // execute per outer row.
            let keyword = if join.inner { "CROSS APPLY" } else { "OUTER APPLY" };
            sql.push_str(&format!(
                " {keyword} ({}) AS {}",
                render(joined)?,
                quote(&joined.alias)
            ));
        }
    }

    if !plan.where_.is_empty() {
        let parts: Vec<String> = plan.where_.iter().map(|unit| unit.sql.clone()).collect();
        sql.push_str(&format!(" WHERE ({})", parts.join(") AND (")));
    }

    if !plan.group_by.is_empty() {
        let keys: Vec<String> = plan.group_by.iter().map(|op| op.value_sql()).collect();
        sql.push_str(&format!(" GROUP BY {}", keys.join(", ")));
    }

    if !plan.having.is_empty() {
        let parts: Vec<String> = plan.having.iter().map(|unit| unit.sql.clone()).collect();
        sql.push_str(&format!(" HAVING ({})", parts.join(") AND (")));
    }

    if !plan.order_by.is_empty() {
        let keys: Vec<String> = plan
            .order_by
            .iter()
            .map(|(op, rule)| format!("{} {}", op.value_sql(), rule.as_sql()))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
    }

    Ok(sql)
}
