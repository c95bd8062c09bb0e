//! Expression maker: tagged SQL fragments built from typed operands.
//!
//! Every constructor returns a [`QueryUnit`]: a rendered fragment plus a
//! logical-type tag. Boolean-valued fragments carry `predicate = true`: they
//! render bare where a predicate is expected (WHERE/ON/HAVING, AND/OR, CASE
//! conditions) and get a `CASE WHEN … THEN 1 ELSE 0 END` cast in any value
//! position (select list, assignments, scalar arguments).

use crate::schema::{DataType, SortOrder};
use crate::value::Value;

/// A compiled SQL fragment with its logical-type tag.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryUnit {
    /// Logical type of the fragment's value, when known.
    pub ty: Option<DataType>,
    /// The rendered fragment.
    pub sql: String,
    /// True for boolean fragments in predicate form (need a 1/0 cast in
    /// value positions).
    pub predicate: bool,
}

impl QueryUnit {
    /// A fragment with a known value type.
    pub fn typed(ty: DataType, sql: impl Into<String>) -> Self {
        Self {
            ty: Some(ty),
            sql: sql.into(),
            predicate: false,
        }
    }

    /// A fragment whose type is unknown.
    pub fn untyped(sql: impl Into<String>) -> Self {
        Self {
            ty: None,
            sql: sql.into(),
            predicate: false,
        }
    }

    /// A boolean fragment in predicate form.
    pub fn predicate(sql: impl Into<String>) -> Self {
        Self {
            ty: Some(DataType::Boolean),
            sql: sql.into(),
            predicate: true,
        }
    }

    /// Render for a value position: predicates are cast to 1/0.
    pub fn value_sql(&self) -> String {
        if self.predicate {
            format!("CASE WHEN ({}) THEN 1 ELSE 0 END", self.sql)
        } else {
            self.sql.clone()
        }
    }

    /// The same fragment as a plain bit-typed column reference (used when a
    /// projected predicate is re-exposed through a subquery or join).
    pub fn demoted(ty: Option<DataType>, sql: impl Into<String>) -> Self {
        Self {
            ty,
            sql: sql.into(),
            predicate: false,
        }
    }
}

/// An expression operand: either an already-compiled fragment or a constant.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Unit(QueryUnit),
    Value(Value),
}

impl Operand {
    /// Render for a value position.
    pub fn value_sql(&self) -> String {
        match self {
            Operand::Unit(u) => u.value_sql(),
            Operand::Value(v) => v.to_sql(),
        }
    }

    /// Render for a predicate position: predicate fragments stay bare.
    pub fn predicate_sql(&self) -> String {
        match self {
            Operand::Unit(u) => u.sql.clone(),
            Operand::Value(v) => v.to_sql(),
        }
    }

    /// Logical type of the operand, when known.
    pub fn ty(&self) -> Option<DataType> {
        match self {
            Operand::Unit(u) => u.ty.clone(),
            Operand::Value(v) => match v {
                Value::Null => None,
                Value::Bool(_) => Some(DataType::Boolean),
                Value::I32(_) => Some(DataType::Int),
                Value::I64(_) => Some(DataType::BigInt),
                Value::F64(_) => Some(DataType::Float),
                Value::Decimal(_) => None,
                Value::String(_) => Some(DataType::String(None)),
                Value::Uuid(_) => Some(DataType::Uuid),
                Value::DateTime(_) => Some(DataType::DateTime),
                Value::Date(_) => Some(DataType::DateOnly),
                Value::Time(_) => Some(DataType::Time),
                Value::Bytes(_) => Some(DataType::Binary(None)),
            },
        }
    }

    /// Whether the operand is the SQL NULL constant.
    pub fn is_null_value(&self) -> bool {
        matches!(self, Operand::Value(Value::Null))
    }

    fn is_unit(&self) -> bool {
        matches!(self, Operand::Unit(_))
    }
}

impl From<QueryUnit> for Operand {
    fn from(u: QueryUnit) -> Self {
        Operand::Unit(u)
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

macro_rules! operand_from_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Operand {
                fn from(v: $t) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from_scalar!(
    bool,
    i32,
    i64,
    f64,
    rust_decimal::Decimal,
    &str,
    String,
    uuid::Uuid,
    chrono::NaiveDateTime,
    chrono::NaiveDate,
    chrono::NaiveTime,
    Vec<u8>,
);

impl<T> From<Option<T>> for Operand
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        Operand::Value(Value::from(v))
    }
}

// ==================== boolean algebra ====================

/// All conditions must hold: `(a AND b AND …)`.
pub fn and(args: Vec<Operand>) -> QueryUnit {
    if args.is_empty() {
        return QueryUnit::predicate("1 = 1");
    }
    let parts: Vec<String> = args.iter().map(|a| a.predicate_sql()).collect();
    QueryUnit::predicate(format!("({})", parts.join(" AND ")))
}

/// At least one condition must hold: `(a OR b OR …)`.
pub fn or(args: Vec<Operand>) -> QueryUnit {
    if args.is_empty() {
        return QueryUnit::predicate("1 = 0");
    }
    let parts: Vec<String> = args.iter().map(|a| a.predicate_sql()).collect();
    QueryUnit::predicate(format!("({})", parts.join(" OR ")))
}

// ==================== comparisons ====================

/// Null-safe equality.
///
/// A `NULL` comparand compiles to `IS NULL`; comparing two fragments uses the
/// symmetric null-safe form; a plain constant compiles to `=`.
pub fn equal(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    let src = src.into();
    let target = target.into();
    if target.is_null_value() {
        return is_null(src);
    }
    if src.is_unit() && target.is_unit() {
        let s = src.value_sql();
        let t = target.value_sql();
        return QueryUnit::predicate(format!("({s} IS NULL AND {t} IS NULL) OR {s} = {t}"));
    }
    QueryUnit::predicate(format!("{} = {}", src.value_sql(), target.value_sql()))
}

/// Null-safe inequality, the dual of [`equal`].
pub fn not_equal(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    let src = src.into();
    let target = target.into();
    if target.is_null_value() {
        return is_not_null(src);
    }
    let s = src.value_sql();
    let t = target.value_sql();
    if src.is_unit() && target.is_unit() {
        return QueryUnit::predicate(format!("({s} IS NOT NULL OR {t} IS NOT NULL) AND {s} != {t}"));
    }
    QueryUnit::predicate(format!("({s} IS NULL OR {s} != {t})"))
}

pub fn is_null(src: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!("{} IS NULL", src.into().value_sql()))
}

pub fn is_not_null(src: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!("{} IS NOT NULL", src.into().value_sql()))
}

/// `src IN (…)`; an empty list is always false.
pub fn in_list(src: impl Into<Operand>, targets: Vec<Operand>) -> QueryUnit {
    if targets.is_empty() {
        return QueryUnit::predicate("1 = 0");
    }
    let items: Vec<String> = targets.iter().map(|t| t.value_sql()).collect();
    QueryUnit::predicate(format!(
        "{} IN ({})",
        src.into().value_sql(),
        items.join(", ")
    ))
}

/// `src NOT IN (…)`; an empty list is always true.
pub fn not_in(src: impl Into<Operand>, targets: Vec<Operand>) -> QueryUnit {
    if targets.is_empty() {
        return QueryUnit::predicate("1 = 1");
    }
    let items: Vec<String> = targets.iter().map(|t| t.value_sql()).collect();
    QueryUnit::predicate(format!(
        "{} NOT IN ({})",
        src.into().value_sql(),
        items.join(", ")
    ))
}

pub fn greater_than(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!(
        "{} > {}",
        src.into().value_sql(),
        target.into().value_sql()
    ))
}

pub fn greater_equal(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!(
        "{} >= {}",
        src.into().value_sql(),
        target.into().value_sql()
    ))
}

pub fn less_than(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!(
        "{} < {}",
        src.into().value_sql(),
        target.into().value_sql()
    ))
}

pub fn less_equal(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!(
        "{} <= {}",
        src.into().value_sql(),
        target.into().value_sql()
    ))
}

/// Null-tolerant range check: an open bound (NULL) does not constrain.
pub fn between(
    target: impl Into<Operand>,
    from: impl Into<Operand>,
    to: impl Into<Operand>,
) -> QueryUnit {
    let target = target.into();
    let from = from.into();
    let to = to.into();
    and(vec![
        or(vec![
            is_null(from.clone()).into(),
            greater_equal(target.clone(), from).into(),
        ])
        .into(),
        or(vec![
            is_null(to.clone()).into(),
            less_equal(target, to).into(),
        ])
        .into(),
    ])
}

// ==================== string predicates ====================

pub fn starts_with(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!(
        "{} LIKE {} + '%'",
        src.into().value_sql(),
        target.into().value_sql()
    ))
}

pub fn ends_with(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!(
        "{} LIKE '%' + {}",
        src.into().value_sql(),
        target.into().value_sql()
    ))
}

pub fn contains(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!(
        "{} LIKE '%' + {} + '%'",
        src.into().value_sql(),
        target.into().value_sql()
    ))
}

pub fn not_contains(src: impl Into<Operand>, target: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!(
        "{} NOT LIKE '%' + {} + '%'",
        src.into().value_sql(),
        target.into().value_sql()
    ))
}

pub fn empty(src: impl Into<Operand>) -> QueryUnit {
    let s = src.into().value_sql();
    QueryUnit::predicate(format!("{s} IS NULL OR {s} = ''"))
}

pub fn not_empty(src: impl Into<Operand>) -> QueryUnit {
    let s = src.into().value_sql();
    QueryUnit::predicate(format!("{s} IS NOT NULL AND {s} != ''"))
}

// ==================== truthiness ====================

/// Treat a value as a condition: predicate fragments pass through, anything
/// else compares `> 0`.
pub fn is_true(src: impl Into<Operand>) -> QueryUnit {
    match src.into() {
        Operand::Unit(u) if u.predicate => u,
        other => QueryUnit::predicate(format!("{} > 0", other.value_sql())),
    }
}

pub fn is_false(src: impl Into<Operand>) -> QueryUnit {
    QueryUnit::predicate(format!("{} <= 0", src.into().value_sql()))
}

// ==================== scalar functions ====================

/// `ISNULL(src, replacement)`, typed by the replacement.
pub fn ifnull(src: impl Into<Operand>, replacement: impl Into<Operand>) -> QueryUnit {
    let src = src.into();
    let replacement = replacement.into();
    let ty = replacement.ty().or_else(|| src.ty());
    QueryUnit {
        ty,
        sql: format!("ISNULL({}, {})", src.value_sql(), replacement.value_sql()),
        predicate: false,
    }
}

/// Replacement for NULL or empty strings.
pub fn ifnull_or_empty(src: impl Into<Operand>, replacement: impl Into<Operand>) -> QueryUnit {
    let src = src.into();
    let replacement = replacement.into();
    let s = src.value_sql();
    QueryUnit {
        ty: replacement.ty().or_else(|| src.ty()),
        sql: format!(
            "CASE WHEN ({s} IS NULL OR {s} = '') THEN {} ELSE {s} END",
            replacement.value_sql()
        ),
        predicate: false,
    }
}

/// String concatenation with `+`.
pub fn concat(args: Vec<Operand>) -> QueryUnit {
    let parts: Vec<String> = args.iter().map(|a| a.value_sql()).collect();
    QueryUnit::typed(DataType::String(None), parts.join(" + "))
}

/// Infix arithmetic/string formula, typed by the left operand.
pub fn formula(lhs: impl Into<Operand>, op: &str, rhs: impl Into<Operand>) -> QueryUnit {
    let lhs = lhs.into();
    let rhs = rhs.into();
    QueryUnit {
        ty: lhs.ty().or_else(|| rhs.ty()),
        sql: format!("{} {op} {}", lhs.value_sql(), rhs.value_sql()),
        predicate: false,
    }
}

/// `CONVERT(TYPE, src)`.
pub fn cast(src: impl Into<Operand>, ty: DataType) -> QueryUnit {
    let sql = format!("CONVERT({}, {})", ty.sql_type(), src.into().value_sql());
    QueryUnit::typed(ty, sql)
}

/// Zero-based substring, right-trimmed.
pub fn substr(src: impl Into<Operand>, start: i64, len: i64) -> QueryUnit {
    QueryUnit::typed(
        DataType::String(None),
        format!(
            "RTRIM(SUBSTRING({}, {}, {len}))",
            src.into().value_sql(),
            start + 1
        ),
    )
}

pub fn round(src: impl Into<Operand>, len: impl Into<Operand>) -> QueryUnit {
    let src = src.into();
    QueryUnit {
        ty: src.ty(),
        sql: format!("ROUND({}, {})", src.value_sql(), len.into().value_sql()),
        predicate: false,
    }
}

pub fn floor(src: impl Into<Operand>) -> QueryUnit {
    QueryUnit::typed(DataType::Int, format!("FLOOR({})", src.into().value_sql()))
}

// ==================== aggregates ====================

pub fn sum(src: impl Into<Operand>) -> QueryUnit {
    let src = src.into();
    QueryUnit {
        ty: src.ty(),
        sql: format!("SUM({})", src.value_sql()),
        predicate: false,
    }
}

pub fn min(src: impl Into<Operand>) -> QueryUnit {
    let src = src.into();
    QueryUnit {
        ty: src.ty(),
        sql: format!("MIN({})", src.value_sql()),
        predicate: false,
    }
}

pub fn max(src: impl Into<Operand>) -> QueryUnit {
    let src = src.into();
    QueryUnit {
        ty: src.ty(),
        sql: format!("MAX({})", src.value_sql()),
        predicate: false,
    }
}

/// `ISNULL(COUNT(src|*), 0)`.
pub fn count(src: Option<Operand>) -> QueryUnit {
    let inner = match &src {
        Some(op) => op.value_sql(),
        None => "*".to_string(),
    };
    QueryUnit::typed(DataType::Int, format!("ISNULL(COUNT({inner}), 0)"))
}

/// `ROW_NUMBER() OVER (ORDER BY …)`.
pub fn row_number(orders: &[(Operand, SortOrder)]) -> QueryUnit {
    let keys: Vec<String> = orders
        .iter()
        .map(|(op, rule)| format!("{} {}", op.value_sql(), rule.as_sql()))
        .collect();
    QueryUnit::typed(
        DataType::BigInt,
        format!("ROW_NUMBER() OVER (ORDER BY {})", keys.join(", ")),
    )
}

// ==================== CASE ====================

/// Start a `CASE WHEN … THEN …` chain, typed by the first branch value.
pub fn case(when: impl Into<Operand>, then: impl Into<Operand>) -> CaseBuilder {
    let then = then.into();
    CaseBuilder {
        ty: then.ty(),
        sql: format!(
            "CASE WHEN {} THEN {}",
            when.into().predicate_sql(),
            then.value_sql()
        ),
    }
}

/// Builder for multi-branch CASE expressions.
pub struct CaseBuilder {
    ty: Option<DataType>,
    sql: String,
}

impl CaseBuilder {
    pub fn when(mut self, when: impl Into<Operand>, then: impl Into<Operand>) -> Self {
        let then = then.into();
        if self.ty.is_none() {
            self.ty = then.ty();
        }
        self.sql.push_str(&format!(
            " WHEN {} THEN {}",
            when.into().predicate_sql(),
            then.value_sql()
        ));
        self
    }

    pub fn else_(self, else_result: impl Into<Operand>) -> QueryUnit {
        QueryUnit {
            ty: self.ty,
            sql: format!("{} ELSE {} END", self.sql, else_result.into().value_sql()),
            predicate: false,
        }
    }
}

/// The larger of two values.
pub fn max_of(a: impl Into<Operand>, b: impl Into<Operand>) -> QueryUnit {
    let a = a.into();
    let b = b.into();
    case(greater_than(a.clone(), b.clone()), a).else_(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> QueryUnit {
        QueryUnit::typed(DataType::Int, format!("[TBL].[{name}]"))
    }

    #[test]
    fn test_equal_with_literal() {
        assert_eq!(equal(col("id"), 5).sql, "[TBL].[id] = 5");
    }

    #[test]
    fn test_equal_with_null() {
        assert_eq!(equal(col("id"), None::<i32>).sql, "[TBL].[id] IS NULL");
    }

    #[test]
    fn test_equal_unit_to_unit_is_null_safe() {
        assert_eq!(
            equal(col("a"), col("b")).sql,
            "([TBL].[a] IS NULL AND [TBL].[b] IS NULL) OR [TBL].[a] = [TBL].[b]"
        );
    }

    #[test]
    fn test_not_equal_with_literal() {
        assert_eq!(
            not_equal(col("id"), 5).sql,
            "([TBL].[id] IS NULL OR [TBL].[id] != 5)"
        );
    }

    #[test]
    fn test_predicate_casts_in_value_position() {
        let unit = equal(col("id"), 5);
        assert!(unit.predicate);
        assert_eq!(
            unit.value_sql(),
            "CASE WHEN ([TBL].[id] = 5) THEN 1 ELSE 0 END"
        );
    }

    #[test]
    fn test_and_keeps_predicates_bare() {
        let unit = and(vec![
            equal(col("a"), 1).into(),
            greater_than(col("b"), 2).into(),
        ]);
        assert_eq!(unit.sql, "([TBL].[a] = 1 AND [TBL].[b] > 2)");
    }

    #[test]
    fn test_empty_in_list() {
        assert_eq!(in_list(col("id"), vec![]).sql, "1 = 0");
        assert_eq!(not_in(col("id"), vec![]).sql, "1 = 1");
    }

    #[test]
    fn test_in_list() {
        let unit = in_list(col("id"), vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(unit.sql, "[TBL].[id] IN (1, 2, 3)");
    }

    #[test]
    fn test_contains_renders_like() {
        let name = QueryUnit::typed(DataType::String(None), "[TBL].[name]");
        assert_eq!(contains(name, "bob").sql, "[TBL].[name] LIKE '%' + N'bob' + '%'");
    }

    #[test]
    fn test_is_true_on_predicate_passes_through() {
        let p = equal(col("a"), 1);
        assert_eq!(is_true(p.clone()).sql, p.sql);
        assert_eq!(is_true(col("a")).sql, "[TBL].[a] > 0");
    }

    #[test]
    fn test_case_builder() {
        let unit = case(equal(col("a"), 1), "one")
            .when(equal(col("a"), 2), "two")
            .else_("many");
        assert_eq!(
            unit.sql,
            "CASE WHEN [TBL].[a] = 1 THEN N'one' WHEN [TBL].[a] = 2 THEN N'two' ELSE N'many' END"
        );
        assert!(!unit.predicate);
    }

    #[test]
    fn test_count_star() {
        assert_eq!(count(None).sql, "ISNULL(COUNT(*), 0)");
    }

    #[test]
    fn test_row_number() {
        let unit = row_number(&[(col("name").into(), SortOrder::Asc)]);
        assert_eq!(unit.sql, "ROW_NUMBER() OVER (ORDER BY [TBL].[name] ASC)");
    }

    #[test]
    fn test_between_open_bounds() {
        let unit = between(col("n"), 1, None::<i32>);
        assert_eq!(
            unit.sql,
            "((1 IS NULL OR [TBL].[n] >= 1) AND (NULL IS NULL OR [TBL].[n] <= NULL))"
        );
    }

    #[test]
    fn test_cast_renders_convert() {
        assert_eq!(
            cast(col("id"), DataType::String(Some(10))).sql,
            "CONVERT(NVARCHAR(10), [TBL].[id])"
        );
    }
}
