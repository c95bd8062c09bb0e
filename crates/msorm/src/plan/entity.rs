//! The column-reference view a plan hands to projection and filter closures.

use crate::expr::{Operand, QueryUnit};
use crate::ident::quote_path;

/// Snapshot of a plan's current shape.
///
/// `col` resolves a (possibly dotted) select key to its compiled fragment;
/// keys that are not part of the current projection fall back to a direct
/// `[alias].[path]` reference, so filters written against a joined plan can
/// name raw table columns before any projection exists.
#[derive(Clone, Debug)]
pub struct Entity {
    alias: String,
    select: Vec<(String, Operand)>,
}

impl Entity {
    pub(crate) fn new(alias: String, select: Vec<(String, Operand)>) -> Self {
        Self { alias, select }
    }

    /// The alias this entity's rows are referenced by.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Resolve a select key (or fall back to `[alias].[path]`).
    pub fn col(&self, path: &str) -> QueryUnit {
        match self.select.iter().find(|(key, _)| key == path) {
            Some((_, Operand::Unit(unit))) => unit.clone(),
            Some((_, op @ Operand::Value(_))) => QueryUnit {
                ty: op.ty(),
                sql: op.value_sql(),
                predicate: false,
            },
            None => QueryUnit::untyped(quote_path(&[self.alias.as_str(), path])),
        }
    }

    /// Whether the projection carries this key.
    pub fn has(&self, path: &str) -> bool {
        self.select.iter().any(|(key, _)| key == path)
    }

    /// All select keys, in projection order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.select.iter().map(|(key, _)| key.as_str())
    }
}
