//! T-SQL identifier quoting.
//!
//! All generated SQL references identifiers in bracket-quoted form. Join
//! aliases may contain dots (`region.country`); the whole dotted alias is one
//! identifier and is quoted as such.

/// Quote a single identifier: `name` -> `[name]`, doubling any `]`.
pub fn quote(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a qualified reference: `["TBL", "id"]` -> `[TBL].[id]`.
pub fn quote_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| quote(p))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("Customer"), "[Customer]");
    }

    #[test]
    fn test_quote_doubles_closing_bracket() {
        assert_eq!(quote("we]ird"), "[we]]ird]");
    }

    #[test]
    fn test_quote_dotted_alias_is_one_identifier() {
        assert_eq!(quote("region.country"), "[region.country]");
    }

    #[test]
    fn test_quote_path() {
        assert_eq!(quote_path(&["TBL", "id"]), "[TBL].[id]");
        assert_eq!(quote_path(&["region.country", "name"]), "[region.country].[name]");
    }
}
