//! SQL identifier quoting and validation.

use std::sync::OnceLock;

use regex::Regex;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use tenantry_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a `table.column` reference.
#[inline]
pub fn quote_qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(table), quote_ident(column))
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Whether `name` is a plain unquoted-safe SQL identifier.
///
/// Table and column names declared on records must pass this check.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(name))
}
