// Query dialect primitives
//
// Identifier quoting and literal rendering for the dialects this crate emits:
// SoQL for push-down fragments sent to the remote source, and SQLite for the
// statements the apply engine prepares against destination tables.

use crate::models::Value;

/// Textual quoting rules of one target dialect
///
/// Each dialect substitutes its own quoting character. Values sent to the
/// destination store are always bound as parameters, so only push-down
/// dialects need a literal form.
pub trait QueryDialect: Send + Sync {
    /// Get the name of this dialect (e.g., "SoQL", "SQLite")
    fn dialect_name(&self) -> &str;

    /// Quote an identifier so it is read back verbatim
    fn quote_identifier(&self, ident: &str) -> String;

    /// Render a literal, or `None` when the value has no literal form in
    /// this dialect
    fn quote_literal(&self, value: &Value) -> Option<String>;
}

/// Wrap `s` in `quote`, doubling every embedded occurrence
pub fn quote_with(quote: char, s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push(quote);
    for ch in s.chars() {
        if ch == quote {
            quoted.push(quote);
        }
        quoted.push(ch);
    }
    quoted.push(quote);
    quoted
}

/// Socrata Query Language, used by the remote source's query endpoint
pub struct SoqlDialect;

impl SoqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SoqlDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryDialect for SoqlDialect {
    fn dialect_name(&self) -> &str {
        "SoQL"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_with('`', ident)
    }

    fn quote_literal(&self, value: &Value) -> Option<String> {
        match value {
            Value::Null => Some("NULL".to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) if f.is_finite() => Some(f.to_string()),
            // NaN and infinities have no numeric literal
            Value::Float(_) => None,
            Value::Blob(_) => None,
            Value::Boolean(_) | Value::Text(_) => Some(quote_with('\'', &value.to_string())),
        }
    }
}

/// SQLite, the destination store of the apply engine
pub struct SqliteDialect;

impl SqliteDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryDialect for SqliteDialect {
    fn dialect_name(&self) -> &str {
        "SQLite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_with('"', ident)
    }

    /// Values never reach SQLite as text; they are bound as parameters
    fn quote_literal(&self, _value: &Value) -> Option<String> {
        None
    }
}
