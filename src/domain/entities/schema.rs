use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static SQL_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern compiles"));

/// Check that a table or column name is safe to splice into DDL
pub fn is_valid_identifier(name: &str) -> bool {
    SQL_IDENTIFIER.is_match(name)
}

/// Column storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Blob,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Blob => "BLOB",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Default value a new column is backfilled with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnDefault {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
}

impl ColumnDefault {
    /// Render as an SQL literal
    pub fn to_sql(&self) -> String {
        match self {
            ColumnDefault::Null => "NULL".to_string(),
            ColumnDefault::Integer(v) => v.to_string(),
            ColumnDefault::Real(v) => v.to_string(),
            ColumnDefault::Boolean(v) => if *v { "1" } else { "0" }.to_string(),
            ColumnDefault::Text(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }

    /// NaN and infinities have no SQL literal
    pub fn is_representable(&self) -> bool {
        match self {
            ColumnDefault::Real(v) => v.is_finite(),
            _ => true,
        }
    }
}

/// One column a plugin wants added to a shared table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub default: ColumnDefault,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            default: ColumnDefault::Null,
        }
    }

    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = default;
        self
    }

    /// `name TYPE DEFAULT literal`, as used after `ADD COLUMN`
    pub fn to_sql(&self) -> String {
        format!("{} {} DEFAULT {}", self.name, self.column_type.as_sql(), self.default.to_sql())
    }
}

/// An additive column request owned by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaExtension {
    pub table: String,
    pub column: ColumnDefinition,
    pub plugin: String,
}

impl SchemaExtension {
    pub fn key(&self) -> (String, String) {
        (self.table.clone(), self.column.name.clone())
    }

    /// Marker key stored in the config table once applied
    pub fn marker_key(&self) -> String {
        format!("schema.{}.{}", self.table, self.column.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("devices"));
        assert!(is_valid_identifier("shutdown_api_key"));
        assert!(!is_valid_identifier("1devices"));
        assert!(!is_valid_identifier("devices; DROP TABLE x"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_column_sql() {
        let col = ColumnDefinition::new("shutdown_api_key", ColumnType::Text);
        assert_eq!(col.to_sql(), "shutdown_api_key TEXT DEFAULT NULL");

        let col = ColumnDefinition::new("note", ColumnType::Text)
            .with_default(ColumnDefault::Text("it's".to_string()));
        assert_eq!(col.to_sql(), "note TEXT DEFAULT 'it''s'");

        let col = ColumnDefinition::new("online", ColumnType::Boolean)
            .with_default(ColumnDefault::Boolean(true));
        assert_eq!(col.to_sql(), "online BOOLEAN DEFAULT 1");
    }

    #[test]
    fn test_non_finite_default_not_representable() {
        assert!(ColumnDefault::Real(0.5).is_representable());
        assert!(!ColumnDefault::Real(f64::NAN).is_representable());
        assert!(!ColumnDefault::Real(f64::INFINITY).is_representable());
        assert!(ColumnDefault::Text("x".to_string()).is_representable());
    }
}
