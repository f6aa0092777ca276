use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const NULL_TEXT: &str = "NULL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            Self::Text(text) => parse_bool_text(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Text used for filters, widths and plain-text codecs; NULL renders as `NULL`.
    #[must_use]
    pub fn display_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_TEXT),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[must_use]
pub fn parse_bool_text(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "t" => Some(true),
        "false" | "0" | "no" | "n" | "f" => Some(false),
        _ => None,
    }
}

/// One result-set row keyed by field id.
pub type RowRecord = BTreeMap<String, CellValue>;

#[must_use]
pub fn row_from_pairs<I, K, V>(pairs: I) -> RowRecord
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<CellValue>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_bool_text, row_from_pairs, CellValue, RowRecord};

    #[test]
    fn deserializes_collaborator_json_rows() {
        let rows: Vec<RowRecord> = serde_json::from_str(
            r#"[{"Id": 1, "Name": "Ann", "Score": 2.5, "Active": true, "Note": null}]"#,
        )
        .expect("rows should parse");

        let row = &rows[0];
        assert_eq!(row["Id"], CellValue::Int(1));
        assert_eq!(row["Name"], CellValue::text("Ann"));
        assert_eq!(row["Score"], CellValue::Float(2.5));
        assert_eq!(row["Active"], CellValue::Bool(true));
        assert_eq!(row["Note"], CellValue::Null);
    }

    #[test]
    fn display_text_renders_null_literal() {
        assert_eq!(CellValue::Null.display_text(), "NULL");
        assert_eq!(CellValue::Int(42).display_text(), "42");
        assert_eq!(CellValue::Bool(false).display_text(), "false");
    }

    #[test]
    fn boolean_text_forms_are_normalized() {
        assert_eq!(parse_bool_text(" Yes "), Some(true));
        assert_eq!(parse_bool_text("0"), Some(false));
        assert_eq!(parse_bool_text("maybe"), None);
        assert_eq!(CellValue::Int(1).as_bool(), Some(true));
    }

    #[test]
    fn rows_can_be_built_from_pairs() {
        let row = row_from_pairs([("Id", CellValue::Int(7)), ("Name", "Bob".into())]);
        assert_eq!(row.len(), 2);
        assert_eq!(row["Name"].as_str(), Some("Bob"));
    }
}
