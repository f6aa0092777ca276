use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::value::CellValue;

pub const DEFAULT_SAMPLE_SIZE: usize = 100;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
const DATE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Date,
    Null,
}

impl ValueKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Null => "null",
        }
    }
}

#[must_use]
pub fn classify_value(value: &CellValue) -> ValueKind {
    match value {
        CellValue::Null => ValueKind::Null,
        CellValue::Bool(_) => ValueKind::Boolean,
        CellValue::Int(_) | CellValue::Float(_) => ValueKind::Number,
        CellValue::Text(text) => {
            if parse_date(text).is_some() {
                ValueKind::Date
            } else {
                ValueKind::String
            }
        }
    }
}

/// Classifies a column from at most `sample_size` non-null values.
///
/// Agreeing samples keep their kind, any disagreement falls back to
/// `String`, and a sample without non-null values is `Null`.
pub fn classify_sample<'a, I>(values: I, sample_size: usize) -> ValueKind
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut kind: Option<ValueKind> = None;
    for value in values
        .into_iter()
        .filter(|value| !value.is_null())
        .take(sample_size.max(1))
    {
        let next = classify_value(value);
        match kind {
            None => kind = Some(next),
            Some(current) if current == next => {}
            Some(_) => return ValueKind::String,
        }
    }
    kind.unwrap_or(ValueKind::Null)
}

/// Maps a driver-reported column type name onto a value kind.
#[must_use]
pub fn classify_declared_type(sql_type: &str) -> Option<ValueKind> {
    let normalized = sql_type.trim().to_ascii_lowercase();
    let base = normalized
        .split(|ch: char| ch == '(' || ch.is_whitespace())
        .next()
        .unwrap_or_default();

    let kind = match base {
        "bit" | "bool" | "boolean" => ValueKind::Boolean,
        "int" | "integer" | "bigint" | "smallint" | "tinyint" | "mediumint" | "decimal"
        | "numeric" | "float" | "real" | "double" | "money" | "smallmoney" | "number" => {
            ValueKind::Number
        }
        "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "timestamp"
        | "timestamptz" => ValueKind::Date,
        "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "string" | "uuid"
        | "uniqueidentifier" | "json" | "xml" => ValueKind::String,
        _ => return None,
    };
    Some(kind)
}

#[must_use]
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if trimmed.len() < 8 {
        return None;
    }

    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, format) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{classify_declared_type, classify_sample, classify_value, parse_date, ValueKind};
    use crate::value::CellValue;

    #[test]
    fn single_values_map_to_tagged_kinds() {
        assert_eq!(classify_value(&CellValue::Null), ValueKind::Null);
        assert_eq!(classify_value(&CellValue::Int(3)), ValueKind::Number);
        assert_eq!(classify_value(&CellValue::Bool(true)), ValueKind::Boolean);
        assert_eq!(classify_value(&CellValue::text("2024-02-29")), ValueKind::Date);
        assert_eq!(classify_value(&CellValue::text("Ann")), ValueKind::String);
    }

    #[test]
    fn sample_skips_nulls_and_falls_back_to_string_on_mixed_kinds() {
        let values = [CellValue::Null, CellValue::Int(1), CellValue::Float(2.5)];
        assert_eq!(classify_sample(&values, 10), ValueKind::Number);

        let mixed = [CellValue::Int(1), CellValue::text("x")];
        assert_eq!(classify_sample(&mixed, 10), ValueKind::String);

        let empty = [CellValue::Null, CellValue::Null];
        assert_eq!(classify_sample(&empty, 10), ValueKind::Null);
    }

    #[test]
    fn sample_size_bounds_inspection() {
        let values = [CellValue::Int(1), CellValue::Int(2), CellValue::text("late")];
        assert_eq!(classify_sample(&values, 2), ValueKind::Number);
    }

    #[test]
    fn declared_types_are_recognized() {
        assert_eq!(classify_declared_type("NVARCHAR(50)"), Some(ValueKind::String));
        assert_eq!(classify_declared_type("bit"), Some(ValueKind::Boolean));
        assert_eq!(classify_declared_type("decimal(10, 2)"), Some(ValueKind::Number));
        assert_eq!(classify_declared_type("datetime2"), Some(ValueKind::Date));
        assert_eq!(classify_declared_type("geography"), None);
    }

    #[test]
    fn parses_common_date_layouts() {
        assert!(parse_date("2024-01-05").is_some());
        assert!(parse_date("2024-01-05 10:11:12").is_some());
        assert!(parse_date("2024-01-05T10:11:12.250").is_some());
        assert!(parse_date("01/05/2024").is_some());
        assert!(parse_date("20240105x").is_none());
    }
}
