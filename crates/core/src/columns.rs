use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::{classify_declared_type, classify_sample, ValueKind};
use crate::value::{CellValue, RowRecord};

pub const DEFAULT_MIN_COLUMN_WIDTH: u16 = 8;
pub const DEFAULT_MAX_COLUMN_WIDTH: u16 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    #[must_use]
    pub fn new(schema: Option<&str>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.map(str::to_string),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}

/// Column description as reported by the query-execution collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
}

impl ColumnMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_primary_key: false,
            is_foreign_key: false,
            table_name: None,
            schema_name: None,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    #[must_use]
    pub fn foreign_key(mut self) -> Self {
        self.is_foreign_key = true;
        self
    }

    #[must_use]
    pub fn owned_by(mut self, schema: Option<&str>, table: &str) -> Self {
        self.schema_name = schema.map(str::to_string);
        self.table_name = Some(table.to_string());
        self
    }

    #[must_use]
    pub fn owning_table(&self) -> Option<TableRef> {
        self.table_name
            .as_deref()
            .filter(|table| !table.trim().is_empty())
            .map(|table| TableRef::new(self.schema_name.as_deref(), table))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetMetadata {
    pub columns: Vec<ColumnMetadata>,
    #[serde(default)]
    pub is_editable: bool,
    #[serde(default)]
    pub has_multiple_tables: bool,
    #[serde(default)]
    pub source_table: Option<TableRef>,
}

impl ResultSetMetadata {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// The one table every column comes from, when the result set is known single-table.
    #[must_use]
    pub fn single_source_table(&self) -> Option<TableRef> {
        if self.has_multiple_tables {
            return None;
        }
        if let Some(table) = &self.source_table {
            return Some(table.clone());
        }

        let mut owners = self.columns.iter().filter_map(ColumnMetadata::owning_table);
        let first = owners.next()?;
        owners.all(|owner| owner == first).then_some(first)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub id: String,
    pub header: String,
    pub kind: ValueKind,
    pub width: u16,
    pub pinned: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub source: Option<TableRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSizing {
    pub min_width: u16,
    pub max_width: u16,
    pub sample_size: usize,
}

impl Default for ColumnSizing {
    fn default() -> Self {
        Self {
            min_width: DEFAULT_MIN_COLUMN_WIDTH,
            max_width: DEFAULT_MAX_COLUMN_WIDTH,
            sample_size: crate::classifier::DEFAULT_SAMPLE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnModel {
    columns: Vec<ColumnDescriptor>,
}

impl ColumnModel {
    #[must_use]
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn from_metadata(
        metadata: &ResultSetMetadata,
        rows: &[RowRecord],
        sizing: ColumnSizing,
    ) -> Self {
        let columns = metadata
            .columns
            .iter()
            .map(|column| {
                let sampled = rows.iter().filter_map(|row| row.get(&column.name));
                let kind = classify_declared_type(&column.data_type)
                    .unwrap_or_else(|| classify_sample(sampled, sizing.sample_size));
                ColumnDescriptor {
                    id: column.name.clone(),
                    header: column.name.clone(),
                    kind,
                    width: measure_width(&column.name, &column.name, rows, sizing),
                    pinned: false,
                    is_primary_key: column.is_primary_key,
                    is_foreign_key: column.is_foreign_key,
                    source: column.owning_table(),
                }
            })
            .collect();
        Self { columns }
    }

    /// Builds descriptors from the field ids of the first row when no metadata arrived.
    #[must_use]
    pub fn from_rows(rows: &[RowRecord], sizing: ColumnSizing) -> Self {
        let Some(first) = rows.first() else {
            return Self::default();
        };
        let metadata = ResultSetMetadata {
            columns: first
                .keys()
                .map(|name| ColumnMetadata::new(name.clone(), ""))
                .collect(),
            ..ResultSetMetadata::default()
        };
        Self::from_metadata(&metadata, rows, sizing)
    }

    #[must_use]
    pub fn with_pinned(mut self, id: &str) -> Self {
        if let Some(column) = self.columns.iter_mut().find(|column| column.id == id) {
            column.pinned = true;
        }
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(index)
    }

    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.id == id)
    }

    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter()
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|column| column.is_primary_key)
    }

    /// Column indices in display order: pinned columns first, then the rest.
    #[must_use]
    pub fn display_order(&self) -> Vec<usize> {
        let (pinned, rest): (Vec<usize>, Vec<usize>) =
            (0..self.columns.len()).partition(|index| self.columns[*index].pinned);
        pinned.into_iter().chain(rest).collect()
    }
}

fn measure_width(header: &str, id: &str, rows: &[RowRecord], sizing: ColumnSizing) -> u16 {
    let widest_value = rows
        .iter()
        .take(sizing.sample_size.max(1))
        .filter_map(|row| row.get(id))
        .map(|value: &CellValue| value.display_text().chars().count())
        .max()
        .unwrap_or(0);
    let widest = widest_value.max(header.chars().count()) + 2;
    let clamped = widest.clamp(usize::from(sizing.min_width), usize::from(sizing.max_width));
    u16::try_from(clamped).unwrap_or(sizing.max_width)
}

#[cfg(test)]
mod tests {
    use super::{ColumnMetadata, ColumnModel, ColumnSizing, ResultSetMetadata, TableRef};
    use crate::classifier::ValueKind;
    use crate::value::{row_from_pairs, CellValue};

    fn metadata() -> ResultSetMetadata {
        ResultSetMetadata {
            columns: vec![
                ColumnMetadata::new("Id", "int")
                    .primary_key()
                    .owned_by(Some("dbo"), "T"),
                ColumnMetadata::new("Name", "").owned_by(Some("dbo"), "T"),
            ],
            is_editable: true,
            has_multiple_tables: false,
            source_table: None,
        }
    }

    #[test]
    fn parses_collaborator_metadata_shape() {
        let parsed: ResultSetMetadata = serde_json::from_str(
            r#"{"columns":[{"name":"Id","type":"int","isPrimaryKey":true,"tableName":"T","schemaName":"dbo"}],
                "isEditable":true,"hasMultipleTables":false}"#,
        )
        .expect("metadata should parse");

        assert!(parsed.is_editable);
        assert_eq!(
            parsed.columns[0].owning_table(),
            Some(TableRef::new(Some("dbo"), "T"))
        );
    }

    #[test]
    fn builds_descriptors_with_inferred_kinds_and_clamped_widths() {
        let rows = vec![row_from_pairs([
            ("Id", CellValue::Int(1)),
            ("Name", CellValue::text("x".repeat(80))),
        ])];
        let model = ColumnModel::from_metadata(&metadata(), &rows, ColumnSizing::default());

        let id = model.by_id("Id").expect("id column");
        assert_eq!(id.kind, ValueKind::Number);
        assert!(id.is_primary_key);
        assert_eq!(id.width, 8);

        let name = model.by_id("Name").expect("name column");
        assert_eq!(name.kind, ValueKind::String);
        assert_eq!(name.width, 50);
        assert_eq!(model.primary_keys().count(), 1);
    }

    #[test]
    fn single_source_table_requires_agreement() {
        let mut metadata = metadata();
        assert_eq!(
            metadata.single_source_table(),
            Some(TableRef::new(Some("dbo"), "T"))
        );

        metadata.columns[1] = ColumnMetadata::new("Name", "").owned_by(Some("dbo"), "Other");
        assert_eq!(metadata.single_source_table(), None);

        metadata.has_multiple_tables = true;
        metadata.source_table = Some(TableRef::new(None, "T"));
        assert_eq!(metadata.single_source_table(), None);
    }

    #[test]
    fn pinned_columns_lead_display_order() {
        let model = ColumnModel::from_metadata(&metadata(), &[], ColumnSizing::default())
            .with_pinned("Name");
        assert_eq!(model.display_order(), vec![1, 0]);
    }
}
