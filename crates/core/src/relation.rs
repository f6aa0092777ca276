use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::columns::{ColumnModel, ColumnSizing, TableRef};
use crate::value::{CellValue, RowRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub constraint_name: String,
    pub source_column: String,
    pub referenced_table: TableRef,
    pub referenced_column: String,
}

impl ForeignKeyRef {
    #[must_use]
    pub fn new(
        constraint_name: impl Into<String>,
        source_column: impl Into<String>,
        referenced_schema: Option<&str>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            constraint_name: constraint_name.into(),
            source_column: source_column.into(),
            referenced_table: TableRef::new(referenced_schema, referenced_table),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Rows of the referenced table, shown nested beneath the row that followed the key.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildGrid {
    pub foreign_key: ForeignKeyRef,
    pub columns: ColumnModel,
    pub rows: Vec<RowRecord>,
}

impl ChildGrid {
    #[must_use]
    pub fn new(foreign_key: ForeignKeyRef, rows: Vec<RowRecord>) -> Self {
        let columns = ColumnModel::from_rows(&rows, ColumnSizing::default());
        Self {
            foreign_key,
            columns,
            rows,
        }
    }

    /// Header line plus at most `max_rows` data lines.
    #[must_use]
    pub fn display_height(&self, max_rows: usize) -> usize {
        1 + self.rows.len().min(max_rows)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationRequest {
    pub table: TableRef,
    pub column: String,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RelationBackendError {
    message: String,
}

impl RelationBackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelationError {
    #[error("relationship provider failed: {0}")]
    Backend(#[source] RelationBackendError),
    #[error("column `{column}` of {table} has no foreign key")]
    NoForeignKey { table: TableRef, column: String },
    #[error("column `{0}` holds NULL; there is no related row to follow")]
    NullValue(String),
    #[error("cannot determine the table that owns column `{0}`")]
    UnresolvedTable(String),
}

#[async_trait]
pub trait RelationProvider {
    async fn foreign_key(
        &self,
        table: &TableRef,
        column: &str,
    ) -> Result<Option<ForeignKeyRef>, RelationBackendError>;

    async fn fetch_related(
        &self,
        foreign_key: &ForeignKeyRef,
        value: &CellValue,
    ) -> Result<Vec<RowRecord>, RelationBackendError>;
}

/// Resolves the key through the provider and loads the referenced rows.
pub async fn load_child_grid<P>(
    provider: &P,
    request: &RelationRequest,
) -> Result<ChildGrid, RelationError>
where
    P: RelationProvider + ?Sized,
{
    if request.value.is_null() {
        return Err(RelationError::NullValue(request.column.clone()));
    }

    let foreign_key = provider
        .foreign_key(&request.table, &request.column)
        .await
        .map_err(RelationError::Backend)?
        .ok_or_else(|| RelationError::NoForeignKey {
            table: request.table.clone(),
            column: request.column.clone(),
        })?;

    let rows = provider
        .fetch_related(&foreign_key, &request.value)
        .await
        .map_err(RelationError::Backend)?;
    debug!(
        constraint = %foreign_key.constraint_name,
        rows = rows.len(),
        "loaded related rows"
    );
    Ok(ChildGrid::new(foreign_key, rows))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{
        load_child_grid, ForeignKeyRef, RelationBackendError, RelationError, RelationProvider,
        RelationRequest,
    };
    use crate::columns::TableRef;
    use crate::value::{row_from_pairs, CellValue, RowRecord};

    struct FakeProvider;

    #[async_trait]
    impl RelationProvider for FakeProvider {
        async fn foreign_key(
            &self,
            _table: &TableRef,
            column: &str,
        ) -> Result<Option<ForeignKeyRef>, RelationBackendError> {
            if column == "UserId" {
                Ok(Some(ForeignKeyRef::new(
                    "FK_Orders_Users",
                    "UserId",
                    Some("dbo"),
                    "Users",
                    "Id",
                )))
            } else {
                Ok(None)
            }
        }

        async fn fetch_related(
            &self,
            _foreign_key: &ForeignKeyRef,
            value: &CellValue,
        ) -> Result<Vec<RowRecord>, RelationBackendError> {
            if value == &CellValue::Int(99) {
                return Err(RelationBackendError::new("lookup failed"));
            }
            Ok(vec![row_from_pairs([
                ("Id", value.clone()),
                ("Name", "Ann".into()),
            ])])
        }
    }

    fn request(column: &str, value: CellValue) -> RelationRequest {
        RelationRequest {
            table: TableRef::new(Some("dbo"), "Orders"),
            column: column.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn follows_foreign_key_into_child_grid() {
        let child = load_child_grid(&FakeProvider, &request("UserId", CellValue::Int(7)))
            .await
            .expect("relation should load");

        assert_eq!(child.foreign_key.referenced_table.table, "Users");
        assert_eq!(child.rows.len(), 1);
        assert_eq!(child.columns.len(), 2);
        assert_eq!(child.display_height(10), 2);
    }

    #[tokio::test]
    async fn reports_missing_keys_null_values_and_backend_failures() {
        let missing = load_child_grid(&FakeProvider, &request("Total", CellValue::Int(1)))
            .await
            .expect_err("no foreign key");
        assert!(matches!(missing, RelationError::NoForeignKey { .. }));

        let null = load_child_grid(&FakeProvider, &request("UserId", CellValue::Null))
            .await
            .expect_err("null cannot be followed");
        assert_eq!(null, RelationError::NullValue("UserId".to_string()));

        let backend = load_child_grid(&FakeProvider, &request("UserId", CellValue::Int(99)))
            .await
            .expect_err("backend error surfaces");
        assert!(matches!(backend, RelationError::Backend(_)));
    }
}
