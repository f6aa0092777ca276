use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gridline_core::apply::{ApplyBackendError, ChangeApplier};
use gridline_core::columns::TableRef;
use gridline_core::relation::{ForeignKeyRef, RelationBackendError, RelationProvider};
use gridline_core::value::{CellValue, RowRecord};
use tracing::debug;

/// Foreign keys and table contents held in memory, for demos and tests.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    foreign_keys: BTreeMap<(TableRef, String), ForeignKeyRef>,
    tables: BTreeMap<TableRef, Vec<RowRecord>>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_foreign_key(mut self, table: TableRef, foreign_key: ForeignKeyRef) -> Self {
        self.register_foreign_key(table, foreign_key);
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: TableRef, rows: Vec<RowRecord>) -> Self {
        self.register_table(table, rows);
        self
    }

    pub fn register_foreign_key(&mut self, table: TableRef, foreign_key: ForeignKeyRef) {
        self.foreign_keys
            .insert((table, foreign_key.source_column.clone()), foreign_key);
    }

    pub fn register_table(&mut self, table: TableRef, rows: Vec<RowRecord>) {
        self.tables.insert(table, rows);
    }
}

#[async_trait]
impl RelationProvider for InMemoryCatalog {
    async fn foreign_key(
        &self,
        table: &TableRef,
        column: &str,
    ) -> Result<Option<ForeignKeyRef>, RelationBackendError> {
        Ok(self
            .foreign_keys
            .get(&(table.clone(), column.to_string()))
            .cloned())
    }

    async fn fetch_related(
        &self,
        foreign_key: &ForeignKeyRef,
        value: &CellValue,
    ) -> Result<Vec<RowRecord>, RelationBackendError> {
        let rows = self
            .tables
            .get(&foreign_key.referenced_table)
            .ok_or_else(|| {
                RelationBackendError::new(format!(
                    "table {} is not loaded",
                    foreign_key.referenced_table
                ))
            })?;
        let related = rows
            .iter()
            .filter(|row| row.get(&foreign_key.referenced_column) == Some(value))
            .cloned()
            .collect::<Vec<_>>();
        debug!(
            table = %foreign_key.referenced_table,
            rows = related.len(),
            "fetched related rows"
        );
        Ok(related)
    }
}

/// Records every statement it is asked to run. Statements containing one of
/// the configured fragments fail instead.
#[derive(Debug, Default)]
pub struct RecordingApplier {
    executed: Mutex<Vec<String>>,
    failing_fragments: Vec<String>,
    rows_affected: u64,
}

impl RecordingApplier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows_affected: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_on(mut self, fragment: impl Into<String>) -> Self {
        self.failing_fragments.push(fragment.into());
        self
    }

    #[must_use]
    pub fn with_rows_affected(mut self, rows_affected: u64) -> Self {
        self.rows_affected = rows_affected;
        self
    }

    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChangeApplier for RecordingApplier {
    async fn execute(&self, sql: &str) -> Result<u64, ApplyBackendError> {
        self.executed
            .lock()
            .map_err(|_| ApplyBackendError::new("statement log is poisoned"))?
            .push(sql.to_string());
        if let Some(fragment) = self
            .failing_fragments
            .iter()
            .find(|fragment| sql.contains(fragment.as_str()))
        {
            return Err(ApplyBackendError::new(format!(
                "statement rejected by backend (matched `{fragment}`)"
            )));
        }
        Ok(self.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use gridline_core::apply::{apply_pending, ChangeApplier, StatementOutcome};
    use gridline_core::columns::{ColumnMetadata, ResultSetMetadata, TableRef};
    use gridline_core::ledger::{ChangeLedger, PrimaryKeyBinding};
    use gridline_core::relation::{ForeignKeyRef, RelationProvider};
    use gridline_core::value::{row_from_pairs, CellValue};

    use super::{InMemoryCatalog, RecordingApplier};

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_foreign_key(
                TableRef::new(Some("dbo"), "Users"),
                ForeignKeyRef::new("FK_Users_Teams", "TeamId", Some("dbo"), "Teams", "Id"),
            )
            .with_table(
                TableRef::new(Some("dbo"), "Teams"),
                vec![
                    row_from_pairs([("Id", CellValue::Int(1)), ("Name", "Core".into())]),
                    row_from_pairs([("Id", CellValue::Int(2)), ("Name", "Web".into())]),
                ],
            )
    }

    #[tokio::test]
    async fn catalog_resolves_keys_and_filters_related_rows() {
        let catalog = catalog();
        let users = TableRef::new(Some("dbo"), "Users");
        let foreign_key = catalog
            .foreign_key(&users, "TeamId")
            .await
            .expect("lookup")
            .expect("key registered");
        assert!(catalog
            .foreign_key(&users, "Name")
            .await
            .expect("lookup")
            .is_none());

        let rows = catalog
            .fetch_related(&foreign_key, &CellValue::Int(2))
            .await
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Name"), Some(&CellValue::text("Web")));
    }

    #[tokio::test]
    async fn catalog_reports_unloaded_tables() {
        let catalog = InMemoryCatalog::new();
        let foreign_key = ForeignKeyRef::new("FK", "TeamId", None, "Teams", "Id");
        assert!(catalog
            .fetch_related(&foreign_key, &CellValue::Int(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn applier_records_and_fails_on_fragments() {
        let applier = RecordingApplier::new().failing_on("'boom'");
        assert_eq!(applier.execute("DELETE FROM [T] WHERE [Id] = 1").await, Ok(1));
        assert!(applier
            .execute("UPDATE [T] SET [A] = 'boom' WHERE [Id] = 2")
            .await
            .is_err());
        assert_eq!(applier.executed().len(), 2);
    }

    #[tokio::test]
    async fn zero_row_backend_keeps_the_change_pending() {
        let lookup = BTreeMap::from([(
            0,
            ResultSetMetadata {
                columns: vec![
                    ColumnMetadata::new("Id", "int")
                        .primary_key()
                        .owned_by(Some("dbo"), "T"),
                    ColumnMetadata::new("Name", "nvarchar").owned_by(Some("dbo"), "T"),
                ],
                is_editable: true,
                has_multiple_tables: false,
                source_table: None,
            },
        )]);
        let key: PrimaryKeyBinding = [("Id", CellValue::Int(7))].into_iter().collect();
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 0, "Name", "Ann".into(), "Anna".into(), key)
            .expect("edit");

        let applier = RecordingApplier::new().with_rows_affected(0);
        let summary = apply_pending(&applier, &mut ledger, &lookup, None)
            .await
            .expect("apply runs");
        assert!(matches!(
            summary.statements[0].outcome,
            StatementOutcome::Failed { .. }
        ));
        assert_eq!(ledger.len(), 1);
        assert_eq!(applier.executed().len(), 1);
    }
}
