use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;

use thiserror::Error;
use tracing::{debug, warn};

use crate::columns::{ColumnMetadata, ResultSetMetadata, TableRef};
use crate::ledger::{ChangeKey, ChangeKind, ChangeLedger, ChangeRecord, PrimaryKeyBinding};
use crate::value::CellValue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("cannot resolve the owning table of {}", describe_target(.column.as_deref()))]
    MetadataUnresolved {
        result_set: usize,
        column: Option<String>,
    },
    #[error("row {row} of result set {result_set} has no primary-key values")]
    EmptyPrimaryKey { result_set: usize, row: usize },
    #[error("result set {0} has no column metadata")]
    UnknownResultSet(usize),
}

fn describe_target(column: Option<&str>) -> String {
    column.map_or_else(|| "the deleted row".to_string(), |column| format!("column `{column}`"))
}

/// Column metadata per result set, as needed to resolve owning tables.
pub trait MetadataLookup {
    fn metadata(&self, result_set: usize) -> Option<&ResultSetMetadata>;
}

impl MetadataLookup for BTreeMap<usize, ResultSetMetadata> {
    fn metadata(&self, result_set: usize) -> Option<&ResultSetMetadata> {
        self.get(&result_set)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedStatement {
    pub result_set: usize,
    pub row: usize,
    pub kind: ChangeKind,
    pub sql: String,
    /// Ledger records this statement makes obsolete once applied.
    pub keys: Vec<ChangeKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisFailure {
    pub key: ChangeKey,
    pub error: SynthesisError,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SynthesisReport {
    pub statements: Vec<SynthesizedStatement>,
    pub failures: Vec<SynthesisFailure>,
}

impl SynthesisReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.failures.is_empty()
    }

    /// Statements one per line, followed by the failures as SQL comments.
    #[must_use]
    pub fn preview_script(&self) -> String {
        let mut script = String::new();
        for statement in &self.statements {
            script.push_str(&statement.sql);
            script.push('\n');
        }
        for failure in &self.failures {
            let _ = writeln!(
                script,
                "-- skipped row {} of result set {}: {}",
                failure.key.row, failure.key.result_set, failure.error
            );
        }
        script
    }
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

#[must_use]
pub fn qualified_table(table: &TableRef) -> String {
    match table.schema.as_deref().filter(|schema| !schema.trim().is_empty()) {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&table.table)),
        None => quote_identifier(&table.table),
    }
}

fn quote_sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[must_use]
pub fn format_literal(value: &CellValue) -> String {
    match value {
        CellValue::Null => "NULL".to_string(),
        CellValue::Bool(true) => "1".to_string(),
        CellValue::Bool(false) => "0".to_string(),
        CellValue::Int(number) => number.to_string(),
        CellValue::Float(number) if number.is_finite() => number.to_string(),
        CellValue::Float(number) => quote_sql_string(&number.to_string()),
        CellValue::Text(text) => quote_sql_string(text),
    }
}

fn where_clause(primary_key: &PrimaryKeyBinding) -> String {
    primary_key
        .iter()
        .map(|(column, value)| format!("{} = {}", quote_identifier(column), format_literal(value)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[must_use]
pub fn update_sql(
    table: &TableRef,
    assignments: &[(&str, &CellValue)],
    primary_key: &PrimaryKeyBinding,
) -> String {
    let assignments = assignments
        .iter()
        .map(|(column, value)| format!("{} = {}", quote_identifier(column), format_literal(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {};",
        qualified_table(table),
        assignments,
        where_clause(primary_key)
    )
}

#[must_use]
pub fn delete_sql(table: &TableRef, primary_key: &PrimaryKeyBinding) -> String {
    format!(
        "DELETE FROM {} WHERE {};",
        qualified_table(table),
        where_clause(primary_key)
    )
}

/// The column's own table, else the result set's single source table.
#[must_use]
pub fn resolve_update_target(metadata: &ResultSetMetadata, column: &str) -> Option<TableRef> {
    metadata
        .column(column)
        .and_then(ColumnMetadata::owning_table)
        .or_else(|| metadata.single_source_table())
}

/// A deleted row is resolved through the table that owns its primary-key
/// columns. Keys owned by more than one table leave the target ambiguous.
#[must_use]
pub fn resolve_delete_target(
    metadata: &ResultSetMetadata,
    primary_key: &PrimaryKeyBinding,
) -> Option<TableRef> {
    let owners = primary_key
        .iter()
        .filter_map(|(column, _)| metadata.column(column).and_then(ColumnMetadata::owning_table))
        .collect::<BTreeSet<_>>();
    let mut owners = owners.into_iter();
    match (owners.next(), owners.next()) {
        (None, _) => metadata.single_source_table(),
        (Some(table), None) => Some(table),
        (Some(_), Some(_)) => None,
    }
}

/// The part of a row's key that belongs to `table`.
#[must_use]
pub fn key_for_table(
    metadata: &ResultSetMetadata,
    table: &TableRef,
    primary_key: &PrimaryKeyBinding,
) -> PrimaryKeyBinding {
    let fallback = metadata.single_source_table();
    primary_key
        .iter()
        .filter(|(column, _)| {
            let owner = metadata
                .column(column)
                .and_then(ColumnMetadata::owning_table)
                .or_else(|| fallback.clone());
            owner.as_ref() == Some(table)
        })
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

struct UpdateGroup<'a> {
    row: usize,
    table: TableRef,
    primary_key: PrimaryKeyBinding,
    assignments: Vec<(&'a str, &'a CellValue)>,
    keys: Vec<ChangeKey>,
}

enum Planned<'a> {
    Update(UpdateGroup<'a>),
    Delete(SynthesizedStatement),
}

/// Converts every pending record into SQL. Edits to one row that land in the
/// same table share a single UPDATE, so a changed key column never shifts the
/// WHERE clause of a sibling edit. A row with a DELETE record only yields the
/// DELETE; failures are reported per record and never abort the rest.
pub fn synthesize<L>(ledger: &ChangeLedger, lookup: &L) -> SynthesisReport
where
    L: MetadataLookup + ?Sized,
{
    let mut report = SynthesisReport::default();
    let mut result_sets = ledger.iter().map(|(result_set, _)| result_set).collect::<Vec<_>>();
    result_sets.dedup();

    for result_set in result_sets {
        let records = ledger.records(result_set);
        let deleted_rows = records
            .iter()
            .filter(|record| record.kind() == ChangeKind::Delete)
            .map(ChangeRecord::row)
            .collect::<HashSet<_>>();

        let metadata = lookup.metadata(result_set);
        let mut planned: Vec<Planned<'_>> = Vec::new();
        for record in records {
            let key = record.key(result_set);
            if record.kind() == ChangeKind::Update && deleted_rows.contains(&record.row()) {
                continue;
            }

            let outcome = match (metadata, record) {
                (None, _) => Err(SynthesisError::UnknownResultSet(result_set)),
                (
                    Some(metadata),
                    ChangeRecord::Update {
                        row,
                        column,
                        new_value,
                        primary_key,
                        ..
                    },
                ) => update_target(result_set, *row, column, primary_key, metadata).map(
                    |(table, primary_key)| {
                        let group = planned.iter_mut().find_map(|entry| match entry {
                            Planned::Update(group) if group.row == *row && group.table == table => {
                                Some(group)
                            }
                            _ => None,
                        });
                        match group {
                            Some(group) => {
                                group.assignments.push((column.as_str(), new_value));
                                group.keys.push(key.clone());
                            }
                            None => planned.push(Planned::Update(UpdateGroup {
                                row: *row,
                                table,
                                primary_key,
                                assignments: vec![(column.as_str(), new_value)],
                                keys: vec![key.clone()],
                            })),
                        }
                    },
                ),
                (Some(metadata), ChangeRecord::Delete { row, primary_key, .. }) => {
                    delete_statement(result_set, *row, primary_key, metadata).map(|sql| {
                        let mut keys = vec![key.clone()];
                        keys.extend(
                            records
                                .iter()
                                .filter(|other| {
                                    other.kind() == ChangeKind::Update && other.row() == *row
                                })
                                .map(|other| other.key(result_set)),
                        );
                        planned.push(Planned::Delete(SynthesizedStatement {
                            result_set,
                            row: *row,
                            kind: ChangeKind::Delete,
                            sql,
                            keys,
                        }));
                    })
                }
            };
            if let Err(error) = outcome {
                warn!(result_set, row = record.row(), %error, "statement skipped");
                report.failures.push(SynthesisFailure { key, error });
            }
        }

        report
            .statements
            .extend(planned.into_iter().map(|entry| match entry {
                Planned::Update(group) => SynthesizedStatement {
                    result_set,
                    row: group.row,
                    kind: ChangeKind::Update,
                    sql: update_sql(&group.table, &group.assignments, &group.primary_key),
                    keys: group.keys,
                },
                Planned::Delete(statement) => statement,
            }));
    }

    debug!(
        statements = report.statements.len(),
        failures = report.failures.len(),
        "synthesized pending changes"
    );
    report
}

fn update_target(
    result_set: usize,
    row: usize,
    column: &str,
    primary_key: &PrimaryKeyBinding,
    metadata: &ResultSetMetadata,
) -> Result<(TableRef, PrimaryKeyBinding), SynthesisError> {
    if primary_key.is_empty() {
        return Err(SynthesisError::EmptyPrimaryKey { result_set, row });
    }
    let table = resolve_update_target(metadata, column).ok_or_else(|| {
        SynthesisError::MetadataUnresolved {
            result_set,
            column: Some(column.to_string()),
        }
    })?;
    let primary_key = key_for_table(metadata, &table, primary_key);
    if primary_key.is_empty() {
        return Err(SynthesisError::EmptyPrimaryKey { result_set, row });
    }
    Ok((table, primary_key))
}

fn delete_statement(
    result_set: usize,
    row: usize,
    primary_key: &PrimaryKeyBinding,
    metadata: &ResultSetMetadata,
) -> Result<String, SynthesisError> {
    if primary_key.is_empty() {
        return Err(SynthesisError::EmptyPrimaryKey { result_set, row });
    }
    let table = resolve_delete_target(metadata, primary_key).ok_or(
        SynthesisError::MetadataUnresolved {
            result_set,
            column: None,
        },
    )?;
    let primary_key = key_for_table(metadata, &table, primary_key);
    if primary_key.is_empty() {
        return Err(SynthesisError::EmptyPrimaryKey { result_set, row });
    }
    Ok(delete_sql(&table, &primary_key))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::{
        format_literal, quote_identifier, synthesize, SynthesisError, SynthesizedStatement,
    };
    use crate::columns::{ColumnMetadata, ResultSetMetadata, TableRef};
    use crate::ledger::{ChangeKey, ChangeKind, ChangeLedger, PrimaryKeyBinding};
    use crate::value::CellValue;

    fn users_metadata() -> ResultSetMetadata {
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
        }
    }

    fn pk(id: i64) -> PrimaryKeyBinding {
        [("Id", CellValue::Int(id))].into_iter().collect()
    }

    fn lookup(metadata: ResultSetMetadata) -> BTreeMap<usize, ResultSetMetadata> {
        BTreeMap::from([(0, metadata)])
    }

    #[test]
    fn single_table_edit_becomes_update() {
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 0, "Name", "Ann".into(), "Anna".into(), pk(1))
            .expect("edit");

        let report = synthesize(&ledger, &lookup(users_metadata()));
        assert_eq!(
            report.statements,
            vec![SynthesizedStatement {
                result_set: 0,
                row: 0,
                kind: ChangeKind::Update,
                sql: "UPDATE [dbo].[T] SET [Name] = 'Anna' WHERE [Id] = 1;".to_string(),
                keys: vec![ChangeKey::update(0, 0, "Name")],
            }]
        );
        assert!(report.failures.is_empty());
    }

    #[test]
    fn literals_escape_quotes_and_map_nulls_and_booleans() {
        assert_eq!(format_literal(&CellValue::text("O'Brien")), "'O''Brien'");
        assert_eq!(format_literal(&CellValue::Null), "NULL");
        assert_eq!(format_literal(&CellValue::Bool(true)), "1");
        assert_eq!(format_literal(&CellValue::Bool(false)), "0");
        assert_eq!(format_literal(&CellValue::Float(2.5)), "2.5");
        assert_eq!(format_literal(&CellValue::text("42")), "'42'");
        assert_eq!(quote_identifier("odd]name"), "[odd]]name]");
    }

    #[test]
    fn quoted_text_ends_up_in_update() {
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 2, "Name", "Obrien".into(), "O'Brien".into(), pk(3))
            .expect("edit");

        let report = synthesize(&ledger, &lookup(users_metadata()));
        assert_eq!(
            report.statements[0].sql,
            "UPDATE [dbo].[T] SET [Name] = 'O''Brien' WHERE [Id] = 3;"
        );
    }

    #[test]
    fn delete_supersedes_updates_on_the_same_row() {
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 4, "Name", "A".into(), "B".into(), pk(5))
            .expect("edit");
        ledger.record_delete(0, 4, Vec::new(), pk(5)).expect("delete");

        let report = synthesize(&ledger, &lookup(users_metadata()));
        assert_eq!(report.statements.len(), 1);
        let statement = &report.statements[0];
        assert_eq!(statement.kind, ChangeKind::Delete);
        assert_eq!(statement.sql, "DELETE FROM [dbo].[T] WHERE [Id] = 5;");
        assert_eq!(
            statement.keys,
            vec![ChangeKey::delete(0, 4), ChangeKey::update(0, 4, "Name")]
        );
    }

    #[test]
    fn composite_keys_join_with_and() {
        let mut ledger = ChangeLedger::new();
        let key: PrimaryKeyBinding = [
            ("OrderId", CellValue::Int(10)),
            ("Line", CellValue::Int(2)),
        ]
        .into_iter()
        .collect();
        ledger
            .upsert_update(0, 0, "Qty", CellValue::Int(1), CellValue::Int(3), key)
            .expect("edit");

        let metadata = ResultSetMetadata {
            columns: vec![
                ColumnMetadata::new("OrderId", "int").primary_key(),
                ColumnMetadata::new("Line", "int").primary_key(),
                ColumnMetadata::new("Qty", "int"),
            ],
            is_editable: true,
            has_multiple_tables: false,
            source_table: Some(TableRef::new(None, "OrderLines")),
        };
        let report = synthesize(&ledger, &lookup(metadata));
        assert_eq!(
            report.statements[0].sql,
            "UPDATE [OrderLines] SET [Qty] = 3 WHERE [OrderId] = 10 AND [Line] = 2;"
        );
    }

    #[test]
    fn unresolved_tables_fail_per_statement() {
        let mut metadata = users_metadata();
        metadata.has_multiple_tables = true;
        metadata.columns.push(ColumnMetadata::new("Total", "int"));

        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 0, "Total", CellValue::Int(1), CellValue::Int(2), pk(1))
            .expect("edit");
        ledger
            .upsert_update(0, 1, "Name", "A".into(), "B".into(), pk(2))
            .expect("edit");

        let report = synthesize(&ledger, &lookup(metadata));
        assert_eq!(report.statements.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].error,
            SynthesisError::MetadataUnresolved {
                result_set: 0,
                column: Some("Total".to_string())
            }
        );
        assert!(report
            .preview_script()
            .starts_with("UPDATE [dbo].[T] SET [Name] = 'B' WHERE [Id] = 2;\n-- skipped row 0"));
    }

    fn users_orders_metadata() -> ResultSetMetadata {
        ResultSetMetadata {
            columns: vec![
                ColumnMetadata::new("UserId", "int")
                    .primary_key()
                    .owned_by(Some("dbo"), "Users"),
                ColumnMetadata::new("Name", "nvarchar").owned_by(Some("dbo"), "Users"),
                ColumnMetadata::new("OrderId", "int")
                    .primary_key()
                    .owned_by(Some("dbo"), "Orders"),
                ColumnMetadata::new("Total", "int").owned_by(Some("dbo"), "Orders"),
            ],
            is_editable: true,
            has_multiple_tables: true,
            source_table: None,
        }
    }

    fn join_key(user: i64, order: i64) -> PrimaryKeyBinding {
        [
            ("UserId", CellValue::Int(user)),
            ("OrderId", CellValue::Int(order)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn join_edits_bind_only_the_owning_tables_key() {
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 0, "Total", CellValue::Int(10), CellValue::Int(20), join_key(1, 5))
            .expect("edit");
        ledger
            .upsert_update(0, 0, "Name", "Ann".into(), "Bo".into(), join_key(1, 5))
            .expect("edit");

        let report = synthesize(&ledger, &lookup(users_orders_metadata()));
        assert!(report.failures.is_empty());
        let sql = report
            .statements
            .iter()
            .map(|statement| statement.sql.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            sql,
            vec![
                "UPDATE [dbo].[Orders] SET [Total] = 20 WHERE [OrderId] = 5;",
                "UPDATE [dbo].[Users] SET [Name] = 'Bo' WHERE [UserId] = 1;",
            ]
        );
    }

    #[test]
    fn join_delete_with_keys_from_two_tables_is_unresolved() {
        let mut ledger = ChangeLedger::new();
        ledger.record_delete(0, 0, Vec::new(), join_key(1, 5)).expect("delete");

        let report = synthesize(&ledger, &lookup(users_orders_metadata()));
        assert!(report.statements.is_empty());
        assert_eq!(
            report.failures[0].error,
            SynthesisError::MetadataUnresolved {
                result_set: 0,
                column: None
            }
        );
    }

    #[test]
    fn join_delete_uses_the_single_table_whose_key_is_present() {
        let mut metadata = users_orders_metadata();
        metadata.columns[2] = ColumnMetadata::new("OrderId", "int").owned_by(Some("dbo"), "Orders");

        let mut ledger = ChangeLedger::new();
        let key: PrimaryKeyBinding = [("UserId", CellValue::Int(1))].into_iter().collect();
        ledger.record_delete(0, 0, Vec::new(), key).expect("delete");

        let report = synthesize(&ledger, &lookup(metadata));
        assert_eq!(
            report.statements[0].sql,
            "DELETE FROM [dbo].[Users] WHERE [UserId] = 1;"
        );
    }

    #[test]
    fn edit_on_a_table_without_a_key_in_the_row_fails() {
        let mut metadata = users_orders_metadata();
        metadata.columns[2] = ColumnMetadata::new("OrderId", "int").owned_by(Some("dbo"), "Orders");

        let mut ledger = ChangeLedger::new();
        let key: PrimaryKeyBinding = [("UserId", CellValue::Int(1))].into_iter().collect();
        ledger
            .upsert_update(0, 3, "Total", CellValue::Int(1), CellValue::Int(2), key)
            .expect("edit");

        let report = synthesize(&ledger, &lookup(metadata));
        assert!(report.statements.is_empty());
        assert_eq!(
            report.failures[0].error,
            SynthesisError::EmptyPrimaryKey { result_set: 0, row: 3 }
        );
    }

    #[test]
    fn key_change_and_sibling_edit_share_one_update() {
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 0, "Id", CellValue::Int(1), CellValue::Int(10), pk(1))
            .expect("edit");
        ledger
            .upsert_update(0, 0, "Name", "Ann".into(), "Anna".into(), pk(1))
            .expect("edit");
        ledger
            .upsert_update(0, 1, "Name", "Bob".into(), "Rob".into(), pk(2))
            .expect("edit");

        let report = synthesize(&ledger, &lookup(users_metadata()));
        assert_eq!(
            report.statements,
            vec![
                SynthesizedStatement {
                    result_set: 0,
                    row: 0,
                    kind: ChangeKind::Update,
                    sql: "UPDATE [dbo].[T] SET [Id] = 10, [Name] = 'Anna' WHERE [Id] = 1;"
                        .to_string(),
                    keys: vec![ChangeKey::update(0, 0, "Id"), ChangeKey::update(0, 0, "Name")],
                },
                SynthesizedStatement {
                    result_set: 0,
                    row: 1,
                    kind: ChangeKind::Update,
                    sql: "UPDATE [dbo].[T] SET [Name] = 'Rob' WHERE [Id] = 2;".to_string(),
                    keys: vec![ChangeKey::update(0, 1, "Name")],
                },
            ]
        );
    }
}
