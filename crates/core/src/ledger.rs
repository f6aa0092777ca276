use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::value::CellValue;

/// Primary-key columns and their values, in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimaryKeyBinding {
    pairs: Vec<(String, CellValue)>,
}

impl PrimaryKeyBinding {
    #[must_use]
    pub fn new(pairs: Vec<(String, CellValue)>) -> Self {
        Self { pairs }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.pairs
            .iter()
            .map(|(column, value)| (column.as_str(), value))
    }

    #[must_use]
    pub fn value(&self, column: &str) -> Option<&CellValue> {
        self.pairs
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

impl<S: Into<String>, V: Into<CellValue>> FromIterator<(S, V)> for PrimaryKeyBinding {
    fn from_iter<T: IntoIterator<Item = (S, V)>>(iter: T) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Update,
    Delete,
}

/// A pending edit. `row` is the source row index, which stays valid across
/// re-projection because rows are never reordered or removed from a grid.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRecord {
    Update {
        row: usize,
        column: String,
        old_value: CellValue,
        new_value: CellValue,
        primary_key: PrimaryKeyBinding,
    },
    Delete {
        row: usize,
        old_values: Vec<(String, CellValue)>,
        primary_key: PrimaryKeyBinding,
    },
}

impl ChangeRecord {
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Update { .. } => ChangeKind::Update,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }

    #[must_use]
    pub fn row(&self) -> usize {
        match self {
            Self::Update { row, .. } | Self::Delete { row, .. } => *row,
        }
    }

    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Update { column, .. } => Some(column),
            Self::Delete { .. } => None,
        }
    }

    #[must_use]
    pub fn primary_key(&self) -> &PrimaryKeyBinding {
        match self {
            Self::Update { primary_key, .. } | Self::Delete { primary_key, .. } => primary_key,
        }
    }

    #[must_use]
    pub fn key(&self, result_set: usize) -> ChangeKey {
        ChangeKey {
            result_set,
            row: self.row(),
            column: self.column().map(str::to_string),
        }
    }
}

/// Identifies one ledger record: an UPDATE by (row, column), a DELETE by row alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeKey {
    pub result_set: usize,
    pub row: usize,
    pub column: Option<String>,
}

impl ChangeKey {
    #[must_use]
    pub fn update(result_set: usize, row: usize, column: impl Into<String>) -> Self {
        Self {
            result_set,
            row,
            column: Some(column.into()),
        }
    }

    #[must_use]
    pub fn delete(result_set: usize, row: usize) -> Self {
        Self {
            result_set,
            row,
            column: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// The new value matched the original, so the pending update was dropped.
    Reverted,
    Unchanged,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("row {row} of result set {result_set} has no primary-key binding")]
    EmptyPrimaryKey { result_set: usize, row: usize },
}

#[derive(Debug, Clone, Default)]
pub struct ChangeLedger {
    result_sets: BTreeMap<usize, Vec<ChangeRecord>>,
}

impl ChangeLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result_sets.values().all(Vec::is_empty)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.result_sets.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn records(&self, result_set: usize) -> &[ChangeRecord] {
        self.result_sets
            .get(&result_set)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ChangeRecord)> {
        self.result_sets
            .iter()
            .flat_map(|(result_set, records)| records.iter().map(move |record| (*result_set, record)))
    }

    #[must_use]
    pub fn get(&self, key: &ChangeKey) -> Option<&ChangeRecord> {
        self.records(key.result_set)
            .iter()
            .find(|record| matches_key(record, key))
    }

    /// Value a cell should display while an UPDATE is pending.
    #[must_use]
    pub fn pending_value(&self, result_set: usize, row: usize, column: &str) -> Option<&CellValue> {
        self.records(result_set).iter().find_map(|record| match record {
            ChangeRecord::Update {
                row: record_row,
                column: record_column,
                new_value,
                ..
            } if *record_row == row && record_column == column => Some(new_value),
            _ => None,
        })
    }

    #[must_use]
    pub fn is_row_deleted(&self, result_set: usize, row: usize) -> bool {
        self.get(&ChangeKey::delete(result_set, row)).is_some()
    }

    /// Records an UPDATE. An existing record keeps its first `old_value`; only
    /// `new_value` is replaced.
    pub fn upsert_update(
        &mut self,
        result_set: usize,
        row: usize,
        column: &str,
        old_value: CellValue,
        new_value: CellValue,
        primary_key: PrimaryKeyBinding,
    ) -> Result<UpsertOutcome, LedgerError> {
        if primary_key.is_empty() {
            return Err(LedgerError::EmptyPrimaryKey { result_set, row });
        }

        let records = self.result_sets.entry(result_set).or_default();
        let existing = records.iter().position(|record| {
            matches!(record, ChangeRecord::Update { row: r, column: c, .. } if *r == row && c == column)
        });

        let outcome = match existing {
            Some(index) => {
                let ChangeRecord::Update {
                    old_value: original,
                    new_value: pending,
                    ..
                } = &mut records[index]
                else {
                    return Ok(UpsertOutcome::Unchanged);
                };
                if values_equal(original, &new_value) {
                    records.remove(index);
                    UpsertOutcome::Reverted
                } else {
                    *pending = new_value;
                    UpsertOutcome::Replaced
                }
            }
            None if values_equal(&old_value, &new_value) => UpsertOutcome::Unchanged,
            None => {
                records.push(ChangeRecord::Update {
                    row,
                    column: column.to_string(),
                    old_value,
                    new_value,
                    primary_key,
                });
                UpsertOutcome::Inserted
            }
        };

        debug!(result_set, row, column, ?outcome, "ledger update");
        Ok(outcome)
    }

    /// Records a DELETE for a row; a second delete of the same row is a no-op.
    pub fn record_delete(
        &mut self,
        result_set: usize,
        row: usize,
        old_values: Vec<(String, CellValue)>,
        primary_key: PrimaryKeyBinding,
    ) -> Result<bool, LedgerError> {
        if primary_key.is_empty() {
            return Err(LedgerError::EmptyPrimaryKey { result_set, row });
        }
        if self.is_row_deleted(result_set, row) {
            return Ok(false);
        }

        self.result_sets
            .entry(result_set)
            .or_default()
            .push(ChangeRecord::Delete {
                row,
                old_values,
                primary_key,
            });
        debug!(result_set, row, "ledger delete");
        Ok(true)
    }

    pub fn revert(&mut self, key: &ChangeKey) -> Option<ChangeRecord> {
        let records = self.result_sets.get_mut(&key.result_set)?;
        let index = records.iter().position(|record| matches_key(record, key))?;
        let removed = records.remove(index);
        if records.is_empty() {
            self.result_sets.remove(&key.result_set);
        }
        debug!(?key, "ledger record reverted");
        Some(removed)
    }

    /// Empties every result set, returning what was pending.
    pub fn revert_all(&mut self) -> Vec<(usize, ChangeRecord)> {
        let drained = std::mem::take(&mut self.result_sets)
            .into_iter()
            .flat_map(|(result_set, records)| {
                records.into_iter().map(move |record| (result_set, record))
            })
            .collect::<Vec<_>>();
        if !drained.is_empty() {
            info!(count = drained.len(), "all pending changes reverted");
        }
        drained
    }

    /// Drops the pending changes of one result set, e.g. when its grid closes.
    pub fn discard_result_set(&mut self, result_set: usize) -> usize {
        self.result_sets
            .remove(&result_set)
            .map_or(0, |records| records.len())
    }
}

fn matches_key(record: &ChangeRecord, key: &ChangeKey) -> bool {
    record.row() == key.row && record.column() == key.column.as_deref()
}

/// Booleans compare by truth value, everything else by display text.
#[must_use]
pub fn values_equal(left: &CellValue, right: &CellValue) -> bool {
    if left.is_null() || right.is_null() {
        return left.is_null() && right.is_null();
    }
    if matches!(left, CellValue::Bool(_)) || matches!(right, CellValue::Bool(_)) {
        if let (Some(a), Some(b)) = (left.as_bool(), right.as_bool()) {
            return a == b;
        }
    }
    left.display_text() == right.display_text()
}

#[cfg(test)]
mod tests {
    use super::{
        values_equal, ChangeKey, ChangeKind, ChangeLedger, ChangeRecord, LedgerError,
        PrimaryKeyBinding, UpsertOutcome,
    };
    use crate::value::CellValue;

    fn pk(id: i64) -> PrimaryKeyBinding {
        [("Id", CellValue::Int(id))].into_iter().collect()
    }

    #[test]
    fn repeated_edits_keep_first_old_value_and_last_new_value() {
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 3, "Name", "A".into(), "B".into(), pk(3))
            .expect("first edit");
        let outcome = ledger
            .upsert_update(0, 3, "Name", "B".into(), "C".into(), pk(3))
            .expect("second edit");

        assert_eq!(outcome, UpsertOutcome::Replaced);
        assert_eq!(ledger.len(), 1);
        let ChangeRecord::Update {
            old_value,
            new_value,
            ..
        } = &ledger.records(0)[0]
        else {
            panic!("expected an update record");
        };
        assert_eq!(old_value, &CellValue::text("A"));
        assert_eq!(new_value, &CellValue::text("C"));
    }

    #[test]
    fn editing_back_to_original_drops_the_record() {
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 1, "Name", "A".into(), "B".into(), pk(1))
            .expect("edit");
        let outcome = ledger
            .upsert_update(0, 1, "Name", "B".into(), "A".into(), pk(1))
            .expect("edit back");
        assert_eq!(outcome, UpsertOutcome::Reverted);
        assert!(ledger.is_empty());
    }

    #[test]
    fn unchanged_values_and_missing_keys_create_nothing() {
        let mut ledger = ChangeLedger::new();
        let outcome = ledger
            .upsert_update(0, 1, "Active", CellValue::Bool(true), "1".into(), pk(1))
            .expect("no-op edit");
        assert_eq!(outcome, UpsertOutcome::Unchanged);

        let err = ledger
            .upsert_update(0, 1, "Name", "A".into(), "B".into(), PrimaryKeyBinding::default())
            .expect_err("empty key must be rejected");
        assert_eq!(
            err,
            LedgerError::EmptyPrimaryKey {
                result_set: 0,
                row: 1
            }
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn deletes_are_recorded_once_per_row() {
        let mut ledger = ChangeLedger::new();
        assert!(ledger.record_delete(1, 4, Vec::new(), pk(4)).expect("delete"));
        assert!(!ledger.record_delete(1, 4, Vec::new(), pk(4)).expect("repeat delete"));
        assert!(ledger.is_row_deleted(1, 4));
        assert_eq!(ledger.records(1)[0].kind(), ChangeKind::Delete);
    }

    #[test]
    fn revert_one_and_revert_all() {
        let mut ledger = ChangeLedger::new();
        ledger
            .upsert_update(0, 0, "Name", "A".into(), "B".into(), pk(0))
            .expect("edit");
        ledger
            .upsert_update(2, 5, "Name", "X".into(), "Y".into(), pk(5))
            .expect("edit other set");
        ledger.record_delete(2, 6, Vec::new(), pk(6)).expect("delete");

        let reverted = ledger
            .revert(&ChangeKey::update(0, 0, "Name"))
            .expect("record exists");
        assert_eq!(reverted.row(), 0);
        assert_eq!(ledger.pending_value(0, 0, "Name"), None);
        assert_eq!(ledger.pending_value(2, 5, "Name"), Some(&CellValue::text("Y")));

        let drained = ledger.revert_all();
        assert_eq!(drained.len(), 2);
        assert!(ledger.is_empty());
    }

    #[test]
    fn value_comparison_normalizes_booleans() {
        assert!(values_equal(&CellValue::Bool(false), &CellValue::text("0")));
        assert!(values_equal(&CellValue::Int(5), &CellValue::text("5")));
        assert!(!values_equal(&CellValue::Null, &CellValue::text("")));
    }
}
