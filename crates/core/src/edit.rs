use tracing::debug;

use crate::classifier::ValueKind;
use crate::ledger::{ChangeLedger, LedgerError, PrimaryKeyBinding, UpsertOutcome};
use crate::selection::GridId;
use crate::value::{parse_bool_text, CellValue, NULL_TEXT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellAddress {
    pub grid: GridId,
    pub result_set: usize,
    pub row: usize,
    pub column: String,
}

/// Everything a commit needs, captured when editing starts so the commit does
/// not depend on which grid currently has focus.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEdit {
    pub address: CellAddress,
    pub source_value: CellValue,
    pub displayed_value: CellValue,
    pub kind: ValueKind,
    pub primary_key: PrimaryKeyBinding,
    pub draft: String,
    /// Set by an explicit "set NULL"; typing afterwards clears it.
    pub set_null: bool,
}

impl ActiveEdit {
    /// What the editor shows for the draft.
    #[must_use]
    pub fn draft_display(&self) -> String {
        if self.set_null {
            NULL_TEXT.to_string()
        } else {
            self.draft.clone()
        }
    }

    #[must_use]
    pub fn draft_value(&self) -> CellValue {
        if self.set_null {
            CellValue::Null
        } else {
            parse_draft(&self.draft, self.kind)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum EditState {
    #[default]
    Display,
    Editing(ActiveEdit),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub address: CellAddress,
    pub value: CellValue,
    pub ledger: UpsertOutcome,
}

/// At most one cell is being edited across the workspace.
#[derive(Debug, Clone, Default)]
pub struct EditSession {
    state: EditState,
}

impl EditSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &EditState {
        &self.state
    }

    #[must_use]
    pub fn active(&self) -> Option<&ActiveEdit> {
        match &self.state {
            EditState::Editing(edit) => Some(edit),
            EditState::Display => None,
        }
    }

    #[must_use]
    pub fn is_editing(&self, address: &CellAddress) -> bool {
        self.active().is_some_and(|edit| &edit.address == address)
    }

    /// Enters EDITING; a different cell already in EDITING is committed first.
    pub fn begin(
        &mut self,
        edit: ActiveEdit,
        ledger: &mut ChangeLedger,
    ) -> Result<Option<CommitOutcome>, LedgerError> {
        if self.is_editing(&edit.address) {
            return Ok(None);
        }
        let previous = self.commit(ledger)?;
        debug!(grid = %edit.address.grid, row = edit.address.row, column = %edit.address.column, "editing cell");
        self.state = EditState::Editing(edit);
        Ok(previous)
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> bool {
        match &mut self.state {
            EditState::Editing(edit) => {
                edit.draft = text.into();
                edit.set_null = false;
                true
            }
            EditState::Display => false,
        }
    }

    pub fn push_char(&mut self, ch: char) -> bool {
        match &mut self.state {
            EditState::Editing(edit) => {
                edit.draft.push(ch);
                edit.set_null = false;
                true
            }
            EditState::Display => false,
        }
    }

    /// Stages SQL NULL for the cell regardless of its type.
    pub fn set_null(&mut self) -> bool {
        match &mut self.state {
            EditState::Editing(edit) => {
                edit.draft.clear();
                edit.set_null = true;
                true
            }
            EditState::Display => false,
        }
    }

    pub fn pop_char(&mut self) -> bool {
        match &mut self.state {
            EditState::Editing(edit) if edit.set_null => {
                edit.set_null = false;
                true
            }
            EditState::Editing(edit) => edit.draft.pop().is_some(),
            EditState::Display => false,
        }
    }

    /// Leaves EDITING and records the draft in the ledger when it differs
    /// from the original value. On error the cell stays in EDITING.
    pub fn commit(
        &mut self,
        ledger: &mut ChangeLedger,
    ) -> Result<Option<CommitOutcome>, LedgerError> {
        let EditState::Editing(edit) = &self.state else {
            return Ok(None);
        };

        let value = edit.draft_value();
        let outcome = ledger.upsert_update(
            edit.address.result_set,
            edit.address.row,
            &edit.address.column,
            edit.source_value.clone(),
            value.clone(),
            edit.primary_key.clone(),
        )?;

        let EditState::Editing(edit) = std::mem::take(&mut self.state) else {
            return Ok(None);
        };
        Ok(Some(CommitOutcome {
            address: edit.address,
            value,
            ledger: outcome,
        }))
    }

    /// Escape: drops the draft and leaves the ledger untouched.
    pub fn cancel(&mut self) -> Option<ActiveEdit> {
        match std::mem::take(&mut self.state) {
            EditState::Editing(edit) => Some(edit),
            EditState::Display => None,
        }
    }

    /// Abandons an edit that belongs to a grid being torn down.
    pub fn release_grid(&mut self, grid: GridId) -> bool {
        if self.active().is_some_and(|edit| edit.address.grid == grid) {
            self.state = EditState::Display;
            return true;
        }
        false
    }
}

/// Text shown in the editor when a cell enters EDITING.
#[must_use]
pub fn draft_text(value: &CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        other => other.display_text(),
    }
}

/// Parses editor text into a typed value for the column's kind. `NULL` typed
/// literally becomes a SQL NULL except in text columns, where it is a string.
#[must_use]
pub fn parse_draft(text: &str, kind: ValueKind) -> CellValue {
    if text == NULL_TEXT && kind != ValueKind::String {
        return CellValue::Null;
    }
    match kind {
        ValueKind::Number => {
            let trimmed = text.trim();
            if let Ok(int) = trimmed.parse::<i64>() {
                CellValue::Int(int)
            } else if let Ok(float) = trimmed.parse::<f64>() {
                CellValue::Float(float)
            } else {
                CellValue::text(text)
            }
        }
        ValueKind::Boolean => parse_bool_text(text).map_or_else(|| CellValue::text(text), CellValue::Bool),
        ValueKind::String | ValueKind::Date | ValueKind::Null => CellValue::text(text),
    }
}
