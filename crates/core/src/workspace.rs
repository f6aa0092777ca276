use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::actions::ActionContext;
use crate::apply::{apply_pending, ApplyError, ApplySummary, ChangeApplier};
use crate::audit_trail::FileAuditTrail;
use crate::columns::ResultSetMetadata;
use crate::edit::{draft_text, ActiveEdit, CellAddress, CommitOutcome, EditSession};
use crate::grid::{RenderedGrid, ResultGrid, TableView};
use crate::ledger::{ChangeKey, ChangeLedger, ChangeRecord, LedgerError};
use crate::projection::SortState;
use crate::relation::{load_child_grid, ChildGrid, RelationError, RelationProvider, RelationRequest};
use crate::selection::{CellPosition, GridId, Modifiers, SelectionKind, SelectionModel, SelectionTarget};
use crate::settings::GridSettings;
use crate::statistics::SelectionStats;
use crate::synthesizer::{synthesize, MetadataLookup, SynthesisReport};
use crate::value::RowRecord;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("{0} is not open")]
    UnknownGrid(GridId),
    #[error("result set {0} is already shown in another grid")]
    DuplicateResultSet(usize),
    #[error("{grid} has no row at position {position}")]
    RowOutOfRange { grid: GridId, position: usize },
    #[error("{grid} has no column {column}")]
    ColumnOutOfRange { grid: GridId, column: usize },
    #[error("{0} is read-only: it is not editable or has no primary key")]
    NotEditable(GridId),
    #[error("row {row} of {grid} is marked for deletion")]
    RowDeleted { grid: GridId, row: usize },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Relation(#[from] RelationError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Resolves result-set metadata through the open grids.
#[derive(Debug, Clone, Copy)]
pub struct GridLookup<'a>(&'a BTreeMap<GridId, ResultGrid>);

impl MetadataLookup for GridLookup<'_> {
    fn metadata(&self, result_set: usize) -> Option<&ResultSetMetadata> {
        self.0
            .values()
            .find(|grid| grid.result_set() == result_set)
            .map(ResultGrid::metadata)
    }
}

/// The state every grid handler works on: open grids, the one selection, the
/// pending-change ledger and the single in-progress edit.
#[derive(Debug, Default)]
pub struct GridWorkspace {
    settings: GridSettings,
    grids: BTreeMap<GridId, ResultGrid>,
    next_grid_id: u64,
    selection: SelectionModel,
    ledger: ChangeLedger,
    edit: EditSession,
}

impl GridWorkspace {
    #[must_use]
    pub fn new(settings: GridSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn settings(&self) -> &GridSettings {
        &self.settings
    }

    pub fn add_result_set(
        &mut self,
        result_set: usize,
        metadata: ResultSetMetadata,
        rows: Vec<RowRecord>,
    ) -> Result<GridId, WorkspaceError> {
        if self.grids.values().any(|grid| grid.result_set() == result_set) {
            return Err(WorkspaceError::DuplicateResultSet(result_set));
        }
        self.next_grid_id += 1;
        let id = GridId(self.next_grid_id);
        let row_count = rows.len();
        self.grids
            .insert(id, ResultGrid::new(id, result_set, metadata, rows, &self.settings));
        info!(grid = %id, result_set, rows = row_count, "result set opened");
        Ok(id)
    }

    /// Tears a grid down together with its selection, edit and pending changes.
    pub fn remove_grid(&mut self, id: GridId) -> Option<ResultGrid> {
        let grid = self.grids.remove(&id)?;
        self.selection.release_grid(id);
        self.edit.release_grid(id);
        let discarded = self.ledger.discard_result_set(grid.result_set());
        info!(grid = %id, discarded, "result set closed");
        Some(grid)
    }

    #[must_use]
    pub fn grid(&self, id: GridId) -> Option<&ResultGrid> {
        self.grids.get(&id)
    }

    pub fn grid_mut(&mut self, id: GridId) -> Option<&mut ResultGrid> {
        self.grids.get_mut(&id)
    }

    pub fn grids(&self) -> impl Iterator<Item = &ResultGrid> {
        self.grids.values()
    }

    #[must_use]
    pub fn grid_ids(&self) -> Vec<GridId> {
        self.grids.keys().copied().collect()
    }

    #[must_use]
    pub fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    #[must_use]
    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    #[must_use]
    pub fn edit_session(&self) -> &EditSession {
        &self.edit
    }

    #[must_use]
    pub fn lookup(&self) -> GridLookup<'_> {
        GridLookup(&self.grids)
    }

    fn require_grid(&self, id: GridId) -> Result<&ResultGrid, WorkspaceError> {
        self.grids.get(&id).ok_or(WorkspaceError::UnknownGrid(id))
    }

    fn require_grid_mut(&mut self, id: GridId) -> Result<&mut ResultGrid, WorkspaceError> {
        self.grids.get_mut(&id).ok_or(WorkspaceError::UnknownGrid(id))
    }

    /// Runs a pointer gesture through the selection model.
    pub fn click(
        &mut self,
        id: GridId,
        target: SelectionTarget,
        modifiers: Modifiers,
    ) -> Result<&SelectionStats, WorkspaceError> {
        let grid = self.grids.get(&id).ok_or(WorkspaceError::UnknownGrid(id))?;
        check_target(grid, target)?;
        Ok(self
            .selection
            .apply_gesture(id, target, modifiers, &grid.cells(&self.ledger)))
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Puts a cell into EDITING, committing any other cell that was being edited.
    pub fn begin_edit(
        &mut self,
        id: GridId,
        cell: CellPosition,
    ) -> Result<Option<CommitOutcome>, WorkspaceError> {
        let grid = self.require_grid(id)?;
        if !grid.is_editable() {
            return Err(WorkspaceError::NotEditable(id));
        }
        let source_index = grid
            .source_index(cell.row)
            .ok_or(WorkspaceError::RowOutOfRange {
                grid: id,
                position: cell.row,
            })?;
        let column = grid
            .columns()
            .get(cell.column)
            .ok_or(WorkspaceError::ColumnOutOfRange {
                grid: id,
                column: cell.column,
            })?;
        if self.ledger.is_row_deleted(grid.result_set(), source_index) {
            return Err(WorkspaceError::RowDeleted {
                grid: id,
                row: cell.row,
            });
        }

        let displayed_value = grid.displayed_value(&self.ledger, source_index, &column.id);
        let edit = ActiveEdit {
            address: CellAddress {
                grid: id,
                result_set: grid.result_set(),
                row: source_index,
                column: column.id.clone(),
            },
            source_value: grid.source_value(source_index, &column.id),
            draft: draft_text(&displayed_value),
            displayed_value,
            kind: column.kind,
            primary_key: grid.primary_key_binding(source_index),
            set_null: false,
        };
        if edit.primary_key.is_empty() {
            return Err(LedgerError::EmptyPrimaryKey {
                result_set: grid.result_set(),
                row: source_index,
            }
            .into());
        }
        Ok(self.edit.begin(edit, &mut self.ledger)?)
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> bool {
        self.edit.set_draft(text)
    }

    pub fn push_draft_char(&mut self, ch: char) -> bool {
        self.edit.push_char(ch)
    }

    pub fn pop_draft_char(&mut self) -> bool {
        self.edit.pop_char()
    }

    pub fn set_draft_null(&mut self) -> bool {
        self.edit.set_null()
    }

    pub fn commit_edit(&mut self) -> Result<Option<CommitOutcome>, WorkspaceError> {
        Ok(self.edit.commit(&mut self.ledger)?)
    }

    pub fn cancel_edit(&mut self) -> Option<ActiveEdit> {
        self.edit.cancel()
    }

    /// Marks the row at a projected position for deletion.
    pub fn delete_row(&mut self, id: GridId, position: usize) -> Result<bool, WorkspaceError> {
        let grid = self.grids.get(&id).ok_or(WorkspaceError::UnknownGrid(id))?;
        let source_index = grid
            .source_index(position)
            .ok_or(WorkspaceError::RowOutOfRange { grid: id, position })?;
        if !grid.is_editable() {
            return Err(WorkspaceError::NotEditable(id));
        }
        if self
            .edit
            .active()
            .is_some_and(|edit| edit.address.grid == id && edit.address.row == source_index)
        {
            self.edit.cancel();
        }
        Ok(self.ledger.record_delete(
            grid.result_set(),
            source_index,
            grid.row_values(source_index),
            grid.primary_key_binding(source_index),
        )?)
    }

    /// Deletes every row touched by the current selection in `id`.
    pub fn delete_selected_rows(&mut self, id: GridId) -> Result<usize, WorkspaceError> {
        if self.selection.owner() != Some(id) {
            return Ok(0);
        }
        let grid = self.require_grid(id)?;
        let mut positions = self
            .selection
            .selected_cells(&grid.cells(&self.ledger))
            .into_iter()
            .map(|cell| cell.row)
            .collect::<Vec<_>>();
        positions.dedup();
        let mut deleted = 0;
        for position in positions {
            if self.delete_row(id, position)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn revert_change(&mut self, key: &ChangeKey) -> Option<ChangeRecord> {
        self.ledger.revert(key)
    }

    /// Reverts the pending update of one cell, or the deletion of its row.
    pub fn revert_cell(
        &mut self,
        id: GridId,
        cell: CellPosition,
    ) -> Result<Option<ChangeRecord>, WorkspaceError> {
        let grid = self.grids.get(&id).ok_or(WorkspaceError::UnknownGrid(id))?;
        let source_index = grid.source_index(cell.row).ok_or(WorkspaceError::RowOutOfRange {
            grid: id,
            position: cell.row,
        })?;
        let result_set = grid.result_set();
        if let Some(record) = self.ledger.revert(&ChangeKey::delete(result_set, source_index)) {
            return Ok(Some(record));
        }
        let Some(column) = grid.columns().get(cell.column) else {
            return Ok(None);
        };
        let key = ChangeKey::update(result_set, source_index, column.id.clone());
        Ok(self.ledger.revert(&key))
    }

    /// Discards every pending change and any in-progress edit.
    pub fn revert_all(&mut self) -> usize {
        self.edit.cancel();
        self.ledger.revert_all().len()
    }

    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.ledger.len()
    }

    pub fn set_filter<I, S>(&mut self, id: GridId, column: &str, values: I) -> Result<(), WorkspaceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.require_grid_mut(id)?.set_filter(column, values);
        self.after_projection_change(id);
        Ok(())
    }

    pub fn clear_filter(&mut self, id: GridId, column: &str) -> Result<bool, WorkspaceError> {
        let cleared = self.require_grid_mut(id)?.clear_filter(column);
        if cleared {
            self.after_projection_change(id);
        }
        Ok(cleared)
    }

    pub fn clear_filters(&mut self, id: GridId) -> Result<(), WorkspaceError> {
        self.require_grid_mut(id)?.clear_filters();
        self.after_projection_change(id);
        Ok(())
    }

    pub fn toggle_sort(&mut self, id: GridId, column: &str) -> Result<Option<SortState>, WorkspaceError> {
        let state = self.require_grid_mut(id)?.toggle_sort(column);
        self.after_projection_change(id);
        Ok(state)
    }

    fn after_projection_change(&mut self, id: GridId) {
        if let Some(grid) = self.grids.get(&id) {
            self.selection
                .invalidate_positions(id, &grid.cells(&self.ledger));
        }
    }

    pub fn on_scroll(&mut self, id: GridId, scroll_offset: u64, now: Instant) -> Result<(), WorkspaceError> {
        self.require_grid_mut(id)?.on_scroll(scroll_offset, now);
        Ok(())
    }

    /// Fires due scroll timers; returns the grids that need a redraw.
    pub fn tick(&mut self, now: Instant) -> Vec<GridId> {
        self.grids
            .values_mut()
            .filter_map(|grid| grid.tick(now).then_some(grid.id()))
            .collect()
    }

    pub fn render(&mut self, id: GridId) -> Result<RenderedGrid, WorkspaceError> {
        let grid = self.grids.get(&id).ok_or(WorkspaceError::UnknownGrid(id))?;
        self.selection.validate(id, &grid.cells(&self.ledger));
        let grid = self.grids.get_mut(&id).ok_or(WorkspaceError::UnknownGrid(id))?;
        Ok(grid.render(&self.selection, &self.ledger, &self.edit))
    }

    /// SQL for every pending change, without running anything.
    #[must_use]
    pub fn preview_sql(&self) -> SynthesisReport {
        synthesize(&self.ledger, &self.lookup())
    }

    /// Commits the open edit, then runs all pending changes through `applier`.
    pub async fn apply_changes<A>(
        &mut self,
        applier: &A,
        journal: Option<&FileAuditTrail>,
    ) -> Result<ApplySummary, WorkspaceError>
    where
        A: ChangeApplier + ?Sized,
    {
        self.edit.commit(&mut self.ledger)?;
        let lookup = GridLookup(&self.grids);
        let summary = apply_pending(applier, &mut self.ledger, &lookup, journal).await?;

        let ids = self.grid_ids();
        for id in ids {
            let Some(grid) = self.grids.get_mut(&id) else {
                continue;
            };
            let applied = summary
                .statements
                .iter()
                .filter(|statement| statement.statement.result_set == grid.result_set())
                .flat_map(|statement| statement.applied.iter().cloned())
                .collect::<Vec<_>>();
            if !applied.is_empty() {
                grid.absorb_applied(&applied);
                self.after_projection_change(id);
            }
        }
        Ok(summary)
    }

    /// Follows the foreign key of a cell and shows the related rows beneath it.
    pub async fn expand_relation<P>(
        &mut self,
        id: GridId,
        cell: CellPosition,
        provider: &P,
    ) -> Result<Arc<ChildGrid>, WorkspaceError>
    where
        P: RelationProvider + ?Sized,
    {
        let grid = self.require_grid(id)?;
        let source_index = grid.source_index(cell.row).ok_or(WorkspaceError::RowOutOfRange {
            grid: id,
            position: cell.row,
        })?;
        let column = grid
            .columns()
            .get(cell.column)
            .ok_or(WorkspaceError::ColumnOutOfRange {
                grid: id,
                column: cell.column,
            })?;
        let table = column
            .source
            .clone()
            .or_else(|| grid.metadata().single_source_table())
            .ok_or_else(|| RelationError::UnresolvedTable(column.id.clone()))?;
        let request = RelationRequest {
            table,
            column: column.id.clone(),
            value: grid.displayed_value(&self.ledger, source_index, &column.id),
        };

        let child = Arc::new(load_child_grid(provider, &request).await?);
        self.require_grid_mut(id)?
            .renderer_mut()
            .attach_expansion(cell.row, Arc::clone(&child));
        debug!(grid = %id, position = cell.row, "relation expanded");
        Ok(child)
    }

    pub fn collapse_relation(&mut self, id: GridId, position: usize) -> Result<bool, WorkspaceError> {
        Ok(self
            .require_grid_mut(id)?
            .renderer_mut()
            .detach_expansion(position)
            .is_some())
    }

    /// The selected part of the owning grid: rows in position order, selected
    /// columns only, in display order.
    #[must_use]
    pub fn selection_view(&self) -> Option<TableView> {
        let id = self.selection.owner()?;
        let grid = self.grids.get(&id)?;
        let cells = self.selection.selected_cells(&grid.cells(&self.ledger));
        if cells.is_empty() {
            return None;
        }

        let mut rows = cells.iter().map(|cell| cell.row).collect::<Vec<_>>();
        rows.dedup();
        let view = grid.export_view(&self.ledger);
        let order = grid.columns().display_order();
        let selected = order
            .iter()
            .enumerate()
            .filter(|(_, index)| cells.iter().any(|cell| cell.column == **index))
            .map(|(display, _)| display)
            .collect::<Vec<_>>();

        Some(TableView {
            columns: selected
                .iter()
                .filter_map(|display| view.columns.get(*display).cloned())
                .collect(),
            rows: rows
                .iter()
                .filter_map(|row| view.rows.get(*row))
                .map(|values| {
                    selected
                        .iter()
                        .map(|display| values.get(*display).cloned().unwrap_or_default())
                        .collect()
                })
                .collect(),
        })
    }

    /// Snapshot used to rank grid actions for the focused grid and cursor.
    #[must_use]
    pub fn action_context(&self, id: GridId, cursor: Option<CellPosition>) -> ActionContext {
        let Some(grid) = self.grids.get(&id) else {
            return ActionContext::default();
        };
        let cursor_source = cursor.and_then(|cell| grid.source_index(cell.row));
        let owned_selection = self.selection.owner() == Some(id);
        ActionContext {
            has_results: grid.row_count() > 0,
            selection: if owned_selection {
                self.selection.kind()
            } else {
                SelectionKind::None
            },
            selection_count: if owned_selection {
                self.selection.state().entries.len()
            } else {
                0
            },
            grid_editable: grid.is_editable(),
            cursor_on_foreign_key: cursor
                .and_then(|cell| grid.columns().get(cell.column))
                .is_some_and(|column| column.is_foreign_key),
            cursor_expanded: cursor
                .is_some_and(|cell| grid.renderer().expansion(cell.row).is_some()),
            cursor_row_deleted: cursor_source
                .is_some_and(|row| self.ledger.is_row_deleted(grid.result_set(), row)),
            pending_changes: self.ledger.len(),
            filters_active: grid.filters().is_active(),
            editing: self.edit.active().is_some(),
        }
    }
}

fn check_target(grid: &ResultGrid, target: SelectionTarget) -> Result<(), WorkspaceError> {
    let id = grid.id();
    let rows = grid.row_count();
    let columns = grid.columns().len();
    let row_check = |position: usize| {
        if position < rows {
            Ok(())
        } else {
            Err(WorkspaceError::RowOutOfRange { grid: id, position })
        }
    };
    let column_check = |column: usize| {
        if column < columns {
            Ok(())
        } else {
            Err(WorkspaceError::ColumnOutOfRange { grid: id, column })
        }
    };
    match target {
        SelectionTarget::Row(row) => row_check(row),
        SelectionTarget::Column(column) => column_check(column),
        SelectionTarget::Cell(cell) => row_check(cell.row).and_then(|()| column_check(cell.column)),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{GridWorkspace, WorkspaceError};
    use crate::columns::{ColumnMetadata, ResultSetMetadata, TableRef};
    use crate::ledger::{ChangeKey, UpsertOutcome};
    use crate::relation::{ForeignKeyRef, RelationBackendError, RelationProvider};
    use crate::selection::{CellPosition, GridId, Modifiers, SelectionKind, SelectionTarget};
    use crate::settings::GridSettings;
    use crate::statistics::StatsDetail;
    use crate::value::{row_from_pairs, CellValue, RowRecord};

    fn users() -> (ResultSetMetadata, Vec<RowRecord>) {
        let metadata = ResultSetMetadata {
            columns: vec![
                ColumnMetadata::new("Id", "int")
                    .primary_key()
                    .owned_by(Some("dbo"), "T"),
                ColumnMetadata::new("Name", "nvarchar").owned_by(Some("dbo"), "T"),
                ColumnMetadata::new("TeamId", "int")
                    .foreign_key()
                    .owned_by(Some("dbo"), "T"),
            ],
            is_editable: true,
            has_multiple_tables: false,
            source_table: None,
        };
        let rows = vec![
            row_from_pairs([("Id", CellValue::Int(1)), ("Name", "Ann".into()), ("TeamId", CellValue::Int(7))]),
            row_from_pairs([("Id", CellValue::Int(2)), ("Name", "Bob".into()), ("TeamId", CellValue::Null)]),
            row_from_pairs([("Id", CellValue::Int(3)), ("Name", "Cy".into()), ("TeamId", CellValue::Int(7))]),
        ];
        (metadata, rows)
    }

    fn workspace() -> (GridWorkspace, GridId) {
        let mut workspace = GridWorkspace::new(GridSettings::default());
        let (metadata, rows) = users();
        let id = workspace
            .add_result_set(0, metadata, rows)
            .expect("grid opens");
        (workspace, id)
    }

    struct Teams;

    #[async_trait]
    impl RelationProvider for Teams {
        async fn foreign_key(
            &self,
            _table: &TableRef,
            column: &str,
        ) -> Result<Option<ForeignKeyRef>, RelationBackendError> {
            Ok((column == "TeamId")
                .then(|| ForeignKeyRef::new("FK_T_Teams", "TeamId", Some("dbo"), "Teams", "Id")))
        }

        async fn fetch_related(
            &self,
            _foreign_key: &ForeignKeyRef,
            value: &CellValue,
        ) -> Result<Vec<RowRecord>, RelationBackendError> {
            Ok(vec![row_from_pairs([("Id", value.clone()), ("Name", "Red".into())])])
        }
    }

    #[test]
    fn edit_commit_then_preview_produces_update() {
        let (mut workspace, id) = workspace();
        workspace
            .begin_edit(id, CellPosition::new(0, 1))
            .expect("edit starts");
        workspace.set_draft("Anna");
        let outcome = workspace
            .commit_edit()
            .expect("commit succeeds")
            .expect("edit was open");
        assert_eq!(outcome.ledger, UpsertOutcome::Inserted);

        let report = workspace.preview_sql();
        assert_eq!(
            report.preview_script(),
            "UPDATE [dbo].[T] SET [Name] = 'Anna' WHERE [Id] = 1;\n"
        );
    }

    #[test]
    fn pending_edit_survives_sorting_and_follows_its_row() {
        let (mut workspace, id) = workspace();
        workspace
            .begin_edit(id, CellPosition::new(0, 1))
            .expect("edit starts");
        workspace.set_draft("Zed");
        workspace.commit_edit().expect("commit succeeds");

        workspace.toggle_sort(id, "Id").expect("sort");
        workspace.toggle_sort(id, "Id").expect("sort desc");
        let rendered = workspace.render(id).expect("render");
        let last = rendered.rows().last().expect("rows rendered");
        assert_eq!(last.source_index, 0);
        assert!(last.cells.iter().any(|cell| cell.text == "Zed" && cell.edited));
    }

    #[test]
    fn projection_change_clears_row_selection_but_keeps_columns() {
        let (mut workspace, id) = workspace();
        workspace
            .click(id, SelectionTarget::Row(1), Modifiers::NONE)
            .expect("click");
        workspace.toggle_sort(id, "Name").expect("sort");
        assert_eq!(workspace.selection().kind(), SelectionKind::None);

        workspace
            .click(id, SelectionTarget::Column(0), Modifiers::NONE)
            .expect("click");
        workspace.set_filter(id, "Name", ["Ann", "Cy"]).expect("filter");
        assert_eq!(workspace.selection().kind(), SelectionKind::Column);
        assert_eq!(workspace.selection().stats().count, 2);
        assert!(matches!(
            workspace.selection().stats().detail,
            StatsDetail::Numeric { .. }
        ));
    }

    #[test]
    fn clicks_outside_the_grid_are_rejected() {
        let (mut workspace, id) = workspace();
        let err = workspace
            .click(id, SelectionTarget::Row(3), Modifiers::NONE)
            .expect_err("row 3 does not exist");
        assert!(matches!(err, WorkspaceError::RowOutOfRange { position: 3, .. }));
        let err = workspace
            .click(GridId(99), SelectionTarget::Row(0), Modifiers::NONE)
            .expect_err("grid 99 does not exist");
        assert!(matches!(err, WorkspaceError::UnknownGrid(GridId(99))));
    }

    #[test]
    fn delete_supersedes_edits_and_blocks_new_ones() {
        let (mut workspace, id) = workspace();
        workspace
            .begin_edit(id, CellPosition::new(1, 1))
            .expect("edit starts");
        workspace.set_draft("Robert");
        workspace.commit_edit().expect("commit succeeds");
        assert!(workspace.delete_row(id, 1).expect("delete"));
        assert!(!workspace.delete_row(id, 1).expect("second delete is a no-op"));

        let err = workspace
            .begin_edit(id, CellPosition::new(1, 1))
            .expect_err("deleted rows are not editable");
        assert!(matches!(err, WorkspaceError::RowDeleted { .. }));

        let report = workspace.preview_sql();
        assert_eq!(
            report.preview_script(),
            "DELETE FROM [dbo].[T] WHERE [Id] = 2;\n"
        );

        let reverted = workspace
            .revert_cell(id, CellPosition::new(1, 1))
            .expect("revert")
            .expect("delete reverted");
        assert!(reverted.column().is_none());
        assert_eq!(workspace.pending_changes(), 1);
        assert_eq!(workspace.revert_all(), 1);
    }

    #[test]
    fn removing_a_grid_releases_its_state() {
        let (mut workspace, id) = workspace();
        workspace
            .click(id, SelectionTarget::Cell(CellPosition::new(0, 0)), Modifiers::NONE)
            .expect("click");
        workspace.delete_row(id, 0).expect("delete");
        assert!(workspace.remove_grid(id).is_some());
        assert_eq!(workspace.selection().kind(), SelectionKind::None);
        assert!(workspace.ledger().is_empty());
        assert!(workspace.revert_change(&ChangeKey::delete(0, 0)).is_none());
    }

    #[test]
    fn selection_view_keeps_position_order_and_selected_columns() {
        let (mut workspace, id) = workspace();
        workspace
            .click(id, SelectionTarget::Cell(CellPosition::new(2, 1)), Modifiers::NONE)
            .expect("click");
        workspace
            .click(id, SelectionTarget::Cell(CellPosition::new(0, 1)), Modifiers::TOGGLE)
            .expect("ctrl click");

        let view = workspace.selection_view().expect("selection present");
        assert_eq!(view.headers(), ["Name"]);
        assert_eq!(view.rows, vec![vec![CellValue::text("Ann")], vec![CellValue::text("Cy")]]);
    }

    #[tokio::test]
    async fn expanding_a_foreign_key_attaches_a_shared_child_grid() {
        let (mut workspace, id) = workspace();
        let child = workspace
            .expand_relation(id, CellPosition::new(0, 2), &Teams)
            .await
            .expect("relation expands");
        assert_eq!(child.rows.len(), 1);
        let context = workspace.action_context(id, Some(CellPosition::new(0, 2)));
        assert!(context.cursor_expanded);
        assert!(context.cursor_on_foreign_key);

        let err = workspace
            .expand_relation(id, CellPosition::new(1, 2), &Teams)
            .await
            .expect_err("null keys cannot be followed");
        assert!(matches!(err, WorkspaceError::Relation(_)));

        workspace.toggle_sort(id, "Name").expect("sort");
        assert!(!workspace.collapse_relation(id, 0).expect("grid exists"));
    }
}
