use std::fmt;

use tracing::debug;

use crate::classifier::ValueKind;
use crate::statistics::{compute_stats, SelectionStats};
use crate::value::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridId(pub u64);

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CellPosition {
    pub row: usize,
    pub column: usize,
}

impl CellPosition {
    #[must_use]
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SelectionKind {
    #[default]
    None,
    Row,
    Column,
    Cell,
}

/// Gesture target; row indices are projection positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SelectionTarget {
    Row(usize),
    Column(usize),
    Cell(CellPosition),
}

impl SelectionTarget {
    #[must_use]
    pub fn kind(self) -> SelectionKind {
        match self {
            Self::Row(_) => SelectionKind::Row,
            Self::Column(_) => SelectionKind::Column,
            Self::Cell(_) => SelectionKind::Cell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    /// Ctrl on Linux/Windows, Cmd on macOS.
    pub toggle: bool,
    pub extend: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        toggle: false,
        extend: false,
    };
    pub const TOGGLE: Self = Self {
        toggle: true,
        extend: false,
    };
    pub const EXTEND: Self = Self {
        toggle: false,
        extend: true,
    };
}

/// Read access to the cells a selection covers.
pub trait CellSource {
    fn row_count(&self) -> usize;
    fn column_count(&self) -> usize;
    fn cell(&self, row: usize, column: usize) -> Option<CellValue>;
    fn column_kind(&self, column: usize) -> ValueKind;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionState {
    pub kind: SelectionKind,
    pub owner: Option<GridId>,
    pub entries: Vec<SelectionTarget>,
    pub anchor: Option<SelectionTarget>,
}

impl SelectionState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn same_scope(&self, grid: GridId, kind: SelectionKind) -> bool {
        self.owner == Some(grid) && self.kind == kind && !self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RowHighlight {
    #[default]
    None,
    Full,
    Columns(Vec<usize>),
}

/// The one selection of a workspace. Every gesture goes through
/// [`SelectionModel::apply_gesture`].
#[derive(Debug, Clone, Default)]
pub struct SelectionModel {
    state: SelectionState,
    stats: SelectionStats,
}

impl SelectionModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    #[must_use]
    pub fn stats(&self) -> &SelectionStats {
        &self.stats
    }

    #[must_use]
    pub fn kind(&self) -> SelectionKind {
        self.state.kind
    }

    #[must_use]
    pub fn owner(&self) -> Option<GridId> {
        self.state.owner
    }

    pub fn apply_gesture(
        &mut self,
        grid: GridId,
        target: SelectionTarget,
        modifiers: Modifiers,
        cells: &dyn CellSource,
    ) -> &SelectionStats {
        let kind = target.kind();
        if self.state.owner.is_some_and(|owner| owner != grid) {
            self.clear();
        }

        let in_scope = self.state.same_scope(grid, kind);
        if modifiers.extend && in_scope && self.state.anchor.is_some() {
            self.extend_to(target);
        } else if modifiers.toggle && in_scope {
            self.toggle(target);
        } else if self.state.entries == [target] && in_scope {
            self.state = SelectionState::default();
        } else {
            self.state = SelectionState {
                kind,
                owner: Some(grid),
                entries: vec![target],
                anchor: Some(target),
            };
        }

        self.recompute_stats(cells);
        &self.stats
    }

    fn toggle(&mut self, target: SelectionTarget) {
        match self.state.entries.binary_search(&target) {
            Ok(index) => {
                self.state.entries.remove(index);
                if self.state.entries.is_empty() {
                    self.state = SelectionState::default();
                }
            }
            Err(index) => {
                self.state.entries.insert(index, target);
                self.state.anchor = Some(target);
            }
        }
    }

    fn extend_to(&mut self, target: SelectionTarget) {
        let Some(anchor) = self.state.anchor else {
            return;
        };
        self.state.entries = match (anchor, target) {
            (SelectionTarget::Row(from), SelectionTarget::Row(to)) => {
                (from.min(to)..=from.max(to)).map(SelectionTarget::Row).collect()
            }
            (SelectionTarget::Column(from), SelectionTarget::Column(to)) => (from.min(to)
                ..=from.max(to))
                .map(SelectionTarget::Column)
                .collect(),
            (SelectionTarget::Cell(from), SelectionTarget::Cell(to)) => {
                let rows = from.row.min(to.row)..=from.row.max(to.row);
                let columns = from.column.min(to.column)..=from.column.max(to.column);
                rows.flat_map(|row| {
                    columns
                        .clone()
                        .map(move |column| SelectionTarget::Cell(CellPosition::new(row, column)))
                })
                .collect()
            }
            _ => vec![target],
        };
    }

    pub fn clear(&mut self) {
        self.state = SelectionState::default();
        self.stats = SelectionStats::default();
    }

    /// Drops the selection when its grid is torn down.
    pub fn release_grid(&mut self, grid: GridId) -> bool {
        if self.state.owner == Some(grid) {
            self.clear();
            return true;
        }
        false
    }

    /// Clears positional row/cell entries after the grid's projection changed;
    /// column selections survive and only their statistics are refreshed.
    pub fn invalidate_positions(&mut self, grid: GridId, cells: &dyn CellSource) -> bool {
        if self.state.owner != Some(grid) {
            return false;
        }
        match self.state.kind {
            SelectionKind::Row | SelectionKind::Cell => {
                debug!(%grid, "selection cleared after projection change");
                self.clear();
                true
            }
            SelectionKind::Column => {
                self.recompute_stats(cells);
                false
            }
            SelectionKind::None => false,
        }
    }

    /// Resets the selection when any entry points outside the grid.
    pub fn validate(&mut self, grid: GridId, cells: &dyn CellSource) -> bool {
        if self.state.owner != Some(grid) {
            return false;
        }
        let rows = cells.row_count();
        let columns = cells.column_count();
        let out_of_range = self.state.entries.iter().any(|entry| match entry {
            SelectionTarget::Row(row) => *row >= rows,
            SelectionTarget::Column(column) => *column >= columns,
            SelectionTarget::Cell(cell) => cell.row >= rows || cell.column >= columns,
        });
        if out_of_range {
            debug!(%grid, "selection referenced rows outside the grid; cleared");
            self.clear();
        }
        out_of_range
    }

    #[must_use]
    pub fn highlight_for(&self, grid: GridId, position: usize) -> RowHighlight {
        if self.state.owner != Some(grid) {
            return RowHighlight::None;
        }
        match self.state.kind {
            SelectionKind::None => RowHighlight::None,
            SelectionKind::Row => {
                if self.state.entries.contains(&SelectionTarget::Row(position)) {
                    RowHighlight::Full
                } else {
                    RowHighlight::None
                }
            }
            SelectionKind::Column => RowHighlight::Columns(self.selected_columns()),
            SelectionKind::Cell => {
                let columns = self
                    .state
                    .entries
                    .iter()
                    .filter_map(|entry| match entry {
                        SelectionTarget::Cell(cell) if cell.row == position => Some(cell.column),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                if columns.is_empty() {
                    RowHighlight::None
                } else {
                    RowHighlight::Columns(columns)
                }
            }
        }
    }

    #[must_use]
    pub fn selected_columns(&self) -> Vec<usize> {
        self.state
            .entries
            .iter()
            .filter_map(|entry| match entry {
                SelectionTarget::Column(column) => Some(*column),
                _ => None,
            })
            .collect()
    }

    /// Every selected coordinate in row-major order.
    #[must_use]
    pub fn selected_cells(&self, cells: &dyn CellSource) -> Vec<CellPosition> {
        let mut positions = Vec::new();
        for entry in &self.state.entries {
            match entry {
                SelectionTarget::Row(row) => positions
                    .extend((0..cells.column_count()).map(|column| CellPosition::new(*row, column))),
                SelectionTarget::Column(column) => positions
                    .extend((0..cells.row_count()).map(|row| CellPosition::new(row, *column))),
                SelectionTarget::Cell(cell) => positions.push(*cell),
            }
        }
        positions.sort_unstable();
        positions.dedup();
        positions
    }

    fn recompute_stats(&mut self, cells: &dyn CellSource) {
        let values = self
            .selected_cells(cells)
            .into_iter()
            .map(|cell| cells.cell(cell.row, cell.column).unwrap_or_default())
            .collect::<Vec<_>>();
        let single_column_kind = match (self.state.kind, self.state.entries.as_slice()) {
            (SelectionKind::Column, [SelectionTarget::Column(column)]) => {
                Some(cells.column_kind(*column))
            }
            _ => None,
        };
        self.stats = compute_stats(&values, single_column_kind);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CellPosition, CellSource, GridId, Modifiers, RowHighlight, SelectionKind, SelectionModel,
        SelectionTarget,
    };
    use crate::classifier::ValueKind;
    use crate::statistics::StatsDetail;
    use crate::value::CellValue;

    struct Table {
        rows: usize,
        columns: usize,
    }

    impl CellSource for Table {
        fn row_count(&self) -> usize {
            self.rows
        }

        fn column_count(&self) -> usize {
            self.columns
        }

        fn cell(&self, row: usize, column: usize) -> Option<CellValue> {
            if row >= self.rows || column >= self.columns {
                return None;
            }
            if row == 0 && column == 1 {
                return Some(CellValue::Null);
            }
            Some(CellValue::Int(i64::try_from(row * 10 + column).unwrap_or_default()))
        }

        fn column_kind(&self, _column: usize) -> ValueKind {
            ValueKind::Number
        }
    }

    const GRID: GridId = GridId(1);
    const OTHER: GridId = GridId(2);

    fn table() -> Table {
        Table {
            rows: 10,
            columns: 3,
        }
    }

    fn rows(selection: &SelectionModel) -> Vec<usize> {
        selection
            .state()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                SelectionTarget::Row(row) => Some(*row),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn shift_click_selects_inclusive_range_in_either_direction() {
        let cells = table();
        let mut forward = SelectionModel::new();
        forward.apply_gesture(GRID, SelectionTarget::Row(2), Modifiers::NONE, &cells);
        forward.apply_gesture(GRID, SelectionTarget::Row(7), Modifiers::EXTEND, &cells);

        let mut backward = SelectionModel::new();
        backward.apply_gesture(GRID, SelectionTarget::Row(7), Modifiers::NONE, &cells);
        backward.apply_gesture(GRID, SelectionTarget::Row(2), Modifiers::EXTEND, &cells);

        assert_eq!(rows(&forward), vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(rows(&forward), rows(&backward));
        assert_eq!(forward.state().anchor, Some(SelectionTarget::Row(2)));
        assert_eq!(backward.state().anchor, Some(SelectionTarget::Row(7)));
    }

    #[test]
    fn ctrl_toggling_last_entry_returns_to_none() {
        let cells = table();
        let mut selection = SelectionModel::new();
        selection.apply_gesture(GRID, SelectionTarget::Row(4), Modifiers::TOGGLE, &cells);
        selection.apply_gesture(GRID, SelectionTarget::Row(6), Modifiers::TOGGLE, &cells);
        assert_eq!(rows(&selection), vec![4, 6]);

        selection.apply_gesture(GRID, SelectionTarget::Row(4), Modifiers::TOGGLE, &cells);
        selection.apply_gesture(GRID, SelectionTarget::Row(6), Modifiers::TOGGLE, &cells);

        assert_eq!(selection.kind(), SelectionKind::None);
        assert!(selection.state().entries.is_empty());
        assert_eq!(selection.owner(), None);
    }

    #[test]
    fn plain_click_on_sole_entry_deselects() {
        let cells = table();
        let mut selection = SelectionModel::new();
        let target = SelectionTarget::Cell(CellPosition::new(1, 1));
        selection.apply_gesture(GRID, target, Modifiers::NONE, &cells);
        assert_eq!(selection.kind(), SelectionKind::Cell);

        selection.apply_gesture(GRID, target, Modifiers::NONE, &cells);
        assert_eq!(selection.kind(), SelectionKind::None);
        assert_eq!(selection.stats().count, 0);
    }

    #[test]
    fn clicking_another_grid_clears_previous_selection() {
        let cells = table();
        let mut selection = SelectionModel::new();
        selection.apply_gesture(GRID, SelectionTarget::Row(1), Modifiers::NONE, &cells);
        selection.apply_gesture(OTHER, SelectionTarget::Row(3), Modifiers::TOGGLE, &cells);

        assert_eq!(selection.owner(), Some(OTHER));
        assert_eq!(rows(&selection), vec![3]);
        assert_eq!(selection.highlight_for(GRID, 1), RowHighlight::None);
        assert_eq!(selection.highlight_for(OTHER, 3), RowHighlight::Full);
    }

    #[test]
    fn mode_switch_replaces_selection_instead_of_mixing_kinds() {
        let cells = table();
        let mut selection = SelectionModel::new();
        selection.apply_gesture(GRID, SelectionTarget::Row(1), Modifiers::NONE, &cells);
        selection.apply_gesture(GRID, SelectionTarget::Column(2), Modifiers::TOGGLE, &cells);

        assert_eq!(selection.kind(), SelectionKind::Column);
        assert_eq!(selection.state().entries, vec![SelectionTarget::Column(2)]);
    }

    #[test]
    fn shift_click_in_cell_mode_selects_rectangle() {
        let cells = table();
        let mut selection = SelectionModel::new();
        selection.apply_gesture(
            GRID,
            SelectionTarget::Cell(CellPosition::new(3, 2)),
            Modifiers::NONE,
            &cells,
        );
        selection.apply_gesture(
            GRID,
            SelectionTarget::Cell(CellPosition::new(1, 0)),
            Modifiers::EXTEND,
            &cells,
        );

        assert_eq!(selection.state().entries.len(), 9);
        assert_eq!(
            selection.highlight_for(GRID, 2),
            RowHighlight::Columns(vec![0, 1, 2])
        );
        assert_eq!(selection.stats().count, 9);
        assert_eq!(selection.stats().detail, StatsDetail::Distinct { distinct: 9 });
    }

    #[test]
    fn shift_without_anchor_behaves_like_plain_click() {
        let cells = table();
        let mut selection = SelectionModel::new();
        selection.apply_gesture(GRID, SelectionTarget::Row(5), Modifiers::EXTEND, &cells);
        assert_eq!(rows(&selection), vec![5]);
        assert_eq!(selection.state().anchor, Some(SelectionTarget::Row(5)));
    }

    #[test]
    fn single_column_selection_gets_typed_statistics() {
        let cells = table();
        let mut selection = SelectionModel::new();
        let stats = selection
            .apply_gesture(GRID, SelectionTarget::Column(1), Modifiers::NONE, &cells)
            .clone();

        assert_eq!(stats.count, 10);
        assert_eq!(stats.null_count, 1);
        assert!(matches!(stats.detail, StatsDetail::Numeric { min, max, .. } if min == 11.0 && max == 91.0));
    }

    #[test]
    fn invalidation_clears_positional_selection_only() {
        let cells = table();
        let mut selection = SelectionModel::new();
        selection.apply_gesture(GRID, SelectionTarget::Row(1), Modifiers::NONE, &cells);
        assert!(selection.invalidate_positions(GRID, &cells));
        assert_eq!(selection.kind(), SelectionKind::None);

        selection.apply_gesture(GRID, SelectionTarget::Column(0), Modifiers::NONE, &cells);
        assert!(!selection.invalidate_positions(GRID, &cells));
        assert_eq!(selection.kind(), SelectionKind::Column);
    }

    #[test]
    fn validate_resets_out_of_range_entries() {
        let mut selection = SelectionModel::new();
        selection.apply_gesture(GRID, SelectionTarget::Row(8), Modifiers::NONE, &table());
        let shrunk = Table {
            rows: 4,
            columns: 3,
        };
        assert!(selection.validate(GRID, &shrunk));
        assert_eq!(selection.kind(), SelectionKind::None);
    }

    #[test]
    fn release_grid_only_clears_owned_selection() {
        let cells = table();
        let mut selection = SelectionModel::new();
        selection.apply_gesture(GRID, SelectionTarget::Row(1), Modifiers::NONE, &cells);
        assert!(!selection.release_grid(OTHER));
        assert!(selection.release_grid(GRID));
        assert!(selection.state().is_empty());
    }
}
