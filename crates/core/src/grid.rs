use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::classifier::ValueKind;
use crate::columns::{ColumnDescriptor, ColumnModel, ResultSetMetadata};
use crate::edit::{ActiveEdit, EditSession};
use crate::ledger::{ChangeLedger, ChangeRecord, PrimaryKeyBinding};
use crate::projection::{distinct_values, project, FilterSet, Projection, SortDirection, SortSpec, SortState};
use crate::relation::ChildGrid;
use crate::selection::{CellSource, GridId, RowHighlight, SelectionModel};
use crate::settings::GridSettings;
use crate::value::{CellValue, RowRecord};
use crate::window::{WindowLine, WindowedRenderer};

/// One result set on screen: the fetched rows plus the view state layered on them.
/// Source indices never shift; rows deleted by an applied change are retired instead.
#[derive(Debug)]
pub struct ResultGrid {
    id: GridId,
    result_set: usize,
    metadata: ResultSetMetadata,
    rows: Arc<Vec<RowRecord>>,
    retired: BTreeSet<usize>,
    columns: ColumnModel,
    filters: FilterSet,
    sort: SortSpec,
    projection: Projection,
    renderer: WindowedRenderer,
}

impl ResultGrid {
    #[must_use]
    pub fn new(
        id: GridId,
        result_set: usize,
        metadata: ResultSetMetadata,
        rows: Vec<RowRecord>,
        settings: &GridSettings,
    ) -> Self {
        let columns = if metadata.columns.is_empty() {
            ColumnModel::from_rows(&rows, settings.column_sizing())
        } else {
            ColumnModel::from_metadata(&metadata, &rows, settings.column_sizing())
        };
        let first_key = columns.primary_keys().next().map(|column| column.id.clone());
        let columns = match first_key {
            Some(key) => columns.with_pinned(&key),
            None => columns,
        };
        let projection = Projection::identity(rows.len());
        Self {
            id,
            result_set,
            metadata,
            rows: Arc::new(rows),
            retired: BTreeSet::new(),
            columns,
            filters: FilterSet::default(),
            sort: SortSpec::default(),
            projection,
            renderer: WindowedRenderer::new(
                settings.window_params(),
                settings.scroll_debounce(),
                settings.max_expansion_rows,
            ),
        }
    }

    #[must_use]
    pub fn id(&self) -> GridId {
        self.id
    }

    #[must_use]
    pub fn result_set(&self) -> usize {
        self.result_set
    }

    #[must_use]
    pub fn metadata(&self) -> &ResultSetMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn columns(&self) -> &ColumnModel {
        &self.columns
    }

    #[must_use]
    pub fn source_rows(&self) -> &[RowRecord] {
        &self.rows
    }

    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    #[must_use]
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    #[must_use]
    pub fn sort(&self) -> Option<&SortState> {
        self.sort.active()
    }

    #[must_use]
    pub fn renderer(&self) -> &WindowedRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut WindowedRenderer {
        &mut self.renderer
    }

    /// Rows currently visible after filtering.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.projection.len()
    }

    /// Editable when the collaborator said so and the rows carry a primary key.
    #[must_use]
    pub fn is_editable(&self) -> bool {
        self.metadata.is_editable && self.columns.primary_keys().next().is_some()
    }

    #[must_use]
    pub fn source_index(&self, position: usize) -> Option<usize> {
        self.projection.source_index(position)
    }

    #[must_use]
    pub fn source_row(&self, source_index: usize) -> Option<&RowRecord> {
        self.rows.get(source_index)
    }

    #[must_use]
    pub fn source_value(&self, source_index: usize, column: &str) -> CellValue {
        self.rows
            .get(source_index)
            .and_then(|row| row.get(column))
            .cloned()
            .unwrap_or_default()
    }

    /// Value shown for a cell: the pending UPDATE if any, else the source value.
    #[must_use]
    pub fn displayed_value(&self, ledger: &ChangeLedger, source_index: usize, column: &str) -> CellValue {
        ledger
            .pending_value(self.result_set, source_index, column)
            .cloned()
            .unwrap_or_else(|| self.source_value(source_index, column))
    }

    #[must_use]
    pub fn primary_key_binding(&self, source_index: usize) -> PrimaryKeyBinding {
        self.columns
            .primary_keys()
            .map(|column| (column.id.clone(), self.source_value(source_index, &column.id)))
            .collect()
    }

    #[must_use]
    pub fn row_values(&self, source_index: usize) -> Vec<(String, CellValue)> {
        self.columns
            .iter()
            .map(|column| (column.id.clone(), self.source_value(source_index, &column.id)))
            .collect()
    }

    #[must_use]
    pub fn distinct_values(&self, column: &str) -> Vec<String> {
        distinct_values(&self.rows, column)
    }

    pub fn set_filter<I, S>(&mut self, column: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.set_allowed(column, values);
        self.reproject();
    }

    pub fn clear_filter(&mut self, column: &str) -> bool {
        let cleared = self.filters.clear_column(column);
        if cleared {
            self.reproject();
        }
        cleared
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.reproject();
    }

    pub fn toggle_sort(&mut self, column: &str) -> Option<SortState> {
        let state = self.sort.cycle(column).cloned();
        self.reproject();
        state
    }

    /// Folds changes the database accepted into the source rows: updates
    /// overwrite the stored value, deletes retire the row.
    pub fn absorb_applied(&mut self, records: &[ChangeRecord]) {
        if records.is_empty() {
            return;
        }
        let rows = Arc::make_mut(&mut self.rows);
        for record in records {
            match record {
                ChangeRecord::Update {
                    row,
                    column,
                    new_value,
                    ..
                } => {
                    if let Some(source) = rows.get_mut(*row) {
                        source.insert(column.clone(), new_value.clone());
                    }
                }
                ChangeRecord::Delete { row, .. } => {
                    self.retired.insert(*row);
                }
            }
        }
        self.reproject();
    }

    #[must_use]
    pub fn is_retired(&self, source_index: usize) -> bool {
        self.retired.contains(&source_index)
    }

    fn reproject(&mut self) {
        self.projection = project(&self.rows, &self.filters, &self.sort).without(&self.retired);
        self.renderer.reset_to_top();
        debug!(grid = %self.id, rows = self.projection.len(), "re-projected");
    }

    pub fn on_scroll(&mut self, scroll_offset: u64, now: Instant) {
        self.renderer.on_scroll(scroll_offset, now);
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        self.renderer.tick(now)
    }

    #[must_use]
    pub fn visible_range(&self) -> Range<usize> {
        self.renderer.current_range(self.projection.len())
    }

    #[must_use]
    pub fn cells<'a>(&'a self, ledger: &'a ChangeLedger) -> GridCells<'a> {
        GridCells { grid: self, ledger }
    }

    /// The projected rows with pending edits applied, columns in display order.
    #[must_use]
    pub fn export_view(&self, ledger: &ChangeLedger) -> TableView {
        let order = self.columns.display_order();
        let columns = order
            .iter()
            .filter_map(|index| self.columns.get(*index))
            .cloned()
            .collect::<Vec<_>>();
        let rows = self
            .projection
            .indices()
            .iter()
            .map(|source_index| {
                columns
                    .iter()
                    .map(|column| self.displayed_value(ledger, *source_index, &column.id))
                    .collect()
            })
            .collect();
        TableView { columns, rows }
    }

    /// Materializes the visible window with selection, ledger and edit markers.
    pub fn render(
        &mut self,
        selection: &SelectionModel,
        ledger: &ChangeLedger,
        edit: &EditSession,
    ) -> RenderedGrid {
        let frame = self.renderer.render(self.projection.len());
        let order = self.columns.display_order();
        let sort = self.sort.active();

        let columns = order
            .iter()
            .filter_map(|index| self.columns.get(*index).map(|column| (*index, column)))
            .map(|(index, column)| RenderedColumn {
                index,
                header: column.header.clone(),
                width: column.width,
                kind: column.kind,
                pinned: column.pinned,
                is_primary_key: column.is_primary_key,
                is_foreign_key: column.is_foreign_key,
                sort: sort
                    .filter(|state| state.column == column.id)
                    .map(|state| state.direction),
                filtered: self.filters.allowed(&column.id).is_some(),
            })
            .collect::<Vec<_>>();

        let editing = edit
            .active()
            .filter(|active| active.address.grid == self.id);

        let lines = frame
            .lines
            .into_iter()
            .filter_map(|line| match line {
                WindowLine::Row { position } => {
                    let source_index = self.projection.source_index(position)?;
                    let cells = columns
                        .iter()
                        .map(|column| {
                            let id = self.columns.get(column.index).map_or("", |c| c.id.as_str());
                            let value = self.displayed_value(ledger, source_index, id);
                            let draft = editing
                                .filter(|active| {
                                    active.address.row == source_index && active.address.column == id
                                })
                                .map(ActiveEdit::draft_display);
                            RenderedCell {
                                column: column.index,
                                text: value.display_text(),
                                is_null: value.is_null(),
                                edited: ledger.pending_value(self.result_set, source_index, id).is_some(),
                                draft,
                            }
                        })
                        .collect();
                    Some(RenderedLine::Row(RenderedRow {
                        position,
                        source_index,
                        highlight: selection.highlight_for(self.id, position),
                        deleted: ledger.is_row_deleted(self.result_set, source_index),
                        cells,
                    }))
                }
                WindowLine::Expansion {
                    parent_position,
                    child,
                    height,
                } => Some(RenderedLine::Expansion {
                    parent_position,
                    child,
                    height,
                }),
            })
            .collect();

        RenderedGrid {
            grid: self.id,
            result_set: self.result_set,
            columns,
            lines,
            range: frame.range,
            total_rows: self.projection.len(),
            generation: frame.generation,
        }
    }
}

/// Read-only cell access in projected positions, with pending edits applied.
#[derive(Debug, Clone, Copy)]
pub struct GridCells<'a> {
    grid: &'a ResultGrid,
    ledger: &'a ChangeLedger,
}

impl CellSource for GridCells<'_> {
    fn row_count(&self) -> usize {
        self.grid.row_count()
    }

    fn column_count(&self) -> usize {
        self.grid.columns.len()
    }

    fn cell(&self, row: usize, column: usize) -> Option<CellValue> {
        let source_index = self.grid.source_index(row)?;
        let column = self.grid.columns.get(column)?;
        Some(self.grid.displayed_value(self.ledger, source_index, &column.id))
    }

    fn column_kind(&self, column: usize) -> ValueKind {
        self.grid
            .columns
            .get(column)
            .map_or(ValueKind::String, |column| column.kind)
    }
}

/// Columns and rows handed to the export codecs.
#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TableView {
    #[must_use]
    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.header.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedColumn {
    /// Index into the grid's column model, as used by selection targets.
    pub index: usize,
    pub header: String,
    pub width: u16,
    pub kind: ValueKind,
    pub pinned: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub sort: Option<SortDirection>,
    pub filtered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCell {
    pub column: usize,
    pub text: String,
    pub is_null: bool,
    pub edited: bool,
    pub draft: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    pub position: usize,
    pub source_index: usize,
    pub highlight: RowHighlight,
    pub deleted: bool,
    pub cells: Vec<RenderedCell>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderedLine {
    Row(RenderedRow),
    Expansion {
        parent_position: usize,
        child: Arc<ChildGrid>,
        height: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedGrid {
    pub grid: GridId,
    pub result_set: usize,
    pub columns: Vec<RenderedColumn>,
    pub lines: Vec<RenderedLine>,
    pub range: Range<usize>,
    pub total_rows: usize,
    pub generation: u64,
}

impl RenderedGrid {
    pub fn rows(&self) -> impl Iterator<Item = &RenderedRow> {
        self.lines.iter().filter_map(|line| match line {
            RenderedLine::Row(row) => Some(row),
            RenderedLine::Expansion { .. } => None,
        })
    }
}
