use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use gridline_adapters::export::{copy_selection_text, export_to_file};
use gridline_adapters::memory::{InMemoryCatalog, RecordingApplier};
use gridline_core::actions::{
    ActionContext, ActionId, ActionInvocation, ActionsEngine, ExportFormat,
};
use gridline_core::audit_trail::FileAuditTrail;
use gridline_core::columns::{ColumnMetadata, ResultSetMetadata, TableRef};
use gridline_core::grid::{RenderedColumn, RenderedGrid, RenderedLine, RenderedRow, ResultGrid};
use gridline_core::ledger::UpsertOutcome;
use gridline_core::projection::SortDirection;
use gridline_core::relation::{ChildGrid, ForeignKeyRef};
use gridline_core::selection::{
    CellPosition, GridId, Modifiers, RowHighlight, SelectionKind, SelectionTarget,
};
use gridline_core::settings::GridSettings;
use gridline_core::statistics::{SelectionStats, StatsDetail};
use gridline_core::value::{row_from_pairs, CellValue, RowRecord};
use gridline_core::workspace::{GridWorkspace, WorkspaceError};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{info, warn};

const TICK_RATE: Duration = Duration::from_millis(120);
const FOOTER_ACTIONS_LIMIT: usize = 7;
const GUTTER_WIDTH: u16 = 7;
const WHEEL_STEP: i64 = 3;
const DEMO_USER_ROWS: i64 = 500;

const DEMO_NAMES: [&str; 8] = [
    "Ann", "Bob", "Cy", "Dana", "Eli", "Fay", "Gus", "O'Brien",
];

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to open result set: {0}")]
    Workspace(#[from] WorkspaceError),
}

/// What the host needs from the outside: settings, where exports land and
/// where applied changes are journaled.
#[derive(Debug, Clone)]
pub struct TuiOptions {
    pub settings: GridSettings,
    pub export_dir: PathBuf,
    pub journal: Option<FileAuditTrail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectMode {
    Cell,
    Row,
    Column,
}

impl SelectMode {
    fn label(self) -> &'static str {
        match self {
            Self::Cell => "cell",
            Self::Row => "row",
            Self::Column => "column",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Home,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextGrid,
    Navigate(DirectionKey),
    SetMode(SelectMode),
    Select(Modifiers),
    Submit,
    Cancel,
    Input(char),
    Backspace,
    SetNull,
    Action(ActionId),
    FilterToCursorValue,
    RevertCell,
    InvokeActionSlot(usize),
    Click {
        column: u16,
        row: u16,
        modifiers: Modifiers,
    },
    Scroll(i64),
    Resize {
        width: u16,
        height: u16,
    },
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hit {
    Header(usize),
    Gutter(usize),
    Cell { cell: CellPosition, display: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnSlot {
    display: usize,
    index: usize,
    x: u16,
    width: u16,
}

enum LineSlot<'a> {
    Row(&'a RenderedRow),
    ChildHeader(&'a ChildGrid),
    ChildRow(&'a ChildGrid, usize),
}

#[derive(Debug)]
struct TuiApp {
    workspace: GridWorkspace,
    focus: Option<GridId>,
    cursor_row: usize,
    cursor_display: usize,
    column_offset: usize,
    mode: SelectMode,
    actions: ActionsEngine,
    catalog: InMemoryCatalog,
    applier: RecordingApplier,
    journal: Option<FileAuditTrail>,
    export_dir: PathBuf,
    runtime: Runtime,
    area: Rect,
    view: Option<RenderedGrid>,
    clipboard: Option<String>,
    preview: Option<String>,
    show_help: bool,
    should_quit: bool,
    status_line: String,
}

impl TuiApp {
    fn new(options: TuiOptions) -> Result<Self, TuiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let mut workspace = GridWorkspace::new(options.settings);

        let (metadata, rows) = demo_users();
        let users = workspace.add_result_set(0, metadata, rows)?;
        let (metadata, teams) = demo_teams();
        workspace.add_result_set(1, metadata, teams.clone())?;

        let catalog = InMemoryCatalog::new()
            .with_foreign_key(
                TableRef::new(Some("dbo"), "Users"),
                ForeignKeyRef::new("FK_Users_Teams", "TeamId", Some("dbo"), "Teams", "Id"),
            )
            .with_table(TableRef::new(Some("dbo"), "Teams"), teams);

        let mut app = Self {
            workspace,
            focus: Some(users),
            cursor_row: 0,
            cursor_display: 0,
            column_offset: 0,
            mode: SelectMode::Cell,
            actions: ActionsEngine::new(),
            catalog,
            applier: RecordingApplier::new(),
            journal: options.journal,
            export_dir: options.export_dir,
            runtime,
            area: Rect::new(0, 0, 120, 40),
            view: None,
            clipboard: None,
            preview: None,
            show_help: false,
            should_quit: false,
            status_line: "Arrows move, Space selects, Enter edits, ? for help".to_string(),
        };
        app.resize(app.area);
        Ok(app)
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextGrid => self.next_grid(),
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::SetMode(mode) => {
                self.mode = mode;
                self.status_line = format!("Selection mode: {}", mode.label());
            }
            Msg::Select(modifiers) => self.select_at_cursor(modifiers),
            Msg::Submit => self.submit(),
            Msg::Cancel => self.cancel(),
            Msg::Input(ch) => {
                self.workspace.push_draft_char(ch);
            }
            Msg::Backspace => {
                self.workspace.pop_draft_char();
            }
            Msg::SetNull => {
                if self.workspace.set_draft_null() {
                    self.status_line = "Draft set to NULL; Enter commits".to_string();
                }
            }
            Msg::Action(action) => self.invoke_action(action),
            Msg::FilterToCursorValue => self.filter_to_cursor_value(),
            Msg::RevertCell => self.revert_cell(),
            Msg::InvokeActionSlot(index) => self.invoke_ranked_action(index),
            Msg::Click {
                column,
                row,
                modifiers,
            } => self.click(column, row, modifiers),
            Msg::Scroll(delta) => self.scroll(delta),
            Msg::Resize { width, height } => self.resize(Rect::new(0, 0, width, height)),
            Msg::Tick => {
                self.workspace.tick(Instant::now());
            }
        }
        self.refresh_view();
    }

    fn refresh_view(&mut self) {
        self.view = self.focus.and_then(|id| self.workspace.render(id).ok());
    }

    fn resize(&mut self, area: Rect) {
        self.area = area;
        let viewport_rows = usize::from(grid_inner(area).height.saturating_sub(1)).max(1);
        for id in self.workspace.grid_ids() {
            if let Some(grid) = self.workspace.grid_mut(id) {
                grid.renderer_mut().set_viewport_rows(viewport_rows);
            }
        }
        self.refresh_view();
    }

    fn grid(&self) -> Option<&ResultGrid> {
        self.focus.and_then(|id| self.workspace.grid(id))
    }

    fn cursor_cell(&self) -> Option<CellPosition> {
        let grid = self.grid()?;
        let column = *grid.columns().display_order().get(self.cursor_display)?;
        (self.cursor_row < grid.row_count()).then(|| CellPosition::new(self.cursor_row, column))
    }

    fn cursor_column_id(&self) -> Option<String> {
        let cell = self.cursor_cell()?;
        self.grid()?
            .columns()
            .get(cell.column)
            .map(|column| column.id.clone())
    }

    fn action_context(&self) -> ActionContext {
        self.focus
            .map(|id| self.workspace.action_context(id, self.cursor_cell()))
            .unwrap_or_default()
    }

    fn is_editing(&self) -> bool {
        self.workspace.edit_session().active().is_some()
    }

    fn next_grid(&mut self) {
        let ids = self.workspace.grid_ids();
        if ids.is_empty() {
            self.focus = None;
            return;
        }
        let next = self
            .focus
            .and_then(|focus| ids.iter().position(|id| *id == focus))
            .map_or(0, |index| (index + 1) % ids.len());
        self.focus = ids.get(next).copied();
        self.cursor_row = 0;
        self.cursor_display = 0;
        self.column_offset = 0;
        if let Some(grid) = self.grid() {
            self.status_line = format!(
                "Focused result set {} ({} rows)",
                grid.result_set() + 1,
                grid.row_count()
            );
        }
    }

    fn navigate(&mut self, direction: DirectionKey) {
        if self.is_editing() {
            self.commit_edit();
        }
        let Some(grid) = self.grid() else {
            self.status_line = "No result set".to_string();
            return;
        };
        let rows = grid.row_count();
        let columns = grid.columns().len();
        if rows == 0 || columns == 0 {
            self.status_line = "No rows to move through".to_string();
            return;
        }
        let page = grid.renderer().params().viewport_rows.max(1);
        let last_row = rows - 1;

        match direction {
            DirectionKey::Up => self.cursor_row = self.cursor_row.saturating_sub(1),
            DirectionKey::Down => self.cursor_row = (self.cursor_row + 1).min(last_row),
            DirectionKey::Left => self.cursor_display = self.cursor_display.saturating_sub(1),
            DirectionKey::Right => {
                self.cursor_display = (self.cursor_display + 1).min(columns - 1);
            }
            DirectionKey::PageUp => self.cursor_row = self.cursor_row.saturating_sub(page),
            DirectionKey::PageDown => self.cursor_row = (self.cursor_row + page).min(last_row),
            DirectionKey::Home => self.cursor_row = 0,
            DirectionKey::End => self.cursor_row = last_row,
        }
        self.follow_cursor();
        if let Some(column) = self.cursor_column_id() {
            self.status_line = format!("Row {} of {rows}, {column}", self.cursor_row + 1);
        }
    }

    fn clamp_cursor(&mut self) {
        let (rows, columns) = self
            .grid()
            .map_or((0, 0), |grid| (grid.row_count(), grid.columns().len()));
        self.cursor_row = self.cursor_row.min(rows.saturating_sub(1));
        self.cursor_display = self.cursor_display.min(columns.saturating_sub(1));
    }

    /// Scrolls both axes so the cursor cell is on screen.
    fn follow_cursor(&mut self) {
        let cursor_row = self.cursor_row;
        if let Some(grid) = self.focus.and_then(|id| self.workspace.grid_mut(id)) {
            grid.renderer_mut().scroll_into_view(cursor_row);
        }

        let Some(grid) = self.grid() else {
            return;
        };
        let order = grid.columns().display_order();
        let widths = order
            .iter()
            .filter_map(|index| grid.columns().get(*index))
            .map(|column| (column.pinned, column.width))
            .collect::<Vec<_>>();
        let pinned = widths.iter().filter(|(pinned, _)| *pinned).count();
        if self.cursor_display < pinned {
            return;
        }

        let target = self.cursor_display - pinned;
        let available = grid_inner(self.area).width.saturating_sub(GUTTER_WIDTH);
        let pinned_width = widths[..pinned]
            .iter()
            .map(|(_, width)| width.saturating_add(1))
            .fold(0_u16, u16::saturating_add);
        if target < self.column_offset {
            self.column_offset = target;
        }
        loop {
            let span = widths[pinned + self.column_offset..=self.cursor_display]
                .iter()
                .map(|(_, width)| width.saturating_add(1))
                .fold(pinned_width, u16::saturating_add);
            if span <= available || self.column_offset >= target {
                break;
            }
            self.column_offset += 1;
        }
    }

    fn select_at_cursor(&mut self, modifiers: Modifiers) {
        let (Some(id), Some(cell)) = (self.focus, self.cursor_cell()) else {
            return;
        };
        let target = match self.mode {
            SelectMode::Cell => SelectionTarget::Cell(cell),
            SelectMode::Row => SelectionTarget::Row(cell.row),
            SelectMode::Column => SelectionTarget::Column(cell.column),
        };
        self.apply_gesture(id, target, modifiers);
    }

    fn apply_gesture(&mut self, id: GridId, target: SelectionTarget, modifiers: Modifiers) {
        self.status_line = match self.workspace.click(id, target, modifiers) {
            Ok(stats) => describe_stats(stats),
            Err(error) => format!("Selection failed: {error}"),
        };
    }

    fn submit(&mut self) {
        if self.is_editing() {
            self.commit_edit();
        } else {
            self.invoke_action(ActionId::EditCell);
        }
    }

    fn cancel(&mut self) {
        if self.preview.take().is_some() {
            return;
        }
        if self.show_help {
            self.show_help = false;
            return;
        }
        if self.workspace.cancel_edit().is_some() {
            self.status_line = "Edit cancelled".to_string();
            return;
        }
        self.workspace.clear_selection();
        self.status_line = "Selection cleared".to_string();
    }

    fn begin_edit(&mut self) {
        let (Some(id), Some(cell)) = (self.focus, self.cursor_cell()) else {
            return;
        };
        self.status_line = match self.workspace.begin_edit(id, cell) {
            Ok(_) => "Editing: type to change, Ctrl+N sets NULL, Enter commits, Esc cancels"
                .to_string(),
            Err(error) => format!("Cannot edit: {error}"),
        };
    }

    fn commit_edit(&mut self) {
        self.status_line = match self.workspace.commit_edit() {
            Ok(Some(outcome)) => match outcome.ledger {
                UpsertOutcome::Inserted | UpsertOutcome::Replaced => format!(
                    "{} set to {} (pending)",
                    outcome.address.column, outcome.value
                ),
                UpsertOutcome::Reverted => {
                    format!("{} is back to its original value", outcome.address.column)
                }
                UpsertOutcome::Unchanged => "Value unchanged".to_string(),
            },
            Ok(None) => return,
            Err(error) => format!("Commit failed: {error}"),
        };
    }

    fn invoke_ranked_action(&mut self, index: usize) {
        let context = self.action_context();
        let ranked = self.actions.rank_top_n(&context, FOOTER_ACTIONS_LIMIT);
        let Some(action) = ranked.get(index) else {
            self.status_line = format!("No action bound to slot {}", index + 1);
            return;
        };
        let action = action.id;
        self.invoke_action(action);
    }

    fn invoke_action(&mut self, action: ActionId) {
        let context = self.action_context();
        match self.actions.invoke(action, &context) {
            Ok(invocation) => self.apply_invocation(invocation),
            Err(error) => self.status_line = format!("Action unavailable: {error}"),
        }
    }

    fn apply_invocation(&mut self, invocation: ActionInvocation) {
        match invocation {
            ActionInvocation::CopySelection => self.copy_selection(),
            ActionInvocation::Export(format) => self.export(format),
            ActionInvocation::BeginEdit => self.begin_edit(),
            ActionInvocation::DeleteRow => self.delete_rows(),
            ActionInvocation::PreviewChanges => {
                let report = self.workspace.preview_sql();
                if report.is_empty() {
                    self.status_line = "No pending changes".to_string();
                } else {
                    self.preview = Some(report.preview_script());
                }
            }
            ActionInvocation::ApplyChanges => self.apply_changes(),
            ActionInvocation::RevertAll => {
                let reverted = self.workspace.revert_all();
                self.status_line = format!("Reverted {reverted} pending change(s)");
            }
            ActionInvocation::ToggleRelation => self.toggle_relation(),
            ActionInvocation::CycleSort => self.cycle_sort(),
            ActionInvocation::ClearFilters => {
                if let Some(id) = self.focus {
                    if let Err(error) = self.workspace.clear_filters(id) {
                        self.status_line = format!("Clear filters failed: {error}");
                        return;
                    }
                }
                self.cursor_row = 0;
                self.status_line = "Filters cleared".to_string();
            }
            ActionInvocation::ClearSelection => {
                self.workspace.clear_selection();
                self.status_line = "Selection cleared".to_string();
            }
        }
    }

    fn copy_selection(&mut self) {
        let Some(text) = copy_selection_text(&self.workspace) else {
            self.status_line = "Nothing selected to copy".to_string();
            return;
        };
        let rows = text.lines().count().saturating_sub(1);
        self.clipboard = Some(text);
        self.status_line = format!("Copied {rows} row(s) as tab-separated text");
    }

    fn export(&mut self, format: ExportFormat) {
        let Some(grid) = self.grid() else {
            return;
        };
        let view = grid.export_view(self.workspace.ledger());
        let stem = grid.metadata().single_source_table().map_or_else(
            || format!("result-{}", grid.result_set() + 1),
            |table| table.table,
        );
        let path = self
            .export_dir
            .join(format!("{stem}.{}", format.extension()));
        self.status_line = match export_to_file(&path, format, &view) {
            Ok(rows) => format!(
                "Exported {rows} rows as {} to {}",
                format.label(),
                path.display()
            ),
            Err(error) => {
                warn!(%error, "export failed");
                format!("Export failed: {error}")
            }
        };
    }

    fn delete_rows(&mut self) {
        let Some(id) = self.focus else {
            return;
        };
        let selection = self.workspace.selection();
        let rows_selected =
            selection.owner() == Some(id) && selection.kind() == SelectionKind::Row;
        let result = if rows_selected {
            self.workspace.delete_selected_rows(id)
        } else {
            self.workspace
                .delete_row(id, self.cursor_row)
                .map(usize::from)
        };
        self.status_line = match result {
            Ok(0) => "Row already marked for deletion".to_string(),
            Ok(count) => format!("Marked {count} row(s) for deletion"),
            Err(error) => format!("Delete failed: {error}"),
        };
    }

    fn revert_cell(&mut self) {
        let (Some(id), Some(cell)) = (self.focus, self.cursor_cell()) else {
            return;
        };
        self.status_line = match self.workspace.revert_cell(id, cell) {
            Ok(Some(_)) => "Reverted pending change".to_string(),
            Ok(None) => "Nothing pending on this cell".to_string(),
            Err(error) => format!("Revert failed: {error}"),
        };
    }

    fn apply_changes(&mut self) {
        let result = self
            .runtime
            .block_on(self.workspace.apply_changes(&self.applier, self.journal.as_ref()));
        self.status_line = match result {
            Ok(summary) => {
                info!(
                    succeeded = summary.succeeded(),
                    failed = summary.failed(),
                    "changes applied from grid"
                );
                format!(
                    "Applied {} statement(s), {} failed, {} skipped",
                    summary.succeeded(),
                    summary.failed(),
                    summary.rejected.len()
                )
            }
            Err(error) => format!("Apply failed: {error}"),
        };
        self.clamp_cursor();
    }

    fn toggle_relation(&mut self) {
        let (Some(id), Some(cell)) = (self.focus, self.cursor_cell()) else {
            return;
        };
        let expanded = self
            .workspace
            .grid(id)
            .is_some_and(|grid| grid.renderer().expansion(cell.row).is_some());
        if expanded {
            self.status_line = match self.workspace.collapse_relation(id, cell.row) {
                Ok(_) => "Related rows collapsed".to_string(),
                Err(error) => format!("Collapse failed: {error}"),
            };
            return;
        }

        let result = self
            .runtime
            .block_on(self.workspace.expand_relation(id, cell, &self.catalog));
        self.status_line = match result {
            Ok(child) => format!(
                "{} related row(s) from {}",
                child.rows.len(),
                child.foreign_key.referenced_table
            ),
            Err(error) => format!("Cannot follow key: {error}"),
        };
    }

    fn cycle_sort(&mut self) {
        let (Some(id), Some(column)) = (self.focus, self.cursor_column_id()) else {
            return;
        };
        self.status_line = match self.workspace.toggle_sort(id, &column) {
            Ok(Some(state)) => format!("Sorted by {column} {}", direction_label(state.direction)),
            Ok(None) => "Sort cleared".to_string(),
            Err(error) => format!("Sort failed: {error}"),
        };
        self.cursor_row = 0;
    }

    fn filter_to_cursor_value(&mut self) {
        let (Some(id), Some(cell), Some(column)) =
            (self.focus, self.cursor_cell(), self.cursor_column_id())
        else {
            return;
        };
        let Some(value) = self.grid().and_then(|grid| {
            grid.source_index(cell.row)
                .map(|source| grid.source_value(source, &column).display_text())
        }) else {
            return;
        };
        self.status_line = match self.workspace.set_filter(id, &column, [value.clone()]) {
            Ok(()) => format!("Filtered {column} to {value}"),
            Err(error) => format!("Filter failed: {error}"),
        };
        self.cursor_row = 0;
    }

    fn scroll(&mut self, delta: i64) {
        let Some(id) = self.focus else {
            return;
        };
        let Some(grid) = self.workspace.grid(id) else {
            return;
        };
        let row_height = i64::from(grid.renderer().params().row_height.max(1));
        let current = i64::try_from(grid.renderer().scroll_offset()).unwrap_or(i64::MAX);
        let max = i64::try_from(grid.row_count().saturating_sub(1))
            .unwrap_or(i64::MAX)
            .saturating_mul(row_height);
        let next = current
            .saturating_add(delta.saturating_mul(row_height))
            .clamp(0, max.max(0));
        if let Err(error) =
            self.workspace
                .on_scroll(id, u64::try_from(next).unwrap_or_default(), Instant::now())
        {
            self.status_line = format!("Scroll failed: {error}");
        }
    }

    fn click(&mut self, x: u16, y: u16, modifiers: Modifiers) {
        let Some(id) = self.focus else {
            return;
        };
        let Some(hit) = self.hit_test(x, y) else {
            return;
        };
        if self.is_editing() {
            self.commit_edit();
        }
        let target = match hit {
            Hit::Header(column) => {
                if let Some(display) = self.display_of(column) {
                    self.cursor_display = display;
                }
                SelectionTarget::Column(column)
            }
            Hit::Gutter(position) => {
                self.cursor_row = position;
                SelectionTarget::Row(position)
            }
            Hit::Cell { cell, display } => {
                self.cursor_row = cell.row;
                self.cursor_display = display;
                match self.mode {
                    SelectMode::Cell => SelectionTarget::Cell(cell),
                    SelectMode::Row => SelectionTarget::Row(cell.row),
                    SelectMode::Column => SelectionTarget::Column(cell.column),
                }
            }
        };
        self.apply_gesture(id, target, modifiers);
    }

    fn display_of(&self, column: usize) -> Option<usize> {
        self.grid()?
            .columns()
            .display_order()
            .iter()
            .position(|index| *index == column)
    }

    fn top_row(&self) -> usize {
        self.grid().map_or(0, |grid| {
            let row_height = u64::from(grid.renderer().params().row_height.max(1));
            usize::try_from(grid.renderer().scroll_offset() / row_height).unwrap_or(usize::MAX)
        })
    }

    fn hit_test(&self, x: u16, y: u16) -> Option<Hit> {
        let view = self.view.as_ref()?;
        let inner = grid_inner(self.area);
        if x < inner.x || y < inner.y || x >= inner.right() || y >= inner.bottom() {
            return None;
        }
        let local_x = x - inner.x;
        let slots = column_layout(&view.columns, self.column_offset, inner.width);
        let slot = slots
            .iter()
            .find(|slot| local_x >= slot.x && local_x < slot.x.saturating_add(slot.width));

        if y == inner.y {
            return slot.map(|slot| Hit::Header(slot.index));
        }
        let line_index = usize::from(y - inner.y - 1);
        let lines = visible_lines(view, self.top_row(), usize::from(inner.height - 1));
        let LineSlot::Row(row) = lines.get(line_index)? else {
            return None;
        };
        if local_x < GUTTER_WIDTH {
            return Some(Hit::Gutter(row.position));
        }
        slot.map(|slot| Hit::Cell {
            cell: CellPosition::new(row.position, slot.index),
            display: slot.display,
        })
    }
}

fn direction_label(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "ascending",
        SortDirection::Descending => "descending",
    }
}

fn describe_stats(stats: &SelectionStats) -> String {
    if stats.count == 0 {
        return "Nothing selected".to_string();
    }
    let detail = match &stats.detail {
        StatsDetail::Empty => String::new(),
        StatsDetail::Numeric { sum, avg, min, max } => {
            format!("  Sum {sum}  Avg {avg:.2}  Min {min}  Max {max}")
        }
        StatsDetail::Text {
            distinct,
            min_length,
            max_length,
        } => format!("  Distinct {distinct}  Length {min_length}..{max_length}"),
        StatsDetail::Boolean {
            true_count,
            false_count,
        } => format!("  True {true_count}  False {false_count}"),
        StatsDetail::Date {
            min,
            second_min,
            max,
            range_days,
        } => {
            let second = second_min
                .map(|value| format!(" (next {value})"))
                .unwrap_or_default();
            format!("  Min {min}{second}  Max {max}  Range {range_days} days")
        }
        StatsDetail::Distinct { distinct } => format!("  Distinct {distinct}"),
    };
    format!("Count {}  Nulls {}{detail}", stats.count, stats.null_count)
}

fn demo_users() -> (ResultSetMetadata, Vec<RowRecord>) {
    let owned = |column: ColumnMetadata| column.owned_by(Some("dbo"), "Users");
    let metadata = ResultSetMetadata {
        columns: vec![
            owned(ColumnMetadata::new("Id", "int").primary_key()),
            owned(ColumnMetadata::new("Name", "nvarchar")),
            owned(ColumnMetadata::new("Email", "nvarchar")),
            owned(ColumnMetadata::new("TeamId", "int").foreign_key()),
            owned(ColumnMetadata::new("Score", "decimal")),
            owned(ColumnMetadata::new("Active", "bit")),
            owned(ColumnMetadata::new("CreatedAt", "datetime")),
        ],
        is_editable: true,
        has_multiple_tables: false,
        source_table: Some(TableRef::new(Some("dbo"), "Users")),
    };

    let rows = (1..=DEMO_USER_ROWS)
        .map(|id| {
            let name = DEMO_NAMES[usize::try_from(id).unwrap_or_default() % DEMO_NAMES.len()];
            let team = if id % 9 == 0 {
                CellValue::Null
            } else {
                CellValue::Int(id % 4 + 1)
            };
            let created = if id == 7 {
                "1900-01-01 00:00:00".to_string()
            } else {
                format!(
                    "2025-{:02}-{:02} {:02}:{:02}:00",
                    id % 12 + 1,
                    id % 28 + 1,
                    id % 24,
                    id % 60
                )
            };
            #[allow(clippy::cast_precision_loss)]
            let score = (id * 37 % 1000) as f64 / 10.0;
            row_from_pairs([
                ("Id", CellValue::Int(id)),
                ("Name", CellValue::text(name)),
                (
                    "Email",
                    CellValue::text(format!(
                        "{}{id}@example.com",
                        name.to_lowercase().replace('\'', "")
                    )),
                ),
                ("TeamId", team),
                ("Score", CellValue::Float(score)),
                ("Active", CellValue::Bool(id % 3 != 0)),
                ("CreatedAt", CellValue::text(created)),
            ])
        })
        .collect();
    (metadata, rows)
}

fn demo_teams() -> (ResultSetMetadata, Vec<RowRecord>) {
    let owned = |column: ColumnMetadata| column.owned_by(Some("dbo"), "Teams");
    let metadata = ResultSetMetadata {
        columns: vec![
            owned(ColumnMetadata::new("Id", "int").primary_key()),
            owned(ColumnMetadata::new("Name", "nvarchar")),
            owned(ColumnMetadata::new("Region", "nvarchar")),
        ],
        is_editable: true,
        has_multiple_tables: false,
        source_table: Some(TableRef::new(Some("dbo"), "Teams")),
    };
    let rows = [(1, "Core", "EU"), (2, "Web", "US"), (3, "Data", "EU"), (4, "Ops", "APAC")]
        .into_iter()
        .map(|(id, name, region)| {
            row_from_pairs([
                ("Id", CellValue::Int(id)),
                ("Name", CellValue::text(name)),
                ("Region", CellValue::text(region)),
            ])
        })
        .collect();
    (metadata, rows)
}

#[must_use]
pub fn ui_name() -> &'static str {
    "gridline-tui"
}

pub fn run(options: TuiOptions) -> Result<(), TuiError> {
    let mut app = TuiApp::new(options)?;
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
) -> Result<(), TuiError> {
    let size = terminal.size()?;
    app.handle(Msg::Resize {
        width: size.width,
        height: size.height,
    });
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            let message = match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    map_key_event(key, app.is_editing())
                }
                Event::Mouse(mouse) => map_mouse_event(mouse),
                Event::Resize(width, height) => Some(Msg::Resize { width, height }),
                _ => None,
            };
            if let Some(message) = message {
                app.handle(message);
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn layout_chunks(area: Rect) -> [Rect; 3] {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(5),
        ])
        .split(area);
    [chunks[0], chunks[1], chunks[2]]
}

fn grid_inner(area: Rect) -> Rect {
    Block::default()
        .borders(Borders::ALL)
        .inner(layout_chunks(area)[1])
}

/// Pinned columns first, then unpinned ones from `offset`, until `width` runs out.
fn column_layout(columns: &[RenderedColumn], offset: usize, width: u16) -> Vec<ColumnSlot> {
    let pinned = columns
        .iter()
        .enumerate()
        .filter(|(_, column)| column.pinned);
    let scrolled = columns
        .iter()
        .enumerate()
        .filter(|(_, column)| !column.pinned)
        .skip(offset);

    let mut slots = Vec::new();
    let mut x = GUTTER_WIDTH;
    for (display, column) in pinned.chain(scrolled) {
        if x >= width {
            break;
        }
        slots.push(ColumnSlot {
            display,
            index: column.index,
            x,
            width: column.width.min(width - x),
        });
        x = x.saturating_add(column.width).saturating_add(1);
    }
    slots
}

/// Screen lines from the first row at or below `top`, expansions inlined.
fn visible_lines(view: &RenderedGrid, top: usize, height: usize) -> Vec<LineSlot<'_>> {
    let mut lines = Vec::with_capacity(height);
    for line in &view.lines {
        if lines.len() >= height {
            break;
        }
        match line {
            RenderedLine::Row(row) if row.position >= top => lines.push(LineSlot::Row(row)),
            RenderedLine::Expansion {
                parent_position,
                child,
                height: child_height,
            } if *parent_position >= top => {
                lines.push(LineSlot::ChildHeader(&**child));
                for index in 0..child_height.saturating_sub(1) {
                    lines.push(LineSlot::ChildRow(&**child, index));
                }
            }
            _ => {}
        }
    }
    lines.truncate(height);
    lines
}

fn fit(text: &str, width: u16) -> String {
    let width = usize::from(width);
    let flat = text.replace(['\n', '\r', '\t'], " ");
    let count = flat.chars().count();
    if count > width {
        let mut truncated = flat.chars().take(width.saturating_sub(1)).collect::<String>();
        truncated.push('~');
        truncated
    } else {
        format!("{flat:<width$}")
    }
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = layout_chunks(frame.area());
    render_header(frame, app, chunks[0]);
    render_grid(frame, app, chunks[1]);
    render_footer(frame, app, chunks[2]);

    if let Some(script) = &app.preview {
        render_preview_popup(frame, script);
    }
    if app.show_help {
        render_help_popup(frame);
    }
}

fn render_header(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let mut spans = vec![Span::styled(
        format!(" Mode: {} ", app.mode.label()),
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )];
    if let Some(grid) = app.grid() {
        let table = grid
            .metadata()
            .single_source_table()
            .map_or_else(|| "(multiple tables)".to_string(), |table| table.to_string());
        spans.push(Span::raw(format!(
            " | Result {}: {table} | Rows: {} of {}",
            grid.result_set() + 1,
            grid.row_count(),
            grid.source_rows().len()
        )));
        if let Some(sort) = grid.sort() {
            spans.push(Span::raw(format!(
                " | Sort: {} {}",
                sort.column,
                direction_label(sort.direction)
            )));
        }
        if grid.filters().is_active() {
            spans.push(Span::raw(" | Filtered"));
        }
        if !grid.is_editable() {
            spans.push(Span::raw(" | Read-only"));
        }
    }
    spans.push(Span::raw(format!(
        " | Pending: {}",
        app.workspace.pending_changes()
    )));
    if app.is_editing() {
        spans.push(Span::styled(
            " | EDITING",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        ));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("gridline"));
    frame.render_widget(header, area);
}

fn render_grid(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Results");
    let inner = block.inner(area);
    frame.render_widget(block, area);
    let Some(view) = &app.view else {
        frame.render_widget(Paragraph::new("No result set"), inner);
        return;
    };

    let slots = column_layout(&view.columns, app.column_offset, inner.width);
    let mut lines = Vec::with_capacity(usize::from(inner.height));

    let mut header = vec![Span::raw(" ".repeat(usize::from(GUTTER_WIDTH)))];
    for slot in &slots {
        let Some(column) = view.columns.get(slot.display) else {
            continue;
        };
        let marker = match column.sort {
            Some(SortDirection::Ascending) => "^",
            Some(SortDirection::Descending) => "v",
            None if column.filtered => "*",
            None => "",
        };
        let mut style = Style::default().add_modifier(Modifier::BOLD);
        if column.is_primary_key {
            style = style.fg(Color::Yellow);
        } else if column.is_foreign_key {
            style = style.fg(Color::Cyan);
        }
        if slot.display == app.cursor_display {
            style = style.add_modifier(Modifier::UNDERLINED);
        }
        header.push(Span::styled(
            fit(&format!("{}{marker}", column.header), slot.width),
            style,
        ));
        header.push(Span::raw(" "));
    }
    lines.push(Line::from(header));

    let editing = app.is_editing();
    for line in visible_lines(view, app.top_row(), usize::from(inner.height.saturating_sub(1))) {
        match line {
            LineSlot::Row(row) => lines.push(render_row(app, row, &slots, editing)),
            LineSlot::ChildHeader(child) => {
                let headers = child
                    .columns
                    .iter()
                    .map(|column| fit(&column.header, column.width))
                    .collect::<Vec<_>>()
                    .join(" ");
                lines.push(Line::from(vec![
                    Span::styled("    -> ", Style::default().fg(Color::DarkGray)),
                    Span::styled(
                        format!("{} | {headers}", child.foreign_key.referenced_table),
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    ),
                ]));
            }
            LineSlot::ChildRow(child, index) => {
                let text = child.rows.get(index).map_or_else(String::new, |record| {
                    child
                        .columns
                        .iter()
                        .map(|column| {
                            let value = record.get(&column.id).cloned().unwrap_or_default();
                            fit(&value.display_text(), column.width)
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                });
                lines.push(Line::from(vec![
                    Span::raw(" ".repeat(usize::from(GUTTER_WIDTH))),
                    Span::styled(text, Style::default().fg(Color::Cyan)),
                ]));
            }
        }
    }

    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_row<'a>(app: &TuiApp, row: &'a RenderedRow, slots: &[ColumnSlot], editing: bool) -> Line<'a> {
    let is_cursor_row = row.position == app.cursor_row;
    let gutter_style = if row.highlight == RowHighlight::Full {
        Style::default().add_modifier(Modifier::REVERSED)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let marker = if is_cursor_row { '>' } else { ' ' };
    let mut spans = vec![Span::styled(
        format!("{marker}{:>5} ", row.position + 1),
        gutter_style,
    )];

    for slot in slots {
        let Some(cell) = row.cells.iter().find(|cell| cell.column == slot.index) else {
            continue;
        };
        let text = match &cell.draft {
            Some(draft) if editing => format!("{draft}_"),
            _ => cell.text.clone(),
        };
        let mut style = Style::default();
        if cell.is_null {
            style = style.fg(Color::DarkGray).add_modifier(Modifier::ITALIC);
        }
        if cell.edited {
            style = style.fg(Color::Yellow);
        }
        if cell.draft.is_some() {
            style = style.fg(Color::Black).bg(Color::Green);
        }
        if row.deleted {
            style = style.fg(Color::Red).add_modifier(Modifier::CROSSED_OUT);
        }
        let highlighted = match &row.highlight {
            RowHighlight::None => false,
            RowHighlight::Full => true,
            RowHighlight::Columns(columns) => columns.contains(&slot.index),
        };
        if highlighted {
            style = style.add_modifier(Modifier::REVERSED);
        }
        if is_cursor_row && slot.display == app.cursor_display {
            style = style.add_modifier(Modifier::BOLD | Modifier::UNDERLINED);
        }
        spans.push(Span::styled(fit(&text, slot.width), style));
        spans.push(Span::raw(" "));
    }
    Line::from(spans)
}

fn render_footer(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let actions = app
        .actions
        .rank_top_n(&app.action_context(), FOOTER_ACTIONS_LIMIT);
    let footer_line = if actions.is_empty() {
        "No available actions in this context".to_string()
    } else {
        actions
            .iter()
            .enumerate()
            .map(|(index, action)| format!("{}:{} ", index + 1, action.title))
            .collect::<Vec<_>>()
            .join("| ")
    };
    let footer = Paragraph::new(vec![
        Line::from(footer_line),
        Line::from(describe_stats(app.workspace.selection().stats())),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Next Actions"));
    frame.render_widget(footer, area);
}

fn render_preview_popup(frame: &mut Frame<'_>, script: &str) {
    let area = centered_rect(80, 70, frame.area());
    frame.render_widget(Clear, area);
    let preview = Paragraph::new(script.lines().map(Line::from).collect::<Vec<_>>())
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Pending SQL (a: apply, Esc: close)"),
        );
    frame.render_widget(preview, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 80, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Grid keymap"),
        Line::from("q: quit    ?: toggle help    Tab: next result set"),
        Line::from("Arrows or hjkl, PgUp/PgDn, Home/End: move cursor"),
        Line::from("v / r / c: cell, row or column selection mode"),
        Line::from("Space: select  Ctrl+Space: toggle  Shift+Space: extend"),
        Line::from("Mouse: click to select, Ctrl/Shift click to toggle/extend"),
        Line::from("Enter: edit or commit    Esc: cancel or clear    Ctrl+N: set NULL"),
        Line::from("d: delete row    z: revert cell    u: revert all"),
        Line::from("p: preview SQL    a: apply changes"),
        Line::from("s: cycle sort    f: filter to value    F: clear filters"),
        Line::from("x: expand or collapse foreign key"),
        Line::from("y: copy selection    e: export CSV"),
        Line::from("1..7: invoke ranked action slot"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn modifiers_from(state: KeyModifiers) -> Modifiers {
    Modifiers {
        toggle: state.intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER),
        extend: state.contains(KeyModifiers::SHIFT),
    }
}

fn map_key_event(key: KeyEvent, editing: bool) -> Option<Msg> {
    if editing {
        return match key.code {
            KeyCode::Enter => Some(Msg::Submit),
            KeyCode::Esc => Some(Msg::Cancel),
            KeyCode::Backspace => Some(Msg::Backspace),
            KeyCode::Up => Some(Msg::Navigate(DirectionKey::Up)),
            KeyCode::Down => Some(Msg::Navigate(DirectionKey::Down)),
            KeyCode::Tab => Some(Msg::Navigate(DirectionKey::Right)),
            KeyCode::BackTab => Some(Msg::Navigate(DirectionKey::Left)),
            KeyCode::Char('n') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Msg::SetNull)
            }
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Msg::Input(ch))
            }
            _ => None,
        };
    }

    match (key.modifiers, key.code) {
        (_, KeyCode::Char(' ')) => Some(Msg::Select(modifiers_from(key.modifiers))),
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => Some(Msg::Quit),
        (_, KeyCode::Char('q')) => Some(Msg::Quit),
        (_, KeyCode::Char('?')) => Some(Msg::ToggleHelp),
        (_, KeyCode::Tab) => Some(Msg::NextGrid),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Esc) => Some(Msg::Cancel),
        (_, KeyCode::Up | KeyCode::Char('k')) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down | KeyCode::Char('j')) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left | KeyCode::Char('h')) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right | KeyCode::Char('l')) => Some(Msg::Navigate(DirectionKey::Right)),
        (_, KeyCode::PageUp) => Some(Msg::Navigate(DirectionKey::PageUp)),
        (_, KeyCode::PageDown) => Some(Msg::Navigate(DirectionKey::PageDown)),
        (_, KeyCode::Home) => Some(Msg::Navigate(DirectionKey::Home)),
        (_, KeyCode::End) => Some(Msg::Navigate(DirectionKey::End)),
        (_, KeyCode::Char('v')) => Some(Msg::SetMode(SelectMode::Cell)),
        (_, KeyCode::Char('r')) => Some(Msg::SetMode(SelectMode::Row)),
        (_, KeyCode::Char('c')) => Some(Msg::SetMode(SelectMode::Column)),
        (_, KeyCode::Char('d') | KeyCode::Delete) => Some(Msg::Action(ActionId::DeleteRow)),
        (_, KeyCode::Char('z')) => Some(Msg::RevertCell),
        (_, KeyCode::Char('u')) => Some(Msg::Action(ActionId::RevertChanges)),
        (_, KeyCode::Char('p')) => Some(Msg::Action(ActionId::PreviewChanges)),
        (_, KeyCode::Char('a')) => Some(Msg::Action(ActionId::ApplyChanges)),
        (_, KeyCode::Char('s')) => Some(Msg::Action(ActionId::CycleSort)),
        (_, KeyCode::Char('f')) => Some(Msg::FilterToCursorValue),
        (_, KeyCode::Char('F')) => Some(Msg::Action(ActionId::ClearFilters)),
        (_, KeyCode::Char('x')) => Some(Msg::Action(ActionId::ToggleRelation)),
        (_, KeyCode::Char('y')) => Some(Msg::Action(ActionId::CopySelection)),
        (_, KeyCode::Char('e')) => Some(Msg::Action(ActionId::ExportCsv)),
        (_, KeyCode::Char(digit @ '1'..='7')) => digit
            .to_digit(10)
            .and_then(|slot| usize::try_from(slot).ok())
            .map(|slot| Msg::InvokeActionSlot(slot - 1)),
        _ => None,
    }
}

fn map_mouse_event(mouse: MouseEvent) -> Option<Msg> {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => Some(Msg::Click {
            column: mouse.column,
            row: mouse.row,
            modifiers: modifiers_from(mouse.modifiers),
        }),
        MouseEventKind::ScrollDown => Some(Msg::Scroll(WHEEL_STEP)),
        MouseEventKind::ScrollUp => Some(Msg::Scroll(-WHEEL_STEP)),
        _ => None,
    }
}
