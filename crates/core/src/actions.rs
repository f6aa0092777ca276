use std::collections::HashMap;

use thiserror::Error;

use crate::selection::SelectionKind;

const MAX_RECENCY_BOOST: i32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionId {
    CopySelection,
    ExportCsv,
    ExportJson,
    ExportXml,
    ExportHtml,
    ExportMarkdown,
    EditCell,
    DeleteRow,
    PreviewChanges,
    ApplyChanges,
    RevertChanges,
    ToggleRelation,
    CycleSort,
    ClearFilters,
    ClearSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Csv,
    Json,
    Xml,
    Html,
    Markdown,
    Clipboard,
}

impl ExportFormat {
    pub const ALL: [Self; 6] = [
        Self::Csv,
        Self::Json,
        Self::Xml,
        Self::Html,
        Self::Markdown,
        Self::Clipboard,
    ];

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Markdown => "md",
            Self::Clipboard => "tsv",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Json => "JSON",
            Self::Xml => "XML",
            Self::Html => "HTML",
            Self::Markdown => "Markdown",
            Self::Clipboard => "Clipboard",
        }
    }
}

/// What the focused grid looks like when actions are ranked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionContext {
    pub has_results: bool,
    pub selection: SelectionKind,
    pub selection_count: usize,
    pub grid_editable: bool,
    pub cursor_on_foreign_key: bool,
    pub cursor_expanded: bool,
    pub cursor_row_deleted: bool,
    pub pending_changes: usize,
    pub filters_active: bool,
    pub editing: bool,
}

impl ActionContext {
    #[must_use]
    pub fn with_results(mut self) -> Self {
        self.has_results = true;
        self
    }

    #[must_use]
    pub fn with_selection(mut self, kind: SelectionKind, count: usize) -> Self {
        self.selection = kind;
        self.selection_count = count;
        self
    }

    #[must_use]
    pub fn with_pending_changes(mut self, count: usize) -> Self {
        self.pending_changes = count;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDefinition {
    pub id: ActionId,
    pub title: &'static str,
    pub description: &'static str,
}

const ACTIONS: [ActionDefinition; 15] = [
    ActionDefinition {
        id: ActionId::CopySelection,
        title: "Copy selection",
        description: "Copy selected rows, columns or cells as tab-separated text",
    },
    ActionDefinition {
        id: ActionId::ExportCsv,
        title: "Export CSV",
        description: "Export the filtered and sorted rows to CSV",
    },
    ActionDefinition {
        id: ActionId::ExportJson,
        title: "Export JSON",
        description: "Export the filtered and sorted rows to JSON",
    },
    ActionDefinition {
        id: ActionId::ExportXml,
        title: "Export XML",
        description: "Export the filtered and sorted rows to XML",
    },
    ActionDefinition {
        id: ActionId::ExportHtml,
        title: "Export HTML",
        description: "Export the filtered and sorted rows to a standalone HTML page",
    },
    ActionDefinition {
        id: ActionId::ExportMarkdown,
        title: "Export Markdown",
        description: "Export the filtered and sorted rows to a Markdown table",
    },
    ActionDefinition {
        id: ActionId::EditCell,
        title: "Edit cell",
        description: "Edit the value under the cursor",
    },
    ActionDefinition {
        id: ActionId::DeleteRow,
        title: "Delete row",
        description: "Mark the row under the cursor for deletion",
    },
    ActionDefinition {
        id: ActionId::PreviewChanges,
        title: "Preview SQL",
        description: "Show the UPDATE/DELETE script for pending changes",
    },
    ActionDefinition {
        id: ActionId::ApplyChanges,
        title: "Apply changes",
        description: "Run the pending changes against the database",
    },
    ActionDefinition {
        id: ActionId::RevertChanges,
        title: "Revert all",
        description: "Discard every pending change",
    },
    ActionDefinition {
        id: ActionId::ToggleRelation,
        title: "Follow foreign key",
        description: "Expand or collapse the related rows under the cursor",
    },
    ActionDefinition {
        id: ActionId::CycleSort,
        title: "Sort column",
        description: "Cycle ascending, descending and unsorted on the cursor column",
    },
    ActionDefinition {
        id: ActionId::ClearFilters,
        title: "Clear filters",
        description: "Remove every column filter",
    },
    ActionDefinition {
        id: ActionId::ClearSelection,
        title: "Clear selection",
        description: "Deselect everything",
    },
];

#[derive(Debug, Default)]
pub struct ActionRegistry;

impl ActionRegistry {
    #[must_use]
    pub fn all(&self) -> &'static [ActionDefinition] {
        &ACTIONS
    }

    #[must_use]
    pub fn find(&self, action_id: ActionId) -> Option<ActionDefinition> {
        ACTIONS
            .iter()
            .copied()
            .find(|action| action.id == action_id)
    }

    #[must_use]
    pub fn enabled_actions(&self, context: &ActionContext) -> Vec<ActionDefinition> {
        ACTIONS
            .iter()
            .copied()
            .filter(|action| action_enabled(action.id, context))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedAction {
    pub id: ActionId,
    pub title: &'static str,
    pub score: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionInvocation {
    CopySelection,
    Export(ExportFormat),
    BeginEdit,
    DeleteRow,
    PreviewChanges,
    ApplyChanges,
    RevertAll,
    ToggleRelation,
    CycleSort,
    ClearFilters,
    ClearSelection,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionEngineError {
    #[error("action `{0:?}` is disabled in the current context")]
    ActionDisabled(ActionId),
}

#[derive(Debug, Default)]
pub struct ActionsEngine {
    registry: ActionRegistry,
    recency_tick: u64,
    recency: HashMap<ActionId, u64>,
}

impl ActionsEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn rank_top_n(&self, context: &ActionContext, limit: usize) -> Vec<RankedAction> {
        let mut ranked = self
            .registry
            .all()
            .iter()
            .copied()
            .filter(|action| action_enabled(action.id, context))
            .map(|action| RankedAction {
                id: action.id,
                title: action.title,
                score: action_base_score(action.id, context) + self.recency_boost(action.id),
            })
            .collect::<Vec<_>>();

        ranked.sort_by(|left, right| {
            right
                .score
                .cmp(&left.score)
                .then_with(|| left.title.cmp(right.title))
        });
        ranked.truncate(limit);
        ranked
    }

    pub fn invoke(
        &mut self,
        action_id: ActionId,
        context: &ActionContext,
    ) -> Result<ActionInvocation, ActionEngineError> {
        if !action_enabled(action_id, context) {
            return Err(ActionEngineError::ActionDisabled(action_id));
        }

        let invocation = match action_id {
            ActionId::CopySelection => ActionInvocation::CopySelection,
            ActionId::ExportCsv => ActionInvocation::Export(ExportFormat::Csv),
            ActionId::ExportJson => ActionInvocation::Export(ExportFormat::Json),
            ActionId::ExportXml => ActionInvocation::Export(ExportFormat::Xml),
            ActionId::ExportHtml => ActionInvocation::Export(ExportFormat::Html),
            ActionId::ExportMarkdown => ActionInvocation::Export(ExportFormat::Markdown),
            ActionId::EditCell => ActionInvocation::BeginEdit,
            ActionId::DeleteRow => ActionInvocation::DeleteRow,
            ActionId::PreviewChanges => ActionInvocation::PreviewChanges,
            ActionId::ApplyChanges => ActionInvocation::ApplyChanges,
            ActionId::RevertChanges => ActionInvocation::RevertAll,
            ActionId::ToggleRelation => ActionInvocation::ToggleRelation,
            ActionId::CycleSort => ActionInvocation::CycleSort,
            ActionId::ClearFilters => ActionInvocation::ClearFilters,
            ActionId::ClearSelection => ActionInvocation::ClearSelection,
        };

        self.record_use(action_id);
        Ok(invocation)
    }

    fn record_use(&mut self, action_id: ActionId) {
        self.recency_tick = self.recency_tick.saturating_add(1);
        self.recency.insert(action_id, self.recency_tick);
    }

    fn recency_boost(&self, action_id: ActionId) -> i32 {
        let Some(last_used_tick) = self.recency.get(&action_id).copied() else {
            return 0;
        };

        let age = self.recency_tick.saturating_sub(last_used_tick);
        let age_i32 = i32::try_from(age).unwrap_or(i32::MAX);
        (MAX_RECENCY_BOOST - age_i32).max(0)
    }
}

fn action_enabled(action_id: ActionId, context: &ActionContext) -> bool {
    match action_id {
        ActionId::CopySelection => context.has_results && context.selection_count > 0,
        ActionId::ExportCsv
        | ActionId::ExportJson
        | ActionId::ExportXml
        | ActionId::ExportHtml
        | ActionId::ExportMarkdown
        | ActionId::CycleSort => context.has_results && !context.editing,
        ActionId::EditCell => {
            context.has_results
                && context.grid_editable
                && !context.editing
                && !context.cursor_row_deleted
        }
        ActionId::DeleteRow => {
            context.has_results && context.grid_editable && !context.cursor_row_deleted
        }
        ActionId::PreviewChanges | ActionId::ApplyChanges | ActionId::RevertChanges => {
            context.pending_changes > 0 && !context.editing
        }
        ActionId::ToggleRelation => {
            context.has_results && (context.cursor_on_foreign_key || context.cursor_expanded)
        }
        ActionId::ClearFilters => context.filters_active,
        ActionId::ClearSelection => context.selection != SelectionKind::None,
    }
}

fn action_base_score(action_id: ActionId, context: &ActionContext) -> i32 {
    match action_id {
        ActionId::ApplyChanges => {
            if context.pending_changes > 0 {
                950
            } else {
                0
            }
        }
        ActionId::PreviewChanges => {
            if context.pending_changes > 0 {
                900
            } else {
                0
            }
        }
        ActionId::CopySelection => {
            if context.selection_count > 0 {
                880
            } else {
                0
            }
        }
        ActionId::ToggleRelation => {
            if context.cursor_expanded {
                870
            } else if context.cursor_on_foreign_key {
                820
            } else {
                0
            }
        }
        ActionId::EditCell => {
            if context.grid_editable && context.selection == SelectionKind::Cell {
                840
            } else if context.grid_editable {
                700
            } else {
                0
            }
        }
        ActionId::RevertChanges => {
            if context.pending_changes > 0 {
                760
            } else {
                0
            }
        }
        ActionId::ClearFilters => {
            if context.filters_active {
                740
            } else {
                0
            }
        }
        ActionId::DeleteRow => {
            if context.grid_editable && context.selection == SelectionKind::Row {
                720
            } else {
                0
            }
        }
        ActionId::ExportCsv | ActionId::ExportJson => {
            if context.has_results {
                640
            } else {
                0
            }
        }
        ActionId::ExportXml | ActionId::ExportHtml | ActionId::ExportMarkdown => {
            if context.has_results {
                600
            } else {
                0
            }
        }
        ActionId::CycleSort => {
            if context.has_results && context.selection == SelectionKind::Column {
                680
            } else {
                560
            }
        }
        ActionId::ClearSelection => {
            if context.selection == SelectionKind::None {
                0
            } else {
                500
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ActionContext, ActionEngineError, ActionId, ActionInvocation, ActionsEngine, ExportFormat,
    };
    use crate::selection::SelectionKind;

    fn results_context() -> ActionContext {
        ActionContext {
            grid_editable: true,
            ..ActionContext::default()
        }
        .with_results()
    }

    #[test]
    fn registry_lists_actions_and_export_is_invokable() {
        let mut engine = ActionsEngine::new();
        assert!(engine
            .registry()
            .all()
            .iter()
            .any(|action| action.id == ActionId::ExportXml));

        let invocation = engine
            .invoke(ActionId::ExportXml, &results_context())
            .expect("export should be enabled");
        assert_eq!(invocation, ActionInvocation::Export(ExportFormat::Xml));
    }

    #[test]
    fn pending_changes_rank_apply_first() {
        let engine = ActionsEngine::new();
        let context = results_context().with_pending_changes(2);
        let ranked = engine.rank_top_n(&context, 3);
        assert_eq!(
            ranked.iter().map(|action| action.id).collect::<Vec<_>>(),
            [ActionId::ApplyChanges, ActionId::PreviewChanges, ActionId::RevertChanges]
        );
    }

    #[test]
    fn change_actions_are_disabled_without_pending_changes() {
        let mut engine = ActionsEngine::new();
        let err = engine
            .invoke(ActionId::ApplyChanges, &results_context())
            .expect_err("nothing to apply");
        assert_eq!(err, ActionEngineError::ActionDisabled(ActionId::ApplyChanges));
        assert!(!engine
            .registry()
            .enabled_actions(&results_context())
            .iter()
            .any(|action| action.id == ActionId::RevertChanges));
    }

    #[test]
    fn selection_surfaces_copy_and_recency_boosts_recent_actions() {
        let mut engine = ActionsEngine::new();
        let context = results_context().with_selection(SelectionKind::Cell, 4);
        let ranked = engine.rank_top_n(&context, 1);
        assert_eq!(ranked[0].id, ActionId::CopySelection);

        engine
            .invoke(ActionId::ExportMarkdown, &context)
            .expect("export enabled");
        let boosted = engine
            .rank_top_n(&context, 10)
            .into_iter()
            .find(|action| action.id == ActionId::ExportMarkdown)
            .expect("markdown export ranked");
        assert_eq!(boosted.score, 625);
    }

    #[test]
    fn export_formats_have_file_extensions() {
        assert_eq!(
            ExportFormat::ALL.map(ExportFormat::extension),
            ["csv", "json", "xml", "html", "md", "tsv"]
        );
    }
}
