use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::relation::ChildGrid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    pub row_height: u32,
    pub viewport_rows: usize,
    pub buffer_rows: usize,
}

impl WindowParams {
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.viewport_rows + 2 * self.buffer_rows
    }
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            row_height: 1,
            viewport_rows: 30,
            buffer_rows: 10,
        }
    }
}

/// Rows to materialize for a scroll offset: `[start, end)` with
/// `end - start == min(chunk_size, total_rows - start)`.
#[must_use]
pub fn visible_range(scroll_offset: u64, params: WindowParams, total_rows: usize) -> Range<usize> {
    let chunk = params.chunk_size();
    let first_visible =
        usize::try_from(scroll_offset / u64::from(params.row_height.max(1))).unwrap_or(usize::MAX);
    let max_start = total_rows.saturating_sub(chunk);
    let start = first_visible
        .saturating_sub(params.buffer_rows)
        .min(max_start);
    let end = start + chunk.min(total_rows - start);
    start..end
}

/// Coalesces scroll events: each new event restarts the timer.
#[derive(Debug, Clone)]
pub struct ScrollDebouncer {
    delay: Duration,
    pending: Option<(Instant, u64)>,
}

impl ScrollDebouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn schedule(&mut self, scroll_offset: u64, now: Instant) {
        self.pending = Some((now + self.delay, scroll_offset));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the offset to render once the deadline has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<u64> {
        match self.pending {
            Some((deadline, offset)) if now >= deadline => {
                self.pending = None;
                Some(offset)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowLine {
    Row {
        position: usize,
    },
    Expansion {
        parent_position: usize,
        child: Arc<ChildGrid>,
        height: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowFrame {
    pub range: Range<usize>,
    pub lines: Vec<WindowLine>,
    pub generation: u64,
}

impl WindowFrame {
    #[must_use]
    pub fn row_positions(&self) -> Vec<usize> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                WindowLine::Row { position } => Some(*position),
                WindowLine::Expansion { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct WindowedRenderer {
    params: WindowParams,
    scroll_offset: u64,
    debouncer: ScrollDebouncer,
    expansions: BTreeMap<usize, Arc<ChildGrid>>,
    max_expansion_rows: usize,
    generation: u64,
}

impl WindowedRenderer {
    #[must_use]
    pub fn new(params: WindowParams, debounce: Duration, max_expansion_rows: usize) -> Self {
        Self {
            params,
            scroll_offset: 0,
            debouncer: ScrollDebouncer::new(debounce),
            expansions: BTreeMap::new(),
            max_expansion_rows,
            generation: 0,
        }
    }

    #[must_use]
    pub fn params(&self) -> WindowParams {
        self.params
    }

    #[must_use]
    pub fn scroll_offset(&self) -> u64 {
        self.scroll_offset
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_viewport_rows(&mut self, viewport_rows: usize) {
        self.params.viewport_rows = viewport_rows.max(1);
    }

    pub fn on_scroll(&mut self, scroll_offset: u64, now: Instant) {
        self.debouncer.schedule(scroll_offset, now);
    }

    /// Applies a due scroll; `true` means the caller should re-render.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(offset) = self.debouncer.poll(now) else {
            return false;
        };
        let changed = offset != self.scroll_offset;
        self.scroll_offset = offset;
        changed
    }

    /// Scrolls to the top, dropping pending scrolls and all expansions.
    pub fn reset_to_top(&mut self) {
        self.debouncer.cancel();
        self.scroll_offset = 0;
        if !self.expansions.is_empty() {
            debug!(count = self.expansions.len(), "discarding row expansions");
        }
        self.expansions.clear();
    }

    /// Scrolls the minimum amount that brings `position` into the viewport.
    pub fn scroll_into_view(&mut self, position: usize) {
        let row_height = u64::from(self.params.row_height.max(1));
        let first_visible = usize::try_from(self.scroll_offset / row_height).unwrap_or(usize::MAX);
        let viewport = self.params.viewport_rows.max(1);
        let target = if position < first_visible {
            position
        } else if position >= first_visible + viewport {
            position + 1 - viewport
        } else {
            return;
        };
        self.debouncer.cancel();
        self.scroll_offset = u64::try_from(target).unwrap_or(u64::MAX) * row_height;
    }

    pub fn attach_expansion(&mut self, position: usize, child: Arc<ChildGrid>) {
        self.expansions.insert(position, child);
    }

    pub fn detach_expansion(&mut self, position: usize) -> Option<Arc<ChildGrid>> {
        self.expansions.remove(&position)
    }

    #[must_use]
    pub fn expansion(&self, position: usize) -> Option<&Arc<ChildGrid>> {
        self.expansions.get(&position)
    }

    #[must_use]
    pub fn expansion_count(&self) -> usize {
        self.expansions.len()
    }

    #[must_use]
    pub fn current_range(&self, total_rows: usize) -> Range<usize> {
        visible_range(self.scroll_offset, self.params, total_rows)
    }

    /// Lays out the visible slice. Attached child grids are re-used by
    /// reference, so a redraw never rebuilds them.
    pub fn render(&mut self, total_rows: usize) -> WindowFrame {
        let range = self.current_range(total_rows);
        let mut lines = Vec::with_capacity(range.len() + self.expansions.len());
        for position in range.clone() {
            lines.push(WindowLine::Row { position });
            if let Some(child) = self.expansions.get(&position) {
                lines.push(WindowLine::Expansion {
                    parent_position: position,
                    child: Arc::clone(child),
                    height: child.display_height(self.max_expansion_rows),
                });
            }
        }
        self.generation = self.generation.wrapping_add(1);
        WindowFrame {
            range,
            lines,
            generation: self.generation,
        }
    }
}
