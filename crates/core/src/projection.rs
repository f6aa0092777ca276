use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value::{CellValue, RowRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub column: String,
    pub direction: SortDirection,
}

/// At most one active sort column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortSpec {
    active: Option<SortState>,
}

impl SortSpec {
    #[must_use]
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            active: Some(SortState {
                column: column.into(),
                direction: SortDirection::Ascending,
            }),
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&SortState> {
        self.active.as_ref()
    }

    /// ASC -> DESC -> none on the active column; any other column restarts at ASC.
    pub fn cycle(&mut self, column: &str) -> Option<&SortState> {
        self.active = match self.active.take() {
            Some(state) if state.column == column => match state.direction {
                SortDirection::Ascending => Some(SortState {
                    direction: SortDirection::Descending,
                    ..state
                }),
                SortDirection::Descending => None,
            },
            _ => Some(SortState {
                column: column.to_string(),
                direction: SortDirection::Ascending,
            }),
        };
        self.active.as_ref()
    }

    pub fn clear(&mut self) {
        self.active = None;
    }
}

/// Per-column allow-lists of literal display values, combined with AND.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSet {
    allowed: BTreeMap<String, BTreeSet<String>>,
}

impl FilterSet {
    pub fn set_allowed<I, S>(&mut self, column: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed
            .insert(column.into(), values.into_iter().map(Into::into).collect());
    }

    pub fn clear_column(&mut self, column: &str) -> bool {
        self.allowed.remove(column).is_some()
    }

    pub fn clear(&mut self) {
        self.allowed.clear();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.allowed.is_empty()
    }

    #[must_use]
    pub fn allowed(&self, column: &str) -> Option<&BTreeSet<String>> {
        self.allowed.get(column)
    }

    #[must_use]
    pub fn matches(&self, row: &RowRecord) -> bool {
        self.allowed.iter().all(|(column, values)| {
            let text = row
                .get(column)
                .map_or_else(|| CellValue::Null.display_text(), CellValue::display_text);
            values.contains(&text)
        })
    }
}

/// Filtered and sorted view over a row set, expressed as source row indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Projection {
    indices: Vec<usize>,
}

impl Projection {
    #[must_use]
    pub fn identity(row_count: usize) -> Self {
        Self {
            indices: (0..row_count).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[must_use]
    pub fn source_index(&self, position: usize) -> Option<usize> {
        self.indices.get(position).copied()
    }

    #[must_use]
    pub fn position_of(&self, source_index: usize) -> Option<usize> {
        self.indices.iter().position(|index| *index == source_index)
    }

    /// Drops the given source rows while keeping the order of the rest.
    #[must_use]
    pub fn without(mut self, excluded: &BTreeSet<usize>) -> Self {
        if !excluded.is_empty() {
            self.indices.retain(|index| !excluded.contains(index));
        }
        self
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn rows<'a>(&'a self, source: &'a [RowRecord]) -> impl Iterator<Item = &'a RowRecord> + 'a {
        self.indices.iter().filter_map(move |index| source.get(*index))
    }
}

#[must_use]
pub fn project(rows: &[RowRecord], filters: &FilterSet, sort: &SortSpec) -> Projection {
    let mut indices = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| filters.matches(row))
        .map(|(index, _)| index)
        .collect::<Vec<_>>();

    if let Some(state) = sort.active() {
        let null = CellValue::Null;
        let key = |index: usize| rows[index].get(&state.column).unwrap_or(&null);
        indices.sort_by(|left, right| {
            let ordering = compare_values(key(*left), key(*right));
            match state.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }

    Projection { indices }
}

/// Type-aware total order: NULL, then booleans (`false < true`), then numbers
/// by value across integers and floats, then text. NaN sorts after every
/// other number.
#[must_use]
pub fn compare_values(left: &CellValue, right: &CellValue) -> Ordering {
    match type_rank(left).cmp(&type_rank(right)) {
        Ordering::Equal => {}
        unequal => return unequal,
    }
    match (left, right) {
        (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
        (CellValue::Text(a), CellValue::Text(b)) => a.cmp(b),
        (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
        (CellValue::Float(a), CellValue::Float(b)) => compare_floats(*a, *b),
        (CellValue::Int(a), CellValue::Float(b)) => compare_int_float(*a, *b),
        (CellValue::Float(a), CellValue::Int(b)) => compare_int_float(*b, *a).reverse(),
        _ => Ordering::Equal,
    }
}

fn type_rank(value: &CellValue) -> u8 {
    match value {
        CellValue::Null => 0,
        CellValue::Bool(_) => 1,
        CellValue::Int(_) | CellValue::Float(_) => 2,
        CellValue::Text(_) => 3,
    }
}

fn compare_floats(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

/// Exact: large integers are never rounded through `f64`.
fn compare_int_float(int: i64, float: f64) -> Ordering {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() || float >= TWO_POW_63 {
        return Ordering::Less;
    }
    if float < -TWO_POW_63 {
        return Ordering::Greater;
    }

    let whole = float.trunc();
    #[allow(clippy::cast_possible_truncation)]
    let whole_int = whole as i64;
    match int.cmp(&whole_int) {
        Ordering::Equal => 0.0_f64
            .partial_cmp(&(float - whole))
            .unwrap_or(Ordering::Equal),
        unequal => unequal,
    }
}

/// Distinct display values of a column, in type-aware order.
#[must_use]
pub fn distinct_values(rows: &[RowRecord], column: &str) -> Vec<String> {
    let null = CellValue::Null;
    let mut values = rows
        .iter()
        .map(|row| row.get(column).unwrap_or(&null))
        .collect::<Vec<_>>();
    values.sort_by(|left, right| compare_values(left, right));

    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .map(CellValue::display_text)
        .filter(|text| seen.insert(text.clone()))
        .collect()
}
