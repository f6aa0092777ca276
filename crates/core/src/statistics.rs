use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};

use crate::classifier::{parse_date, ValueKind};
use crate::value::CellValue;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionStats {
    pub count: usize,
    pub null_count: usize,
    pub detail: StatsDetail,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum StatsDetail {
    #[default]
    Empty,
    Numeric {
        sum: f64,
        avg: f64,
        min: f64,
        max: f64,
    },
    Text {
        distinct: usize,
        min_length: usize,
        max_length: usize,
    },
    Boolean {
        true_count: usize,
        false_count: usize,
    },
    Date {
        min: NaiveDateTime,
        second_min: Option<NaiveDateTime>,
        max: NaiveDateTime,
        range_days: i64,
    },
    Distinct {
        distinct: usize,
    },
}

/// Dates that drivers and legacy schemas use as "no value" placeholders.
#[must_use]
pub fn is_sentinel_date(value: &NaiveDateTime) -> bool {
    value.date() <= NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// `single_column_kind` is set only when exactly one whole column is selected.
#[must_use]
pub fn compute_stats(values: &[CellValue], single_column_kind: Option<ValueKind>) -> SelectionStats {
    let count = values.len();
    let null_count = values.iter().filter(|value| value.is_null()).count();
    if count == 0 {
        return SelectionStats::default();
    }

    let non_null = values.iter().filter(|value| !value.is_null());
    let detail = match single_column_kind {
        Some(ValueKind::Number) => numeric_stats(non_null),
        Some(ValueKind::String) => text_stats(non_null),
        Some(ValueKind::Boolean) => boolean_stats(non_null),
        Some(ValueKind::Date) => date_stats(non_null),
        Some(ValueKind::Null) | None => None,
    }
    .unwrap_or_else(|| StatsDetail::Distinct {
        distinct: distinct_count(values),
    });

    SelectionStats {
        count,
        null_count,
        detail,
    }
}

fn distinct_count(values: &[CellValue]) -> usize {
    values
        .iter()
        .filter(|value| !value.is_null())
        .map(CellValue::display_text)
        .collect::<BTreeSet<_>>()
        .len()
}

fn numeric_stats<'a>(values: impl Iterator<Item = &'a CellValue>) -> Option<StatsDetail> {
    let numbers = values.filter_map(CellValue::as_f64).collect::<Vec<_>>();
    if numbers.is_empty() {
        return None;
    }
    let sum: f64 = numbers.iter().sum();
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    #[allow(clippy::cast_precision_loss)]
    let avg = sum / numbers.len() as f64;
    Some(StatsDetail::Numeric { sum, avg, min, max })
}

fn text_stats<'a>(values: impl Iterator<Item = &'a CellValue>) -> Option<StatsDetail> {
    let texts = values.map(CellValue::display_text).collect::<Vec<_>>();
    let lengths = texts.iter().map(|text| text.chars().count());
    let min_length = lengths.clone().min()?;
    let max_length = lengths.max()?;
    Some(StatsDetail::Text {
        distinct: texts.iter().collect::<BTreeSet<_>>().len(),
        min_length,
        max_length,
    })
}

fn boolean_stats<'a>(values: impl Iterator<Item = &'a CellValue>) -> Option<StatsDetail> {
    let mut true_count = 0;
    let mut false_count = 0;
    for value in values {
        match value.as_bool() {
            Some(true) => true_count += 1,
            Some(false) => false_count += 1,
            None => {}
        }
    }
    (true_count + false_count > 0).then_some(StatsDetail::Boolean {
        true_count,
        false_count,
    })
}

fn date_stats<'a>(values: impl Iterator<Item = &'a CellValue>) -> Option<StatsDetail> {
    let dates = values
        .filter_map(|value| value.as_str().and_then(parse_date))
        .collect::<BTreeSet<_>>();
    let min = *dates.first()?;
    let max = *dates.last()?;
    let second_min = dates
        .iter()
        .skip(1)
        .find(|date| !is_sentinel_date(date))
        .copied();
    Some(StatsDetail::Date {
        min,
        second_min,
        max,
        range_days: (max - min).num_days(),
    })
}

#[cfg(test)]
mod tests {
    use super::{compute_stats, StatsDetail};
    use crate::classifier::{parse_date, ValueKind};
    use crate::value::CellValue;

    #[test]
    fn numeric_column_reports_sum_avg_min_max() {
        let values = [CellValue::Int(2), CellValue::Null, CellValue::Float(4.0)];
        let stats = compute_stats(&values, Some(ValueKind::Number));

        assert_eq!(stats.count, 3);
        assert_eq!(stats.null_count, 1);
        assert_eq!(
            stats.detail,
            StatsDetail::Numeric {
                sum: 6.0,
                avg: 3.0,
                min: 2.0,
                max: 4.0
            }
        );
    }

    #[test]
    fn text_column_reports_distinct_and_lengths() {
        let values = [
            CellValue::text("Ann"),
            CellValue::text("Ann"),
            CellValue::text("Robert"),
        ];
        let stats = compute_stats(&values, Some(ValueKind::String));
        assert_eq!(
            stats.detail,
            StatsDetail::Text {
                distinct: 2,
                min_length: 3,
                max_length: 6
            }
        );
    }

    #[test]
    fn boolean_column_counts_each_side() {
        let values = [CellValue::Bool(true), CellValue::Int(0), CellValue::Bool(true)];
        let stats = compute_stats(&values, Some(ValueKind::Boolean));
        assert_eq!(
            stats.detail,
            StatsDetail::Boolean {
                true_count: 2,
                false_count: 1
            }
        );
    }

    #[test]
    fn date_column_skips_sentinels_for_second_min() {
        let values = [
            CellValue::text("1900-01-01"),
            CellValue::text("2024-03-10"),
            CellValue::text("2024-03-01"),
        ];
        let stats = compute_stats(&values, Some(ValueKind::Date));
        let StatsDetail::Date {
            min,
            second_min,
            max,
            range_days,
        } = stats.detail
        else {
            panic!("expected date stats, got {:?}", stats.detail);
        };
        assert_eq!(Some(min), parse_date("1900-01-01"));
        assert_eq!(second_min, parse_date("2024-03-01"));
        assert_eq!(Some(max), parse_date("2024-03-10"));
        assert!(range_days > 45_000);
    }

    #[test]
    fn mixed_selection_only_counts_distinct_values() {
        let values = [
            CellValue::Int(1),
            CellValue::text("1"),
            CellValue::text("x"),
            CellValue::Null,
        ];
        let stats = compute_stats(&values, None);
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.detail, StatsDetail::Distinct { distinct: 2 });
    }

    #[test]
    fn empty_selection_has_no_detail() {
        let stats = compute_stats(&[], None);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.detail, StatsDetail::Empty);
    }
}
